mod doctor;

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use atomflow_core::config::AppConfig;
use atomflow_core::traits::DefinitionLoader;
use atomflow_core::types::ChainEvent;
use atomflow_engine::{ChainExecutor, FileDefinitionLoader};
use atomflow_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "atomflow", version, about = "Declarative workflow chain engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "atomflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one workflow and print its report as JSON
    Run {
        /// Workflow id
        workflow: String,
        /// Trigger input as JSON (read from stdin when omitted and piped)
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Start the HTTP gateway server
    Serve,
    /// Load workflows and their agents without running them
    Validate {
        /// Workflow ids (all workflows when empty)
        workflows: Vec<String>,
    },
    /// Run system health checks
    Doctor,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("atomflow=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "atomflow", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run { workflow, input } => {
            let trigger = read_trigger(input)?;
            let executor = ChainExecutor::from_config(&config).await;
            run_once(&executor, &workflow, trigger).await?;
        }
        Commands::Serve => {
            let gateway_config = config.gateway.clone().unwrap_or_default();
            let executor = Arc::new(ChainExecutor::from_config(&config).await);
            let status = executor.backends().status();
            if status.degraded() {
                warn!(
                    model = ?status.model,
                    graph = ?status.graph,
                    "Starting in degraded mode"
                );
            }

            info!(bind = %gateway_config.bind, "Starting gateway");
            let server = GatewayServer::new(gateway_config, executor);
            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Commands::Validate { workflows } => {
            let loader = FileDefinitionLoader::from_config(&config.engine);
            let ok = validate(&loader, workflows).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Doctor => {
            println!("Atomflow Doctor");
            println!("===============");
            doctor::run_doctor(&config).await;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Load the config file. The default path may be absent, in which case
/// built-in defaults are used; an explicit path must exist.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if path.as_os_str() != "atomflow.toml" {
        return Err(atomflow_core::error::AtomflowError::ConfigNotFound(
            path.display().to_string(),
        )
        .into());
    }
    info!("No atomflow.toml found, using defaults");
    Ok(AppConfig::default())
}

fn read_trigger(input: Option<String>) -> anyhow::Result<serde_json::Value> {
    let text = match input {
        Some(text) => text,
        None if !io::stdin().is_terminal() => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
        None => String::new(),
    };
    if text.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("trigger input is not valid JSON: {}", e))
}

async fn run_once(
    executor: &ChainExecutor,
    workflow: &str,
    trigger: serde_json::Value,
) -> anyhow::Result<()> {
    let mut rx = executor.event_bus().subscribe();

    // Spawn step progress printer
    let print_handle = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                ChainEvent::StepStarted { index, step, agent, .. } => {
                    eprintln!("[step {}: {} ({})]", index + 1, step, agent);
                }
                ChainEvent::StepCompleted { index, elapsed_ms, .. } => {
                    eprintln!("[step {}: ok in {}ms]", index + 1, elapsed_ms);
                }
                ChainEvent::RunCompleted { .. } => break,
                ChainEvent::RunStarted { .. } => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let result = executor.run_chain(workflow, trigger, cancel).await;
    print_handle.await.ok();

    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("[{}] {}", e.classify(), e);
            std::process::exit(1);
        }
    }
}

/// Load each workflow and every agent it references. Returns false when
/// anything failed to load.
async fn validate(loader: &FileDefinitionLoader, ids: Vec<String>) -> anyhow::Result<bool> {
    let ids = if ids.is_empty() {
        loader.list_workflows()?
    } else {
        ids
    };
    if ids.is_empty() {
        println!("No workflows found");
        return Ok(true);
    }

    let mut failures = 0;
    for id in &ids {
        let workflow = match loader.load_workflow(id).await {
            Ok(w) => w,
            Err(e) => {
                println!("  [!!] {}: {}", id, e);
                failures += 1;
                continue;
            }
        };

        let mut problems = Vec::new();
        for (index, step) in workflow.steps.iter().enumerate() {
            if let Err(e) = loader.load_agent(&step.agent).await {
                problems.push(format!("step {}: {}", index + 1, e));
            }
        }

        if problems.is_empty() {
            println!("  [OK] {} ({} steps)", id, workflow.steps.len());
        } else {
            println!("  [!!] {}: {}", id, problems.join("; "));
            failures += 1;
        }
    }

    println!();
    println!("  {} valid, {} invalid", ids.len() - failures, failures);
    Ok(failures == 0)
}
