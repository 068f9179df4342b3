use std::net::SocketAddr;
use std::path::Path;

use atomflow_core::config::AppConfig;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub async fn run_doctor(config: &AppConfig) {
    let mut checks = Vec::new();

    // 1. Definition, tool and prompt directories exist
    checks.push(check_dir("Workflows", &config.engine.workflows_dir));
    checks.push(check_dir("Agents", &config.engine.agents_dir));
    checks.push(check_dir("Tools", &config.engine.tools_dir));
    checks.push(check_dir("Prompts", &config.engine.prompts_dir));

    // 2. Model server reachable
    checks.push(check_model(config).await);

    // 3. Graph store opens and answers
    checks.push(check_graph(config).await);

    // 4. Script interpreter on PATH
    checks.push(check_interpreter(config));

    // 5. Cache declared
    checks.push(check_cache(config));

    // 6. Gateway bind address parseable
    checks.push(check_gateway(config));

    // Print results
    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_dir(label: &str, dir: &str) -> CheckResult {
    let path = Path::new(dir);
    if path.is_dir() {
        CheckResult {
            label: label.into(),
            ok: true,
            detail: format!("{}", path.display()),
        }
    } else {
        CheckResult {
            label: label.into(),
            ok: false,
            detail: format!("{} (does not exist)", path.display()),
        }
    }
}

async fn check_model(config: &AppConfig) -> CheckResult {
    let client = atomflow_llm::create_client(&config.model);
    match client.ping().await {
        Ok(()) => CheckResult {
            label: "Model server".into(),
            ok: true,
            detail: config.model.base_url.clone(),
        },
        Err(e) => CheckResult {
            label: "Model server".into(),
            ok: false,
            detail: format!("{}: {}", config.model.base_url, e),
        },
    }
}

async fn check_graph(config: &AppConfig) -> CheckResult {
    let store = match atomflow_graph::open_store(&config.graph) {
        Ok(store) => store,
        Err(e) => {
            return CheckResult {
                label: "Graph store".into(),
                ok: false,
                detail: e.to_string(),
            }
        }
    };
    match store.ping().await {
        Ok(()) => CheckResult {
            label: "Graph store".into(),
            ok: true,
            detail: store.name().to_string(),
        },
        Err(e) => CheckResult {
            label: "Graph store".into(),
            ok: false,
            detail: format!("{}: {}", store.name(), e),
        },
    }
}

fn check_interpreter(config: &AppConfig) -> CheckResult {
    let Some(ref interpreter) = config.scripts.interpreter else {
        return CheckResult {
            label: "Scripts".into(),
            ok: true,
            detail: format!(
                "executed directly, timeout {}s, {} concurrent",
                config.scripts.timeout_secs, config.scripts.max_concurrent
            ),
        };
    };

    let found = Path::new(interpreter).is_file()
        || std::env::var_os("PATH").is_some_and(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(interpreter).is_file())
        });

    CheckResult {
        label: "Scripts".into(),
        ok: found,
        detail: if found {
            format!(
                "{}, timeout {}s, {} concurrent",
                interpreter, config.scripts.timeout_secs, config.scripts.max_concurrent
            )
        } else {
            format!("interpreter '{}' not found on PATH", interpreter)
        },
    }
}

fn check_cache(config: &AppConfig) -> CheckResult {
    CheckResult {
        label: "Cache".into(),
        ok: true,
        detail: match config.cache {
            Some(ref cache) => format!("{} (declared only)", cache.url),
            None => "Not configured".into(),
        },
    }
}

fn check_gateway(config: &AppConfig) -> CheckResult {
    let gateway = config.gateway.clone().unwrap_or_default();
    match gateway.bind.parse::<SocketAddr>() {
        Ok(addr) => CheckResult {
            label: "Gateway".into(),
            ok: true,
            detail: addr.to_string(),
        },
        Err(e) => CheckResult {
            label: "Gateway".into(),
            ok: false,
            detail: format!("invalid bind '{}': {}", gateway.bind, e),
        },
    }
}
