use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use atomflow_core::config::AppConfig;
use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::event::EventBus;
use atomflow_core::traits::DefinitionLoader;
use atomflow_core::types::{ChainEvent, ChainOutcome, ChainResult, RunId};

use crate::backends::Backends;
use crate::context::ExecutionContext;
use crate::dispatcher::StepDispatcher;
use crate::loader::FileDefinitionLoader;
use crate::reference::resolve;

/// Runs workflows step by step.
///
/// Steps execute strictly in order; each output is appended to the run's
/// context before the next step starts. The first failing step aborts the
/// run and no later step is dispatched. Every run publishes exactly one
/// `RunCompleted` event carrying its outcome.
pub struct ChainExecutor {
    loader: Arc<dyn DefinitionLoader>,
    dispatcher: StepDispatcher,
    event_bus: Arc<EventBus>,
}

impl ChainExecutor {
    pub fn new(
        loader: Arc<dyn DefinitionLoader>,
        backends: Arc<Backends>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            loader,
            dispatcher: StepDispatcher::new(backends),
            event_bus,
        }
    }

    /// File-backed definitions plus backends connected from config.
    pub async fn from_config(config: &AppConfig) -> Self {
        let loader = Arc::new(FileDefinitionLoader::from_config(&config.engine));
        let backends = Arc::new(Backends::connect(config).await);
        let event_bus = Arc::new(EventBus::new(config.engine.event_capacity));
        Self::new(loader, backends, event_bus)
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn backends(&self) -> &Backends {
        self.dispatcher.backends()
    }

    pub fn loader(&self) -> &Arc<dyn DefinitionLoader> {
        &self.loader
    }

    /// Steps dispatched to a strategy across all runs.
    pub fn dispatched(&self) -> usize {
        self.dispatcher.dispatched()
    }

    /// Execute workflow `workflow_id` with `trigger` as its input.
    pub async fn run_chain(
        &self,
        workflow_id: &str,
        trigger: Value,
        cancel: CancellationToken,
    ) -> Result<ChainResult> {
        let run_id = RunId::new();

        info!(run_id = %run_id, workflow = %workflow_id, "Chain started");
        self.event_bus.publish(ChainEvent::RunStarted {
            run_id: run_id.clone(),
            workflow_id: workflow_id.to_string(),
            at: Utc::now(),
        });
        let completion = RunCompletion::new(&self.event_bus, run_id.clone(), workflow_id);

        let result = self.execute(&run_id, workflow_id, trigger, &cancel).await;
        completion.finish(&result);
        result
    }

    async fn execute(
        &self,
        run_id: &RunId,
        workflow_id: &str,
        trigger: Value,
        cancel: &CancellationToken,
    ) -> Result<ChainResult> {
        let workflow = self.loader.load_workflow(workflow_id).await?;
        let mut ctx = ExecutionContext::new(run_id.clone(), trigger);

        for (index, step) in workflow.steps.iter().enumerate() {
            let label = if step.name.is_empty() {
                format!("step {}", index + 1)
            } else {
                step.name.clone()
            };
            let in_step = |e: AtomflowError| e.in_step(index, label.clone(), step.agent.clone());

            if cancel.is_cancelled() {
                return Err(in_step(AtomflowError::Cancelled));
            }

            info!(run_id = %run_id, index, step = %label, agent = %step.agent, "Step started");
            self.event_bus.publish(ChainEvent::StepStarted {
                run_id: run_id.clone(),
                index,
                step: label.clone(),
                agent: step.agent.clone(),
            });
            let step_start = Instant::now();

            let agent = self.loader.load_agent(&step.agent).await.map_err(in_step)?;

            let output = tokio::select! {
                output = self.dispatcher.dispatch(step, &agent, &ctx, cancel.clone()) => output,
                _ = cancel.cancelled() => Err(AtomflowError::Cancelled),
            }
            .map_err(in_step)?;

            let elapsed_ms = step_start.elapsed().as_millis() as u64;
            debug!(run_id = %run_id, index, elapsed_ms, "Step completed");
            self.event_bus.publish(ChainEvent::StepCompleted {
                run_id: run_id.clone(),
                index,
                elapsed_ms,
            });

            ctx.push_step_output(output);
        }

        let report = &workflow.output_report;
        let data = match report.data {
            Some(ref v) => resolve(v, &ctx)?,
            None => Value::Null,
        };

        Ok(ChainResult {
            deliver_to: report.deliver_to.clone(),
            template: report.template.clone(),
            data,
        })
    }
}

/// Publishes the run's single `RunCompleted` event.
///
/// If the run future is dropped before `finish`, the run is reported as
/// cancelled from `Drop`.
struct RunCompletion<'a> {
    event_bus: &'a EventBus,
    run_id: RunId,
    workflow_id: String,
    start: Instant,
    finished: bool,
}

impl<'a> RunCompletion<'a> {
    fn new(event_bus: &'a EventBus, run_id: RunId, workflow_id: &str) -> Self {
        Self {
            event_bus,
            run_id,
            workflow_id: workflow_id.to_string(),
            start: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, result: &Result<ChainResult>) {
        self.finished = true;
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        let outcome = ChainOutcome::of(result);
        match result {
            Ok(_) => info!(
                run_id = %self.run_id,
                workflow = %self.workflow_id,
                elapsed_ms,
                "Chain completed"
            ),
            Err(e) => error!(
                run_id = %self.run_id,
                workflow = %self.workflow_id,
                outcome = outcome.as_str(),
                class = %e.classify(),
                elapsed_ms,
                error = %e,
                "Chain failed"
            ),
        }
        self.publish(outcome, elapsed_ms, result.as_ref().err().map(|e| e.to_string()));
    }

    fn publish(&self, outcome: ChainOutcome, elapsed_ms: u64, error: Option<String>) {
        self.event_bus.publish(ChainEvent::RunCompleted {
            run_id: self.run_id.clone(),
            workflow_id: self.workflow_id.clone(),
            outcome,
            elapsed_ms,
            error,
        });
    }
}

impl Drop for RunCompletion<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        warn!(
            run_id = %self.run_id,
            workflow = %self.workflow_id,
            elapsed_ms,
            "Chain abandoned before completion"
        );
        self.publish(
            ChainOutcome::Failed,
            elapsed_ms,
            Some(AtomflowError::Cancelled.to_string()),
        );
    }
}
