use serde_json::Value;

use atomflow_core::types::RunId;

/// Run-scoped state: the trigger input plus every completed step's output.
///
/// Outputs are append-only and addressed by position, so step `i` can only
/// ever see outputs `0..i`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    run_id: RunId,
    input_trigger: Value,
    steps: Vec<Value>,
}

impl ExecutionContext {
    pub fn new(run_id: RunId, input_trigger: Value) -> Self {
        Self {
            run_id,
            input_trigger,
            steps: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn input_trigger(&self) -> &Value {
        &self.input_trigger
    }

    /// Output of step `index`, if it has completed.
    pub fn step_output(&self, index: usize) -> Option<&Value> {
        self.steps.get(index)
    }

    pub fn push_step_output(&mut self, output: Value) {
        self.steps.push(output);
    }

    /// Number of completed steps.
    pub fn completed(&self) -> usize {
        self.steps.len()
    }
}
