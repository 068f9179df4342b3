pub mod ollama;
pub mod retry;

use std::sync::Arc;

use atomflow_core::config::ModelConfig;
use atomflow_core::traits::ChatModel;

pub use ollama::OllamaClient;
pub use retry::RetryingClient;

/// Create the model-serving client described by the config, wrapped with
/// retries when a `[model.retry]` section is present.
pub fn create_client(config: &ModelConfig) -> Arc<dyn ChatModel> {
    let client = OllamaClient::from_config(config);
    match config.retry {
        Some(ref retry) if retry.max_retries > 0 => {
            Arc::new(RetryingClient::new(Box::new(client), retry.clone()))
        }
        _ => Arc::new(client),
    }
}
