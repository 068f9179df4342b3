use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use atomflow_core::config::RetryConfig;
use atomflow_core::error::{AtomflowError, Result};
use atomflow_core::traits::ChatModel;
use atomflow_core::types::{ChatMessage, ChatResponse};

/// A chat client that retries transient failures with exponential backoff.
pub struct RetryingClient {
    inner: Box<dyn ChatModel>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn ChatModel>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

/// Rate limits, server errors, timeouts and refused connections.
fn is_retryable(e: &AtomflowError) -> bool {
    match e {
        AtomflowError::ModelRequest {
            status: Some(status),
            ..
        } => *status == 429 || (500..=599).contains(status),
        AtomflowError::ModelTimeout(_) | AtomflowError::ModelUnavailable(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ChatModel for RetryingClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<ChatResponse>> {
        let model = model.to_string();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.chat(&model, messages.clone()).await {
                    Ok(reply) => return Ok(reply),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying model request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        self.inner.ping()
    }
}
