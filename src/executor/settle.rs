use std::time::Duration;

use tokio::time::Instant;

use crate::config::AgentConfig;
use crate::session::DocumentHandle;

/// Bounded wait for document readiness followed by a fixed grace delay.
#[derive(Debug, Clone, Copy)]
pub struct SettlePolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub grace: Duration,
}

impl SettlePolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            timeout: config.page_load_timeout(),
            poll_interval: config.ready_poll_interval(),
            grace: config.settle_delay(),
        }
    }

    /// Returns whether the document reached `complete` before the timeout.
    /// Timing out is not an error: slow pages still get acted on.
    pub async fn wait(&self, document: &dyn DocumentHandle) -> bool {
        let deadline = Instant::now() + self.timeout;
        let ready = loop {
            match document.ready_state().await {
                Ok(state) if state == "complete" => break true,
                Ok(state) => tracing::trace!(state = %state, "document not ready"),
                // Navigations tear down the execution context; keep polling.
                Err(e) => tracing::trace!(error = %e, "readyState probe failed"),
            }
            if Instant::now() + self.poll_interval > deadline {
                tracing::debug!(timeout = ?self.timeout, "document did not settle in time");
                break false;
            }
            tokio::time::sleep(self.poll_interval).await;
        };
        tokio::time::sleep(self.grace).await;
        ready
    }
}
