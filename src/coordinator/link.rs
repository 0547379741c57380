// MonitorLink - request/response to the capture context with one bounded retry
//
// A request to a context that has gone away is retried exactly once: close
// whatever is left, create a fresh context, wait `reconnect_delay`, resend.
// Timeouts and other errors are not retried.

use std::sync::Arc;
use std::time::Duration;

use crate::audio::CaptureHost;
use crate::error::{log_channel_error, ChannelError};
use crate::messages::{MonitorRequest, MonitorResponse};

pub struct MonitorLink {
    host: Arc<dyn CaptureHost>,
    reconnect_delay: Duration,
}

impl MonitorLink {
    pub fn new(host: Arc<dyn CaptureHost>, reconnect_delay_ms: u64) -> Self {
        Self {
            host,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
        }
    }

    pub async fn has_context(&self) -> bool {
        self.host.has_context().await
    }

    /// Create the context if missing. Returns whether one was created.
    pub async fn ensure_context(&self) -> Result<bool, ChannelError> {
        if self.host.has_context().await {
            return Ok(false);
        }
        self.host.create_context().await?;
        Ok(true)
    }

    pub async fn close(&self) {
        self.host.close_context().await;
    }

    pub async fn request(&self, request: MonitorRequest) -> Result<MonitorResponse, ChannelError> {
        self.ensure_context().await?;

        match self.host.send(request.clone()).await {
            Err(err) if err.is_disconnect() => {
                log::warn!(
                    "[MonitorLink] {} lost the capture context, recreating once",
                    request.name()
                );
                self.host.close_context().await;
                self.host.create_context().await?;
                tokio::time::sleep(self.reconnect_delay).await;
                self.host.send(request).await.inspect_err(|err| {
                    log_channel_error(err, "monitor_link_retry");
                })
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyCaptureHost;

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_retried_once_after_recreate() {
        let host = Arc::new(FlakyCaptureHost::new());
        host.disconnect_next_sends(1);
        let link = MonitorLink::new(host.clone(), 1000);

        let started = tokio::time::Instant::now();
        assert_eq!(link.request(MonitorRequest::Ping).await, Ok(MonitorResponse::Pong));
        assert_eq!(host.creates(), 2);
        assert_eq!(host.closes(), 1);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_disconnect_is_surfaced() {
        let host = Arc::new(FlakyCaptureHost::new());
        host.disconnect_next_sends(2);
        let link = MonitorLink::new(host.clone(), 10);

        let err = link.request(MonitorRequest::Ping).await.unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(host.sends(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_retried() {
        let host = Arc::new(FlakyCaptureHost::new());
        host.time_out_next_sends(1);
        let link = MonitorLink::new(host.clone(), 10);

        let err = link.request(MonitorRequest::Ping).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { .. }));
        assert_eq!(host.sends(), 1);
        assert_eq!(host.creates(), 1);
    }
}
