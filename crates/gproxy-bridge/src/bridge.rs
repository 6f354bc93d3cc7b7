use std::sync::Arc;
use std::time::Duration;

use gproxy_common::ProxyError;
use gproxy_protocol::duplex::{RequestDescriptor, UpstreamEvent};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

use crate::process::{BrowserProcess, BrowserStatus};
use crate::queue::{MessageQueue, QueueHandle};

/// Ties the browser process, the duplex socket to its one Client Agent tab,
/// and the message queue together into the single handle the request
/// dispatch loop talks to.
pub struct Bridge {
    process: Arc<BrowserProcess>,
    queue: MessageQueue,
    outbound: Mutex<Option<mpsc::UnboundedSender<RequestDescriptor>>>,
    idle_timeout: Duration,
}

impl Bridge {
    pub fn new(process: Arc<BrowserProcess>, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            process,
            queue: MessageQueue::new(),
            outbound: Mutex::new(None),
            idle_timeout,
        })
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub async fn status(&self) -> BrowserStatus {
        self.process.status().await
    }

    pub async fn start(&self, identity_index: u32) -> std::io::Result<()> {
        self.process.launch(identity_index).await
    }

    pub async fn restart(&self, identity_index: u32) -> std::io::Result<()> {
        for request_id in self.queue.drain() {
            tracing::warn!(request_id, "dropping in-flight request for browser restart");
        }
        *self.outbound.lock().await = None;
        self.process.restart(identity_index).await
    }

    pub async fn close(&self) {
        self.process.close().await;
        *self.outbound.lock().await = None;
    }

    pub(crate) async fn attach(&self, sender: mpsc::UnboundedSender<RequestDescriptor>) {
        *self.outbound.lock().await = Some(sender);
    }

    pub(crate) async fn mark_ready(&self) {
        self.process.set_ready().await;
    }

    pub(crate) async fn detach(&self) {
        *self.outbound.lock().await = None;
        for request_id in self.queue.drain() {
            self.queue.deliver(UpstreamEvent::Error {
                request_id,
                status: 503,
                message: "client agent disconnected".to_string(),
            });
        }
    }

    /// Sends a request descriptor to the connected Client Agent and returns
    /// the queue handle that will receive its response frames. Fails fast
    /// with [`ProxyError::BrowserUnavailable`] when no agent is attached.
    pub async fn dispatch(&self, descriptor: RequestDescriptor) -> Result<QueueHandle, ProxyError> {
        let outbound = self.outbound.lock().await;
        let Some(sender) = outbound.as_ref() else {
            return Err(ProxyError::BrowserUnavailable(
                "no client agent connected".to_string(),
            ));
        };
        let handle = self.queue.register(descriptor.request_id.clone());
        sender
            .send(descriptor)
            .map_err(|_| ProxyError::Disconnected)?;
        Ok(handle)
    }

    pub async fn cancel(&self, request_id: &str) {
        let outbound = self.outbound.lock().await;
        if let Some(sender) = outbound.as_ref() {
            let _ = sender.send(RequestDescriptor::cancel(request_id));
        }
        drop(outbound);
        self.queue.retire(request_id);
    }

    /// Awaits the next frame for a request with the configured idle timeout,
    /// distinct from any per-request deadline the caller layers on top.
    pub async fn next_event(
        &self,
        handle: &mut QueueHandle,
    ) -> Result<Option<UpstreamEvent>, ProxyError> {
        match timeout(self.idle_timeout, handle.receiver.recv()).await {
            Ok(event) => Ok(event),
            Err(_) => Err(ProxyError::UpstreamTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bridge() -> Arc<Bridge> {
        let process = BrowserProcess::new(None, "./test-profile".to_string(), "http://x".to_string());
        Bridge::new(process, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn dispatch_without_attached_agent_fails_fast() {
        let bridge = test_bridge();
        let descriptor = RequestDescriptor::cancel("req-1");
        let err = bridge.dispatch(descriptor).await.unwrap_err();
        assert!(matches!(err, ProxyError::BrowserUnavailable(_)));
    }

    #[tokio::test]
    async fn dispatch_after_attach_routes_to_outbound_sender() {
        let bridge = test_bridge();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bridge.attach(tx).await;

        let descriptor = RequestDescriptor::cancel("req-2");
        let handle = bridge.dispatch(descriptor).await.unwrap();
        assert_eq!(handle.request_id, "req-2");
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn detach_errors_out_all_pending_requests() {
        let bridge = test_bridge();
        let (tx, _rx) = mpsc::unbounded_channel();
        bridge.attach(tx).await;

        let mut handle = bridge
            .dispatch(RequestDescriptor::cancel("req-3"))
            .await
            .unwrap();
        bridge.detach().await;

        match bridge.next_event(&mut handle).await {
            Ok(Some(UpstreamEvent::Error { status, .. })) => assert_eq!(status, 503),
            other => panic!("expected a 503 error frame, got {other:?}"),
        }
    }
}
