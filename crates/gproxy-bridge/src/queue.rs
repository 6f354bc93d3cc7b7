use std::collections::HashMap;
use std::sync::Mutex;

use gproxy_protocol::duplex::UpstreamEvent;
use tokio::sync::mpsc;

/// Routes [`UpstreamEvent`] frames arriving over the duplex socket back to
/// the in-flight request that originated them. One entry per request id,
/// removed once the stream closes, errors, or is canceled.
#[derive(Default)]
pub struct MessageQueue {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<UpstreamEvent>>>,
}

#[derive(Debug)]
pub struct QueueHandle {
    pub request_id: String,
    pub receiver: mpsc::UnboundedReceiver<UpstreamEvent>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new in-flight request and returns its receiving half.
    /// Replaces any stale entry under the same id (a prior request must
    /// already have been retired by [`Self::retire`]).
    pub fn register(&self, request_id: impl Into<String>) -> QueueHandle {
        let request_id = request_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .expect("message queue mutex poisoned")
            .insert(request_id.clone(), tx);
        QueueHandle {
            request_id,
            receiver: rx,
        }
    }

    /// Delivers an event to its route. Silently dropped if the request was
    /// already retired (cancellation raced with an in-flight chunk).
    pub fn deliver(&self, event: UpstreamEvent) {
        let Some(request_id) = event.request_id() else {
            return;
        };
        let routes = self.routes.lock().expect("message queue mutex poisoned");
        if let Some(sender) = routes.get(request_id) {
            let _ = sender.send(event);
        }
    }

    pub fn retire(&self, request_id: &str) {
        self.routes
            .lock()
            .expect("message queue mutex poisoned")
            .remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.routes.lock().expect("message queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every outstanding route, used when the browser connection
    /// drops and all in-flight requests must fail together.
    pub fn drain(&self) -> Vec<String> {
        self.routes
            .lock()
            .expect("message queue mutex poisoned")
            .drain()
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_deliver_routes_to_receiver() {
        let queue = MessageQueue::new();
        let mut handle = queue.register("req-1");
        queue.deliver(UpstreamEvent::StreamClose {
            request_id: "req-1".to_string(),
        });
        let event = handle.receiver.try_recv().expect("event delivered");
        assert!(event.is_terminal());
    }

    #[test]
    fn deliver_to_unknown_request_is_a_noop() {
        let queue = MessageQueue::new();
        queue.deliver(UpstreamEvent::StreamClose {
            request_id: "missing".to_string(),
        });
        assert!(queue.is_empty());
    }

    #[test]
    fn retire_removes_the_route() {
        let queue = MessageQueue::new();
        queue.register("req-1");
        assert_eq!(queue.len(), 1);
        queue.retire("req-1");
        assert!(queue.is_empty());
    }
}
