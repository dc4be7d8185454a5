use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::{CorrelationId, Response};

/// Tracks in-flight calls awaiting replies.
///
/// Each call owns a oneshot receiver registered here under its correlation
/// id - a single-slot rendezvous between the receive task and the waiting
/// caller. Keying by correlation id is what lets multiple calls be in
/// flight on one client at a time.
pub(super) struct PendingCalls {
    // ---
    calls: HashMap<CorrelationId, oneshot::Sender<Response>>,
}

impl PendingCalls {
    // ---

    pub fn new() -> Self {
        // ---
        Self {
            calls: HashMap::new(),
        }
    }

    /// Register a call, returning the receiver its reply will arrive on.
    pub fn register(&mut self, correlation_id: CorrelationId) -> oneshot::Receiver<Response> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.calls.insert(correlation_id, tx);
        rx
    }

    /// Deliver a reply to the matching call.
    ///
    /// Returns false when no call is waiting under this id - a stray or
    /// late reply the caller should log and drop.
    pub fn complete(&mut self, correlation_id: &CorrelationId, response: Response) -> bool {
        // ---
        if let Some(tx) = self.calls.remove(correlation_id) {
            // A failed send means the caller gave up in the instant
            // between timing out and abandoning the slot.
            let _ = tx.send(response);
            true
        } else {
            false
        }
    }

    /// Drop a call without delivering a reply.
    ///
    /// Used on timeout and on failed publish.
    pub fn abandon(&mut self, correlation_id: &CorrelationId) -> bool {
        // ---
        self.calls.remove(correlation_id).is_some()
    }

    /// Number of calls currently awaiting replies.
    pub fn len(&self) -> usize {
        // ---
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::response::Headers;
    use serde_json::json;

    fn reply() -> Response {
        Response::new(json!({ "ok": true }), Headers::new())
    }

    #[test]
    fn test_register_and_complete() {
        // ---
        let mut pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        let rx = pending.register(correlation_id.clone());
        assert_eq!(pending.len(), 1);

        assert!(pending.complete(&correlation_id, reply()));

        // Slot is cleared once the reply is delivered
        assert_eq!(pending.len(), 0);

        let received = rx.blocking_recv().unwrap();
        assert_eq!(received.body()["ok"], json!(true));
    }

    #[test]
    fn test_abandon() {
        // ---
        let mut pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        let _rx = pending.register(correlation_id.clone());
        assert_eq!(pending.len(), 1);

        assert!(pending.abandon(&correlation_id));
        assert_eq!(pending.len(), 0);

        // Second abandon finds nothing
        assert!(!pending.abandon(&correlation_id));
    }

    #[test]
    fn test_complete_unknown_id_is_a_stray() {
        // ---
        let mut pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        assert!(!pending.complete(&correlation_id, reply()));
    }

    #[test]
    fn test_complete_after_abandon_is_a_stray() {
        // ---
        let mut pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        let _rx = pending.register(correlation_id.clone());
        pending.abandon(&correlation_id);

        // A late reply after timeout must not find a slot
        assert!(!pending.complete(&correlation_id, reply()));
    }
}
