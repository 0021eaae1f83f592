//! Deferred replies
//!
//! A handler that cannot answer synchronously returns
//! [`HandlerOutcome::Deferred`]. The engine reverts the envelope and hands
//! the `(endpoint, envelope)` pair to the [`Reply`]; from then on the reply
//! alone is responsible for delivery.

use crate::outcome::HandlerOutcome;
use cell_network::CellEndpoint;
use cell_types::{CacheError, CellMessage, Payload};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Capability to deliver a reply later, from any thread
pub trait Reply: Send {
    /// Take ownership of the reverted reply envelope and its endpoint
    fn deliver(self: Box<Self>, endpoint: Arc<dyn CellEndpoint>, envelope: CellMessage);
}

impl std::fmt::Debug for dyn Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Reply")
    }
}

/// Send a completed outcome on an already reverted envelope
pub(crate) fn send_outcome(endpoint: Arc<dyn CellEndpoint>, mut envelope: CellMessage, outcome: HandlerOutcome) {
    match outcome.into_completion() {
        Ok(completion) => {
            completion.write_into(&mut envelope);
            if let Err(err) = endpoint.send_message(envelope) {
                error!("Cannot deliver reply: No route to {}", err.reason().destination());
            }
        }
        Err(reply) => reply.deliver(endpoint, envelope),
    }
}

#[derive(Default)]
struct ReplySlot {
    target: Option<(Arc<dyn CellEndpoint>, CellMessage)>,
    outcome: Option<HandlerOutcome>,
}

impl ReplySlot {
    /// Both halves, once the envelope and the outcome have arrived
    fn take_ready(&mut self) -> Option<(Arc<dyn CellEndpoint>, CellMessage, HandlerOutcome)> {
        if self.target.is_some() && self.outcome.is_some() {
            let (endpoint, envelope) = self.target.take()?;
            let outcome = self.outcome.take()?;
            return Some((endpoint, envelope, outcome));
        }
        None
    }
}

/// Deferred reply completed through a [`ReplyCompleter`].
///
/// Whichever happens last, the engine's hand-off or the completion, sends
/// the reply; neither side blocks.
pub struct FutureReply {
    slot: Arc<Mutex<ReplySlot>>,
}

/// Completing half of a [`FutureReply`]
pub struct ReplyCompleter {
    slot: Arc<Mutex<ReplySlot>>,
    completed: bool,
}

impl FutureReply {
    pub fn channel() -> (FutureReply, ReplyCompleter) {
        let slot = Arc::new(Mutex::new(ReplySlot::default()));
        (
            FutureReply {
                slot: Arc::clone(&slot),
            },
            ReplyCompleter {
                slot,
                completed: false,
            },
        )
    }
}

impl Reply for FutureReply {
    fn deliver(self: Box<Self>, endpoint: Arc<dyn CellEndpoint>, envelope: CellMessage) {
        let ready = {
            let mut slot = self.slot.lock();
            slot.target = Some((endpoint, envelope));
            slot.take_ready()
        };
        match ready {
            Some((endpoint, envelope, outcome)) => send_outcome(endpoint, envelope, outcome),
            None => debug!("Deferred reply waiting for completion"),
        }
    }
}

impl ReplyCompleter {
    /// Complete the reply with any outcome
    pub fn complete(mut self, outcome: HandlerOutcome) {
        self.completed = true;
        let ready = {
            let mut slot = self.slot.lock();
            slot.outcome = Some(outcome);
            slot.take_ready()
        };
        if let Some((endpoint, envelope, outcome)) = ready {
            send_outcome(endpoint, envelope, outcome);
        }
    }

    pub fn reply(self, payload: impl Payload) {
        self.complete(HandlerOutcome::value(payload));
    }

    pub fn fail(self, err: CacheError) {
        self.complete(HandlerOutcome::DomainError(err));
    }
}

impl Drop for ReplyCompleter {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Deferred reply dropped without being completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_network::SendError;
    use cell_types::{CellAddress, CellFailure};

    #[derive(Default)]
    struct RecordingEndpoint {
        sent: Mutex<Vec<CellMessage>>,
    }

    impl CellEndpoint for RecordingEndpoint {
        fn send_message(&self, message: CellMessage) -> Result<(), SendError> {
            self.sent.lock().push(message);
            Ok(())
        }
    }

    fn envelope() -> CellMessage {
        let mut msg = CellMessage::new(CellAddress::local("server"), CellFailure::new(0, "req"));
        msg.header_mut().add_source_address(CellAddress::local("client"));
        msg.revert_direction();
        msg
    }

    #[test]
    fn test_completion_after_hand_off() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let (reply, completer) = FutureReply::channel();

        Box::new(reply).deliver(endpoint.clone(), envelope());
        assert!(endpoint.sent.lock().is_empty());

        completer.reply(CellFailure::new(0, "done"));
        let sent = endpoint.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].payload().downcast_ref::<CellFailure>().unwrap().message,
            "done"
        );
    }

    #[test]
    fn test_completion_before_hand_off() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let (reply, completer) = FutureReply::channel();

        completer.fail(CacheError::new(10001, "gone"));
        assert!(endpoint.sent.lock().is_empty());

        Box::new(reply).deliver(endpoint.clone(), envelope());
        let sent = endpoint.sent.lock();
        let failure = sent[0].payload().downcast_ref::<CellFailure>().unwrap();
        assert_eq!(failure.code, 10001);
    }

    #[test]
    fn test_completion_from_another_thread() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let (reply, completer) = FutureReply::channel();
        Box::new(reply).deliver(endpoint.clone(), envelope());

        std::thread::spawn(move || completer.reply(CellFailure::new(0, "async")))
            .join()
            .unwrap();

        assert_eq!(endpoint.sent.lock().len(), 1);
    }
}
