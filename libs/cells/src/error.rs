//! Dispatch Error Types
//!
//! Protocol violations are contract breaches by a handler. They abort the
//! processing of one envelope and are reported to the delivery loop; the
//! cell keeps serving other envelopes.

use cell_config::SettingsError;
use cell_network::TransportError;
use thiserror::Error;

/// Handler misbehaviour detected while processing one envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error(
        "A reply [{reply}] was generated by a message listener, but the message UOID \
         indicates that another message listener has already replied to the message."
    )]
    UoidMismatch { reply: String },

    #[error(
        "A reply [{reply}] was generated by a message listener, but the message was \
         already a reply to which no reply can be sent."
    )]
    ReplyToReply { reply: String },

    #[error(
        "A reply [{reply}] was generated by a message listener, but the message was \
         already forwarded and thus no reply can be sent."
    )]
    AlreadyForwarded { reply: String },

    #[error(
        "A message [{envelope}] was received for forwarding, but the message contains \
         no address to forward it to."
    )]
    NoNextDestination { envelope: String },
}

impl ProtocolViolation {
    pub fn uoid_mismatch(reply: impl ToString) -> Self {
        Self::UoidMismatch {
            reply: reply.to_string(),
        }
    }

    pub fn reply_to_reply(reply: impl ToString) -> Self {
        Self::ReplyToReply {
            reply: reply.to_string(),
        }
    }

    pub fn already_forwarded(reply: impl ToString) -> Self {
        Self::AlreadyForwarded {
            reply: reply.to_string(),
        }
    }

    pub fn no_next_destination(envelope: impl ToString) -> Self {
        Self::NoNextDestination {
            envelope: envelope.to_string(),
        }
    }

    /// Get violation category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProtocolViolation::UoidMismatch { .. } => "uoid_mismatch",
            ProtocolViolation::ReplyToReply { .. } => "reply_to_reply",
            ProtocolViolation::AlreadyForwarded { .. } => "already_forwarded",
            ProtocolViolation::NoNextDestination { .. } => "no_next_destination",
        }
    }
}

/// Timer and timeout task errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Timeout task is already running for cell {cell}")]
    AlreadyStarted { cell: String },

    #[error("Timer '{name}' has been shut down")]
    TimerStopped { name: String },

    #[error("Timer period must be positive")]
    InvalidPeriod,

    #[error("Failed to start timer '{name}': {message}")]
    Startup { name: String, message: String },
}

/// Cell initialization errors
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Cell has already been initialized")]
    AlreadyInitialized,

    #[error("Invalid cell settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to start init thread: {0}")]
    Spawn(#[source] TransportError),

    #[error("Defined setup failed: {0}")]
    DefinedSetup(#[source] TransportError),

    #[error("Failed to start timeout task: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Cell initialization failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("Cell initialization was interrupted: {0}")]
    Interrupted(String),
}

impl InitError {
    /// True when initialization ended in a panic of the init thread
    pub fn is_interrupted(&self) -> bool {
        matches!(self, InitError::Interrupted(_))
    }

    /// Substrate error behind this failure, if any
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            InitError::Spawn(source) | InitError::DefinedSetup(source) => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_messages() {
        let v = ProtocolViolation::reply_to_reply("value pool.fetch");
        assert!(v.to_string().starts_with("A reply [value pool.fetch] was generated"));
        assert_eq!(v.category(), "reply_to_reply");

        let v = ProtocolViolation::no_next_destination("<CM>");
        assert!(v.to_string().contains("no address to forward it to"));
    }

    #[test]
    fn test_init_error_display() {
        let err = InitError::Failed(anyhow::anyhow!("database unavailable"));
        assert_eq!(err.to_string(), "Cell initialization failed: database unavailable");
        assert!(!err.is_interrupted());
        assert!(InitError::Interrupted("boom".into()).is_interrupted());
        assert!(err.transport_error().is_none());

        let err = InitError::DefinedSetup(TransportError::domain_context("setup", "missing"));
        assert_eq!(err.transport_error().map(|e| e.category()), Some("domain_context"));
    }
}
