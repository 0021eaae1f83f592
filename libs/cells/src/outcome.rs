//! Handler outcomes
//!
//! Every handler operation returns `Option<HandlerOutcome>`; `None` means
//! "not interested" and lets the dispatch scan continue.

use crate::reply::Reply;
use cell_types::{CacheError, CellFailure, CellMessage, Payload};
use std::fmt;

/// Result of a handler operation that took responsibility for an envelope
pub enum HandlerOutcome {
    /// Reply with this payload
    Value(Box<dyn Payload>),
    /// Domain error with an explicit return code
    DomainError(CacheError),
    /// The request carried invalid arguments
    InvalidArgument(String),
    /// Anything else that went wrong
    Unexpected(String),
    /// The handler delivers the reply itself, later
    Deferred(Box<dyn Reply>),
}

impl HandlerOutcome {
    pub fn value(payload: impl Payload) -> Self {
        HandlerOutcome::Value(Box::new(payload))
    }

    pub fn deferred(reply: impl Reply + 'static) -> Self {
        HandlerOutcome::Deferred(Box::new(reply))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        HandlerOutcome::InvalidArgument(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        HandlerOutcome::Unexpected(message.into())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, HandlerOutcome::Deferred(_))
    }

    /// Resolve into what is written into the reply, or the deferred capability
    pub fn into_completion(self) -> Result<Completion, Box<dyn Reply>> {
        match self {
            HandlerOutcome::Value(payload) => Ok(Completion::Value(payload)),
            HandlerOutcome::DomainError(err) => Ok(Completion::Error(err)),
            HandlerOutcome::InvalidArgument(message) => {
                Ok(Completion::Error(CacheError::invalid_args(message)))
            }
            HandlerOutcome::Unexpected(message) => {
                Ok(Completion::Error(CacheError::unexpected(message)))
            }
            HandlerOutcome::Deferred(reply) => Err(reply),
        }
    }
}

impl From<CacheError> for HandlerOutcome {
    fn from(err: CacheError) -> Self {
        HandlerOutcome::DomainError(err)
    }
}

/// Errors raised with `?` inside handlers: a [`CacheError`] keeps its code,
/// everything else is unexpected
impl From<anyhow::Error> for HandlerOutcome {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CacheError>() {
            Ok(cache_error) => HandlerOutcome::DomainError(cache_error),
            Err(other) => HandlerOutcome::Unexpected(format!("{:#}", other)),
        }
    }
}

impl fmt::Display for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerOutcome::Value(payload) => write!(f, "value {}", payload.kind()),
            HandlerOutcome::DomainError(err) => write!(f, "error {}", err),
            HandlerOutcome::InvalidArgument(message) => write!(f, "invalid argument {}", message),
            HandlerOutcome::Unexpected(message) => write!(f, "unexpected error {}", message),
            HandlerOutcome::Deferred(_) => write!(f, "deferred reply"),
        }
    }
}

impl fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerOutcome::Value(payload) => f.debug_tuple("Value").field(payload).finish(),
            HandlerOutcome::DomainError(err) => f.debug_tuple("DomainError").field(err).finish(),
            HandlerOutcome::InvalidArgument(m) => f.debug_tuple("InvalidArgument").field(m).finish(),
            HandlerOutcome::Unexpected(m) => f.debug_tuple("Unexpected").field(m).finish(),
            HandlerOutcome::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// A resolved, non-deferred reply body
#[derive(Debug)]
pub enum Completion {
    Value(Box<dyn Payload>),
    Error(CacheError),
}

impl Completion {
    /// Write this completion into a reply envelope.
    ///
    /// Errors go into the vehicle's error state, or replace a non-vehicle
    /// payload with a [`CellFailure`]. Values replace the payload; a vehicle
    /// value is marked as a reply.
    pub fn write_into(self, envelope: &mut CellMessage) {
        match self {
            Completion::Error(err) => match envelope.payload_mut().as_vehicle_mut() {
                Some(vehicle) => vehicle.set_failed(err.code(), err.message()),
                None => {
                    envelope.set_payload(Box::new(CellFailure::from(err)));
                }
            },
            Completion::Value(payload) => {
                envelope.set_payload(payload);
                if let Some(vehicle) = envelope.payload_mut().as_vehicle_mut() {
                    vehicle.state_mut().set_reply();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_types::{impl_vehicle, CellAddress, PayloadKind, VehicleState, VEHICLE};

    const STAT: PayloadKind = PayloadKind::new("test.stat", &VEHICLE);

    #[derive(Debug, Clone)]
    struct Stat {
        size: u64,
        state: VehicleState,
    }

    impl_vehicle!(Stat, &STAT, state);

    fn stat_envelope() -> CellMessage {
        CellMessage::new(
            CellAddress::local("pnfs"),
            Stat {
                size: 0,
                state: VehicleState::requiring_reply(),
            },
        )
    }

    #[test]
    fn test_error_mapping() {
        let cases = vec![
            (HandlerOutcome::from(CacheError::new(10001, "not found")), 10001, "not found"),
            (HandlerOutcome::invalid_argument("bad path"), CacheError::INVALID_ARGS, "bad path"),
            (HandlerOutcome::unexpected("boom"), CacheError::UNEXPECTED_SYSTEM_EXCEPTION, "boom"),
        ];

        for (outcome, code, message) in cases {
            let mut envelope = stat_envelope();
            outcome.into_completion().unwrap().write_into(&mut envelope);

            let stat = envelope.payload().downcast_ref::<Stat>().unwrap();
            let err = stat.state.error().unwrap();
            assert_eq!(err.code(), code);
            assert_eq!(err.message(), message);
            assert!(stat.state.is_reply());
        }
    }

    #[test]
    fn test_error_on_plain_payload_becomes_cell_failure() {
        let mut envelope = CellMessage::new(CellAddress::local("pnfs"), CellFailure::new(0, "req"));
        Completion::Error(CacheError::generic("broken")).write_into(&mut envelope);

        let failure = envelope.payload().downcast_ref::<CellFailure>().unwrap();
        assert_eq!(failure.code, CacheError::DEFAULT_ERROR_CODE);
        assert_eq!(failure.message, "broken");
    }

    #[test]
    fn test_vehicle_value_is_marked_reply() {
        let mut envelope = stat_envelope();
        let answer = Stat {
            size: 42,
            state: VehicleState::requiring_reply(),
        };
        HandlerOutcome::value(answer)
            .into_completion()
            .unwrap()
            .write_into(&mut envelope);

        let stat = envelope.payload().downcast_ref::<Stat>().unwrap();
        assert_eq!(stat.size, 42);
        assert!(stat.state.is_reply());
        assert!(stat.state.is_successful());
    }

    #[test]
    fn test_anyhow_conversion_keeps_domain_code() {
        let outcome: HandlerOutcome = anyhow::Error::new(CacheError::timeout("slow")).into();
        assert!(matches!(outcome, HandlerOutcome::DomainError(ref e) if e.code() == CacheError::TIMEOUT));

        let outcome: HandlerOutcome = anyhow::anyhow!("disk full").into();
        assert!(matches!(outcome, HandlerOutcome::Unexpected(ref m) if m == "disk full"));
    }
}
