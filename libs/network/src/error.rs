//! Transport Error Types
//!
//! Routing failures are modelled only at the "no route to destination"
//! granularity. A failed send hands the envelope back to the caller inside
//! [`SendError`] so it can still be turned into an error reply.

use cell_types::{CellMessage, CellPath};
use thiserror::Error;

/// The current hop of an envelope cannot be reached
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Route for {destination} not found")]
pub struct NoRouteToCell {
    destination: CellPath,
}

impl NoRouteToCell {
    pub fn new(destination: CellPath) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> &CellPath {
        &self.destination
    }
}

/// Failed send carrying the undelivered envelope
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct SendError {
    message: CellMessage,
    #[source]
    reason: NoRouteToCell,
}

impl SendError {
    /// Wrap `message`, recording its destination as unreachable
    pub fn no_route(message: CellMessage) -> Self {
        let reason = NoRouteToCell::new(message.destination().clone());
        Self { message, reason }
    }

    pub fn reason(&self) -> &NoRouteToCell {
        &self.reason
    }

    pub fn into_parts(self) -> (CellMessage, NoRouteToCell) {
        (self.message, self.reason)
    }

    pub fn into_message(self) -> CellMessage {
        self.message
    }
}

/// Main substrate error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Envelope could not be routed
    #[error(transparent)]
    NoRoute(#[from] NoRouteToCell),

    /// A cell with the same name is already attached to the router
    #[error("Cell '{cell}' is already registered in domain {domain}")]
    DuplicateCell { cell: String, domain: String },

    /// Worker thread could not be spawned
    #[error("Failed to spawn thread '{name}': {source}")]
    Thread {
        name: String,
        source: std::io::Error,
    },

    /// Defined setup is unknown or failed
    #[error("Domain context '{context}' failed: {message}")]
    DomainContext { context: String, message: String },
}

/// Result type alias for substrate operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a duplicate cell error
    pub fn duplicate_cell(cell: impl Into<String>, domain: impl Into<String>) -> Self {
        Self::DuplicateCell {
            cell: cell.into(),
            domain: domain.into(),
        }
    }

    /// Create a thread spawn error
    pub fn thread(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Thread {
            name: name.into(),
            source,
        }
    }

    /// Create a domain context error
    pub fn domain_context(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DomainContext {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::NoRoute(_) => "no_route",
            TransportError::DuplicateCell { .. } => "duplicate_cell",
            TransportError::Thread { .. } => "thread",
            TransportError::DomainContext { .. } => "domain_context",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_types::{CellAddress, CellFailure};

    #[test]
    fn test_send_error_returns_envelope() {
        let msg = CellMessage::new(CellAddress::local("nowhere"), CellFailure::new(1, "x"));
        let uoid = msg.uoid();

        let err = SendError::no_route(msg);
        assert_eq!(err.to_string(), "Route for [>nowhere@local] not found");

        let (msg, reason) = err.into_parts();
        assert_eq!(msg.uoid(), uoid);
        assert_eq!(reason.destination().len(), 1);
    }

    #[test]
    fn test_error_categories() {
        let no_route = TransportError::from(NoRouteToCell::new(CellPath::default()));
        assert_eq!(no_route.category(), "no_route");
        assert_eq!(TransportError::duplicate_cell("a", "local").category(), "duplicate_cell");

        let setup = TransportError::domain_context("pool-setup", "context is not defined");
        assert_eq!(setup.category(), "domain_context");
        assert_eq!(setup.to_string(), "Domain context 'pool-setup' failed: context is not defined");
    }
}
