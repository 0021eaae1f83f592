//! Substrate interfaces consumed by the dispatch core

use crate::error::{Result, SendError};
use cell_types::{CellAddress, CellMessage};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::Span;

/// Anything that can put an envelope on the message bus
pub trait CellEndpoint: Send + Sync {
    /// Route `message` to its current hop.
    ///
    /// On failure the envelope is handed back inside the error.
    fn send_message(&self, message: CellMessage) -> std::result::Result<(), SendError>;
}

/// Per-cell services provided by the substrate
pub trait CellNucleus: CellEndpoint {
    fn cell_name(&self) -> &str;

    fn address(&self) -> &CellAddress;

    /// Diagnostic context every log line of this cell is attributed to
    fn diagnostic_span(&self) -> Span;

    /// Spawn a named thread that runs `task` inside the cell's diagnostic span
    fn new_thread(&self, name: &str, task: Box<dyn FnOnce() + Send>) -> Result<JoinHandle<()>>;

    /// Expire outstanding requests whose timeout has passed
    fn update_wait_queue(&self);

    /// Enable message delivery to the cell
    fn start(&self);

    /// Stop the cell and detach it from the bus
    fn kill(&self);

    fn set_cell_class(&self, class: &str);

    /// Run the named domain setup for this cell
    fn execute_domain_context(&self, name: &str) -> Result<()>;

    /// Endpoint handle that outlives borrowed access to the nucleus
    fn endpoint(&self) -> Arc<dyn CellEndpoint>;
}
