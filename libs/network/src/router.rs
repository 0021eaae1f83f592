//! In-process message router
//!
//! Maps cell names of one domain to their mailboxes. Replies that answer a
//! request registered in the target cell's wait queue are handed to the
//! waiting requester instead of the mailbox.

use crate::error::{Result, SendError, TransportError};
use crate::wait_queue::WaitQueue;
use cell_types::{CellAddress, CellMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Setup routine run by [`crate::CellNucleus::execute_domain_context`]
pub type DomainSetup = Arc<dyn Fn(&CellAddress) -> anyhow::Result<()> + Send + Sync>;

/// Delivery target of one attached cell
#[derive(Clone)]
pub(crate) struct CellRoute {
    pub(crate) mailbox: mpsc::UnboundedSender<CellMessage>,
    pub(crate) wait_queue: Arc<WaitQueue>,
}

/// Router statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub total_routes: u64,
    pub failed_routes: u64,
    pub correlated_replies: u64,
}

/// Router for all cells of one domain
pub struct LocalRouter {
    domain: String,
    cells: RwLock<HashMap<String, CellRoute>>,
    contexts: RwLock<HashMap<String, DomainSetup>>,
    total_routes: AtomicU64,
    failed_routes: AtomicU64,
    correlated_replies: AtomicU64,
}

impl LocalRouter {
    pub fn new(domain: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            domain: domain.into(),
            cells: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            total_routes: AtomicU64::new(0),
            failed_routes: AtomicU64::new(0),
            correlated_replies: AtomicU64::new(0),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// True if `address` names a cell of this domain
    pub fn is_own_domain(&self, address: &CellAddress) -> bool {
        address.is_local() || address.domain() == self.domain
    }

    pub(crate) fn attach(&self, cell: &str, route: CellRoute) -> Result<()> {
        let mut cells = self.cells.write();
        if cells.contains_key(cell) {
            return Err(TransportError::duplicate_cell(cell, &self.domain));
        }
        cells.insert(cell.to_string(), route);
        info!(cell = %cell, domain = %self.domain, "Cell attached");
        Ok(())
    }

    pub(crate) fn detach(&self, cell: &str) -> bool {
        let removed = self.cells.write().remove(cell).is_some();
        if removed {
            info!(cell = %cell, domain = %self.domain, "Cell detached");
        }
        removed
    }

    /// Names of attached cells, sorted
    pub fn cell_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cells.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a named setup routine for defined cell setups
    pub fn register_context(&self, name: impl Into<String>, setup: DomainSetup) {
        self.contexts.write().insert(name.into(), setup);
    }

    pub(crate) fn context(&self, name: &str) -> Option<DomainSetup> {
        self.contexts.read().get(name).cloned()
    }

    /// Deliver `message` to its current hop on behalf of `sender`
    pub fn route(&self, sender: &CellAddress, mut message: CellMessage) -> std::result::Result<(), SendError> {
        let route = match message.header().current_hop() {
            Some(hop) if self.is_own_domain(hop) => self.cells.read().get(hop.cell()).cloned(),
            _ => None,
        };

        let route = match route {
            Some(route) if !route.mailbox.is_closed() => route,
            _ => {
                self.failed_routes.fetch_add(1, Ordering::Relaxed);
                debug!(destination = %message.destination(), "No route to cell");
                return Err(SendError::no_route(message));
            }
        };

        message.header_mut().add_source_address(sender.clone());
        self.total_routes.fetch_add(1, Ordering::Relaxed);

        let message = if message.header().is_final_destination() {
            match route.wait_queue.complete(message) {
                Some(message) => message,
                None => {
                    self.correlated_replies.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            }
        } else {
            message
        };

        route.mailbox.send(message).map_err(|mpsc::error::SendError(message)| {
            self.failed_routes.fetch_add(1, Ordering::Relaxed);
            SendError::no_route(message)
        })
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            total_routes: self.total_routes.load(Ordering::Relaxed),
            failed_routes: self.failed_routes.load(Ordering::Relaxed),
            correlated_replies: self.correlated_replies.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for LocalRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRouter")
            .field("domain", &self.domain)
            .field("cells", &self.cell_names())
            .finish()
    }
}
