//! Cell Network Substrate
//!
//! In-process reference implementation of the substrate the dispatch core
//! runs on: a per-domain [`LocalRouter`], per-cell [`LocalCellNucleus`]
//! handles with their [`Mailbox`], and the [`WaitQueue`] of outstanding
//! requests. There are no sockets, no discovery and no persistence; the
//! traits in [`endpoint`] are the seam a real transport plugs into.

pub mod endpoint;
pub mod error;
pub mod nucleus;
pub mod router;
pub mod wait_queue;

// Re-export commonly used types
pub use endpoint::{CellEndpoint, CellNucleus};
pub use error::{NoRouteToCell, Result, SendError, TransportError};
pub use nucleus::{LocalCellNucleus, Mailbox, NucleusState};
pub use router::{DomainSetup, LocalRouter, RouterStats};
pub use wait_queue::{ReplyResult, WaitQueue, WaitQueueStats};
