//! Cell Dispatch Core
//!
//! Dispatch, reply correlation and forwarding engine that sits between the
//! cell transport and application handlers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   envelope   ┌──────────────────┐   outcome   ┌────────────┐
//! │   Mailbox    │─────────────▶│  ProtocolEngine  │◀────────────│  Handlers  │
//! │ (substrate)  │              │  arrived/forward │────────────▶│ (registry) │
//! └──────────────┘              └────────┬─────────┘  dispatch   └────────────┘
//!                                        │ reply / forward
//!                                        ▼
//!                               ┌──────────────────┐
//!                               │ CellEndpoint     │◀── MessageProcessingMonitor
//!                               └──────────────────┘
//!
//! CellTimer ──▶ TimeoutTask ──▶ CellNucleus::update_wait_queue
//! ```
//!
//! # Guarantees
//!
//! - At most one reply per request envelope
//! - A reply is never answered
//! - An envelope a handler forwarded itself is never forwarded again
//! - Handler contract breaches surface as [`ProtocolViolation`] for that
//!   envelope only
//!
//! # Examples
//!
//! ```rust,no_run
//! use cell_config::CellSettings;
//! use cell_dispatch::{CellTimer, DispatchCell};
//! use cell_network::{LocalCellNucleus, LocalRouter};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let router = LocalRouter::new("core");
//! let (nucleus, mailbox) = LocalCellNucleus::attach(&router, "PoolManager")?;
//! let timer = CellTimer::start("cell-timer")?;
//!
//! let cell = DispatchCell::new(Arc::new(nucleus), CellSettings::for_cell("PoolManager"), timer);
//! cell.do_init(|| Ok(()))?;
//! // tokio::spawn(async move { cell.serve(mailbox).await });
//! # drop(mailbox);
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod outcome;
pub mod registry;
pub mod reply;
pub mod scheduler;

// Re-export commonly used types
pub use cell::DispatchCell;
pub use engine::ProtocolEngine;
pub use error::{InitError, ProtocolViolation, SchedulerError};
pub use lifecycle::{InitState, LifecycleController};
pub use monitor::{KindStats, MessageProcessingMonitor};
pub use outcome::{Completion, HandlerOutcome};
pub use registry::{Capabilities, CapabilityBuilder, Chain, DispatchRegistry, MessageDispatcher, MessageReceiver};
pub use reply::{FutureReply, Reply, ReplyCompleter};
pub use scheduler::{CellTimer, TimeoutTask, TimerTask};
