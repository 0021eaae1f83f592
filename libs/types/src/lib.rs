//! # Cell Types
//!
//! Shared data model of the cell messaging runtime.
//!
//! ## Design Philosophy
//!
//! - **Explicit Paths**: Multi-hop routing is an ordered hop list with a cursor,
//!   so forwarding and replying are plain operations on a value
//! - **Static Kind Table**: Payload polymorphism is a parent chain of
//!   [`PayloadKind`] descriptors instead of runtime reflection
//! - **Vehicles**: Payloads that carry reply-required and error state embed a
//!   [`VehicleState`]
//!
//! ## Quick Start
//!
//! ```rust
//! use cell_types::{CellMessage, CellPath, CellFailure};
//!
//! let path = CellPath::parse("PoolManager@dCacheDomain:pool_1").unwrap();
//! let mut msg = CellMessage::new(path, CellFailure::new(666, "example"));
//! assert!(!msg.header().is_final_destination());
//! assert!(msg.header_mut().next_destination());
//! ```

pub mod errors;
pub mod message;
pub mod path;
pub mod payload;
pub mod uoid;

pub use errors::{AddressError, CacheError};
pub use message::{CellMessage, Direction, MessageHeader};
pub use path::{CellAddress, CellPath, LOCAL_DOMAIN};
pub use payload::{
    CellFailure, Payload, PayloadKind, PayloadType, Vehicle, VehicleState, CELL_FAILURE, OBJECT,
    VEHICLE,
};
pub use uoid::Uoid;
