//! Polymorphic message payloads
//!
//! Every payload type names a static [`PayloadKind`]. Kinds form a single
//! inheritance chain ending at [`OBJECT`], which is what lets the dispatch
//! registry pick the most specific handler operation for a payload without
//! runtime reflection.
//!
//! Payloads that carry their own request/reply semantics are *vehicles*:
//! they embed a [`VehicleState`] holding the reply-required flag, the reply
//! marker and the error state that travels back to the requester.
//!
//! ```rust
//! use cell_types::{impl_vehicle, PayloadKind, VehicleState, VEHICLE};
//!
//! pub const POOL_REQUEST: PayloadKind = PayloadKind::new("pool.request", &VEHICLE);
//! pub const POOL_FETCH: PayloadKind = PayloadKind::new("pool.fetch", &POOL_REQUEST);
//!
//! #[derive(Debug, Clone)]
//! pub struct PoolFetch {
//!     pub pnfs_id: String,
//!     state: VehicleState,
//! }
//!
//! impl_vehicle!(PoolFetch, &POOL_FETCH, state);
//! ```

use crate::errors::CacheError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Static descriptor of a payload type and its parent kind
#[derive(Debug)]
pub struct PayloadKind {
    name: &'static str,
    parent: Option<&'static PayloadKind>,
}

/// Root of every kind chain
pub const OBJECT: PayloadKind = PayloadKind::root("object");

/// Parent of all vehicle kinds
pub const VEHICLE: PayloadKind = PayloadKind::new("vehicle", &OBJECT);

/// Kind of [`CellFailure`]
pub const CELL_FAILURE: PayloadKind = PayloadKind::new("cell.failure", &OBJECT);

impl PayloadKind {
    /// Kind without a parent
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Kind derived from `parent`
    pub const fn new(name: &'static str, parent: &'static PayloadKind) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static PayloadKind> {
        self.parent
    }

    /// This kind followed by its ancestors, nearest first
    pub fn lineage(&self) -> Lineage<'_> {
        Lineage { next: Some(self) }
    }

    /// True when `self` equals `other` or descends from it
    pub fn is_a(&self, other: &PayloadKind) -> bool {
        self.lineage().any(|kind| kind == other)
    }
}

impl PartialEq for PayloadKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PayloadKind {}

impl Hash for PayloadKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Iterator over a kind and its ancestors
pub struct Lineage<'a> {
    next: Option<&'a PayloadKind>,
}

impl<'a> Iterator for Lineage<'a> {
    type Item = &'a PayloadKind;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent;
        Some(current)
    }
}

/// Application object carried by a cell message
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// Runtime kind of this payload
    fn kind(&self) -> &'static PayloadKind;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Vehicle view, if this payload carries request/reply semantics
    fn as_vehicle(&self) -> Option<&dyn Vehicle> {
        None
    }

    fn as_vehicle_mut(&mut self) -> Option<&mut dyn Vehicle> {
        None
    }
}

/// Payload types with a compile-time kind
pub trait PayloadType: Payload + Sized {
    const KIND: &'static PayloadKind;
}

impl dyn Payload {
    pub fn is<T: Payload>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Payload>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// True for vehicles whose reply marker is set
    pub fn is_reply_vehicle(&self) -> bool {
        self.as_vehicle().map(|v| v.is_reply()).unwrap_or(false)
    }
}

/// Request/reply state embedded in every vehicle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleState {
    reply_required: bool,
    is_reply: bool,
    return_code: i32,
    error_message: Option<String>,
}

impl VehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a request that expects an answer
    pub fn requiring_reply() -> Self {
        Self {
            reply_required: true,
            ..Self::default()
        }
    }

    pub fn reply_required(&self) -> bool {
        self.reply_required
    }

    pub fn set_reply_required(&mut self, required: bool) {
        self.reply_required = required;
    }

    pub fn is_reply(&self) -> bool {
        self.is_reply
    }

    pub fn set_reply(&mut self) {
        self.is_reply = true;
    }

    /// Mark as a successful reply
    pub fn set_succeeded(&mut self) {
        self.return_code = 0;
        self.error_message = None;
        self.is_reply = true;
    }

    /// Mark as a failed reply carrying `code` and `message`
    pub fn set_failed(&mut self, code: i32, message: impl Into<String>) {
        self.return_code = code;
        self.error_message = Some(message.into());
        self.is_reply = true;
    }

    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_successful(&self) -> bool {
        self.return_code == 0
    }

    /// Error state as a domain error, if failed
    pub fn error(&self) -> Option<CacheError> {
        if self.is_successful() {
            return None;
        }
        Some(CacheError::new(
            self.return_code,
            self.error_message.clone().unwrap_or_default(),
        ))
    }
}

/// Payload that encodes request/reply semantics itself
pub trait Vehicle: Send + Sync {
    fn state(&self) -> &VehicleState;

    fn state_mut(&mut self) -> &mut VehicleState;

    fn reply_required(&self) -> bool {
        self.state().reply_required()
    }

    fn is_reply(&self) -> bool {
        self.state().is_reply()
    }

    fn return_code(&self) -> i32 {
        self.state().return_code()
    }

    fn is_successful(&self) -> bool {
        self.state().is_successful()
    }

    fn set_failed(&mut self, code: i32, message: &str) {
        self.state_mut().set_failed(code, message);
    }

    fn set_succeeded(&mut self) {
        self.state_mut().set_succeeded();
    }
}

/// Error reply for payloads that cannot carry an error state themselves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFailure {
    pub code: i32,
    pub message: String,
}

impl CellFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CacheError> for CellFailure {
    fn from(err: CacheError) -> Self {
        Self::new(err.code(), err.message())
    }
}

crate::impl_payload!(CellFailure, &CELL_FAILURE);

/// Implement [`Payload`] and [`PayloadType`] for a plain payload type
#[macro_export]
macro_rules! impl_payload {
    ($type:ty, $kind:expr) => {
        impl $crate::payload::Payload for $type {
            fn kind(&self) -> &'static $crate::payload::PayloadKind {
                $kind
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }

        impl $crate::payload::PayloadType for $type {
            const KIND: &'static $crate::payload::PayloadKind = $kind;
        }
    };
}

/// Implement [`Payload`], [`PayloadType`] and [`Vehicle`] for a type
/// embedding a [`VehicleState`] in `$state`
#[macro_export]
macro_rules! impl_vehicle {
    ($type:ty, $kind:expr, $state:ident) => {
        impl $crate::payload::Payload for $type {
            fn kind(&self) -> &'static $crate::payload::PayloadKind {
                $kind
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn as_vehicle(&self) -> Option<&dyn $crate::payload::Vehicle> {
                Some(self)
            }

            fn as_vehicle_mut(&mut self) -> Option<&mut dyn $crate::payload::Vehicle> {
                Some(self)
            }
        }

        impl $crate::payload::PayloadType for $type {
            const KIND: &'static $crate::payload::PayloadKind = $kind;
        }

        impl $crate::payload::Vehicle for $type {
            fn state(&self) -> &$crate::payload::VehicleState {
                &self.$state
            }

            fn state_mut(&mut self) -> &mut $crate::payload::VehicleState {
                &mut self.$state
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL_REQUEST: PayloadKind = PayloadKind::new("pool.request", &VEHICLE);
    const POOL_FETCH: PayloadKind = PayloadKind::new("pool.fetch", &POOL_REQUEST);

    #[derive(Debug)]
    struct PoolFetch {
        state: VehicleState,
    }

    crate::impl_vehicle!(PoolFetch, &POOL_FETCH, state);

    #[test]
    fn test_lineage_is_nearest_first() {
        let names: Vec<_> = POOL_FETCH.lineage().map(|k| k.name()).collect();
        assert_eq!(names, vec!["pool.fetch", "pool.request", "vehicle", "object"]);
    }

    #[test]
    fn test_is_a() {
        assert!(POOL_FETCH.is_a(&VEHICLE));
        assert!(POOL_FETCH.is_a(&OBJECT));
        assert!(!CELL_FAILURE.is_a(&VEHICLE));
    }

    #[test]
    fn test_vehicle_view_and_downcast() {
        let mut payload: Box<dyn Payload> = Box::new(PoolFetch {
            state: VehicleState::requiring_reply(),
        });

        assert_eq!(payload.kind(), &POOL_FETCH);
        assert!(payload.is::<PoolFetch>());
        assert!(!payload.is_reply_vehicle());

        payload
            .as_vehicle_mut()
            .unwrap()
            .set_failed(CacheError::INVALID_ARGS, "bad pnfsid");
        assert!(payload.is_reply_vehicle());

        let fetch = payload.downcast_ref::<PoolFetch>().unwrap();
        let err = fetch.state.error().unwrap();
        assert_eq!(err.code(), CacheError::INVALID_ARGS);
        assert_eq!(err.message(), "bad pnfsid");
    }

    #[test]
    fn test_non_vehicle_payload() {
        let payload: Box<dyn Payload> = Box::new(CellFailure::new(1, "boom"));
        assert!(payload.as_vehicle().is_none());
        assert!(!payload.is_reply_vehicle());
        assert_eq!(payload.kind().name(), "cell.failure");
    }

    #[test]
    fn test_error_state_round_trip() {
        let mut state = VehicleState::requiring_reply();
        let original = CacheError::new(10001, "no such file");
        state.set_failed(original.code(), original.message());
        assert_eq!(state.error(), Some(original));

        state.set_succeeded();
        assert!(state.error().is_none());
        assert!(state.is_reply());
    }
}
