//! Dispatch Registry
//!
//! Handlers expose their capability set as a list of operations keyed by
//! [`PayloadKind`]. For an envelope, the registry walks handlers in
//! registration order and invokes the operation whose kind is the nearest
//! ancestor of the payload's runtime kind. Typed operations only match their
//! own kind; kind operations also match descendants. The first handler
//! returning an outcome ends the scan.
//!
//! ```rust
//! use cell_dispatch::{Capabilities, HandlerOutcome, MessageReceiver};
//! use cell_types::{impl_vehicle, MessageHeader, PayloadKind, VehicleState, VEHICLE};
//! use std::sync::Arc;
//!
//! const PING: PayloadKind = PayloadKind::new("example.ping", &VEHICLE);
//!
//! #[derive(Debug, Clone)]
//! struct Ping {
//!     state: VehicleState,
//! }
//! impl_vehicle!(Ping, &PING, state);
//!
//! struct Pong;
//!
//! impl Pong {
//!     fn ping(&self, _header: &mut MessageHeader, ping: &mut Ping) -> Option<HandlerOutcome> {
//!         Some(HandlerOutcome::value(ping.clone()))
//!     }
//! }
//!
//! impl MessageReceiver for Pong {
//!     fn capabilities(self: Arc<Self>) -> Capabilities {
//!         Capabilities::of(self).arrived::<Ping, _>(Pong::ping).build()
//!     }
//! }
//! ```

use crate::outcome::HandlerOutcome;
use cell_types::{CellMessage, MessageHeader, Payload, PayloadKind, PayloadType};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

type OperationFn = dyn Fn(&mut MessageHeader, &mut dyn Payload) -> Option<HandlerOutcome> + Send + Sync;

/// Which entry point an operation serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    /// Envelopes that reached their final destination
    Arrived,
    /// Envelopes passing through on their way to a later hop
    Forward,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Arrived => f.write_str("messageArrived"),
            Chain::Forward => f.write_str("messageToForward"),
        }
    }
}

/// One typed operation of a handler
#[derive(Clone)]
struct Operation {
    kind: &'static PayloadKind,
    /// Bound to one Rust type, so descendant kinds never match
    exact: bool,
    call: Arc<OperationFn>,
}

impl Operation {
    fn accepts(&self, ancestor: &PayloadKind, runtime: &PayloadKind) -> bool {
        *self.kind == *ancestor && (!self.exact || *ancestor == *runtime)
    }
}

/// Capability set of one handler, split by chain
#[derive(Clone, Default)]
pub struct Capabilities {
    arrived: Vec<Operation>,
    forward: Vec<Operation>,
}

impl Capabilities {
    /// Start building the capability set of `handler`
    pub fn of<H: Send + Sync + 'static>(handler: Arc<H>) -> CapabilityBuilder<H> {
        CapabilityBuilder {
            handler,
            capabilities: Capabilities::default(),
        }
    }

    fn chain(&self, chain: Chain) -> &[Operation] {
        match chain {
            Chain::Arrived => &self.arrived,
            Chain::Forward => &self.forward,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.forward.is_empty()
    }
}

/// Builder binding operations to a shared handler
pub struct CapabilityBuilder<H> {
    handler: Arc<H>,
    capabilities: Capabilities,
}

impl<H: Send + Sync + 'static> CapabilityBuilder<H> {
    /// Operation for envelopes that arrived, matching payloads of type `T`
    pub fn arrived<T, F>(mut self, op: F) -> Self
    where
        T: PayloadType,
        F: Fn(&H, &mut MessageHeader, &mut T) -> Option<HandlerOutcome> + Send + Sync + 'static,
    {
        let operation = self.typed(op);
        self.capabilities.arrived.push(operation);
        self
    }

    /// Operation for envelopes to forward, matching payloads of type `T`
    pub fn forward<T, F>(mut self, op: F) -> Self
    where
        T: PayloadType,
        F: Fn(&H, &mut MessageHeader, &mut T) -> Option<HandlerOutcome> + Send + Sync + 'static,
    {
        let operation = self.typed(op);
        self.capabilities.forward.push(operation);
        self
    }

    /// Operation for arrived envelopes whose payload kind descends from `kind`
    pub fn arrived_kind<F>(mut self, kind: &'static PayloadKind, op: F) -> Self
    where
        F: Fn(&H, &mut MessageHeader, &mut dyn Payload) -> Option<HandlerOutcome> + Send + Sync + 'static,
    {
        let operation = self.untyped(kind, op);
        self.capabilities.arrived.push(operation);
        self
    }

    /// Operation for envelopes to forward whose payload kind descends from `kind`
    pub fn forward_kind<F>(mut self, kind: &'static PayloadKind, op: F) -> Self
    where
        F: Fn(&H, &mut MessageHeader, &mut dyn Payload) -> Option<HandlerOutcome> + Send + Sync + 'static,
    {
        let operation = self.untyped(kind, op);
        self.capabilities.forward.push(operation);
        self
    }

    pub fn build(self) -> Capabilities {
        self.capabilities
    }

    fn typed<T, F>(&self, op: F) -> Operation
    where
        T: PayloadType,
        F: Fn(&H, &mut MessageHeader, &mut T) -> Option<HandlerOutcome> + Send + Sync + 'static,
    {
        let handler = Arc::clone(&self.handler);
        Operation {
            kind: T::KIND,
            exact: true,
            call: Arc::new(move |header: &mut MessageHeader, payload: &mut dyn Payload| {
                // Typed operations only accept their own Rust type
                let typed = payload.downcast_mut::<T>()?;
                op(&handler, header, typed)
            }),
        }
    }

    fn untyped<F>(&self, kind: &'static PayloadKind, op: F) -> Operation
    where
        F: Fn(&H, &mut MessageHeader, &mut dyn Payload) -> Option<HandlerOutcome> + Send + Sync + 'static,
    {
        let handler = Arc::clone(&self.handler);
        Operation {
            kind,
            exact: false,
            call: Arc::new(move |header: &mut MessageHeader, payload: &mut dyn Payload| {
                op(&handler, header, payload)
            }),
        }
    }
}

/// Handler object registered with a [`DispatchRegistry`]
pub trait MessageReceiver: Send + Sync + 'static {
    /// Name used in diagnostics
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Operations this handler exposes
    fn capabilities(self: Arc<Self>) -> Capabilities;
}

/// Registered handler within one chain
struct Listener {
    receiver: Arc<dyn MessageReceiver>,
    name: String,
    operations: Vec<Operation>,
    /// Runtime kind name -> index of the nearest ancestor operation
    resolved: Mutex<HashMap<&'static str, Option<usize>>>,
}

impl Listener {
    fn resolve(&self, kind: &'static PayloadKind) -> Option<usize> {
        *self.resolved.lock().entry(kind.name()).or_insert_with(|| {
            kind.lineage().find_map(|ancestor| {
                self.operations
                    .iter()
                    .position(|operation| operation.accepts(ancestor, kind))
            })
        })
    }
}

fn same_receiver(a: &Arc<dyn MessageReceiver>, b: &Arc<dyn MessageReceiver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Ordered handler list of one chain
pub struct MessageDispatcher {
    chain: Chain,
    listeners: Vec<Listener>,
}

impl MessageDispatcher {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            listeners: Vec::new(),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    fn contains(&self, receiver: &Arc<dyn MessageReceiver>) -> bool {
        self.listeners.iter().any(|l| same_receiver(&l.receiver, receiver))
    }

    fn add(&mut self, receiver: Arc<dyn MessageReceiver>, name: String, operations: Vec<Operation>) {
        self.listeners.push(Listener {
            receiver,
            name,
            operations,
            resolved: Mutex::new(HashMap::new()),
        });
    }

    fn remove(&mut self, receiver: &Arc<dyn MessageReceiver>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !same_receiver(&l.receiver, receiver));
        self.listeners.len() != before
    }

    /// Offer `envelope` to each handler in order until one takes it
    pub fn dispatch(&self, envelope: &mut CellMessage) -> Option<HandlerOutcome> {
        let kind = envelope.payload().kind();

        for listener in &self.listeners {
            let Some(index) = listener.resolve(kind) else {
                continue;
            };
            let (header, payload) = envelope.parts_mut();
            if let Some(outcome) = (listener.operations[index].call)(header, payload) {
                trace!(
                    chain = %self.chain,
                    handler = %listener.name,
                    kind = %kind,
                    "Handler produced {}",
                    outcome
                );
                return Some(outcome);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

struct Chains {
    arrived: MessageDispatcher,
    forward: MessageDispatcher,
}

impl Chains {
    fn get(&self, chain: Chain) -> &MessageDispatcher {
        match chain {
            Chain::Arrived => &self.arrived,
            Chain::Forward => &self.forward,
        }
    }
}

/// Arrived and forward chains behind one lock, mutated together
pub struct DispatchRegistry {
    chains: RwLock<Chains>,
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(Chains {
                arrived: MessageDispatcher::new(Chain::Arrived),
                forward: MessageDispatcher::new(Chain::Forward),
            }),
        }
    }

    /// Add a handler to both chains. Registering the same handler twice is a no-op.
    pub fn register(&self, receiver: Arc<dyn MessageReceiver>) -> bool {
        let name = receiver.name();
        let capabilities = Arc::clone(&receiver).capabilities();

        {
            let mut chains = self.chains.write();
            if chains.arrived.contains(&receiver) {
                return false;
            }
            chains.arrived.add(
                Arc::clone(&receiver),
                name.clone(),
                capabilities.chain(Chain::Arrived).to_vec(),
            );
            chains
                .forward
                .add(receiver, name.clone(), capabilities.chain(Chain::Forward).to_vec());
        }

        debug!(
            handler = %name,
            arrived = capabilities.arrived.len(),
            forward = capabilities.forward.len(),
            "Registered message handler"
        );
        true
    }

    /// Remove a handler from both chains
    pub fn unregister(&self, receiver: &Arc<dyn MessageReceiver>) -> bool {
        let removed = {
            let mut chains = self.chains.write();
            let removed = chains.arrived.remove(receiver);
            chains.forward.remove(receiver) || removed
        };
        if removed {
            debug!(handler = %receiver.name(), "Unregistered message handler");
        }
        removed
    }

    pub fn dispatch(&self, chain: Chain, envelope: &mut CellMessage) -> Option<HandlerOutcome> {
        self.chains.read().get(chain).dispatch(envelope)
    }

    /// Registered handler names in dispatch order
    pub fn handler_names(&self) -> Vec<String> {
        self.chains.read().arrived.listeners.iter().map(|l| l.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.chains.read().arrived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.read().arrived.is_empty()
    }

    /// Handlers registered in `chain`
    pub fn chain_len(&self, chain: Chain) -> usize {
        self.chains.read().get(chain).len()
    }
}
