//! Reply/Forward Protocol Engine
//!
//! Decides for each incoming envelope whether to reply, forward, drop it or
//! report a [`ProtocolViolation`]. The engine is synchronous per envelope
//! and never retains an envelope after returning.
//!
//! ## Arrived envelopes
//!
//! The arrived chain is dispatched. An outcome for a request is turned into
//! a reply; outcomes for replies are ignored. A handler that changed the
//! operation id started a new conversation and must not have produced an
//! outcome.
//!
//! ## Envelopes to forward
//!
//! The forward chain is dispatched. An outcome is turned into a reply unless
//! the envelope is a reply, the operation id changed or a handler already
//! moved the path cursor. Without an outcome the envelope is advanced to its
//! next hop and sent on. A request that cannot be routed is answered with an
//! error reply; a reply that cannot be routed is dropped.

use crate::error::ProtocolViolation;
use crate::monitor::MessageProcessingMonitor;
use crate::outcome::HandlerOutcome;
use crate::registry::{Chain, DispatchRegistry};
use crate::reply::send_outcome;
use cell_network::CellEndpoint;
use cell_types::{CellAddress, CellMessage};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Position and address of the hop an envelope is addressed to
fn hop_of(envelope: &CellMessage) -> (usize, Option<CellAddress>) {
    let destination = envelope.destination();
    (destination.position(), destination.current().cloned())
}

pub struct ProtocolEngine {
    registry: Arc<DispatchRegistry>,
    monitor: Arc<MessageProcessingMonitor>,
    /// Endpoint of the owning cell, used for routing failure replies
    endpoint: Arc<dyn CellEndpoint>,
}

impl ProtocolEngine {
    pub fn new(
        registry: Arc<DispatchRegistry>,
        monitor: Arc<MessageProcessingMonitor>,
        endpoint: Arc<dyn CellEndpoint>,
    ) -> Self {
        Self {
            registry,
            monitor,
            endpoint,
        }
    }

    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<MessageProcessingMonitor> {
        &self.monitor
    }

    /// Process an envelope that reached its final destination
    pub fn on_arrived(&self, mut envelope: CellMessage) -> Result<(), ProtocolViolation> {
        let endpoint = self.monitor.reply_endpoint(&envelope, &self.endpoint);
        let uoid = envelope.uoid();
        let is_reply = envelope.is_reply();

        let Some(outcome) = self.registry.dispatch(Chain::Arrived, &mut envelope) else {
            trace!(uoid = %uoid, kind = %envelope.payload().kind(), "No handler interested");
            return Ok(());
        };

        if is_reply {
            trace!(uoid = %uoid, "Ignoring outcome for a reply");
            return Ok(());
        }
        if envelope.uoid() != uoid {
            return Err(ProtocolViolation::uoid_mismatch(&outcome));
        }

        self.send_reply(endpoint, envelope, outcome);
        Ok(())
    }

    /// Process an envelope passing through on its way to a later hop
    pub fn on_to_forward(&self, mut envelope: CellMessage) -> Result<(), ProtocolViolation> {
        let endpoint = self.monitor.reply_endpoint(&envelope, &self.endpoint);
        let uoid = envelope.uoid();
        let hop = hop_of(&envelope);
        let is_reply = envelope.is_reply();

        match self.registry.dispatch(Chain::Forward, &mut envelope) {
            Some(outcome) => {
                if is_reply {
                    return Err(ProtocolViolation::reply_to_reply(&outcome));
                }
                if envelope.uoid() != uoid {
                    return Err(ProtocolViolation::uoid_mismatch(&outcome));
                }
                if hop_of(&envelope) != hop {
                    return Err(ProtocolViolation::already_forwarded(&outcome));
                }
                self.send_reply(endpoint, envelope, outcome);
            }
            None if hop_of(&envelope) == hop => {
                if !envelope.header_mut().next_destination() {
                    return Err(ProtocolViolation::no_next_destination(&envelope));
                }
                trace!(uoid = %uoid, destination = %envelope.destination(), "Forwarding");

                if let Err(err) = endpoint.send_message(envelope) {
                    let (envelope, reason) = err.into_parts();
                    if is_reply {
                        warn!("Dropping message: No route to {}", envelope.destination());
                    } else {
                        self.send_reply(
                            Arc::clone(&self.endpoint),
                            envelope,
                            HandlerOutcome::unexpected(reason.to_string()),
                        );
                    }
                }
            }
            // A handler forwarded the envelope itself
            None => trace!(uoid = %uoid, "Envelope already forwarded by handler"),
        }
        Ok(())
    }

    /// Turn `envelope` around and deliver `outcome` to its sender.
    ///
    /// A vehicle that does not require a reply is only answered when the
    /// outcome is a deferred reply.
    pub fn send_reply(&self, endpoint: Arc<dyn CellEndpoint>, mut envelope: CellMessage, outcome: HandlerOutcome) {
        if let Some(vehicle) = envelope.payload().as_vehicle() {
            if !vehicle.reply_required() && !outcome.is_deferred() {
                debug!(uoid = %envelope.uoid(), "Reply not required, discarding {}", outcome);
                return;
            }
        }

        envelope.revert_direction();
        send_outcome(endpoint, envelope, outcome);
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("handlers", &self.registry.handler_names())
            .field("monitoring", &self.monitor.is_enabled())
            .finish()
    }
}
