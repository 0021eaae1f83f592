//! Cell message envelope
//!
//! A [`CellMessage`] pairs a [`MessageHeader`] (routing paths and operation
//! ids) with a boxed [`Payload`]. The header is what handlers mutate when
//! they forward an envelope themselves or start a new conversation; the
//! dispatch engine compares it before and after dispatch to detect that.

use crate::path::{CellAddress, CellPath};
use crate::payload::Payload;
use crate::uoid::Uoid;
use std::fmt;
use std::time::{Duration, Instant};

/// Whether an envelope travels towards a responder or back to a requester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Reply,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Reply => f.write_str("reply"),
        }
    }
}

/// Routing and correlation data of an envelope
#[derive(Debug, Clone)]
pub struct MessageHeader {
    destination: CellPath,
    source: CellPath,
    uoid: Uoid,
    last_uoid: Option<Uoid>,
    is_reply: bool,
    received_at: Option<Instant>,
}

impl MessageHeader {
    pub fn new(destination: CellPath) -> Self {
        Self {
            destination,
            source: CellPath::default(),
            uoid: Uoid::new(),
            last_uoid: None,
            is_reply: false,
            received_at: None,
        }
    }

    pub fn destination(&self) -> &CellPath {
        &self.destination
    }

    pub fn destination_mut(&mut self) -> &mut CellPath {
        &mut self.destination
    }

    /// Addresses of every cell that sent this envelope, oldest first
    pub fn source(&self) -> &CellPath {
        &self.source
    }

    pub fn add_source_address(&mut self, address: CellAddress) {
        self.source.add(address);
    }

    /// Hop the envelope is currently addressed to
    pub fn current_hop(&self) -> Option<&CellAddress> {
        self.destination.current()
    }

    /// Advance the destination cursor; `false` if already on the last hop
    pub fn next_destination(&mut self) -> bool {
        self.destination.advance()
    }

    pub fn is_final_destination(&self) -> bool {
        self.destination.is_final_destination()
    }

    pub fn uoid(&self) -> Uoid {
        self.uoid
    }

    /// Replace the operation id, starting a new conversation
    pub fn set_uoid(&mut self, uoid: Uoid) {
        self.uoid = uoid;
    }

    /// Id of the request this envelope answers, set by [`Self::revert_direction`]
    pub fn last_uoid(&self) -> Option<Uoid> {
        self.last_uoid
    }

    /// Envelope-level reply marker used by the substrate for correlation
    pub fn is_reply(&self) -> bool {
        self.is_reply
    }

    /// Turn this header around so the envelope travels back to its sender.
    ///
    /// The reversed source path becomes the destination, the source is
    /// cleared and the current id moves to `last_uoid` behind a fresh one.
    pub fn revert_direction(&mut self) {
        self.destination = self.source.revert();
        self.source = CellPath::default();
        self.last_uoid = Some(self.uoid);
        self.uoid = Uoid::new();
        self.is_reply = true;
    }

    pub fn mark_received(&mut self) {
        self.received_at = Some(Instant::now());
    }

    pub fn received_at(&self) -> Option<Instant> {
        self.received_at
    }
}

/// One routed message in flight
#[derive(Debug)]
pub struct CellMessage {
    header: MessageHeader,
    payload: Box<dyn Payload>,
}

impl CellMessage {
    pub fn new(destination: impl Into<CellPath>, payload: impl Payload) -> Self {
        Self::with_boxed(destination.into(), Box::new(payload))
    }

    pub fn with_boxed(destination: CellPath, payload: Box<dyn Payload>) -> Self {
        Self {
            header: MessageHeader::new(destination),
            payload,
        }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    pub fn payload(&self) -> &dyn Payload {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> &mut dyn Payload {
        self.payload.as_mut()
    }

    /// Replace the payload, returning the previous one
    pub fn set_payload(&mut self, payload: Box<dyn Payload>) -> Box<dyn Payload> {
        std::mem::replace(&mut self.payload, payload)
    }

    pub fn into_payload(self) -> Box<dyn Payload> {
        self.payload
    }

    /// Split borrow used by handler invocation
    pub fn parts_mut(&mut self) -> (&mut MessageHeader, &mut dyn Payload) {
        (&mut self.header, self.payload.as_mut())
    }

    /// Direction derived from the payload: only a vehicle can be a reply
    pub fn direction(&self) -> Direction {
        if self.payload.is_reply_vehicle() {
            Direction::Reply
        } else {
            Direction::Request
        }
    }

    pub fn is_reply(&self) -> bool {
        self.direction() == Direction::Reply
    }

    pub fn uoid(&self) -> Uoid {
        self.header.uoid()
    }

    pub fn destination(&self) -> &CellPath {
        self.header.destination()
    }

    pub fn source(&self) -> &CellPath {
        self.header.source()
    }

    pub fn revert_direction(&mut self) {
        self.header.revert_direction();
    }

    pub fn mark_received(&mut self) {
        self.header.mark_received();
    }

    /// Time since the envelope was received locally
    pub fn age(&self) -> Option<Duration> {
        self.header.received_at().map(|at| at.elapsed())
    }
}

impl fmt::Display for CellMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CM: S={};D={};C={};O={}",
            self.header.source,
            self.header.destination,
            self.payload.kind(),
            self.header.uoid
        )?;
        if let Some(last) = self.header.last_uoid {
            write!(f, ";LO={}", last)?;
        }
        write!(f, ">")
    }
}
