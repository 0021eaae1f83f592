//! Cell addresses and multi-hop routing paths
//!
//! A [`CellPath`] is an ordered list of hops plus a cursor marking the hop
//! the envelope is currently addressed to. Forwarding moves the cursor;
//! replying reverts the path that the envelope has travelled.

use crate::errors::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain used when an address is written without `@domain`
pub const LOCAL_DOMAIN: &str = "local";

/// Address of a single cell: `cell@domain`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    cell: String,
    domain: String,
}

impl CellAddress {
    /// Create an address from its cell and domain names
    pub fn new(cell: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            domain: domain.into(),
        }
    }

    /// Create an address in the local domain
    pub fn local(cell: impl Into<String>) -> Self {
        Self::new(cell, LOCAL_DOMAIN)
    }

    pub fn cell(&self) -> &str {
        &self.cell
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn is_local(&self) -> bool {
        self.domain == LOCAL_DOMAIN
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cell, self.domain)
    }
}

impl FromStr for CellAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cell, domain) = match s.split_once('@') {
            Some((cell, domain)) => (cell, domain),
            None => (s, LOCAL_DOMAIN),
        };

        if cell.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(AddressError::Malformed(s.to_string()));
        }
        if cell.contains(':') || domain.contains(':') {
            return Err(AddressError::Malformed(s.to_string()));
        }

        Ok(Self::new(cell, domain))
    }
}

/// Ordered hop list with a cursor on the current hop
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPath {
    hops: Vec<CellAddress>,
    position: usize,
}

impl CellPath {
    /// Single-hop path
    pub fn new(address: CellAddress) -> Self {
        Self {
            hops: vec![address],
            position: 0,
        }
    }

    /// Path over the given hops, cursor on the first one
    pub fn from_hops(hops: impl IntoIterator<Item = CellAddress>) -> Self {
        Self {
            hops: hops.into_iter().collect(),
            position: 0,
        }
    }

    /// Parse a colon separated hop list such as `pool@dom:billing`
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let hops = s
            .split(':')
            .map(CellAddress::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_hops(hops))
    }

    /// Hop the envelope is currently addressed to
    pub fn current(&self) -> Option<&CellAddress> {
        self.hops.get(self.position)
    }

    /// Last hop of the path
    pub fn destination(&self) -> Option<&CellAddress> {
        self.hops.last()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn hops(&self) -> &[CellAddress] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// True when the cursor sits on the last hop
    pub fn is_final_destination(&self) -> bool {
        !self.hops.is_empty() && self.position + 1 == self.hops.len()
    }

    /// Move the cursor to the next hop.
    ///
    /// Returns `false` and leaves the path untouched when the cursor is
    /// already on the last hop.
    pub fn advance(&mut self) -> bool {
        if self.position + 1 >= self.hops.len() {
            return false;
        }
        self.position += 1;
        true
    }

    /// Append a hop at the end of the path
    pub fn add(&mut self, address: CellAddress) {
        self.hops.push(address);
    }

    /// Return path: hops in reverse order, cursor on the first
    pub fn revert(&self) -> CellPath {
        let mut hops = self.hops.clone();
        hops.reverse();
        CellPath { hops, position: 0 }
    }
}

impl From<CellAddress> for CellPath {
    fn from(address: CellAddress) -> Self {
        Self::new(address)
    }
}

impl fmt::Display for CellPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            if i == self.position {
                write!(f, ">")?;
            }
            write!(f, "{}", hop)?;
        }
        write!(f, "]")
    }
}
