//! Error types carried by cell messages
//!
//! [`CacheError`] is the domain error a handler reports back to a requester.
//! It travels inside the vehicle's error state as a code plus message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing cell addresses and paths
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Malformed cell address: '{0}'")]
    Malformed(String),
}

/// Domain error with an explicit return code
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (rc={code})")]
pub struct CacheError {
    code: i32,
    message: String,
}

impl CacheError {
    /// Generic failure code used when nothing more specific applies
    pub const DEFAULT_ERROR_CODE: i32 = 666;
    /// The request carried invalid arguments
    pub const INVALID_ARGS: i32 = 22;
    /// A handler failed in a way it did not anticipate
    pub const UNEXPECTED_SYSTEM_EXCEPTION: i32 = 10000;
    /// The request did not receive a reply in time
    pub const TIMEOUT: i32 = 10011;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error with [`Self::DEFAULT_ERROR_CODE`]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_ERROR_CODE, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_ARGS, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(Self::UNEXPECTED_SYSTEM_EXCEPTION, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Self::TIMEOUT, message)
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::new(10001, "File not found");
        assert_eq!(err.to_string(), "File not found (rc=10001)");
        assert_eq!(CacheError::invalid_args("x").code(), CacheError::INVALID_ARGS);
    }
}
