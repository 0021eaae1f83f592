//! Initialization lifecycle
//!
//! ```text
//! Created -> ConfiguringOptions -> UserInit -> DeliveryEnabled
//!                 |                   |
//!                 +-------------------+--> Failed | Killed
//! ```
//!
//! The sequence runs once per cell; a second attempt is rejected.

use crate::error::InitError;
use parking_lot::Mutex;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitState {
    Created,
    ConfiguringOptions,
    UserInit,
    /// Terminal success
    DeliveryEnabled,
    /// Initialization returned an error; the cell was killed
    Failed,
    /// Initialization was interrupted; the cell was killed
    Killed,
}

impl InitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InitState::DeliveryEnabled | InitState::Failed | InitState::Killed
        )
    }
}

impl fmt::Display for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitState::Created => "created",
            InitState::ConfiguringOptions => "configuring options",
            InitState::UserInit => "user init",
            InitState::DeliveryEnabled => "delivery enabled",
            InitState::Failed => "failed",
            InitState::Killed => "killed",
        };
        f.write_str(name)
    }
}

/// Tracks the one-shot initialization sequence of a cell
#[derive(Debug)]
pub struct LifecycleController {
    state: Mutex<InitState>,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Created),
        }
    }

    pub fn state(&self) -> InitState {
        *self.state.lock()
    }

    /// Leave `Created`; fails if initialization was already attempted
    pub fn begin(&self) -> Result<(), InitError> {
        let mut state = self.state.lock();
        if *state != InitState::Created {
            return Err(InitError::AlreadyInitialized);
        }
        *state = InitState::ConfiguringOptions;
        debug!(state = %InitState::ConfiguringOptions, "Cell initialization started");
        Ok(())
    }

    /// Move to `to` unless a terminal state has been reached
    pub fn transition(&self, to: InitState) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        debug!(from = %*state, to = %to, "Cell lifecycle transition");
        *state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_attempt() {
        let lifecycle = LifecycleController::new();
        assert_eq!(lifecycle.state(), InitState::Created);

        lifecycle.begin().unwrap();
        assert!(matches!(lifecycle.begin(), Err(InitError::AlreadyInitialized)));

        lifecycle.transition(InitState::UserInit);
        lifecycle.transition(InitState::Failed);
        lifecycle.transition(InitState::DeliveryEnabled);
        assert_eq!(lifecycle.state(), InitState::Failed);
    }
}
