//! Cell configuration defaults
//!
//! Default values and constants shared by every cell.

/// Generic cell defaults
pub mod cells {
    /// Prefix of environment variables overriding file settings
    pub const ENV_PREFIX: &str = "CELL";

    /// Separator between nested keys in environment variable names
    pub const ENV_SEPARATOR: &str = "__";
}

/// Wait queue timeout task defaults
pub mod timeout {
    /// Delay before the first sweep (milliseconds)
    pub const INITIAL_DELAY_MS: u64 = 30_000;

    /// Period between sweeps (milliseconds)
    pub const INTERVAL_MS: u64 = 30_000;

    /// Shortest accepted period (milliseconds)
    pub const MIN_INTERVAL_MS: u64 = 10;
}
