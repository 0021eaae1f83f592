//! # Cell Configuration
//!
//! Validated settings every cell is initialized with, plus the defaults
//! shared by all cells.
//!
//! ## Usage
//!
//! ```rust
//! use cell_config::CellSettings;
//!
//! let settings = CellSettings::from_toml_str(r#"
//! cell_name = "PoolManager"
//! monitor = true
//! "#).unwrap();
//!
//! settings.log_values();
//! assert_eq!(settings.timeout.interval_ms, cell_config::timeout::INTERVAL_MS);
//! ```

pub mod defaults;
pub mod settings;

// Re-export commonly used types
pub use defaults::{cells, timeout};
pub use settings::{CellSettings, OptionValue, SettingsError, TimeoutSettings};
