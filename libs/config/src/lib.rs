//! # Feed Configuration
//!
//! Layered configuration for the RMDS consumer: a base TOML file, an optional
//! per-environment override file, then `RMDS_`-prefixed environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use feed_config::ConsumerConfig;
//!
//! let config = ConsumerConfig::load(None, Some("dev"))?;
//! let first_delay = config.reconnect_schedule.delay_for_attempt(0);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod consumer_config;
pub mod reconnect;

// Re-export commonly used types
pub use consumer_config::{
    load_config, BookDomain, ConnectionType, ConsumerConfig, DEFAULT_CONFIG_PATH, ENV_PREFIX,
};
pub use reconnect::{ReconnectSchedule, ScheduleEntry, ScheduleError};
