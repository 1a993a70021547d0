//! Consumer Configuration Module
//!
//! Loads the consumer's settings from a TOML file with environment-specific
//! overrides and `RMDS_`-prefixed environment variables on top.
//!
//! Every field has a default, so an empty (or missing default) file is a valid
//! configuration. An empty `hosts` list selects pass-through mode: the session
//! never connects.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::reconnect::ReconnectSchedule;

/// Default location of the base configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/consumer.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RMDS";

/// Stream ids below this value are reserved for handshake streams
const RESERVED_STREAM_IDS: usize = 16;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Socket,
}

/// Book domain used when neither a symbol prefix nor the source decides one
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookDomain {
    Mbo,
    Mbp,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsumerConfig {
    /// `host:port` entries, tried in order
    pub hosts: Vec<String>,
    pub connection_type: ConnectionType,
    pub reconnect_schedule: ReconnectSchedule,
    pub connect_timeout_ms: u64,
    /// Requested ping timeout; the server may negotiate it down
    pub ping_timeout_secs: u16,
    pub max_dispatch_per_cycle: usize,
    pub max_pending_opens: usize,
    pub suppress_duplicate_recaps: bool,
    pub fake_initial_on_stale_recovery: bool,
    pub field_dictionary_path: Option<PathBuf>,
    pub enum_dictionary_path: Option<PathBuf>,
    pub user_name: String,
    pub application_id: String,
    pub position: String,
    /// Item stream ids available to subscriptions
    pub stream_capacity: usize,
    /// Service to request the dictionary from; first up service when unset
    pub dictionary_service: Option<String>,
    pub default_book_domain: BookDomain,
    /// Statistics report period; 0 disables the reporter
    pub stats_interval_secs: u64,
    pub log_level: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            connection_type: ConnectionType::Socket,
            reconnect_schedule: ReconnectSchedule::default(),
            connect_timeout_ms: 5_000,
            ping_timeout_secs: 60,
            max_dispatch_per_cycle: 200,
            max_pending_opens: 1_000,
            suppress_duplicate_recaps: false,
            fake_initial_on_stale_recovery: true,
            field_dictionary_path: None,
            enum_dictionary_path: None,
            user_name: "rmds-consumer".to_string(),
            application_id: "256".to_string(),
            position: "127.0.0.1/net".to_string(),
            stream_capacity: 256 * 1024,
            dictionary_service: None,
            default_book_domain: BookDomain::Mbp,
            stats_interval_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

impl ConsumerConfig {
    /// Load configuration from files with environment overrides
    ///
    /// An explicit `base_path` must exist; the default path is optional.
    /// Environment files live in `environments/<env>.toml` next to the base file.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let (base, required) = match base_path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut builder = Config::builder().add_source(File::from(base.as_path()).required(required));

        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(Self::environment_source());

        let config = builder.build().context("Failed to build configuration")?;
        let mut consumer: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        consumer.expand_env_vars()?;
        consumer.validate()?;
        debug!(hosts = ?consumer.hosts, "Consumer configuration loaded");
        Ok(consumer)
    }

    /// Parse configuration from TOML text, without file or environment layers
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?;
        let mut consumer: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        consumer.expand_env_vars()?;
        consumer.validate()?;
        Ok(consumer)
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("hosts")
    }

    /// Expand environment variables and `~` in hosts and dictionary paths
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for host in &mut self.hosts {
            let expanded = shellexpand::env(host).context("Failed to expand host")?;
            *host = expanded.trim().to_string();
        }
        self.hosts.retain(|h| !h.is_empty());

        for path in [&mut self.field_dictionary_path, &mut self.enum_dictionary_path]
            .into_iter()
            .flatten()
        {
            let raw = path.to_string_lossy().into_owned();
            let expanded =
                shellexpand::full(&raw).context("Failed to expand dictionary path")?;
            *path = PathBuf::from(expanded.as_ref());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_dispatch_per_cycle == 0 {
            bail!("max_dispatch_per_cycle must be at least 1");
        }
        if self.max_pending_opens == 0 {
            bail!("max_pending_opens must be at least 1");
        }
        if self.ping_timeout_secs == 0 {
            bail!("ping_timeout_secs must be at least 1");
        }
        if self.stream_capacity == 0 || self.stream_capacity > i32::MAX as usize - RESERVED_STREAM_IDS {
            bail!(
                "stream_capacity must be between 1 and {}",
                i32::MAX as usize - RESERVED_STREAM_IDS
            );
        }
        for host in &self.hosts {
            if !host.contains(':') {
                bail!("host '{}' is not in host:port form", host);
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Pass-through mode: no hosts, the session never connects
    pub fn is_pass_through(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Effective configuration rendered back to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(environment: Option<&str>) -> Result<ConsumerConfig> {
    ConsumerConfig::load(None, environment)
}
