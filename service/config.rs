//! Service configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The CLI applies its own flags last.

use crate::encoding::{EncodingRules, PlausibleRanges, RacePolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_MODEL_PATH: &str = "LVEF_MODEL_PATH";
pub const ENV_BIND_ADDRESS: &str = "LVEF_BIND_ADDRESS";
/// Plain `PORT`, as set by most hosting platforms.
pub const ENV_PORT: &str = "PORT";
pub const ENV_RACE_POLICY: &str = "LVEF_RACE_POLICY";
pub const ENV_ENFORCE_RANGES: &str = "LVEF_ENFORCE_RANGES";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Location of the model artifact, read once at startup.
    pub model_path: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub race_policy: RacePolicy,
    pub enforce_ranges: bool,
    pub ranges: PlausibleRanges,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.toml"),
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            race_policy: RacePolicy::default(),
            enforce_ranges: true,
            ranges: PlausibleRanges::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, so tests never have to touch
    /// the real environment.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_MODEL_PATH) {
            self.model_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup(ENV_BIND_ADDRESS) {
            self.bind_address = addr.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: ENV_PORT,
                    value: port.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(policy) = lookup(ENV_RACE_POLICY) {
            self.race_policy = policy
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    key: ENV_RACE_POLICY,
                    value: policy.clone(),
                    reason,
                })?;
        }
        if let Some(flag) = lookup(ENV_ENFORCE_RANGES) {
            self.enforce_ranges = parse_bool(&flag).ok_or_else(|| ConfigError::InvalidValue {
                key: ENV_ENFORCE_RANGES,
                value: flag.clone(),
                reason: "expected true/false, yes/no, on/off or 1/0".to_string(),
            })?;
        }
        Ok(self)
    }

    pub fn encoding_rules(&self) -> EncodingRules {
        EncodingRules {
            race_policy: self.race_policy,
            ranges: self.enforce_ranges.then_some(self.ranges),
        }
    }

    /// `host:port` string for the listener. IPv6 literals are bracketed;
    /// host names pass through for the resolver.
    pub fn listen_address(&self) -> String {
        match self.bind_address.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.bind_address, self.port),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
