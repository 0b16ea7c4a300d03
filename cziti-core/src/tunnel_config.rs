//! Parsing of the `ziti-tunneler-client.v1` service configuration.
//!
//! A service is eligible for local interception only when this config is
//! present and names both a hostname and a port.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Config type requested from the engine for every service.
pub const TUNNELER_CONFIG_TYPE: &str = "ziti-tunneler-client.v1";

/// Intercept target of a service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TunnelConfig {
    pub hostname: String,
    #[serde(deserialize_with = "integral_port")]
    pub port: u16,
}

/// Ports arrive as JSON numbers; `443` and `443.0` are both accepted.
fn integral_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&value) {
        return Err(D::Error::custom(format!("invalid port {value}")));
    }
    Ok(value as u16)
}

impl TunnelConfig {
    /// Parse the raw JSON attached to a service. `None` means the service
    /// carries no tunneler config.
    pub fn from_raw(raw: Option<&str>) -> Result<Self, ConfigError> {
        let raw = raw.ok_or(ConfigError::Missing {
            config_type: TUNNELER_CONFIG_TYPE,
        })?;
        let config: TunnelConfig = serde_json::from_str(raw)?;
        if config.hostname.trim().is_empty() {
            return Err(ConfigError::EmptyHostname);
        }
        Ok(config)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
