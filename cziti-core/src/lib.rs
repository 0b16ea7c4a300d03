//! cziti core library: the plain data shared by the session runtime and its
//! collaborators.
//!
//! Public API surface:
//! - [`types`]: newtypes, status codes and service records
//! - [`tunnel_config`]: `ziti-tunneler-client.v1` parsing
//! - [`error`]: [`ConfigError`], [`RegistrationError`]

pub mod error;
pub mod tunnel_config;
pub mod types;

pub use error::{ConfigError, RegistrationError};
pub use tunnel_config::{TunnelConfig, TUNNELER_CONFIG_TYPE};
pub use types::{
    ChangeOperation, ConnectionHandle, ContextToken, EngineStatus, LogLevel, ServiceId,
    ServiceRecord, ServiceStatus, TransferRates,
};
