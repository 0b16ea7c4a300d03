//! The opaque session engine and the callbacks it delivers.
//!
//! The engine is owned by the loop thread. Nothing outside the loop calls it
//! directly; callers schedule work through [`crate::LoopHandle`]. The engine
//! reports progress through [`EngineCallbacks`], which queue each event onto
//! the loop so that callbacks run there, one at a time, in the order posted.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::time::Duration;

use tokio::sync::mpsc;

use cziti_core::{
    ConnectionHandle, ContextToken, EngineStatus, LogLevel, ServiceId, ServiceStatus,
};

use crate::bridge::LoopMessage;

/// Session engine driven by the event loop.
pub trait Engine: Send {
    fn version(&self) -> EngineVersion;

    /// Start initializing an identity. A non-OK return means the request was
    /// rejected outright and no init callback will follow.
    fn submit_init(&mut self, options: InitOptions) -> EngineStatus;

    /// Begin tearing down a session. Completion is reported through
    /// [`EngineCallbacks::shutdown_complete`].
    fn request_shutdown(&mut self, handle: ConnectionHandle);

    /// Current (up, down) transfer rates in bytes per second.
    fn transfer_rates(&self, handle: ConnectionHandle) -> (f64, f64);

    fn set_log_level(&mut self, level: LogLevel);

    /// Replace the engine's log sink. `None` closes the current one.
    fn set_log_sink(&mut self, sink: Option<File>);

    /// Human-readable description of a status code.
    fn status_text(&self, status: EngineStatus) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineVersion {
    pub version: String,
    pub revision: String,
    pub build_date: String,
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})[{}]", self.version, self.revision, self.build_date)
    }
}

/// How the engine aggregates its transfer-rate metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricsMode {
    #[default]
    Instant,
    Exponential,
}

/// Which service config types the engine should fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigTypes {
    #[default]
    All,
    Only(Vec<String>),
}

/// Everything the engine needs to initialize one identity.
#[derive(Debug)]
pub struct InitOptions {
    pub config: String,
    /// Controller address supplied by the caller, if any.
    pub controller: Option<String>,
    /// Returned verbatim in every callback for this identity.
    pub token: ContextToken,
    pub refresh_interval: Duration,
    pub metrics: MetricsMode,
    pub config_types: ConfigTypes,
    pub callbacks: EngineCallbacks,
}

/// A service as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub name: String,
    /// Raw JSON configs keyed by config type.
    pub configs: HashMap<String, String>,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<ServiceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            configs: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config_type: impl Into<String>, raw: impl Into<String>) -> Self {
        self.configs.insert(config_type.into(), raw.into());
        self
    }

    pub fn raw_config(&self, config_type: &str) -> Option<&str> {
        self.configs.get(config_type).map(String::as_str)
    }
}

/// Identity details reported by the engine once a session is up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityInfo {
    pub name: Option<String>,
    pub controller: Option<String>,
}

/// Result of an asynchronous identity init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Connected {
        handle: ConnectionHandle,
        identity: IdentityInfo,
    },
    Failed {
        status: EngineStatus,
    },
}

/// Callback events, dispatched on the loop thread.
#[derive(Debug)]
pub enum EngineEvent {
    Init {
        token: ContextToken,
        outcome: InitOutcome,
    },
    ServiceChanged {
        token: ContextToken,
        service: ServiceDescriptor,
        status: ServiceStatus,
    },
    ShutdownComplete {
        token: ContextToken,
    },
}

/// Sink the engine uses to report back to the loop. Cheap to clone and
/// callable from any thread.
#[derive(Clone)]
pub struct EngineCallbacks {
    tx: mpsc::UnboundedSender<LoopMessage>,
}

impl fmt::Debug for EngineCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCallbacks")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl EngineCallbacks {
    pub(crate) fn new(tx: mpsc::UnboundedSender<LoopMessage>) -> Self {
        Self { tx }
    }

    pub fn init_complete(&self, token: ContextToken, outcome: InitOutcome) {
        self.post(EngineEvent::Init { token, outcome });
    }

    pub fn service_changed(
        &self,
        token: ContextToken,
        service: ServiceDescriptor,
        status: ServiceStatus,
    ) {
        self.post(EngineEvent::ServiceChanged {
            token,
            service,
            status,
        });
    }

    pub fn shutdown_complete(&self, token: ContextToken) {
        self.post(EngineEvent::ShutdownComplete { token });
    }

    fn post(&self, event: EngineEvent) {
        if self.tx.send(LoopMessage::Engine(event)).is_err() {
            tracing::debug!("event loop has exited; dropping engine callback");
        }
    }
}
