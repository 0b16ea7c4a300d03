//! cziti session runtime: drives a single-threaded session engine on its own
//! loop thread and exposes synchronous identity loading, service change
//! events and daily log rotation to the rest of the process.
//!
//! Typical wiring:
//! 1. build an [`EventLoop`] around the engine,
//! 2. call [`log_rotation::initialize_logging`] and build a [`SessionManager`]
//!    from the loop's [`LoopHandle`],
//! 3. run the loop on a dedicated thread with the manager as dispatcher,
//! 4. call [`SessionManager::load_identity`] from any other thread.

pub mod bridge;
pub mod collaborators;
pub mod config;
mod context;
pub mod engine;
mod error;
pub mod events;
mod identity;
pub mod log_rotation;
pub mod logging;
pub mod paths;
mod reconciler;
mod session;

pub use bridge::{start, CallbackDispatcher, EventLoop, LoopHandle, Work};
pub use collaborators::{DnsRegistrar, TunnelDevice};
pub use config::RuntimeConfig;
pub use context::IdentityContext;
pub use engine::{
    ConfigTypes, Engine, EngineCallbacks, EngineEvent, EngineVersion, IdentityInfo, InitOptions,
    InitOutcome, MetricsMode, ServiceDescriptor,
};
pub use error::{InitError, SessionError};
pub use events::{EventChannel, EventReceiver, ServiceChangeEvent};
pub use log_rotation::{initialize_logging, RotationReport, RotationScheduler};
pub use paths::LogPaths;
pub use reconciler::Reconciler;
pub use session::{SessionManager, SessionManagerBuilder};
