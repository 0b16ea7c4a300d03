//! Per-identity session state and the token registry that resolves engine
//! callbacks back to it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use dashmap::DashMap;

use cziti_core::{ConnectionHandle, ContextToken, EngineStatus, ServiceId, ServiceRecord};

use crate::engine::IdentityInfo;
use crate::error::InitError;

const UNKNOWN_IDENTITY: &str = "<unknown>";

#[derive(Debug, Default)]
struct InitState {
    status: EngineStatus,
    error: Option<InitError>,
    identity: IdentityInfo,
}

/// State of one identity session.
///
/// Written from the loop thread only; every accessor is safe to call from
/// any thread.
#[derive(Debug)]
pub struct IdentityContext {
    config_identifier: String,
    token: ContextToken,
    configured_controller: Option<String>,
    connection: OnceLock<ConnectionHandle>,
    shutdown_requested: AtomicBool,
    init: Mutex<InitState>,
    services: DashMap<ServiceId, ServiceRecord>,
}

impl IdentityContext {
    pub(crate) fn new(config_identifier: impl Into<String>, token: ContextToken) -> Self {
        Self {
            config_identifier: config_identifier.into(),
            token,
            configured_controller: None,
            connection: OnceLock::new(),
            shutdown_requested: AtomicBool::new(false),
            init: Mutex::new(InitState::default()),
            services: DashMap::new(),
        }
    }

    pub(crate) fn with_configured_controller(mut self, controller: Option<String>) -> Self {
        self.configured_controller = controller;
        self
    }

    pub fn config_identifier(&self) -> &str {
        &self.config_identifier
    }

    pub fn token(&self) -> ContextToken {
        self.token
    }

    /// Present only once init has succeeded.
    pub fn connection_handle(&self) -> Option<ConnectionHandle> {
        self.connection.get().copied()
    }

    pub fn status(&self) -> EngineStatus {
        self.init_state().status
    }

    pub fn status_error(&self) -> Option<InitError> {
        self.init_state().error.clone()
    }

    /// Identity name reported by the engine, or `<unknown>` before init.
    pub fn name(&self) -> String {
        self.init_state()
            .identity
            .name
            .clone()
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
    }

    /// Controller reported by the engine, else the one supplied at load time.
    pub fn controller(&self) -> Option<String> {
        self.init_state()
            .identity
            .controller
            .clone()
            .or_else(|| self.configured_controller.clone())
    }

    pub fn service(&self, id: &ServiceId) -> Option<ServiceRecord> {
        self.services.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the service table, sorted by id.
    pub fn services(&self) -> Vec<ServiceRecord> {
        let mut records: Vec<ServiceRecord> =
            self.services.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub(crate) fn store_service(&self, record: ServiceRecord) {
        self.services.insert(record.id.clone(), record);
    }

    pub(crate) fn remove_service(&self, id: &ServiceId) -> Option<ServiceRecord> {
        self.services.remove(id).map(|(_, record)| record)
    }

    pub(crate) fn record_connected(&self, handle: ConnectionHandle, identity: IdentityInfo) {
        if self.connection.set(handle).is_err() {
            tracing::warn!(
                token = %self.token,
                handle = %handle,
                "init callback repeated for a connected identity; keeping the first handle",
            );
            return;
        }
        let mut state = self.init_state();
        state.status = EngineStatus::OK;
        state.error = None;
        state.identity = identity;
    }

    /// True for the first caller only.
    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.shutdown_requested.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn record_failure(&self, status: EngineStatus, error: InitError) {
        let mut state = self.init_state();
        state.status = status;
        state.error = Some(error);
    }

    fn init_state(&self) -> MutexGuard<'_, InitState> {
        self.init.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps the opaque tokens handed to the engine onto live contexts.
///
/// A token stops resolving once its context is unregistered, so callbacks
/// that arrive after teardown are recognised and dropped.
#[derive(Debug, Default)]
pub(crate) struct ContextRegistry {
    next: AtomicU64,
    live: DashMap<ContextToken, Arc<IdentityContext>>,
}

impl ContextRegistry {
    pub(crate) fn register(
        &self,
        config_identifier: &str,
        controller: Option<&str>,
    ) -> Arc<IdentityContext> {
        let token = ContextToken(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        let context = Arc::new(
            IdentityContext::new(config_identifier, token)
                .with_configured_controller(controller.map(str::to_string)),
        );
        self.live.insert(token, Arc::clone(&context));
        context
    }

    pub(crate) fn resolve(&self, token: ContextToken) -> Option<Arc<IdentityContext>> {
        self.live.get(&token).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn unregister(&self, token: ContextToken) -> Option<Arc<IdentityContext>> {
        self.live.remove(&token).map(|(_, context)| context)
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<IdentityContext>> {
        let mut contexts: Vec<Arc<IdentityContext>> =
            self.live.iter().map(|entry| Arc::clone(entry.value())).collect();
        contexts.sort_by_key(|context| context.token());
        contexts
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_handle_is_set_once() {
        let context = IdentityContext::new("alice.json", ContextToken(1));
        assert_eq!(context.connection_handle(), None);
        assert_eq!(context.name(), "<unknown>");

        context.record_connected(
            ConnectionHandle(7),
            IdentityInfo {
                name: Some("alice".to_string()),
                controller: Some("https://ctrl.example:1280".to_string()),
            },
        );
        context.record_connected(ConnectionHandle(8), IdentityInfo::default());

        assert_eq!(context.connection_handle(), Some(ConnectionHandle(7)));
        assert_eq!(context.name(), "alice");
        assert!(context.status().is_ok());
        assert_eq!(context.status_error(), None);
    }

    #[test]
    fn failure_keeps_handle_absent() {
        let context = IdentityContext::new("bob.json", ContextToken(2));
        context.record_failure(
            EngineStatus(-11),
            InitError::Rejected {
                code: EngineStatus(-11),
                message: "configuration not found".to_string(),
            },
        );

        assert_eq!(context.status(), EngineStatus(-11));
        assert_eq!(context.connection_handle(), None);
        let err = context.status_error().expect("status error");
        assert!(err.to_string().contains("configuration not found"));
    }

    #[test]
    fn unregistered_token_no_longer_resolves() {
        let registry = ContextRegistry::default();
        let first = registry.register("a.json", None);
        let second = registry.register("b.json", None);
        assert_ne!(first.token(), second.token());
        assert!(registry.resolve(first.token()).is_some());

        registry.unregister(first.token());
        assert!(registry.resolve(first.token()).is_none());
        let live: Vec<ContextToken> = registry.snapshot().iter().map(|c| c.token()).collect();
        assert_eq!(live, vec![second.token()]);
    }

    #[test]
    fn controller_falls_back_to_the_configured_address() {
        let registry = ContextRegistry::default();
        let context = registry.register("alice.json", Some("https://configured:1280"));
        assert_eq!(context.controller().as_deref(), Some("https://configured:1280"));

        context.record_connected(
            ConnectionHandle(3),
            IdentityInfo {
                name: Some("alice".to_string()),
                controller: Some("https://reported:1280".to_string()),
            },
        );
        assert_eq!(context.controller().as_deref(), Some("https://reported:1280"));

        let bare = registry.register("bob.json", None);
        assert_eq!(bare.controller(), None);
    }

    #[test]
    fn shutdown_is_granted_once() {
        let context = IdentityContext::new("alice.json", ContextToken(1));
        assert!(context.begin_shutdown());
        assert!(!context.begin_shutdown());
    }
}
