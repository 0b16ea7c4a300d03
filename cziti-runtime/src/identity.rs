//! Identity loading: the blocking init handshake between a caller thread and
//! the loop thread.
//!
//! The caller registers a single-use response channel under the config
//! identifier, schedules the engine's init submission onto the loop, and
//! blocks. The loop answers either right after a rejected submission or
//! later from the engine's init callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::oneshot;

use cziti_core::{ContextToken, EngineStatus};

use crate::context::IdentityContext;
use crate::engine::{ConfigTypes, Engine, InitOptions, InitOutcome, MetricsMode};
use crate::error::{InitError, SessionError};
use crate::session::{SessionManager, SessionShared};

type Waiter = oneshot::Sender<Arc<IdentityContext>>;

/// Response channels of in-flight inits, keyed by config identifier.
///
/// A per-identifier gate serializes concurrent loads of the same identifier,
/// so at most one waiter per identifier exists at any time.
#[derive(Default)]
pub(crate) struct PendingInits {
    gates: DashMap<String, Arc<Mutex<()>>>,
    waiters: Mutex<HashMap<String, (ContextToken, Waiter)>>,
}

impl PendingInits {
    fn gate(&self, config: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.entry(config.to_string()).or_default().value())
    }

    fn insert(&self, config: &str, token: ContextToken, waiter: Waiter) {
        if self
            .waiters()
            .insert(config.to_string(), (token, waiter))
            .is_some()
        {
            tracing::warn!(config, "replaced an unanswered identity init");
        }
    }

    /// Hand `context` to the caller waiting on its identifier. Returns false
    /// when no waiter for this exact context exists.
    fn answer(&self, context: Arc<IdentityContext>) -> bool {
        let waiter = {
            let mut waiters = self.waiters();
            let key = context.config_identifier();
            if waiters.get(key).map(|(token, _)| *token) != Some(context.token()) {
                return false;
            }
            waiters.remove(key).map(|(_, waiter)| waiter)
        };
        if let Some(waiter) = waiter {
            if waiter.send(context).is_err() {
                tracing::debug!("identity init caller went away before the answer");
            }
        }
        true
    }

    fn remove(&self, config: &str) {
        self.waiters().remove(config);
    }

    /// Drop every waiter, waking blocked callers with no answer.
    pub(crate) fn abandon_all(&self) -> usize {
        let mut waiters = self.waiters();
        let abandoned = waiters.len();
        waiters.clear();
        abandoned
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<String, (ContextToken, Waiter)>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionManager {
    /// Initialize an identity and block until the engine answers.
    ///
    /// Always returns a context; failures are reported through its
    /// `status()` and `status_error()`. Loads of the same identifier are
    /// serialized. Must not be called from async code or from the loop
    /// thread; use [`SessionManager::load_identity_async`] from async code.
    pub fn load_identity(&self, config_identifier: &str) -> Arc<IdentityContext> {
        self.load_identity_with_controller(config_identifier, None)
    }

    /// [`SessionManager::load_identity`] with a controller address to use
    /// until the engine reports its own.
    pub fn load_identity_with_controller(
        &self,
        config_identifier: &str,
        controller: Option<&str>,
    ) -> Arc<IdentityContext> {
        let inner = &self.inner;
        let gate = inner.pending.gate(config_identifier);
        let _serialized = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let context = inner.registry.register(config_identifier, controller);
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(config_identifier, context.token(), tx);

        let options = InitOptions {
            config: config_identifier.to_string(),
            controller: controller.map(str::to_string),
            token: context.token(),
            refresh_interval: inner.refresh_interval,
            metrics: MetricsMode::Instant,
            config_types: ConfigTypes::All,
            callbacks: inner.loop_handle.callbacks(),
        };

        let submitted = {
            let shared = Arc::clone(inner);
            let context = Arc::clone(&context);
            inner
                .loop_handle
                .enqueue_on_loop(move |engine| submit_init(&shared, engine, options, context))
        };

        let answered = match submitted {
            Ok(()) => rx.blocking_recv().ok(),
            Err(err) => {
                tracing::warn!(config = config_identifier, error = %err, "cannot submit identity init");
                None
            }
        };
        inner.pending.remove(config_identifier);

        match answered {
            Some(context) => context,
            None => {
                context.record_failure(EngineStatus::LOOP_UNAVAILABLE, InitError::LoopUnavailable);
                inner.registry.unregister(context.token());
                context
            }
        }
    }

    /// [`SessionManager::load_identity`] on tokio's blocking pool.
    pub async fn load_identity_async(
        &self,
        config_identifier: impl Into<String>,
    ) -> Result<Arc<IdentityContext>, SessionError> {
        let manager = self.clone();
        let config = config_identifier.into();
        tokio::task::spawn_blocking(move || manager.load_identity(&config))
            .await
            .map_err(|_| SessionError::ChannelClosed("identity init task"))
    }

    pub(crate) fn on_init(&self, engine: &mut dyn Engine, token: ContextToken, outcome: InitOutcome) {
        let Some(context) = self.inner.registry.resolve(token) else {
            tracing::warn!(token = %token, "init callback for unknown identity");
            return;
        };

        match outcome {
            InitOutcome::Connected { handle, identity } => {
                tracing::info!(
                    config = context.config_identifier(),
                    handle = %handle,
                    name = identity.name.as_deref().unwrap_or("<unknown>"),
                    "identity connected",
                );
                context.record_connected(handle, identity);
            }
            InitOutcome::Failed { status } => {
                let message = engine.status_text(status);
                tracing::warn!(
                    config = context.config_identifier(),
                    code = %status,
                    error = %message,
                    "identity init failed",
                );
                context.record_failure(status, InitError::Rejected { code: status, message });
                self.inner.registry.unregister(token);
            }
        }

        let config = context.config_identifier().to_string();
        if !self.inner.pending.answer(context) {
            tracing::warn!(config = %config, "response channel not found for init callback");
        }
    }
}

fn submit_init(
    shared: &SessionShared,
    engine: &mut dyn Engine,
    options: InitOptions,
    context: Arc<IdentityContext>,
) {
    let status = engine.submit_init(options);
    if status.is_ok() {
        tracing::debug!(config = context.config_identifier(), "identity init submitted");
        return;
    }

    let message = engine.status_text(status);
    tracing::warn!(
        config = context.config_identifier(),
        code = %status,
        error = %message,
        "engine rejected identity init",
    );
    context.record_failure(status, InitError::Rejected { code: status, message });
    shared.registry.unregister(context.token());
    if !shared.pending.answer(context) {
        tracing::warn!("response channel not found for rejected init");
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
