//! The session manager: one explicitly constructed owner for the token
//! registry, the pending-init table and the event channel.
//!
//! Cloning a [`SessionManager`] is cheap; all clones share state. The same
//! value is handed to [`crate::EventLoop::run`] as the callback dispatcher.

use std::sync::Arc;
use std::time::Duration;

use cziti_core::{ConnectionHandle, ContextToken, ServiceStatus, TransferRates};

use crate::bridge::{CallbackDispatcher, LoopHandle};
use crate::collaborators::{DnsRegistrar, TunnelDevice};
use crate::config::RuntimeConfig;
use crate::context::{ContextRegistry, IdentityContext};
use crate::engine::{Engine, EngineEvent, ServiceDescriptor};
use crate::events::{EventChannel, EventReceiver};
use crate::identity::PendingInits;
use crate::paths::{DEFAULT_REFRESH_INTERVAL, EVENT_CHANNEL_CAPACITY};
use crate::reconciler::Reconciler;

pub(crate) struct SessionShared {
    pub(crate) loop_handle: LoopHandle,
    pub(crate) registry: ContextRegistry,
    pub(crate) pending: PendingInits,
    pub(crate) events: Arc<EventChannel>,
    pub(crate) reconciler: Reconciler,
    pub(crate) refresh_interval: Duration,
}

#[derive(Clone)]
pub struct SessionManager {
    pub(crate) inner: Arc<SessionShared>,
}

pub struct SessionManagerBuilder {
    loop_handle: LoopHandle,
    dns: Arc<dyn DnsRegistrar>,
    devices: Vec<Arc<dyn TunnelDevice>>,
    refresh_interval: Duration,
    event_capacity: usize,
}

impl SessionManagerBuilder {
    /// Register a tunnel device; every device receives every intercept.
    pub fn device(mut self, device: Arc<dyn TunnelDevice>) -> Self {
        self.devices.push(device);
        self
    }

    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.refresh_interval = config.refresh_interval();
        self.event_capacity = config.event_capacity;
        self
    }

    pub fn build(self) -> SessionManager {
        let events = Arc::new(EventChannel::new(self.event_capacity));
        let reconciler = Reconciler::new(self.dns, self.devices, Arc::clone(&events));
        SessionManager {
            inner: Arc::new(SessionShared {
                loop_handle: self.loop_handle,
                registry: ContextRegistry::default(),
                pending: PendingInits::default(),
                events,
                reconciler,
                refresh_interval: self.refresh_interval,
            }),
        }
    }
}

impl SessionManager {
    pub fn builder(loop_handle: LoopHandle, dns: Arc<dyn DnsRegistrar>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            loop_handle,
            dns,
            devices: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }

    pub fn loop_handle(&self) -> &LoopHandle {
        &self.inner.loop_handle
    }

    /// New consumer of service change events. Each event is delivered to
    /// exactly one receiver.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Events displaced because the queue was full.
    pub fn events_dropped(&self) -> u64 {
        self.inner.events.dropped()
    }

    /// Contexts whose tokens still resolve, ordered by token.
    pub fn contexts(&self) -> Vec<Arc<IdentityContext>> {
        self.inner.registry.snapshot()
    }

    pub fn context(&self, token: ContextToken) -> Option<Arc<IdentityContext>> {
        self.inner.registry.resolve(token)
    }

    /// Ask the engine to tear down the session behind `context`. Only the
    /// first call for a live session reaches the engine.
    pub fn shutdown(&self, context: &IdentityContext) {
        let Some(handle) = self.live_handle(context) else {
            tracing::info!(
                config = context.config_identifier(),
                "shutdown called for identity but it has no live connection",
            );
            return;
        };
        if !context.begin_shutdown() {
            tracing::debug!(handle = %handle, "session shutdown already requested");
            return;
        }

        let scheduled = self.inner.loop_handle.enqueue_on_loop(move |engine| {
            tracing::debug!(handle = %handle, "shutting down engine session");
            engine.request_shutdown(handle);
        });
        if let Err(err) = scheduled {
            tracing::warn!(handle = %handle, error = %err, "could not schedule session shutdown");
        }
    }

    /// Current transfer rates of a session. `None` when there is no context,
    /// the session never connected or has been torn down, or the loop is gone.
    ///
    /// Blocks until the loop thread answers; do not call from async code.
    pub fn transfer_rates(&self, context: Option<&IdentityContext>) -> Option<TransferRates> {
        let handle = self.live_handle(context?)?;
        let queried = self
            .inner
            .loop_handle
            .call_on_loop(move |engine| engine.transfer_rates(handle));
        match queried {
            Ok((up, down)) => Some(TransferRates {
                up: up as i64,
                down: down as i64,
            }),
            Err(err) => {
                tracing::debug!(handle = %handle, error = %err, "transfer rate query failed");
                None
            }
        }
    }

    /// The connection handle, provided the context's token still resolves to
    /// this very context.
    fn live_handle(&self, context: &IdentityContext) -> Option<ConnectionHandle> {
        let handle = context.connection_handle()?;
        let live = self.inner.registry.resolve(context.token())?;
        std::ptr::eq(live.as_ref(), context).then_some(handle)
    }

    fn on_service_changed(
        &self,
        token: ContextToken,
        service: ServiceDescriptor,
        status: ServiceStatus,
    ) {
        let Some(context) = self.inner.registry.resolve(token) else {
            tracing::warn!(
                token = %token,
                service_id = %service.id,
                "service callback for unknown identity",
            );
            return;
        };
        self.inner.reconciler.apply(&context, service, status);
    }

    fn on_shutdown_complete(&self, token: ContextToken) {
        match self.inner.registry.unregister(token) {
            Some(context) => tracing::info!(
                token = %token,
                config = context.config_identifier(),
                services = context.service_count(),
                "identity session shut down",
            ),
            None => tracing::warn!(token = %token, "shutdown acknowledged for unknown identity"),
        }
    }
}

impl CallbackDispatcher for SessionManager {
    fn dispatch(&self, engine: &mut dyn Engine, event: EngineEvent) {
        match event {
            EngineEvent::Init { token, outcome } => self.on_init(engine, token, outcome),
            EngineEvent::ServiceChanged {
                token,
                service,
                status,
            } => self.on_service_changed(token, service, status),
            EngineEvent::ShutdownComplete { token } => self.on_shutdown_complete(token),
        }
    }

    fn loop_exited(&self) {
        let abandoned = self.inner.pending.abandon_all();
        if abandoned > 0 {
            tracing::warn!(abandoned, "event loop exited with identity inits still pending");
        }
        self.inner.events.close();
    }
}
