//! Shared fakes for the runtime integration tests.
//!
//! `FakeEngine` answers inits by config name:
//! - `reject*`  → submission fails synchronously with status -4
//! - `deny*`    → submission accepted, init callback reports status -8
//! - `silent*`  → submission accepted, no callback ever arrives
//! - anything else connects, naming the identity after the file stem

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cziti_core::{
    ConnectionHandle, ContextToken, EngineStatus, LogLevel, RegistrationError, ServiceId,
    ServiceStatus, TUNNELER_CONFIG_TYPE,
};
use cziti_runtime::{
    DnsRegistrar, Engine, EngineCallbacks, EngineVersion, EventLoop, IdentityContext,
    IdentityInfo, InitOptions, InitOutcome, ServiceDescriptor, SessionError, SessionManager,
    TunnelDevice,
};

pub const REJECTED: EngineStatus = EngineStatus(-4);
pub const DENIED: EngineStatus = EngineStatus(-8);
pub const CONTROLLER: &str = "https://ctrl.example:1280";

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeEngineState {
    pub sessions: HashMap<ContextToken, EngineCallbacks>,
    pub handles: HashMap<ConnectionHandle, ContextToken>,
    pub submitted: Vec<String>,
    pub shutdowns: Vec<ConnectionHandle>,
    pub log_level: Option<LogLevel>,
    next_handle: u64,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    pub state: Arc<Mutex<FakeEngineState>>,
}

impl FakeEngine {
    /// Deliver a service callback for `token` from the calling thread.
    pub fn emit_service(&self, token: ContextToken, service: ServiceDescriptor, status: ServiceStatus) {
        let callbacks = self
            .state
            .lock()
            .unwrap()
            .sessions
            .get(&token)
            .cloned()
            .expect("engine session for token");
        callbacks.service_changed(token, service, status);
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn shutdowns(&self) -> Vec<ConnectionHandle> {
        self.state.lock().unwrap().shutdowns.clone()
    }
}

impl Engine for FakeEngine {
    fn version(&self) -> EngineVersion {
        EngineVersion {
            version: "1.0.0".into(),
            revision: "fake".into(),
            build_date: "2024-01-01".into(),
        }
    }

    fn submit_init(&mut self, options: InitOptions) -> EngineStatus {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(options.config.clone());

        if options.config.starts_with("reject") {
            return REJECTED;
        }
        state
            .sessions
            .insert(options.token, options.callbacks.clone());
        if options.config.starts_with("silent") {
            return EngineStatus::OK;
        }
        if options.config.starts_with("deny") {
            options
                .callbacks
                .init_complete(options.token, InitOutcome::Failed { status: DENIED });
            return EngineStatus::OK;
        }

        state.next_handle += 1;
        let handle = ConnectionHandle(state.next_handle);
        state.handles.insert(handle, options.token);
        let name = options
            .config
            .strip_suffix(".json")
            .unwrap_or(&options.config)
            .to_string();
        options.callbacks.init_complete(
            options.token,
            InitOutcome::Connected {
                handle,
                identity: IdentityInfo {
                    name: Some(name),
                    controller: Some(CONTROLLER.to_string()),
                },
            },
        );
        EngineStatus::OK
    }

    fn request_shutdown(&mut self, handle: ConnectionHandle) {
        let mut state = self.state.lock().unwrap();
        state.shutdowns.push(handle);
        if let Some(token) = state.handles.remove(&handle) {
            if let Some(callbacks) = state.sessions.get(&token) {
                callbacks.shutdown_complete(token);
            }
        }
    }

    fn transfer_rates(&self, handle: ConnectionHandle) -> (f64, f64) {
        if self.state.lock().unwrap().handles.contains_key(&handle) {
            (1536.7, 512.2)
        } else {
            (0.0, 0.0)
        }
    }

    fn set_log_level(&mut self, level: LogLevel) {
        self.state.lock().unwrap().log_level = Some(level);
    }

    fn set_log_sink(&mut self, _sink: Option<File>) {}

    fn status_text(&self, status: EngineStatus) -> String {
        match status {
            REJECTED => "invalid configuration".to_string(),
            DENIED => "not authorized".to_string(),
            other => format!("status {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRegistrar {
    pub failing_hosts: HashSet<String>,
    next_octet: AtomicU8,
    pub registered: Mutex<Vec<(ServiceId, String)>>,
    pub deregistered: Mutex<Vec<String>>,
}

impl FakeRegistrar {
    pub fn failing(host: &str) -> Self {
        Self {
            failing_hosts: HashSet::from([host.to_string()]),
            ..Self::default()
        }
    }
}

impl DnsRegistrar for FakeRegistrar {
    fn register_service(
        &self,
        service_id: &ServiceId,
        host: &str,
        _port: u16,
        _context: &IdentityContext,
        _name: &str,
    ) -> Result<IpAddr, RegistrationError> {
        if self.failing_hosts.contains(host) {
            return Err(RegistrationError::Conflict {
                host: host.to_string(),
            });
        }
        self.registered
            .lock()
            .unwrap()
            .push((service_id.clone(), host.to_string()));
        let octet = self.next_octet.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(IpAddr::V4(Ipv4Addr::new(100, 64, 0, octet)))
    }

    fn deregister_service(&self, _context: &IdentityContext, name: &str) {
        self.deregistered.lock().unwrap().push(name.to_string());
    }
}

#[derive(Default)]
pub struct RecordingDevice {
    pub intercepts: Mutex<Vec<(ServiceId, IpAddr, u16, ConnectionHandle)>>,
}

impl TunnelDevice for RecordingDevice {
    fn add_intercept(
        &self,
        service_id: &ServiceId,
        _name: &str,
        ip: IpAddr,
        port: u16,
        connection: ConnectionHandle,
    ) {
        self.intercepts
            .lock()
            .unwrap()
            .push((service_id.clone(), ip, port, connection));
    }
}

/// A service carrying a tunneler config for `host:port`.
pub fn tunneled(id: &str, host: &str, port: u16) -> ServiceDescriptor {
    ServiceDescriptor::new(id, format!("{id}-svc")).with_config(
        TUNNELER_CONFIG_TYPE,
        format!(r#"{{"hostname":"{host}","port":{port}}}"#),
    )
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A running loop thread with a session manager attached.
pub struct Harness {
    pub manager: SessionManager,
    pub engine: FakeEngine,
    pub registrar: Arc<FakeRegistrar>,
    pub device: Arc<RecordingDevice>,
    loop_thread: Option<JoinHandle<Result<(), SessionError>>>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_registrar(FakeRegistrar::default())
    }

    pub fn with_registrar(registrar: FakeRegistrar) -> Self {
        let engine = FakeEngine::default();
        let event_loop = EventLoop::new(engine.clone());
        let registrar = Arc::new(registrar);
        let device = Arc::new(RecordingDevice::default());

        let manager = SessionManager::builder(event_loop.handle(), registrar.clone())
            .device(device.clone())
            .build();

        let dispatcher = manager.clone();
        let loop_thread = thread::Builder::new()
            .name("cziti-loop".into())
            .spawn(move || event_loop.run(&dispatcher))
            .expect("spawn loop thread");

        Self {
            manager,
            engine,
            registrar,
            device,
            loop_thread: Some(loop_thread),
        }
    }

    /// Wait until everything queued so far, and every callback it posted,
    /// has run on the loop.
    pub fn settle(&self) {
        let handle = self.manager.loop_handle();
        handle.call_on_loop(|_| ()).expect("loop running");
        handle.call_on_loop(|_| ()).expect("loop running");
    }

    /// Poll `done` until it holds or a few seconds pass.
    pub fn wait_for(&self, mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    pub fn stop(&mut self) {
        self.manager.loop_handle().stop();
        if let Some(thread) = self.loop_thread.take() {
            thread
                .join()
                .expect("loop thread panicked")
                .expect("loop exited cleanly");
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.manager.loop_handle().stop();
        if let Some(thread) = self.loop_thread.take() {
            let _ = thread.join();
        }
    }
}
