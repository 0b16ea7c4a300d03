//! The loop thread and the handles used to reach it.
//!
//! [`EventLoop`] owns the engine and a current-thread tokio runtime. Work
//! and engine callbacks arrive on one unbounded queue and are run strictly
//! one at a time, in queue order. [`LoopHandle`] is the cross-thread side:
//! enqueue work, query the engine, or ask the loop to stop.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::engine::{Engine, EngineCallbacks, EngineEvent};
use crate::error::{io_err, SessionError};

/// A unit of work executed on the loop thread with the engine in hand.
pub type Work = Box<dyn FnOnce(&mut dyn Engine) + Send + 'static>;

pub(crate) enum LoopMessage {
    Wake(Work),
    Engine(EngineEvent),
}

/// Receives engine callbacks on the loop thread.
pub trait CallbackDispatcher {
    fn dispatch(&self, engine: &mut dyn Engine, event: EngineEvent);

    /// Called once, on the loop thread, after the loop stops.
    fn loop_exited(&self) {}
}

/// Cross-thread handle to the event loop.
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<LoopMessage>,
    stop_tx: broadcast::Sender<()>,
}

impl LoopHandle {
    /// Schedule `work` onto the loop thread. Work submitted from one thread
    /// runs in submission order.
    pub fn enqueue_on_loop<F>(&self, work: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut dyn Engine) + Send + 'static,
    {
        self.tx
            .send(LoopMessage::Wake(Box::new(work)))
            .map_err(|_| SessionError::LoopClosed)
    }

    /// Run `query` on the loop thread and block until it answers.
    ///
    /// Must not be called from the loop thread itself or from inside an
    /// async context.
    pub fn call_on_loop<F, R>(&self, query: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut dyn Engine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue_on_loop(move |engine| {
            let _ = tx.send(query(engine));
        })?;
        rx.blocking_recv()
            .map_err(|_| SessionError::ChannelClosed("loop query response"))
    }

    /// Ask the loop to exit after the message it is currently running.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn callbacks(&self) -> EngineCallbacks {
        EngineCallbacks::new(self.tx.clone())
    }
}

/// The single-threaded loop that owns the engine.
pub struct EventLoop {
    engine: Box<dyn Engine>,
    rx: mpsc::UnboundedReceiver<LoopMessage>,
    stop_rx: broadcast::Receiver<()>,
    handle: LoopHandle,
}

impl EventLoop {
    pub fn new(engine: impl Engine + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = broadcast::channel(1);
        Self {
            engine: Box::new(engine),
            rx,
            stop_rx,
            handle: LoopHandle { tx, stop_tx },
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Direct engine access before the loop starts.
    pub fn engine_mut(&mut self) -> &mut dyn Engine {
        self.engine.as_mut()
    }

    /// Run the loop on the calling thread until [`LoopHandle::stop`] is
    /// called or every handle has been dropped.
    pub fn run(self, dispatcher: &dyn CallbackDispatcher) -> Result<(), SessionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| io_err("tokio-runtime", e))?;

        let EventLoop {
            mut engine,
            mut rx,
            mut stop_rx,
            handle,
        } = self;
        drop(handle);

        runtime.block_on(async {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => {
                        tracing::debug!("event loop stop requested");
                        break;
                    }
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        match message {
                            LoopMessage::Wake(work) => {
                                guarded("wake", || work(engine.as_mut()));
                            }
                            LoopMessage::Engine(event) => {
                                guarded("engine callback", || dispatcher.dispatch(engine.as_mut(), event));
                            }
                        }
                    }
                }
            }
        });

        // Close before notifying so late submissions fail instead of queueing.
        rx.close();
        guarded("loop exit", || dispatcher.loop_exited());
        tracing::info!("event loop exited");
        Ok(())
    }
}

/// Start the loop: install logging, report the engine version, then block
/// running the loop.
pub fn start(event_loop: EventLoop, dispatcher: &dyn CallbackDispatcher) -> Result<(), SessionError> {
    crate::logging::init_tracing();
    let version = event_loop.engine.version();
    tracing::info!(version = %version, "starting session engine");
    event_loop.run(dispatcher)
}

fn guarded(what: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(what, reason = %reason, "panic on event loop thread");
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use cziti_core::{ConnectionHandle, EngineStatus, LogLevel};

    use crate::engine::{EngineVersion, InitOptions};

    #[derive(Default)]
    struct NullEngine;

    impl Engine for NullEngine {
        fn version(&self) -> EngineVersion {
            EngineVersion::default()
        }
        fn submit_init(&mut self, _options: InitOptions) -> EngineStatus {
            EngineStatus::OK
        }
        fn request_shutdown(&mut self, _handle: ConnectionHandle) {}
        fn transfer_rates(&self, _handle: ConnectionHandle) -> (f64, f64) {
            (1.0, 2.0)
        }
        fn set_log_level(&mut self, _level: LogLevel) {}
        fn set_log_sink(&mut self, _sink: Option<File>) {}
        fn status_text(&self, status: EngineStatus) -> String {
            format!("status {status}")
        }
    }

    struct NoCallbacks;

    impl CallbackDispatcher for NoCallbacks {
        fn dispatch(&self, _engine: &mut dyn Engine, _event: EngineEvent) {}
    }

    #[test]
    fn work_runs_on_loop_thread_in_submission_order() {
        let event_loop = EventLoop::new(NullEngine);
        let handle = event_loop.handle();
        let loop_thread = thread::Builder::new()
            .name("test-loop".into())
            .spawn(move || event_loop.run(&NoCallbacks))
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            handle
                .enqueue_on_loop(move |_engine| {
                    let name = thread::current().name().map(str::to_string);
                    seen.lock().unwrap().push((i, name));
                })
                .unwrap();
        }

        // The query is queued behind the fifty wakes above.
        let rates = handle.call_on_loop(|engine| engine.transfer_rates(ConnectionHandle(1)));
        assert_eq!(rates.unwrap(), (1.0, 2.0));

        handle.stop();
        loop_thread.join().unwrap().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 50);
        for (expected, (i, name)) in seen.iter().enumerate() {
            assert_eq!(*i, expected);
            assert_eq!(name.as_deref(), Some("test-loop"));
        }
    }

    #[test]
    fn enqueue_after_exit_reports_loop_closed() {
        let event_loop = EventLoop::new(NullEngine);
        let handle = event_loop.handle();
        handle.stop();
        event_loop.run(&NoCallbacks).unwrap();

        assert!(handle.is_closed());
        let err = handle.enqueue_on_loop(|_engine| {}).unwrap_err();
        assert!(matches!(err, SessionError::LoopClosed), "got: {err}");
    }

    #[test]
    fn panicking_work_does_not_stop_the_loop() {
        let event_loop = EventLoop::new(NullEngine);
        let handle = event_loop.handle();
        let loop_thread = thread::spawn(move || event_loop.run(&NoCallbacks));

        handle
            .enqueue_on_loop(|_engine| panic!("work item failed"))
            .unwrap();
        let answer = handle.call_on_loop(|engine| engine.status_text(EngineStatus(-3)));
        assert_eq!(answer.unwrap(), "status -3");

        handle.stop();
        loop_thread.join().unwrap().unwrap();
    }
}
