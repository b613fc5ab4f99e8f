// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! The client entry point and the shared core behind every session.

use crate::config::ClientOptions;
use crate::connection::{ConnectionObserver, ConnectionState, NoopObserver};
use crate::context::{ContextStack, CorrelationStack};
use crate::error::ClientError;
use crate::level::Level;
use crate::packet::Packet;
use crate::queue::{DispatchQueue, Envelope};
use crate::sender::Sender;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Delegates to the observer currently installed, so the application can
/// swap observers while the sender keeps a stable handle.
struct ObserverHandle {
    inner: RwLock<Arc<dyn ConnectionObserver>>,
}

impl ObserverHandle {
    fn new() -> Self {
        ObserverHandle {
            inner: RwLock::new(Arc::new(NoopObserver)),
        }
    }

    fn replace(&self, observer: Arc<dyn ConnectionObserver>) {
        *self.inner.write().expect("lock poisoned") = observer;
    }

    fn current(&self) -> Arc<dyn ConnectionObserver> {
        self.inner.read().expect("lock poisoned").clone()
    }
}

impl ConnectionObserver for ObserverHandle {
    fn on_connect(&self, reconnect: bool) {
        self.current().on_connect(reconnect);
    }

    fn on_disconnect(&self) {
        self.current().on_disconnect();
    }

    fn on_error(&self, error: &ClientError) {
        self.current().on_error(error);
    }
}

/// Producer-facing half of a running pipeline.
struct PipelineShared {
    queue: Arc<DispatchQueue>,
    state: Arc<AtomicU8>,
    async_enabled: bool,
    /// Faults raised on producer threads are handed to the sender, which
    /// invokes the observer on its own execution context.
    faults: mpsc::UnboundedSender<ClientError>,
}

/// State shared between the client handle and its sessions.
pub(crate) struct Core {
    pub(crate) app_name: String,
    pub(crate) host_name: String,
    enabled: AtomicBool,
    level: AtomicU8,
    context: ContextStack,
    correlation: CorrelationStack,
    pipeline: Mutex<Option<PipelineShared>>,
    observer: Arc<ObserverHandle>,
    #[cfg(test)]
    capture: Mutex<Option<Vec<Packet>>>,
}

impl Core {
    fn new(app_name: String, host_name: String) -> Self {
        Core {
            app_name,
            host_name,
            enabled: AtomicBool::new(true),
            level: AtomicU8::new(Level::Debug.as_u8()),
            context: ContextStack::new(),
            correlation: CorrelationStack::new(),
            pipeline: Mutex::new(None),
            observer: Arc::new(ObserverHandle::new()),
            #[cfg(test)]
            capture: Mutex::new(None),
        }
    }

    /// Diverts submitted packets into a buffer instead of the pipeline.
    #[cfg(test)]
    pub(crate) fn enable_capture(&self) {
        *self.capture.lock().expect("lock poisoned") = Some(Vec::new());
    }

    #[cfg(test)]
    pub(crate) fn take_captured(&self) -> Vec<Packet> {
        self.capture
            .lock()
            .expect("lock poisoned")
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Debug)
    }

    pub(crate) fn context_for_packet(&self, inline: &[(&str, &str)]) -> Vec<(String, String)> {
        self.context.merged_with(inline)
    }

    pub(crate) fn correlation_current(&self) -> (Option<String>, Option<String>) {
        self.correlation.current()
    }

    /// Hands a packet to the pipeline. In asynchronous mode this returns as
    /// soon as the packet is queued; in synchronous mode it blocks until the
    /// sender has handled the packet. All faults are absorbed here.
    pub(crate) fn submit(&self, packet: Packet) {
        #[cfg(test)]
        {
            let mut capture = self.capture.lock().expect("lock poisoned");
            if let Some(packets) = capture.as_mut() {
                packets.push(packet);
                return;
            }
        }
        let (queue, async_enabled, faults) = {
            let guard = self.pipeline.lock().expect("lock poisoned");
            match guard.as_ref() {
                Some(pipeline) => (
                    pipeline.queue.clone(),
                    pipeline.async_enabled,
                    pipeline.faults.clone(),
                ),
                None => {
                    debug!("packet discarded, client not connected");
                    return;
                }
            }
        };
        let encoded = match packet.encode() {
            Ok(encoded) => encoded,
            Err(error) => {
                error!(%error, "failed to encode packet");
                let _ = faults.send(error);
                return;
            }
        };
        if async_enabled {
            if let Err(error) = queue.enqueue(Envelope::new(encoded)) {
                warn!(%error, "packet rejected by dispatch queue");
                let _ = faults.send(error);
            }
        } else {
            let (done, handled) = oneshot::channel();
            queue.enqueue_unbounded(Envelope {
                packet: encoded,
                done: Some(done),
            });
            // an Err here means the pipeline shut down underneath us, which
            // counts as handled
            let _ = handled.blocking_recv();
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: std::thread::JoinHandle<()>,
}

/// A telemetry client targeting one console.
///
/// The client owns the background sender and a registry of named sessions.
/// Logging always goes through a [`Session`]; the `"Main"` session exists
/// from the start.
pub struct SmartInspect {
    core: Arc<Core>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    variables: Mutex<HashMap<String, String>>,
    worker: Mutex<Option<Worker>>,
}

impl SmartInspect {
    pub fn new(app_name: &str) -> Self {
        let host_name = std::env::var("HOSTNAME")
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        let core = Arc::new(Core::new(app_name.to_string(), host_name));
        let main = Arc::new(Session::new("Main", core.clone()));
        let mut sessions = HashMap::new();
        sessions.insert("Main".to_string(), main);
        SmartInspect {
            core,
            sessions: Mutex::new(sessions),
            variables: Mutex::new(HashMap::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.core.app_name
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    /// Disabled clients drop every packet at the session boundary.
    pub fn set_enabled(&self, enabled: bool) {
        self.core.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn level(&self) -> Level {
        self.core.level()
    }

    /// Sets the client-wide minimum level. `Control` is not selectable.
    pub fn set_level(&self, level: Level) {
        if level == Level::Control {
            debug!("ignoring attempt to set the control level as a filter");
            return;
        }
        self.core.level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// The session registered under `name`, created on first use.
    pub fn session(&self, name: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        sessions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Session::new(name, self.core.clone())))
            .clone()
    }

    /// The default `"Main"` session.
    pub fn main(&self) -> Arc<Session> {
        self.session("Main")
    }

    /// Removes a session from the registry. Existing handles stay usable;
    /// the `"Main"` session cannot be removed.
    pub fn remove_session(&self, name: &str) {
        if name == "Main" {
            return;
        }
        self.sessions.lock().expect("lock poisoned").remove(name);
    }

    /// Defines a variable for `${name}` and `%name%` substitution in
    /// connection descriptors.
    pub fn set_variable(&self, name: &str, value: &str) {
        self.variables
            .lock()
            .expect("lock poisoned")
            .insert(name.to_string(), value.to_string());
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables
            .lock()
            .expect("lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn unset_variable(&self, name: &str) {
        self.variables.lock().expect("lock poisoned").remove(name);
    }

    /// Installs the observer notified of connection lifecycle events and
    /// absorbed faults. May be called before or after `connect`.
    pub fn set_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.core.observer.replace(observer);
    }

    /// Tag scopes applied to every packet created while they are active.
    pub fn context(&self) -> &ContextStack {
        &self.core.context
    }

    /// Correlation scopes stamped onto every packet.
    pub fn correlation(&self) -> &CorrelationStack {
        &self.core.correlation
    }

    /// Parses the descriptor and starts the background pipeline. Does not
    /// wait for the TCP connection; transport faults after this point are
    /// absorbed and reported through the observer.
    pub fn connect(&self, descriptor: &str) -> Result<(), ClientError> {
        let variables = self.variables.lock().expect("lock poisoned").clone();
        let options = ClientOptions::parse(descriptor, &variables)?;

        let mut worker = self.worker.lock().expect("lock poisoned");
        if worker.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let queue = Arc::new(DispatchQueue::new(
            options.async_capacity,
            options.async_overflow,
        ));
        let state = Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8));
        let cancel = CancellationToken::new();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let sender = Sender::new(
            queue.clone(),
            &options,
            &self.core.app_name,
            &self.core.host_name,
            self.core.observer.clone(),
            state.clone(),
            cancel.clone(),
            fault_rx,
        )?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = std::thread::Builder::new()
            .name("smartinspect-sender".to_string())
            .spawn(move || runtime.block_on(sender.run()))?;

        *self.core.pipeline.lock().expect("lock poisoned") = Some(PipelineShared {
            queue,
            state,
            async_enabled: options.async_enabled,
            faults: fault_tx,
        });
        *worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Stops the pipeline, flushing pending packets first unless the
    /// options selected clear-on-disconnect. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let worker = self.worker.lock().expect("lock poisoned").take();
        // drop the pipeline first so producers stop feeding the queue
        let pipeline = self.core.pipeline.lock().expect("lock poisoned").take();
        drop(pipeline);
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if worker.handle.join().is_err() {
                error!("sender thread panicked during shutdown");
            }
        }
    }

    /// Whether the transport currently holds an established connection.
    pub fn is_connected(&self) -> bool {
        let guard = self.core.pipeline.lock().expect("lock poisoned");
        match guard.as_ref() {
            Some(pipeline) => {
                ConnectionState::from_u8(pipeline.state.load(Ordering::Acquire))
                    == ConnectionState::Connected
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }
}

impl Drop for SmartInspect {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_shared_by_name() {
        let client = SmartInspect::new("app");
        let a = client.session("db");
        let b = client.session("db");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &client.main()));
    }

    #[test]
    fn test_main_session_survives_removal() {
        let client = SmartInspect::new("app");
        let main = client.main();
        main.set_level(Level::Warning);
        client.remove_session("Main");
        // same handle, settings intact
        assert!(Arc::ptr_eq(&main, &client.main()));
        assert_eq!(client.main().level(), Level::Warning);

        client.session("db");
        client.remove_session("db");
        let fresh = client.session("db");
        assert_eq!(fresh.level(), Level::Debug);
    }

    #[test]
    fn test_control_level_not_selectable() {
        let client = SmartInspect::new("app");
        client.set_level(Level::Warning);
        client.set_level(Level::Control);
        assert_eq!(client.level(), Level::Warning);
    }

    #[test]
    fn test_variables_round_trip() {
        let client = SmartInspect::new("app");
        client.set_variable("port", "4228");
        assert_eq!(client.variable("port").as_deref(), Some("4228"));
        client.unset_variable("port");
        assert_eq!(client.variable("port"), None);
    }

    #[test]
    fn test_disconnect_without_connect_is_a_noop() {
        let client = SmartInspect::new("app");
        client.disconnect();
        assert!(!client.is_connected());
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_submit_without_pipeline_discards() {
        let client = SmartInspect::new("app");
        // must not block or panic
        client.main().log_message("dropped on the floor");
        assert!(logs_contain("packet discarded, client not connected"));
    }
}
