// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Named logging channels. Sessions are cheap handles over the shared core;
//! every packet is filtered, stamped, and frozen here on the caller's
//! thread before it enters the pipeline.

use crate::client::Core;
use crate::level::Level;
use crate::packet::{
    current_thread_id, now_micros, ControlCommandType, LogEntryType, Packet, PacketBody,
    ProcessFlowType, WatchType,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// A named logging channel with its own level filter and bookkeeping for
/// counters, checkpoints, and timers.
pub struct Session {
    name: String,
    core: Arc<Core>,
    level: AtomicU8,
    active: AtomicBool,
    counters: Mutex<HashMap<String, i64>>,
    checkpoints: Mutex<HashMap<String, u32>>,
    checkpoint_seq: AtomicU32,
    timers: Mutex<HashMap<String, Instant>>,
}

impl Session {
    pub(crate) fn new(name: &str, core: Arc<Core>) -> Self {
        Session {
            name: name.to_string(),
            core,
            level: AtomicU8::new(Level::Debug.as_u8()),
            active: AtomicBool::new(true),
            counters: Mutex::new(HashMap::new()),
            checkpoints: Mutex::new(HashMap::new()),
            checkpoint_seq: AtomicU32::new(0),
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Debug)
    }

    /// Sets this session's minimum level. `Control` is not selectable.
    pub fn set_level(&self, level: Level) {
        if level == Level::Control {
            debug!(session = %self.name, "ignoring attempt to set the control level as a filter");
            return;
        }
        self.level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Inactive sessions drop everything without touching the pipeline.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Whether a packet at `level` would currently be admitted. Control
    /// packets bypass the level filters but not the enabled switches.
    pub fn is_on(&self, level: Level) -> bool {
        if !self.core.is_enabled() || !self.is_active() {
            return false;
        }
        level == Level::Control || (level >= self.level() && level >= self.core.level())
    }

    // ---- plain text logging -------------------------------------------------

    pub fn log_debug(&self, title: &str) {
        self.log(Level::Debug, title);
    }

    pub fn log_verbose(&self, title: &str) {
        self.log(Level::Verbose, title);
    }

    pub fn log_message(&self, title: &str) {
        self.log(Level::Message, title);
    }

    pub fn log_warning(&self, title: &str) {
        self.log(Level::Warning, title);
    }

    pub fn log_error(&self, title: &str) {
        self.log(Level::Error, title);
    }

    pub fn log_fatal(&self, title: &str) {
        self.log(Level::Fatal, title);
    }

    pub fn log(&self, level: Level, title: &str) {
        if self.is_on(level) {
            self.log_entry(level, LogEntryType::for_level(level), title.to_string(), None, &[]);
        }
    }

    /// Logs with packet-local tags merged over the active context scopes.
    pub fn log_with_tags(&self, level: Level, title: &str, tags: &[(&str, &str)]) {
        if self.is_on(level) {
            self.log_entry(level, LogEntryType::for_level(level), title.to_string(), None, tags);
        }
    }

    /// Lazy variant: the title closure runs only if the packet would be
    /// admitted.
    pub fn log_with<F>(&self, level: Level, title: F)
    where
        F: FnOnce() -> String,
    {
        if self.is_on(level) {
            self.log_entry(level, LogEntryType::for_level(level), title(), None, &[]);
        }
    }

    /// Joins the fragments with single spaces into one title.
    pub fn log_parts(&self, level: Level, parts: &[&str]) {
        if self.is_on(level) {
            self.log_entry(level, LogEntryType::for_level(level), parts.join(" "), None, &[]);
        }
    }

    pub fn log_separator(&self, level: Level) {
        if self.is_on(level) {
            self.log_entry(level, LogEntryType::Separator, String::new(), None, &[]);
        }
    }

    /// Reports a fault inside the instrumented application itself.
    pub fn log_internal_error(&self, title: &str) {
        if self.is_on(Level::Error) {
            self.log_entry(
                Level::Error,
                LogEntryType::InternalError,
                title.to_string(),
                None,
                &[],
            );
        }
    }

    /// Logs a title with an attached text document.
    pub fn log_text(&self, level: Level, title: &str, text: &str) {
        if self.is_on(level) {
            self.log_entry(
                level,
                LogEntryType::Text,
                title.to_string(),
                Some(Bytes::copy_from_slice(text.as_bytes())),
                &[],
            );
        }
    }

    /// Logs a title with an attached binary payload.
    pub fn log_data(&self, level: Level, title: &str, data: &[u8]) {
        if self.is_on(level) {
            self.log_entry(
                level,
                LogEntryType::Binary,
                title.to_string(),
                Some(Bytes::copy_from_slice(data)),
                &[],
            );
        }
    }

    /// Logs source code viewable as `language` in the console.
    pub fn log_source(&self, level: Level, title: &str, source: &str) {
        if self.is_on(level) {
            self.log_entry(
                level,
                LogEntryType::Source,
                title.to_string(),
                Some(Bytes::copy_from_slice(source.as_bytes())),
                &[],
            );
        }
    }

    // ---- watches ------------------------------------------------------------

    /// Reports a watched value. `group` names the console grouping; empty
    /// means ungrouped.
    pub fn watch(&self, level: Level, name: &str, value: &str, watch_type: WatchType, group: &str) {
        if self.is_on(level) {
            self.submit(
                level,
                PacketBody::Watch {
                    name: name.to_string(),
                    value: value.to_string(),
                    watch_type,
                    group: group.to_string(),
                },
                &[],
            );
        }
    }

    pub fn watch_str(&self, name: &str, value: &str) {
        self.watch(Level::Message, name, value, WatchType::Str, "");
    }

    pub fn watch_int(&self, name: &str, value: i64) {
        self.watch(Level::Message, name, &value.to_string(), WatchType::Integer, "");
    }

    pub fn watch_float(&self, name: &str, value: f64) {
        self.watch(Level::Message, name, &value.to_string(), WatchType::Float, "");
    }

    pub fn watch_bool(&self, name: &str, value: bool) {
        self.watch(Level::Message, name, &value.to_string(), WatchType::Boolean, "");
    }

    // ---- counters -----------------------------------------------------------

    fn bump_counter(&self, name: &str, delta: i64) -> i64 {
        let mut counters = self.counters.lock().expect("lock poisoned");
        let value = counters.entry(name.to_string()).or_insert(0);
        *value += delta;
        *value
    }

    /// Increments a named counter and reports its new value as a watch.
    pub fn inc_counter(&self, name: &str) {
        let value = self.bump_counter(name, 1);
        self.watch(Level::Message, name, &value.to_string(), WatchType::Integer, "");
    }

    /// Decrements a named counter and reports its new value as a watch.
    pub fn dec_counter(&self, name: &str) {
        let value = self.bump_counter(name, -1);
        self.watch(Level::Message, name, &value.to_string(), WatchType::Integer, "");
    }

    /// Forgets a counter without reporting anything.
    pub fn reset_counter(&self, name: &str) {
        self.counters.lock().expect("lock poisoned").remove(name);
    }

    // ---- checkpoints --------------------------------------------------------

    /// Logs a numbered checkpoint. Unnamed checkpoints share one sequence;
    /// each named checkpoint counts on its own.
    pub fn add_checkpoint(&self, name: Option<&str>) {
        if !self.is_on(Level::Message) {
            return;
        }
        let title = match name {
            Some(name) => {
                let mut checkpoints = self.checkpoints.lock().expect("lock poisoned");
                let counter = checkpoints.entry(name.to_string()).or_insert(0);
                *counter += 1;
                format!("{} #{}", name, counter)
            }
            None => {
                let seq = self.checkpoint_seq.fetch_add(1, Ordering::Relaxed) + 1;
                format!("Checkpoint #{}", seq)
            }
        };
        self.log_entry(Level::Message, LogEntryType::Checkpoint, title, None, &[]);
    }

    /// Resets one named checkpoint counter, or the unnamed sequence.
    pub fn reset_checkpoint(&self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.checkpoints.lock().expect("lock poisoned").remove(name);
            }
            None => self.checkpoint_seq.store(0, Ordering::Relaxed),
        }
    }

    // ---- timers -------------------------------------------------------------

    /// Starts or restarts a named stopwatch.
    pub fn time_start(&self, name: &str) {
        self.timers
            .lock()
            .expect("lock poisoned")
            .insert(name.to_string(), Instant::now());
    }

    /// Stops a named stopwatch and reports the elapsed seconds as a watch.
    /// Without a matching start this logs nothing.
    pub fn time_end(&self, name: &str) {
        let started = self.timers.lock().expect("lock poisoned").remove(name);
        if let Some(started) = started {
            let elapsed = started.elapsed().as_secs_f64();
            self.watch(
                Level::Message,
                name,
                &format!("{:.6}", elapsed),
                WatchType::Timestamp,
                "",
            );
        }
    }

    // ---- process flow -------------------------------------------------------

    fn flow(&self, flow_type: ProcessFlowType, title: &str) {
        if self.is_on(Level::Debug) {
            self.submit(
                Level::Debug,
                PacketBody::ProcessFlow {
                    flow_type,
                    title: title.to_string(),
                    host_name: self.core.host_name.clone(),
                    process_id: std::process::id(),
                    thread_id: current_thread_id(),
                },
                &[],
            );
        }
    }

    pub fn enter_method(&self, name: &str) {
        self.flow(ProcessFlowType::EnterMethod, name);
    }

    pub fn leave_method(&self, name: &str) {
        self.flow(ProcessFlowType::LeaveMethod, name);
    }

    pub fn enter_thread(&self, name: &str) {
        self.flow(ProcessFlowType::EnterThread, name);
    }

    pub fn leave_thread(&self, name: &str) {
        self.flow(ProcessFlowType::LeaveThread, name);
    }

    pub fn enter_process(&self, name: &str) {
        self.flow(ProcessFlowType::EnterProcess, name);
    }

    pub fn leave_process(&self, name: &str) {
        self.flow(ProcessFlowType::LeaveProcess, name);
    }

    // ---- console control ----------------------------------------------------

    fn control(&self, command_type: ControlCommandType) {
        if self.is_on(Level::Control) {
            self.submit(
                Level::Control,
                PacketBody::ControlCommand {
                    command_type,
                    data: None,
                },
                &[],
            );
        }
    }

    pub fn clear_log(&self) {
        self.control(ControlCommandType::ClearLog);
    }

    pub fn clear_watches(&self) {
        self.control(ControlCommandType::ClearWatches);
    }

    pub fn clear_auto_views(&self) {
        self.control(ControlCommandType::ClearAutoViews);
    }

    pub fn clear_process_flow(&self) {
        self.control(ControlCommandType::ClearProcessFlow);
    }

    pub fn clear_all(&self) {
        self.control(ControlCommandType::ClearAll);
    }

    // ---- streams ------------------------------------------------------------

    /// Sends a payload on a named stream channel. `group` names the console
    /// grouping; empty means ungrouped.
    pub fn log_stream(&self, level: Level, channel: &str, stream_type: &str, group: &str, data: &[u8]) {
        if self.is_on(level) {
            self.submit(
                level,
                PacketBody::Stream {
                    channel: channel.to_string(),
                    data: Bytes::copy_from_slice(data),
                    stream_type: stream_type.to_string(),
                    group: group.to_string(),
                },
                &[],
            );
        }
    }

    // ---- packet assembly ----------------------------------------------------

    fn log_entry(
        &self,
        level: Level,
        entry_type: LogEntryType,
        title: String,
        data: Option<Bytes>,
        inline: &[(&str, &str)],
    ) {
        self.submit(
            level,
            PacketBody::LogEntry {
                entry_type,
                title,
                app_name: self.core.app_name.clone(),
                host_name: self.core.host_name.clone(),
                process_id: std::process::id(),
                thread_id: current_thread_id(),
                data,
            },
            inline,
        );
    }

    fn submit(&self, level: Level, body: PacketBody, inline: &[(&str, &str)]) {
        let (correlation_id, operation) = self.core.correlation_current();
        self.core.submit(Packet {
            level,
            timestamp_us: now_micros(),
            session: self.name.clone(),
            context: self.core.context_for_packet(inline),
            correlation_id,
            operation,
            body,
        });
    }
}
