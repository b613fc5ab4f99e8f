// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Packet taxonomy shared by the whole pipeline.
//!
//! A [`Packet`] is created on the caller's thread with its context frozen in
//! place, then handed through the dispatch queue to the sender. It is never
//! mutated after creation; the transport only sees its encoded frame.

use crate::level::Level;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Numeric subtype of a log entry. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogEntryType {
    Separator = 0,
    EnterMethod = 1,
    LeaveMethod = 2,
    ResetCallstack = 3,
    Message = 100,
    Warning = 101,
    Error = 102,
    InternalError = 103,
    Comment = 104,
    VariableValue = 105,
    Checkpoint = 106,
    Debug = 107,
    Verbose = 108,
    Fatal = 109,
    Text = 200,
    Binary = 201,
    Source = 203,
}

impl LogEntryType {
    pub(crate) fn from_raw(raw: i32) -> Option<LogEntryType> {
        use LogEntryType::*;
        match raw {
            0 => Some(Separator),
            1 => Some(EnterMethod),
            2 => Some(LeaveMethod),
            3 => Some(ResetCallstack),
            100 => Some(Message),
            101 => Some(Warning),
            102 => Some(Error),
            103 => Some(InternalError),
            104 => Some(Comment),
            105 => Some(VariableValue),
            106 => Some(Checkpoint),
            107 => Some(Debug),
            108 => Some(Verbose),
            109 => Some(Fatal),
            200 => Some(Text),
            201 => Some(Binary),
            203 => Some(Source),
            _ => None,
        }
    }

    /// The entry subtype the plain leveled logging calls use.
    pub(crate) fn for_level(level: Level) -> LogEntryType {
        match level {
            Level::Debug => LogEntryType::Debug,
            Level::Verbose => LogEntryType::Verbose,
            Level::Message => LogEntryType::Message,
            Level::Warning => LogEntryType::Warning,
            Level::Error | Level::Control => LogEntryType::Error,
            Level::Fatal => LogEntryType::Fatal,
        }
    }
}

/// Watched value types. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WatchType {
    Char = 0,
    Str = 1,
    Integer = 2,
    Float = 3,
    Boolean = 4,
    Address = 5,
    Timestamp = 6,
    Object = 7,
}

impl WatchType {
    pub(crate) fn from_raw(raw: i32) -> Option<WatchType> {
        use WatchType::*;
        match raw {
            0 => Some(Char),
            1 => Some(Str),
            2 => Some(Integer),
            3 => Some(Float),
            4 => Some(Boolean),
            5 => Some(Address),
            6 => Some(Timestamp),
            7 => Some(Object),
            _ => None,
        }
    }
}

/// Console control commands. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ControlCommandType {
    ClearLog = 0,
    ClearWatches = 1,
    ClearAutoViews = 2,
    ClearAll = 3,
    ClearProcessFlow = 4,
}

impl ControlCommandType {
    pub(crate) fn from_raw(raw: i32) -> Option<ControlCommandType> {
        use ControlCommandType::*;
        match raw {
            0 => Some(ClearLog),
            1 => Some(ClearWatches),
            2 => Some(ClearAutoViews),
            3 => Some(ClearAll),
            4 => Some(ClearProcessFlow),
            _ => None,
        }
    }
}

/// Process flow markers. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ProcessFlowType {
    EnterMethod = 0,
    LeaveMethod = 1,
    EnterThread = 2,
    LeaveThread = 3,
    EnterProcess = 4,
    LeaveProcess = 5,
}

impl ProcessFlowType {
    pub(crate) fn from_raw(raw: i32) -> Option<ProcessFlowType> {
        use ProcessFlowType::*;
        match raw {
            0 => Some(EnterMethod),
            1 => Some(LeaveMethod),
            2 => Some(EnterThread),
            3 => Some(LeaveThread),
            4 => Some(EnterProcess),
            5 => Some(LeaveProcess),
            _ => None,
        }
    }
}

/// Kind-specific payload of a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    LogEntry {
        entry_type: LogEntryType,
        title: String,
        app_name: String,
        host_name: String,
        process_id: u32,
        thread_id: u32,
        data: Option<Bytes>,
    },
    Watch {
        name: String,
        value: String,
        watch_type: WatchType,
        group: String,
    },
    ProcessFlow {
        flow_type: ProcessFlowType,
        title: String,
        host_name: String,
        process_id: u32,
        thread_id: u32,
    },
    ControlCommand {
        command_type: ControlCommandType,
        data: Option<Bytes>,
    },
    Stream {
        channel: String,
        data: Bytes,
        stream_type: String,
        group: String,
    },
    /// Handshake metadata sent once per connection, ahead of any other packet.
    LogHeader { content: String },
}

impl PacketBody {
    /// One-byte wire tag. The assignments are stable and shared with the
    /// other client implementations that talk to the same console.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            PacketBody::ControlCommand { .. } => 1,
            PacketBody::LogEntry { .. } => 4,
            PacketBody::Watch { .. } => 5,
            PacketBody::ProcessFlow { .. } => 6,
            PacketBody::LogHeader { .. } => 7,
            PacketBody::Stream { .. } => 8,
        }
    }
}

/// One discrete unit of telemetry, immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub level: Level,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: i64,
    pub session: String,
    /// Merged tag scopes plus inline tags, frozen at creation time.
    pub context: Vec<(String, String)>,
    pub correlation_id: Option<String>,
    pub operation: Option<String>,
    pub body: PacketBody,
}

/// Current wall clock in microseconds since the Unix epoch.
pub(crate) fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Small dense thread identifier for flow packets. Not the OS thread id;
/// stable for the lifetime of the thread.
pub(crate) fn current_thread_id() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static ID: u32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        let bodies = [
            (
                PacketBody::ControlCommand {
                    command_type: ControlCommandType::ClearAll,
                    data: None,
                },
                1u8,
            ),
            (
                PacketBody::LogEntry {
                    entry_type: LogEntryType::Message,
                    title: String::new(),
                    app_name: String::new(),
                    host_name: String::new(),
                    process_id: 0,
                    thread_id: 0,
                    data: None,
                },
                4,
            ),
            (
                PacketBody::Watch {
                    name: String::new(),
                    value: String::new(),
                    watch_type: WatchType::Str,
                    group: String::new(),
                },
                5,
            ),
            (
                PacketBody::ProcessFlow {
                    flow_type: ProcessFlowType::EnterMethod,
                    title: String::new(),
                    host_name: String::new(),
                    process_id: 0,
                    thread_id: 0,
                },
                6,
            ),
            (
                PacketBody::LogHeader {
                    content: String::new(),
                },
                7,
            ),
            (
                PacketBody::Stream {
                    channel: String::new(),
                    data: Bytes::new(),
                    stream_type: String::new(),
                    group: String::new(),
                },
                8,
            ),
        ];
        for (body, tag) in bodies {
            assert_eq!(body.tag(), tag);
        }
    }

    #[test]
    fn test_entry_type_for_level() {
        assert_eq!(LogEntryType::for_level(Level::Debug), LogEntryType::Debug);
        assert_eq!(LogEntryType::for_level(Level::Fatal), LogEntryType::Fatal);
        assert_eq!(
            LogEntryType::for_level(Level::Warning),
            LogEntryType::Warning
        );
    }

    #[test]
    fn test_thread_ids_are_distinct() {
        let here = current_thread_id();
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, current_thread_id());
    }
}
