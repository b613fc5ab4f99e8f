// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! TCP client for shipping structured telemetry to a SmartInspect-style
//! live logging console.
//!
//! The crate revolves around one [`SmartInspect`] client per process. It
//! owns a background sender thread; application threads log through named
//! [`Session`] handles and never block on the network in the default
//! asynchronous mode. Connection loss is absorbed: packets accumulate in a
//! bounded backlog and replay after reconnect, with reconnect attempts
//! rate-limited by a configurable interval.
//!
//! ```no_run
//! use smartinspect::{Level, SmartInspect};
//!
//! # fn main() -> Result<(), smartinspect::ClientError> {
//! let si = SmartInspect::new("checkout-service");
//! si.connect("tcp(host=127.0.0.1, port=4228)")?;
//!
//! let log = si.main();
//! log.log_message("service started");
//!
//! let _scope = si.context().push([("region", "eu-west-1")]);
//! log.log_with_tags(Level::Warning, "cache miss", &[("key", "user:42")]);
//!
//! si.disconnect();
//! # Ok(())
//! # }
//! ```

mod backlog;
mod client;
pub mod config;
pub mod connection;
pub mod context;
mod error;
mod level;
pub mod packet;
mod queue;
mod sender;
mod session;
pub mod wire;

pub use client::SmartInspect;
pub use config::ClientOptions;
pub use connection::{ConnectionObserver, ConnectionState};
pub use context::{ContextStack, CorrelationGuard, CorrelationStack, ScopeGuard};
pub use error::ClientError;
pub use level::Level;
pub use packet::{
    ControlCommandType, LogEntryType, Packet, PacketBody, ProcessFlowType, WatchType,
};
pub use queue::OverflowPolicy;
pub use session::Session;
