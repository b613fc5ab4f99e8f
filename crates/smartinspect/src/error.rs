// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur in the client pipeline.
///
/// Transport-level failures are absorbed internally and only ever reach the
/// application through [`ConnectionObserver::on_error`]. The sole errors
/// returned synchronously to callers are configuration mistakes reported by
/// `SmartInspect::connect` and `QueueFull` from an explicit non-blocking
/// enqueue.
///
/// [`ConnectionObserver::on_error`]: crate::connection::ConnectionObserver::on_error
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode packet: {0}")]
    Protocol(String),

    #[error("Dispatch queue is full")]
    QueueFull,

    #[error("Backlog overflow: {dropped} packets dropped")]
    BacklogOverflow { dropped: usize },

    #[error("Client is already connected")]
    AlreadyConnected,
}
