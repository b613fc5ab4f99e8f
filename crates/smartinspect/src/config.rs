// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Connection descriptor parsing.
//!
//! A descriptor looks like `tcp(host=10.0.0.5,port=4228,async.throttle=true)`.
//! Variable placeholders (`${key}` or `%key%`) are substituted from the
//! client's variable store before anything else is parsed. All parse failures
//! are caller mistakes and surface synchronously as `ClientError::Config`.

use crate::error::ClientError;
use crate::level::Level;
use crate::queue::OverflowPolicy;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

pub(crate) const DEFAULT_PORT: u16 = 4228;
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_QUEUE_BYTES: usize = 2048 * 1024;

/// Resolved client options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Console host. `None` selects loopback, or the WSL gateway when the
    /// process runs inside WSL.
    pub host: Option<String>,
    pub port: u16,
    /// Socket connect/ack timeout.
    pub timeout: Duration,
    pub room: String,
    pub reconnect: bool,
    /// Minimum time between the starts of two connection attempts.
    pub reconnect_interval: Duration,
    pub backlog_enabled: bool,
    /// Backlog byte budget.
    pub backlog_capacity: usize,
    /// Packets at or above this level force a full backlog flush.
    pub backlog_flush_on: Level,
    /// When false, producer calls transmit synchronously.
    pub async_enabled: bool,
    /// Dispatch queue byte budget.
    pub async_capacity: usize,
    /// What happens to producers when the dispatch queue is full.
    pub async_overflow: OverflowPolicy,
    /// Empty the dispatch queue whenever the connection drops.
    pub async_clear_on_disconnect: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            host: None,
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            room: "default".to_string(),
            reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            backlog_enabled: true,
            backlog_capacity: DEFAULT_QUEUE_BYTES,
            backlog_flush_on: Level::Error,
            async_enabled: true,
            async_capacity: DEFAULT_QUEUE_BYTES,
            async_overflow: OverflowPolicy::DropOldest,
            async_clear_on_disconnect: false,
        }
    }
}

impl ClientOptions {
    /// Parses a `tcp(key=value,...)` descriptor after variable substitution.
    pub fn parse(
        descriptor: &str,
        variables: &HashMap<String, String>,
    ) -> Result<Self, ClientError> {
        let expanded = expand_variables(descriptor, variables)?;

        #[allow(clippy::expect_used)]
        let scheme = Regex::new(r"(?i)^\s*tcp\((.*)\)\s*$").expect("static regex");
        let body = scheme
            .captures(&expanded)
            .and_then(|c| c.get(1))
            .ok_or_else(|| {
                ClientError::Config(format!("descriptor must be tcp(...): '{}'", expanded))
            })?
            .as_str();

        let mut options = ClientOptions::default();
        for pair in body.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ClientError::Config(format!("expected key=value, got '{}'", pair))
            })?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "host" => options.host = Some(value.to_string()),
                "port" => {
                    options.port = value.parse().map_err(|_| {
                        ClientError::Config(format!("invalid port '{}'", value))
                    })?;
                }
                "timeout" => options.timeout = parse_seconds(value)?,
                "room" => options.room = value.to_string(),
                "reconnect" => options.reconnect = parse_bool(&key, value)?,
                "reconnect.interval" => options.reconnect_interval = parse_interval(value)?,
                "backlog.enabled" => options.backlog_enabled = parse_bool(&key, value)?,
                "backlog.queue" => options.backlog_capacity = parse_size_kb(value)?,
                "backlog.flushon" => options.backlog_flush_on = value.parse()?,
                "async.enabled" => options.async_enabled = parse_bool(&key, value)?,
                "async.queue" => options.async_capacity = parse_size_kb(value)?,
                "async.throttle" => {
                    options.async_overflow = if parse_bool(&key, value)? {
                        OverflowPolicy::Throttle
                    } else {
                        OverflowPolicy::DropOldest
                    };
                }
                "async.clearondisconnect" => {
                    options.async_clear_on_disconnect = parse_bool(&key, value)?;
                }
                // Unrecognized keys are tolerated so descriptors written for
                // richer clients keep working.
                _ => {}
            }
        }
        Ok(options)
    }
}

/// Substitutes `${key}` and `%key%` placeholders. An unresolvable key is a
/// configuration error, not a silent passthrough.
pub(crate) fn expand_variables(
    text: &str,
    variables: &HashMap<String, String>,
) -> Result<String, ClientError> {
    #[allow(clippy::expect_used)]
    let placeholder = Regex::new(r"\$\{([^}]+)\}|%([^%]+)%").expect("static regex");

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in placeholder.captures_iter(text) {
        #[allow(clippy::expect_used)]
        let whole = caps.get(0).expect("capture 0 always present");
        let key = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let value = variables.get(key).ok_or_else(|| {
            ClientError::Config(format!("unresolvable variable '{}'", key))
        })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ClientError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ClientError::Config(format!(
            "invalid boolean '{}' for {}",
            other, key
        ))),
    }
}

/// Plain seconds, fractions allowed.
fn parse_seconds(value: &str) -> Result<Duration, ClientError> {
    let secs: f64 = value
        .parse()
        .map_err(|_| ClientError::Config(format!("invalid timeout '{}'", value)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ClientError::Config(format!("invalid timeout '{}'", value)));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Milliseconds by default; `ms` and `s` suffixes accepted.
fn parse_interval(value: &str) -> Result<Duration, ClientError> {
    let text = value.to_ascii_lowercase();
    let bad = || ClientError::Config(format!("invalid interval '{}'", value));
    if let Some(raw) = text.strip_suffix("ms") {
        let ms: u64 = raw.trim().parse().map_err(|_| bad())?;
        return Ok(Duration::from_millis(ms));
    }
    if let Some(raw) = text.strip_suffix('s') {
        let secs: f64 = raw.trim().parse().map_err(|_| bad())?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(bad());
        }
        return Ok(Duration::from_secs_f64(secs));
    }
    let ms: u64 = text.trim().parse().map_err(|_| bad())?;
    Ok(Duration::from_millis(ms))
}

/// Kilobytes by default; `kb`, `mb`, and `gb` suffixes accepted. Returns
/// bytes.
fn parse_size_kb(value: &str) -> Result<usize, ClientError> {
    let text = value.to_ascii_lowercase();
    let bad = || ClientError::Config(format!("invalid size '{}'", value));
    let (raw, multiplier) = if let Some(raw) = text.strip_suffix("kb") {
        (raw, 1024u64)
    } else if let Some(raw) = text.strip_suffix("mb") {
        (raw, 1024 * 1024)
    } else if let Some(raw) = text.strip_suffix("gb") {
        (raw, 1024 * 1024 * 1024)
    } else {
        (text.as_str(), 1024)
    };
    let amount: u64 = raw.trim().parse().map_err(|_| bad())?;
    usize::try_from(amount.checked_mul(multiplier).ok_or_else(bad)?).map_err(|_| bad())
}
