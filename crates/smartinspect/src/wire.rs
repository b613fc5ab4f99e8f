// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Binary wire format.
//!
//! Every packet is serialized as a little-endian, length-prefixed frame:
//!
//! ```text
//! [size: u32] [tag: u8] [common header] [kind-specific body]
//! ```
//!
//! `size` covers everything after itself. The common header carries level,
//! timestamp (microseconds since the Unix epoch), session name, the frozen
//! context map, and the optional correlation/operation identifiers. Strings
//! are `u32` length-prefixed UTF-8. Field order and tag values are stable;
//! independent client implementations must produce identical bytes.
//!
//! Decoding exists for test round-tripping and tooling, not for the normal
//! send path.

use crate::error::ClientError;
use crate::level::Level;
use crate::packet::{
    ControlCommandType, LogEntryType, Packet, PacketBody, ProcessFlowType, WatchType,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A serialized packet plus the metadata the queue and backlog need without
/// re-decoding it.
#[derive(Debug, Clone)]
pub(crate) struct EncodedPacket {
    pub level: Level,
    pub frame: Bytes,
}

impl EncodedPacket {
    /// Serialized size in bytes, used for byte budgeting.
    pub fn size(&self) -> usize {
        self.frame.len()
    }
}

impl Packet {
    pub(crate) fn encode(&self) -> Result<EncodedPacket, ClientError> {
        Ok(EncodedPacket {
            level: self.level,
            frame: encode(self)?,
        })
    }
}

fn put_str(buf: &mut BytesMut, value: &str) -> Result<(), ClientError> {
    let len = u32::try_from(value.len())
        .map_err(|_| ClientError::Protocol(format!("string of {} bytes too long", value.len())))?;
    buf.put_u32_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_opt_str(buf: &mut BytesMut, value: Option<&str>) -> Result<(), ClientError> {
    match value {
        Some(value) => {
            buf.put_u8(1);
            put_str(buf, value)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

fn put_bytes(buf: &mut BytesMut, value: &[u8]) -> Result<(), ClientError> {
    let len = u32::try_from(value.len())
        .map_err(|_| ClientError::Protocol(format!("payload of {} bytes too long", value.len())))?;
    buf.put_u32_le(len);
    buf.put_slice(value);
    Ok(())
}

fn put_opt_bytes(buf: &mut BytesMut, value: Option<&Bytes>) -> Result<(), ClientError> {
    match value {
        Some(value) => {
            buf.put_u8(1);
            put_bytes(buf, value)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

/// Serializes a packet into a complete frame ready for the socket.
pub fn encode(packet: &Packet) -> Result<Bytes, ClientError> {
    let mut body = BytesMut::with_capacity(64);
    body.put_u8(packet.body.tag());
    body.put_u8(packet.level.as_u8());
    body.put_i64_le(packet.timestamp_us);
    put_str(&mut body, &packet.session)?;

    let pairs = u32::try_from(packet.context.len())
        .map_err(|_| ClientError::Protocol("context map too large".to_string()))?;
    body.put_u32_le(pairs);
    for (key, value) in &packet.context {
        put_str(&mut body, key)?;
        put_str(&mut body, value)?;
    }
    put_opt_str(&mut body, packet.correlation_id.as_deref())?;
    put_opt_str(&mut body, packet.operation.as_deref())?;

    match &packet.body {
        PacketBody::LogEntry {
            entry_type,
            title,
            app_name,
            host_name,
            process_id,
            thread_id,
            data,
        } => {
            body.put_i32_le(*entry_type as i32);
            put_str(&mut body, title)?;
            put_str(&mut body, app_name)?;
            put_str(&mut body, host_name)?;
            body.put_u32_le(*process_id);
            body.put_u32_le(*thread_id);
            put_opt_bytes(&mut body, data.as_ref())?;
        }
        PacketBody::Watch {
            name,
            value,
            watch_type,
            group,
        } => {
            put_str(&mut body, name)?;
            put_str(&mut body, value)?;
            body.put_i32_le(*watch_type as i32);
            put_str(&mut body, group)?;
        }
        PacketBody::ProcessFlow {
            flow_type,
            title,
            host_name,
            process_id,
            thread_id,
        } => {
            body.put_i32_le(*flow_type as i32);
            put_str(&mut body, title)?;
            put_str(&mut body, host_name)?;
            body.put_u32_le(*process_id);
            body.put_u32_le(*thread_id);
        }
        PacketBody::ControlCommand { command_type, data } => {
            body.put_i32_le(*command_type as i32);
            put_opt_bytes(&mut body, data.as_ref())?;
        }
        PacketBody::Stream {
            channel,
            data,
            stream_type,
            group,
        } => {
            put_str(&mut body, channel)?;
            put_bytes(&mut body, data)?;
            put_str(&mut body, stream_type)?;
            put_str(&mut body, group)?;
        }
        PacketBody::LogHeader { content } => {
            put_str(&mut body, content)?;
        }
    }

    let size = u32::try_from(body.len())
        .map_err(|_| ClientError::Protocol("frame too large".to_string()))?;
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32_le(size);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

fn need(buf: &[u8], count: usize) -> Result<(), ClientError> {
    if buf.remaining() < count {
        return Err(ClientError::Protocol("truncated frame".to_string()));
    }
    Ok(())
}

fn get_str(buf: &mut &[u8]) -> Result<String, ClientError> {
    need(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    need(buf, len)?;
    let raw = buf[..len].to_vec();
    buf.advance(len);
    String::from_utf8(raw).map_err(|_| ClientError::Protocol("invalid UTF-8 string".to_string()))
}

fn get_opt_str(buf: &mut &[u8]) -> Result<Option<String>, ClientError> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(None),
        1 => Ok(Some(get_str(buf)?)),
        other => Err(ClientError::Protocol(format!(
            "invalid presence byte {}",
            other
        ))),
    }
}

fn get_bytes(buf: &mut &[u8]) -> Result<Bytes, ClientError> {
    need(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    need(buf, len)?;
    let raw = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(raw)
}

fn get_opt_bytes(buf: &mut &[u8]) -> Result<Option<Bytes>, ClientError> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(None),
        1 => Ok(Some(get_bytes(buf)?)),
        other => Err(ClientError::Protocol(format!(
            "invalid presence byte {}",
            other
        ))),
    }
}

/// Decodes one complete frame, size prefix included. Console-side tooling
/// and test rigs use this to inspect what a client sent.
pub fn decode(frame: &[u8]) -> Result<Packet, ClientError> {
    let mut buf = frame;
    need(&buf, 4)?;
    let size = buf.get_u32_le() as usize;
    if buf.remaining() != size {
        return Err(ClientError::Protocol(format!(
            "frame size mismatch: header says {}, got {}",
            size,
            buf.remaining()
        )));
    }

    need(&buf, 2)?;
    let tag = buf.get_u8();
    let level = Level::from_u8(buf.get_u8())
        .ok_or_else(|| ClientError::Protocol("invalid level byte".to_string()))?;
    need(&buf, 8)?;
    let timestamp_us = buf.get_i64_le();
    let session = get_str(&mut buf)?;

    need(&buf, 4)?;
    let pairs = buf.get_u32_le() as usize;
    let mut context = Vec::with_capacity(pairs.min(64));
    for _ in 0..pairs {
        let key = get_str(&mut buf)?;
        let value = get_str(&mut buf)?;
        context.push((key, value));
    }
    let correlation_id = get_opt_str(&mut buf)?;
    let operation = get_opt_str(&mut buf)?;

    let body = match tag {
        4 => {
            need(&buf, 4)?;
            let raw = buf.get_i32_le();
            let entry_type = LogEntryType::from_raw(raw)
                .ok_or_else(|| ClientError::Protocol(format!("unknown entry type {}", raw)))?;
            let title = get_str(&mut buf)?;
            let app_name = get_str(&mut buf)?;
            let host_name = get_str(&mut buf)?;
            need(&buf, 8)?;
            let process_id = buf.get_u32_le();
            let thread_id = buf.get_u32_le();
            let data = get_opt_bytes(&mut buf)?;
            PacketBody::LogEntry {
                entry_type,
                title,
                app_name,
                host_name,
                process_id,
                thread_id,
                data,
            }
        }
        5 => {
            let name = get_str(&mut buf)?;
            let value = get_str(&mut buf)?;
            need(&buf, 4)?;
            let raw = buf.get_i32_le();
            let watch_type = WatchType::from_raw(raw)
                .ok_or_else(|| ClientError::Protocol(format!("unknown watch type {}", raw)))?;
            let group = get_str(&mut buf)?;
            PacketBody::Watch {
                name,
                value,
                watch_type,
                group,
            }
        }
        6 => {
            need(&buf, 4)?;
            let raw = buf.get_i32_le();
            let flow_type = ProcessFlowType::from_raw(raw)
                .ok_or_else(|| ClientError::Protocol(format!("unknown flow type {}", raw)))?;
            let title = get_str(&mut buf)?;
            let host_name = get_str(&mut buf)?;
            need(&buf, 8)?;
            let process_id = buf.get_u32_le();
            let thread_id = buf.get_u32_le();
            PacketBody::ProcessFlow {
                flow_type,
                title,
                host_name,
                process_id,
                thread_id,
            }
        }
        1 => {
            need(&buf, 4)?;
            let raw = buf.get_i32_le();
            let command_type = ControlCommandType::from_raw(raw)
                .ok_or_else(|| ClientError::Protocol(format!("unknown command type {}", raw)))?;
            let data = get_opt_bytes(&mut buf)?;
            PacketBody::ControlCommand { command_type, data }
        }
        8 => {
            let channel = get_str(&mut buf)?;
            let data = get_bytes(&mut buf)?;
            let stream_type = get_str(&mut buf)?;
            let group = get_str(&mut buf)?;
            PacketBody::Stream {
                channel,
                data,
                stream_type,
                group,
            }
        }
        7 => PacketBody::LogHeader {
            content: get_str(&mut buf)?,
        },
        other => {
            return Err(ClientError::Protocol(format!(
                "unknown packet tag {}",
                other
            )))
        }
    };

    if buf.has_remaining() {
        return Err(ClientError::Protocol(format!(
            "{} trailing bytes after packet body",
            buf.remaining()
        )));
    }

    Ok(Packet {
        level,
        timestamp_us,
        session,
        context,
        correlation_id,
        operation,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: Packet) {
        let frame = encode(&packet).expect("encode failed");
        let decoded = decode(&frame).expect("decode failed");
        assert_eq!(decoded, packet);
    }

    fn base(level: Level, body: PacketBody) -> Packet {
        Packet {
            level,
            timestamp_us: 1_724_900_000_123_456,
            session: "Main".to_string(),
            context: vec![
                ("request_id".to_string(), "r-17".to_string()),
                ("tenant".to_string(), "acme".to_string()),
            ],
            correlation_id: Some("c0ffee".to_string()),
            operation: Some("checkout".to_string()),
            body,
        }
    }

    #[test]
    fn test_log_entry_round_trip() {
        round_trip(base(
            Level::Warning,
            PacketBody::LogEntry {
                entry_type: LogEntryType::Warning,
                title: "disk is 90% full".to_string(),
                app_name: "billing".to_string(),
                host_name: "web-1".to_string(),
                process_id: 4711,
                thread_id: 3,
                data: Some(Bytes::from_static(b"line one\r\nline two\r\n")),
            },
        ));
    }

    #[test]
    fn test_watch_round_trip() {
        round_trip(base(
            Level::Debug,
            PacketBody::Watch {
                name: "queue.depth".to_string(),
                value: "42".to_string(),
                watch_type: WatchType::Integer,
                group: "pipeline".to_string(),
            },
        ));
    }

    #[test]
    fn test_process_flow_round_trip() {
        round_trip(base(
            Level::Message,
            PacketBody::ProcessFlow {
                flow_type: ProcessFlowType::EnterThread,
                title: "worker-2".to_string(),
                host_name: "web-1".to_string(),
                process_id: 4711,
                thread_id: 9,
            },
        ));
    }

    #[test]
    fn test_control_command_round_trip() {
        let mut packet = base(
            Level::Control,
            PacketBody::ControlCommand {
                command_type: ControlCommandType::ClearAll,
                data: None,
            },
        );
        packet.correlation_id = None;
        packet.operation = None;
        packet.context.clear();
        round_trip(packet);
    }

    #[test]
    fn test_stream_round_trip() {
        round_trip(base(
            Level::Verbose,
            PacketBody::Stream {
                channel: "audit".to_string(),
                data: Bytes::from_static(&[0, 1, 2, 254, 255]),
                stream_type: "binary".to_string(),
                group: "ingest".to_string(),
            },
        ));
    }

    #[test]
    fn test_log_header_round_trip() {
        round_trip(base(
            Level::Control,
            PacketBody::LogHeader {
                content: "hostname=web-1\r\nappname=billing\r\nroom=default\r\n".to_string(),
            },
        ));
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let packet = base(
            Level::Message,
            PacketBody::LogEntry {
                entry_type: LogEntryType::Message,
                title: "hello".to_string(),
                app_name: "app".to_string(),
                host_name: "host".to_string(),
                process_id: 1,
                thread_id: 1,
                data: None,
            },
        );
        let frame = encode(&packet).unwrap();
        for cut in [3, 5, frame.len() / 2, frame.len() - 1] {
            assert!(decode(&frame[..cut]).is_err(), "cut at {} decoded", cut);
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let packet = base(
            Level::Control,
            PacketBody::LogHeader {
                content: String::new(),
            },
        );
        let frame = encode(&packet).unwrap();
        let mut bad = frame.to_vec();
        bad[4] = 42; // tag byte sits right after the size prefix
        assert!(matches!(decode(&bad), Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_size_prefix_matches_remainder() {
        let packet = base(
            Level::Debug,
            PacketBody::Watch {
                name: "n".to_string(),
                value: "v".to_string(),
                watch_type: WatchType::Str,
                group: String::new(),
            },
        );
        let frame = encode(&packet).unwrap();
        let size = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(size, frame.len() - 4);
    }
}
