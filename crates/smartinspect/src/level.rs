// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

use crate::error::ClientError;
use std::fmt;
use std::str::FromStr;

/// Severity of a packet, ordered from least to most severe.
///
/// `Control` is reserved for internal control commands and cannot be selected
/// by callers; it always passes level filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Verbose = 1,
    Message = 2,
    Warning = 3,
    Error = 4,
    Fatal = 5,
    Control = 6,
}

impl Level {
    pub(crate) fn from_u8(value: u8) -> Option<Level> {
        match value {
            0 => Some(Level::Debug),
            1 => Some(Level::Verbose),
            2 => Some(Level::Message),
            3 => Some(Level::Warning),
            4 => Some(Level::Error),
            5 => Some(Level::Fatal),
            6 => Some(Level::Control),
            _ => None,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Debug => "debug",
            Level::Verbose => "verbose",
            Level::Message => "message",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Control => "control",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Level {
    type Err = ClientError;

    /// Parses a caller-facing level name. `control` is intentionally not
    /// accepted here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "verbose" => Ok(Level::Verbose),
            "message" => Ok(Level::Message),
            "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            other => Err(ClientError::Config(format!("unknown level '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Verbose);
        assert!(Level::Verbose < Level::Message);
        assert!(Level::Message < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Fatal);
        assert!(Level::Fatal < Level::Control);
    }

    #[test]
    fn test_parse_level_names() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!(" Warning ".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("FATAL".parse::<Level>().unwrap(), Level::Fatal);
    }

    #[test]
    fn test_control_is_not_caller_selectable() {
        assert!("control".parse::<Level>().is_err());
        assert!("".parse::<Level>().is_err());
    }

    #[test]
    fn test_u8_round_trip() {
        for raw in 0..=6u8 {
            let level = Level::from_u8(raw).unwrap();
            assert_eq!(level.as_u8(), raw);
        }
        assert!(Level::from_u8(7).is_none());
    }
}
