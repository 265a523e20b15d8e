// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Errors shared by the prediction core
//!
//! The kinds are deliberately coarse. Callers of the prediction core are
//! driver tests and usually react per kind: skip the test on
//! [`Error::Unsupported`], fail it on [`Error::QueryFailed`], treat
//! [`Error::ConfigMissing`] as a missing prerequisite step. Nothing here is
//! fatal to the process.

use std::collections::TryReserveError;
use std::fmt;

/// Errors returned by RSS state queries and queue prediction
#[derive(Debug)]
pub enum Error {
    /// The driver does not expose the requested RSS state
    Unsupported(String),

    /// Reading RSS state from the driver failed
    QueryFailed(anyhow::Error),

    /// Allocating the hash computation cache failed
    OutOfMemory(TryReserveError),

    /// A required hash setting is not configured or not reported
    ConfigMissing(String),

    /// The RSS context was used after it was released
    InvalidState,

    /// Source and destination endpoints have different address families
    FamilyMismatch,

    /// The hash input is longer than the hash key supports
    KeyTooShort {
        /// Length of the hash key in bytes
        key_len: usize,
        /// Length of the rejected hash input in bytes
        input_len: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "{what} is not supported by the driver"),
            Self::QueryFailed(source) => write!(f, "querying RSS state failed: {source:#}"),
            Self::OutOfMemory(source) => {
                write!(f, "allocating the hash computation cache failed: {source}")
            }
            Self::ConfigMissing(what) => write!(f, "{what} is missing"),
            Self::InvalidState => write!(f, "RSS context was already released"),
            Self::FamilyMismatch => write!(
                f,
                "source and destination endpoints have different address families"
            ),
            Self::KeyTooShort { key_len, input_len } => write!(
                f,
                "hash key of {key_len} bytes is too short for {input_len} bytes of hash input"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::QueryFailed(source) => {
                let source: &(dyn std::error::Error + 'static) = source.as_ref();
                Some(source)
            }
            Self::OutOfMemory(source) => Some(source),
            _ => None,
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(source: TryReserveError) -> Self {
        Self::OutOfMemory(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_display() {
        assert_eq!(
            format!("{}", Error::Unsupported(String::from("RSS hash key"))),
            "RSS hash key is not supported by the driver"
        );
        assert_eq!(
            format!(
                "{}",
                Error::KeyTooShort {
                    key_len: 40,
                    input_len: 37
                }
            ),
            "hash key of 40 bytes is too short for 37 bytes of hash input"
        );
    }

    #[test]
    fn test_query_failed_keeps_cause() {
        let error = Error::QueryFailed(anyhow!("connection reset"));
        assert!(format!("{error}").contains("connection reset"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
