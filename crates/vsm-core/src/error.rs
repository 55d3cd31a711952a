//! Error handling for the vital-signs monitor
//!
//! One error type shared by every crate in the workspace. Data-dependent
//! failures inside the compute path (empty windows, zero DC, too few beats)
//! are not errors; they surface as absent metrics instead.

use std::fmt;

/// Result type alias for monitor operations
pub type VsmResult<T> = Result<T, VsmError>;

/// Error type for all monitor operations
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum VsmError {
    /// Invalid configuration value
    InvalidConfig {
        /// Description of the configuration error
        reason: String,
    },

    /// Filter coefficients could not be designed
    InvalidFilter {
        /// Filter that failed
        filter: &'static str,
        /// Description of the design problem
        reason: String,
    },

    /// Input line had the wrong number of comma separated fields
    FieldCount {
        /// Number of fields found
        found: usize,
    },

    /// Input line contained a token that is not an integer
    InvalidToken {
        /// Zero-based field position
        position: usize,
        /// Offending token (truncated)
        token: String,
    },

    /// Input bytes were not valid UTF-8
    InvalidEncoding,

    /// No line terminator within the accepted line length
    LineTooLong {
        /// Longest accepted line in bytes
        limit: usize,
    },

    /// No valid line arrived before the connect deadline
    ConnectTimeout {
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// The transport closed or failed
    Transport {
        /// Transport error description
        reason: String,
    },

    /// Operation not allowed in the current coordinator state
    InvalidState {
        /// Current state name
        state: &'static str,
        /// Attempted operation
        operation: &'static str,
    },

    /// Serialization/deserialization error
    Serialization {
        /// Serializer error description
        reason: String,
    },
}

impl VsmError {
    /// Whether this error describes a rejected input line
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            VsmError::FieldCount { .. }
                | VsmError::InvalidToken { .. }
                | VsmError::InvalidEncoding
                | VsmError::LineTooLong { .. }
        )
    }
}

impl fmt::Display for VsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VsmError::InvalidConfig { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
            VsmError::InvalidFilter { filter, reason } => {
                write!(f, "Invalid {} filter: {}", filter, reason)
            }
            VsmError::FieldCount { found } => {
                write!(f, "Malformed line: expected 4 or 5 fields, found {}", found)
            }
            VsmError::InvalidToken { position, token } => {
                write!(f, "Malformed line: field {} is not an integer: {:?}", position, token)
            }
            VsmError::InvalidEncoding => {
                write!(f, "Malformed line: not valid UTF-8")
            }
            VsmError::LineTooLong { limit } => {
                write!(f, "Malformed line: no line end within {} bytes", limit)
            }
            VsmError::ConnectTimeout { timeout_ms } => {
                write!(f, "No valid data received within {}ms", timeout_ms)
            }
            VsmError::Transport { reason } => {
                write!(f, "Transport error: {}", reason)
            }
            VsmError::InvalidState { state, operation } => {
                write!(f, "Cannot {} while {}", operation, state)
            }
            VsmError::Serialization { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for VsmError {}

impl From<std::io::Error> for VsmError {
    fn from(err: std::io::Error) -> Self {
        VsmError::Transport {
            reason: err.to_string(),
        }
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)+) => {
        $crate::error::VsmError::InvalidConfig {
            reason: format!($($arg)+),
        }
    };
}
