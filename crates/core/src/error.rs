//! Error types for the intercom core.

use std::fmt;

/// Errors that can occur in the intercom core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Configuration**: [`InvalidConfig`](Self::InvalidConfig) — rejected at
///   construction, before any socket is touched.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Control plane**: [`TableFull`](Self::TableFull).
/// - **Device**: [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Wire format**: [`Header`](Self::Header) — malformed packet headers.
///
/// Arbitration conflicts (talk denied, end-talk from a non-holder) are not
/// errors; they are ordinary verdicts returned over the control channel.
#[derive(Debug, thiserror::Error)]
pub enum IntercomError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A construction argument was rejected.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: &'static str },

    /// [`Device::start`](crate::Device::start) was called while already running.
    #[error("device already running")]
    AlreadyRunning,

    /// Every client slot is occupied.
    #[error("client table full ({capacity} slots)")]
    TableFull { capacity: usize },

    /// Failed to parse a media packet header.
    #[error("packet header error: {kind}")]
    Header { kind: HeaderErrorKind },
}

/// Specific kind of packet-header parse failure.
#[derive(Debug)]
pub enum HeaderErrorKind {
    /// Buffer shorter than the fixed header length.
    Truncated { needed: usize, got: usize },
    /// Type byte did not match any known packet kind.
    UnknownKind(u8),
}

impl fmt::Display for HeaderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, got } => {
                write!(f, "buffer too short: need {needed} bytes, got {got}")
            }
            Self::UnknownKind(kind) => write!(f, "unknown packet kind {kind}"),
        }
    }
}

/// Convenience alias for `Result<T, IntercomError>`.
pub type Result<T> = std::result::Result<T, IntercomError>;
