//! Error taxonomy for the ENIP/CIP engine.

use std::io;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the engine can produce.
///
/// Variants map to the kinds named by the error-handling design: network,
/// framing, session, CPF, CIP status, validation, and config errors. CIP
/// status errors are normally encoded into a wire response rather than
/// propagated as a Rust error; the variant here exists for callers (tests,
/// the client) that want to observe a nonzero status as a failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level I/O failure (connect/accept/read/write).
    #[error("network error on {peer}: {source}")]
    Network {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Json(#[from] serde_json::Error),

    /// ENIP encapsulation header or length was malformed.
    #[error("framing error: {0}")]
    Framing(String),

    /// Buffer shorter than a fixed-size field requires.
    #[error("truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Unknown, expired, or over-limit session.
    #[error("session error: {0}")]
    Session(SessionError),

    /// CPF item list did not match the profile's acceptance policy.
    #[error("CPF error: {0}")]
    Cpf(String),

    /// A CIP response carried a nonzero general status.
    #[error("CIP status 0x{status:02X}: {detail}")]
    CipStatus { status: u8, detail: String },

    /// Pre-send or pre-dispatch structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Bad or unsupported configuration.
    #[error("config error: {0}")]
    Config(String),

    /// EPATH segment was malformed or referenced an unknown segment type.
    #[error("invalid EPATH: {0}")]
    InvalidPath(String),
}

/// Specific session-table failure kinds, grouped so callers can match once
/// on `Error::Session(_)` and again on the inner reason when they care.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown session {id:#010x}")]
    Unknown { id: u32 },

    #[error("session {id:#010x} expired (idle {idle_ms}ms > timeout {timeout_ms}ms)")]
    Expired {
        id: u32,
        idle_ms: u64,
        timeout_ms: u64,
    },

    #[error("session limit reached ({limit} sessions)")]
    LimitReached { limit: usize },

    #[error("per-ip session limit reached for {ip} ({limit} sessions)")]
    PerIpLimitReached { ip: String, limit: usize },

    #[error("unknown connection {id:#010x}")]
    UnknownConnection { id: u32 },
}

impl Error {
    pub fn network(peer: impl Into<String>, source: io::Error) -> Self {
        Self::Network {
            peer: peer.into(),
            source,
        }
    }

    pub fn cip_status(status: u8, detail: impl Into<String>) -> Self {
        Self::CipStatus {
            status,
            detail: detail.into(),
        }
    }

    /// Whether this error should be reported to the wire as an ENIP status
    /// code rather than by closing the connection.
    pub fn is_protocol_level(&self) -> bool {
        matches!(
            self,
            Error::Framing(_) | Error::Session(_) | Error::Cpf(_) | Error::Validation(_)
        )
    }

    /// Best-effort mapping to an ENIP encapsulation status code.
    pub fn enip_status(&self) -> u32 {
        match self {
            Error::Session(SessionError::Unknown { .. })
            | Error::Session(SessionError::Expired { .. }) => 0x0064, // InvalidSessionHandle
            Error::Session(SessionError::LimitReached { .. })
            | Error::Session(SessionError::PerIpLimitReached { .. }) => 0x0068, // InsufficientMemory
            Error::Framing(_) => 0x0065, // InvalidLength
            _ => 0x0001,                 // InvalidCommand (generic fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_unknown_maps_to_invalid_session_handle() {
        let err = Error::Session(SessionError::Unknown { id: 7 });
        assert_eq!(err.enip_status(), 0x0064);
    }

    #[test]
    fn session_limit_maps_to_insufficient_memory() {
        let err = Error::Session(SessionError::LimitReached { limit: 10 });
        assert_eq!(err.enip_status(), 0x0068);
        assert!(err.to_string().contains("10 sessions"));
    }

    #[test]
    fn cip_status_formats_hex() {
        let err = Error::cip_status(0x05, "path destination unknown");
        assert_eq!(err.to_string(), "CIP status 0x05: path destination unknown");
    }

    #[test]
    fn protocol_level_classification() {
        assert!(Error::Framing("bad length".into()).is_protocol_level());
        assert!(!Error::Config("bad pccc file type".into()).is_protocol_level());
    }
}
