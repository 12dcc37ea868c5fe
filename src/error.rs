use std::fmt;

use tokio_tungstenite::tungstenite;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// A frame could not be decoded. The frame is dropped.
    MalformedFrame(String),
    /// A well-formed frame arrived that makes no sense in the current state.
    ProtocolViolation(String),
    /// The transport could not be opened or was lost.
    TransportFailure(String),
    /// The gateway closed with a non-retryable code. Terminal for the shard.
    AuthenticationRejected { code: u16, reason: String },
}

impl GatewayError {
    /// Whether this error ends the shard instead of being recovered from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::AuthenticationRejected { .. })
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayError::MalformedFrame(_) => "malformed_frame",
            GatewayError::ProtocolViolation(_) => "protocol_violation",
            GatewayError::TransportFailure(_) => "transport_failure",
            GatewayError::AuthenticationRejected { .. } => "authentication_rejected",
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::MalformedFrame(msg)
            | GatewayError::ProtocolViolation(msg)
            | GatewayError::TransportFailure(msg) => write!(f, "{}: {msg}", self.kind()),
            GatewayError::AuthenticationRejected { code, reason } if reason.is_empty() => {
                write!(f, "{}: gateway closed with {code}", self.kind())
            }
            GatewayError::AuthenticationRejected { code, reason } => {
                write!(f, "{}: gateway closed with {code} ({reason})", self.kind())
            }
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::MalformedFrame(e.to_string())
    }
}

impl From<tungstenite::Error> for GatewayError {
    fn from(e: tungstenite::Error) -> Self {
        GatewayError::TransportFailure(e.to_string())
    }
}
