use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opcodes for gateway frames.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Close codes.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const UNKNOWN_ERROR: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    pub const INVALID_SEQ: u16 = 4007;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMED_OUT: u16 = 4009;
    pub const INVALID_SHARD: u16 = 4010;
    pub const SHARDING_REQUIRED: u16 = 4011;
    pub const INVALID_API_VERSION: u16 = 4012;
    pub const INVALID_INTENTS: u16 = 4013;
    pub const DISALLOWED_INTENTS: u16 = 4014;

    /// Codes after which reconnecting cannot succeed without operator action.
    pub fn is_fatal(code: u16) -> bool {
        matches!(
            code,
            AUTHENTICATION_FAILED
                | INVALID_SHARD
                | SHARDING_REQUIRED
                | INVALID_API_VERSION
                | INVALID_INTENTS
                | DISALLOWED_INTENTS
        )
    }

    /// Codes after which the server has discarded the session.
    pub fn invalidates_session(code: u16) -> bool {
        matches!(code, INVALID_SEQ | SESSION_TIMED_OUT)
    }
}

/// Gateway frame envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Frame {
    pub fn new(op: u8, d: serde_json::Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Outbound heartbeat carrying the last sequence seen, or null before any dispatch.
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(opcode::HEARTBEAT, serde_json::json!(sequence))
    }

    pub fn identify(data: &IdentifyData) -> Self {
        Self::new(
            opcode::IDENTIFY,
            serde_json::to_value(data).unwrap_or_default(),
        )
    }

    pub fn resume(data: &ResumeData) -> Self {
        Self::new(
            opcode::RESUME,
            serde_json::to_value(data).unwrap_or_default(),
        )
    }
}

/// IDENTIFY payload data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyData {
    pub token: String,
    pub intents: u64,
    pub shard: [u32; 2],
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        let agent = format!(
            "shardgate/{} ({})",
            env!("CARGO_PKG_VERSION"),
            env!("SHARDGATE_GIT_SHA")
        );
        Self {
            os: std::env::consts::OS.to_string(),
            browser: agent.clone(),
            device: agent,
        }
    }
}

/// RESUME payload data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeData {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Fields of the READY dispatch this crate cares about.
#[derive(Debug, Deserialize)]
pub struct ReadyData {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// A Dispatch frame handed to the event consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub shard_id: u32,
    pub name: String,
    pub data: serde_json::Value,
    pub sequence: Option<u64>,
}

/// Consumer of dispatched gateway events.
///
/// Called on the connection task, so implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn deliver(&self, event: DispatchEvent);
}

impl EventSink for mpsc::UnboundedSender<DispatchEvent> {
    fn deliver(&self, event: DispatchEvent) {
        if self.send(event).is_err() {
            tracing::trace!("event receiver dropped, discarding dispatch");
        }
    }
}
