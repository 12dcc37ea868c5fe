use std::collections::HashMap;

use super::connection::Connection;
use super::events::{opcode, Frame};
use super::handlers::{
    DispatchHandler, HeartbeatAckHandler, HeartbeatRequestHandler, HelloHandler,
    InvalidSessionHandler, ReconnectHandler,
};

/// Protocol reaction to one inbound opcode.
pub trait OpcodeHandler: Send + Sync {
    fn handle(&self, conn: &mut Connection, frame: Frame);
}

/// Routes each decoded frame to exactly one handler.
pub struct HandlerRegistry {
    handlers: HashMap<u8, Box<dyn OpcodeHandler>>,
}

impl HandlerRegistry {
    /// An empty registry. Every opcode is dropped until registered.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The inbound opcodes a gateway client has to understand.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(opcode::DISPATCH, DispatchHandler);
        registry.register(opcode::HEARTBEAT, HeartbeatRequestHandler);
        registry.register(opcode::RECONNECT, ReconnectHandler);
        registry.register(opcode::INVALID_SESSION, InvalidSessionHandler);
        registry.register(opcode::HELLO, HelloHandler);
        registry.register(opcode::HEARTBEAT_ACK, HeartbeatAckHandler);
        registry
    }

    pub fn register(&mut self, op: u8, handler: impl OpcodeHandler + 'static) {
        self.handlers.insert(op, Box::new(handler));
    }

    pub fn handles(&self, op: u8) -> bool {
        self.handlers.contains_key(&op)
    }

    /// Run the handler for `frame.op`. Returns false when the opcode is unknown
    /// and the frame was dropped.
    pub fn dispatch(&self, conn: &mut Connection, frame: Frame) -> bool {
        match self.handlers.get(&frame.op) {
            Some(handler) => {
                handler.handle(conn, frame);
                true
            }
            None => {
                tracing::warn!(
                    "shard {}: dropping frame with unexpected opcode {}",
                    conn.shard_id(),
                    frame.op
                );
                false
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
