pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod handlers;
pub mod heartbeat;
pub mod intents;
pub mod jitter;
pub mod ratelimit;
pub mod reconnect;
pub mod session;
pub mod timer;

pub use connection::{
    spawn, Collaborators, Command, Connection, ConnectionState, ShardConfig, ShardHandle,
};
pub use dispatcher::{HandlerRegistry, OpcodeHandler};
pub use events::{DispatchEvent, EventSink, Frame};
pub use jitter::{FixedJitter, Jitter, ThreadRngJitter};
pub use ratelimit::IdentifyQueue;
pub use reconnect::ReconnectReason;
pub use session::Session;
