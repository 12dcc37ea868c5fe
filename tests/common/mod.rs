#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use shardgate::error::GatewayError;
use shardgate::gateway::codec;
use shardgate::gateway::{
    self, Collaborators, DispatchEvent, FixedJitter, Frame, Jitter, ShardConfig, ShardHandle,
};
use shardgate::transport::{Connector, Outbound, Transport, TransportEvent, TransportPeer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const GATEWAY_URL: &str = "wss://gateway.test";
pub const RESUME_URL: &str = "wss://resume.gateway.test";
pub const TOKEN: &str = "Bot test-token";

/// One transport the connection opened, seen from the server side.
pub struct Attempt {
    pub url: String,
    pub peer: TransportPeer,
}

impl Attempt {
    pub fn push(&self, event: TransportEvent) {
        self.peer
            .inbound
            .send(event)
            .expect("connection dropped the transport");
    }

    pub fn send(&self, frame: Value) {
        self.push(TransportEvent::Frame(frame.to_string()));
    }

    pub fn hello(&self, interval_ms: u64) {
        self.send(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}));
    }

    pub fn dispatch(&self, name: &str, seq: u64, d: Value) {
        self.send(json!({"op": 0, "t": name, "s": seq, "d": d}));
    }

    pub fn ready(&self, seq: u64) {
        self.dispatch(
            "READY",
            seq,
            json!({"session_id": "session-1", "resume_gateway_url": RESUME_URL}),
        );
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.push(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Next thing the connection wrote, `None` once it let go of the transport.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.peer.outbound.recv().await
    }

    /// Next text frame the connection wrote. Panics on a close.
    pub async fn next_frame(&mut self) -> Frame {
        match self.next_outbound().await {
            Some(Outbound::Text(text)) => codec::decode(&text).expect("client sent a bad frame"),
            other => panic!("expected a frame, got {other:?}"),
        }
    }
}

/// Hands every transport the connection opens to the test.
pub struct MockConnector {
    attempts: mpsc::UnboundedSender<Attempt>,
    refusals: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Attempt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: tx,
            refusals: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Fail the next `count` connects.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Transport, GatewayError>> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Box::pin(async { Err(GatewayError::TransportFailure("connection refused".into())) });
        }
        let (transport, peer) = Transport::pair();
        let _ = self.attempts.send(Attempt { url, peer });
        Box::pin(async move { Ok(transport) })
    }
}

pub struct TestShard {
    pub handle: ShardHandle,
    pub task: JoinHandle<Result<(), GatewayError>>,
    pub connector: Arc<MockConnector>,
    pub attempts: mpsc::UnboundedReceiver<Attempt>,
    pub events: mpsc::UnboundedReceiver<DispatchEvent>,
}

impl TestShard {
    pub async fn next_attempt(&mut self) -> Attempt {
        self.attempts.recv().await.expect("connection task ended")
    }

    /// Drive a fresh connection through Hello, Identify and READY.
    pub async fn connect_ready(&mut self) -> Attempt {
        let mut attempt = self.next_attempt().await;
        attempt.hello(45_000);
        let identify = attempt.next_frame().await;
        assert_eq!(identify.op, 2);
        attempt.ready(1);
        self.handle
            .wait_for(gateway::ConnectionState::Connected)
            .await;
        attempt
    }
}

pub fn shard_config() -> ShardConfig {
    let mut config = ShardConfig::new(GATEWAY_URL, TOKEN);
    config.intents = 1 | (1 << 9);
    config
}

pub fn start_shard() -> TestShard {
    start_shard_with(shard_config(), Arc::new(FixedJitter::new(0.5)))
}

pub fn start_shard_with(config: ShardConfig, jitter: Arc<dyn Jitter>) -> TestShard {
    let (connector, attempts) = MockConnector::new();
    let (event_tx, events) = mpsc::unbounded_channel();
    let collaborators =
        Collaborators::new(connector.clone(), Arc::new(event_tx)).with_jitter(jitter);
    let (handle, task) = gateway::spawn(config, collaborators);
    TestShard {
        handle,
        task,
        connector,
        attempts,
        events,
    }
}
