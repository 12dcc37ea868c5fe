//! Connection lifecycle for one shard.
//!
//! A [`Connection`] runs as a single task. Inbound frames, timer firings,
//! connect completions and caller commands all arrive through channels and
//! are applied one at a time, so every state change goes through the methods
//! below and nothing races on the session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::transport::{Connector, Transport, TransportEvent};

use super::codec;
use super::dispatcher::HandlerRegistry;
use super::events::{
    close_code, ConnectionProperties, DispatchEvent, EventSink, Frame, IdentifyData, ResumeData,
};
use super::heartbeat::{HeartbeatMonitor, HeartbeatTick};
use super::jitter::{Jitter, ThreadRngJitter};
use super::ratelimit::IdentifyQueue;
use super::reconnect::{Backoff, PendingReconnect, ReconnectReason, ReconnectScheduler};
use super::session::Session;
use super::timer::{TimerFired, TimerKind, TimerSlot};

/// Close code used when we plan to resume. 1000 and 1001 end the session
/// on the server.
const RESUMABLE_CLOSE: u16 = close_code::UNKNOWN_ERROR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Identifying,
    Resuming,
    Connected,
    Closing,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Identifying => "identifying",
            ConnectionState::Resuming => "resuming",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one shard needs to authenticate and pace its reconnects.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub gateway_url: String,
    pub token: String,
    pub shard_id: u32,
    pub shard_count: u32,
    pub intents: u64,
    pub large_threshold: Option<u32>,
    pub presence: Option<serde_json::Value>,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl ShardConfig {
    pub fn new(gateway_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token: token.into(),
            shard_id: 0,
            shard_count: 1,
            intents: 0,
            large_threshold: None,
            presence: None,
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Collaborators injected into each connection.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub events: Arc<dyn EventSink>,
    pub jitter: Arc<dyn Jitter>,
    pub identify_queue: Option<Arc<IdentifyQueue>>,
}

impl Collaborators {
    pub fn new(connector: Arc<dyn Connector>, events: Arc<dyn EventSink>) -> Self {
        Self {
            connector,
            events,
            jitter: Arc::new(ThreadRngJitter),
            identify_queue: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_identify_queue(mut self, queue: Arc<IdentifyQueue>) -> Self {
        self.identify_queue = Some(queue);
        self
    }
}

/// Requests from a [`ShardHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Shutdown,
    Reconnect { delay: Option<Duration> },
}

/// Caller side of a running connection.
#[derive(Debug, Clone)]
pub struct ShardHandle {
    shard_id: u32,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ShardHandle {
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Shut the connection down. It will not reconnect afterwards.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Drop the current transport and reconnect, resuming when possible.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect { delay: None });
    }

    /// Like [`reconnect`](Self::reconnect), but wait `delay` before opening
    /// the new transport.
    pub fn reconnect_after(&self, delay: Duration) {
        let _ = self.commands.send(Command::Reconnect { delay: Some(delay) });
    }

    /// Wait until the connection reaches `target`, or closes.
    pub async fn wait_for(&self, target: ConnectionState) -> ConnectionState {
        let mut state = self.state.clone();
        let reached = match state
            .wait_for(|s| *s == target || *s == ConnectionState::Closed)
            .await
        {
            Ok(reached) => *reached,
            Err(_) => ConnectionState::Closed,
        };
        reached
    }
}

/// Start a connection task for one shard.
///
/// The task ends with `Ok(())` after [`ShardHandle::close`] (or once every
/// handle is dropped) and with [`GatewayError::AuthenticationRejected`] when
/// the gateway refuses the credentials.
pub fn spawn(
    config: ShardConfig,
    collaborators: Collaborators,
) -> (ShardHandle, JoinHandle<Result<(), GatewayError>>) {
    let (conn, handle) = Connection::new(config, collaborators);
    (handle, tokio::spawn(conn.run()))
}

struct ConnectAttempt {
    generation: u64,
    result: Result<Transport, GatewayError>,
}

enum Release {
    Close(u16),
    Abort,
    Gone,
}

pub struct Connection {
    config: ShardConfig,
    connector: Arc<dyn Connector>,
    events: Arc<dyn EventSink>,
    identify_queue: Option<Arc<IdentifyQueue>>,
    registry: Arc<HandlerRegistry>,

    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    session: Session,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectScheduler,
    identify_timer: TimerSlot,
    identify_slot: Option<Instant>,
    transport: Option<Transport>,
    connect_task: Option<JoinHandle<()>>,
    connect_generation: u64,
    outcome: Result<(), GatewayError>,

    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    connect_tx: mpsc::UnboundedSender<ConnectAttempt>,
    connect_rx: mpsc::UnboundedReceiver<ConnectAttempt>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Connection {
    pub fn new(config: ShardConfig, collaborators: Collaborators) -> (Self, ShardHandle) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();

        let handle = ShardHandle {
            shard_id: config.shard_id,
            commands: command_tx,
            state: state_rx,
        };
        let backoff = Backoff::new(config.reconnect_min, config.reconnect_max);
        let conn = Self {
            connector: collaborators.connector,
            events: collaborators.events,
            identify_queue: collaborators.identify_queue,
            registry: Arc::new(HandlerRegistry::standard()),
            state: ConnectionState::Connecting,
            state_tx,
            session: Session::default(),
            heartbeat: HeartbeatMonitor::new(),
            reconnect: ReconnectScheduler::new(backoff, collaborators.jitter),
            identify_timer: TimerSlot::new(TimerKind::Identify),
            identify_slot: None,
            transport: None,
            connect_task: None,
            connect_generation: 0,
            outcome: Ok(()),
            timer_tx,
            timer_rx,
            connect_tx,
            connect_rx,
            commands: command_rx,
            config,
        };
        (conn, handle)
    }

    pub async fn run(mut self) -> Result<(), GatewayError> {
        tracing::info!(
            "shard {}/{}: starting",
            self.config.shard_id,
            self.config.shard_count
        );
        self.connect();
        while self.state != ConnectionState::Closed {
            self.step().await;
        }
        tracing::info!("shard {}: stopped", self.config.shard_id);
        std::mem::replace(&mut self.outcome, Ok(()))
    }

    /// Wait for the next event of any kind and apply it.
    pub(crate) async fn step(&mut self) {
        tokio::select! {
            command = self.commands.recv() => match command {
                Some(Command::Shutdown) | None => self.close(),
                Some(Command::Reconnect { delay }) => self.request_reconnect(delay),
            },
            Some(fired) = self.timer_rx.recv() => self.on_timer(fired),
            Some(attempt) = self.connect_rx.recv() => self.on_connect_attempt(attempt),
            event = next_transport_event(&mut self.transport) => self.on_transport_event(event),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn shard_id(&self) -> u32 {
        self.config.shard_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.reconnect.pending()
    }

    /// Authenticate on the live transport: Resume when the session allows it,
    /// Identify otherwise. Without a transport this opens a new one and the
    /// Hello that follows comes back here.
    pub fn identify_or_resume(&mut self) {
        if self.is_shutting_down() {
            return;
        }
        if self.transport.is_none() {
            self.connect();
            return;
        }
        if self.session.can_resume() {
            self.resume();
        } else {
            self.identify();
        }
    }

    /// Start a brand-new session.
    pub fn identify(&mut self) {
        if self.is_shutting_down() {
            return;
        }
        self.session.reset();
        self.cancel_deferred_identify();
        self.transition(ConnectionState::Identifying);

        if let Some(queue) = &self.identify_queue {
            let wait = queue.reserve(self.config.shard_id, Instant::now());
            if !wait.is_zero() {
                tracing::info!(
                    "shard {}: waiting {:?} for an identify slot",
                    self.config.shard_id,
                    wait
                );
                self.identify_slot = Some(Instant::now() + wait);
                self.identify_timer.schedule_once(wait, &self.timer_tx);
                return;
            }
        }
        self.send_identify();
    }

    /// Continue the current session from the last sequence seen.
    pub fn resume(&mut self) {
        if self.is_shutting_down() {
            return;
        }
        let Some(session_id) = self.session.session_id().map(str::to_owned) else {
            self.identify();
            return;
        };
        self.transition(ConnectionState::Resuming);
        let seq = self.session.sequence();
        tracing::info!(
            "shard {}: resuming session {} at sequence {}",
            self.config.shard_id,
            session_id,
            seq
        );
        self.send(&Frame::resume(&ResumeData {
            token: self.config.token.clone(),
            session_id,
            seq,
        }));
    }

    /// Shut down: cancel every timer, close the transport, and stop for good.
    pub fn close(&mut self) {
        if self.is_shutting_down() {
            return;
        }
        self.transition(ConnectionState::Closing);
        self.cancel_all();
        self.release_transport(Release::Close(close_code::NORMAL));
        self.transition(ConnectionState::Closed);
    }

    pub(crate) fn start_heartbeat(&mut self, interval: Duration) {
        self.heartbeat.start(interval, &self.timer_tx);
    }

    pub(crate) fn send_heartbeat(&mut self) {
        if self.transport.is_none() {
            return;
        }
        let seq = self.session.sequence();
        self.send(&Frame::heartbeat((seq > 0).then_some(seq)));
        self.heartbeat.record_sent(Instant::now());
    }

    pub(crate) fn heartbeat_acked(&mut self) {
        self.heartbeat.record_ack(Instant::now());
        if let Some(latency) = self.heartbeat.latency() {
            tracing::trace!(
                "shard {}: heartbeat acked in {:?}",
                self.config.shard_id,
                latency
            );
        }
    }

    /// The gateway accepted our Identify or Resume.
    pub(crate) fn mark_connected(&mut self) {
        self.transition(ConnectionState::Connected);
        self.reconnect.reset_backoff();
        // Next beat one interval after the handshake, not after Hello.
        self.heartbeat.restart(&self.timer_tx);
        tracing::info!(
            "shard {}: connected (session {})",
            self.config.shard_id,
            self.session.session_id().unwrap_or("-")
        );
    }

    pub(crate) fn deliver(&self, event: DispatchEvent) {
        self.events.deliver(event);
    }

    /// Close the transport keeping the session resumable, then reconnect.
    pub(crate) fn close_for_reconnect(&mut self, reason: ReconnectReason) {
        self.release_transport(Release::Close(RESUMABLE_CLOSE));
        self.schedule_reconnect(reason, None);
    }

    /// Arm the single reconnect timer. A pending reconnect is replaced.
    pub(crate) fn schedule_reconnect(&mut self, reason: ReconnectReason, delay: Option<Duration>) {
        if self.is_shutting_down() {
            return;
        }
        self.cancel_deferred_identify();
        self.cancel_connect_attempt();
        let (_, delay) = self.reconnect.schedule(reason, delay, &self.timer_tx);
        tracing::info!(
            "shard {}: reconnecting in {:?} ({})",
            self.config.shard_id,
            delay,
            reason
        );
        self.transition(ConnectionState::Reconnecting);
    }

    pub(crate) fn handle_raw(&mut self, raw: &str) {
        match codec::decode(raw) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => tracing::warn!("shard {}: dropping frame: {}", self.config.shard_id, e),
        }
    }

    pub(crate) fn handle_frame(&mut self, frame: Frame) {
        if self.is_shutting_down() {
            return;
        }
        tracing::trace!(
            "shard {}: op {} {}",
            self.config.shard_id,
            frame.op,
            frame.t.as_deref().unwrap_or("")
        );
        let registry = Arc::clone(&self.registry);
        registry.dispatch(self, frame);
    }

    fn request_reconnect(&mut self, delay: Option<Duration>) {
        if self.is_shutting_down() {
            return;
        }
        tracing::info!("shard {}: reconnect requested by caller", self.config.shard_id);
        self.release_transport(Release::Close(RESUMABLE_CLOSE));
        self.schedule_reconnect(ReconnectReason::ReconnectRequested, delay);
    }

    /// Open a new transport. Resumable sessions go to their resume URL.
    pub(crate) fn connect(&mut self) {
        if self.is_shutting_down() {
            return;
        }
        self.release_transport(Release::Close(RESUMABLE_CLOSE));
        self.cancel_connect_attempt();
        self.transition(ConnectionState::Connecting);

        let url = match self.session.resume_url() {
            Some(url) if self.session.can_resume() => url.to_string(),
            _ => self.config.gateway_url.clone(),
        };
        tracing::debug!("shard {}: connecting to {}", self.config.shard_id, url);

        self.connect_generation = self.connect_generation.wrapping_add(1);
        let generation = self.connect_generation;
        let pending = self.connector.connect(url);
        let tx = self.connect_tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let result = pending.await;
            let _ = tx.send(ConnectAttempt { generation, result });
        }));
    }

    fn on_connect_attempt(&mut self, attempt: ConnectAttempt) {
        if attempt.generation != self.connect_generation
            || self.state != ConnectionState::Connecting
        {
            return;
        }
        self.connect_task = None;
        match attempt.result {
            Ok(transport) => {
                tracing::debug!(
                    "shard {}: transport open, waiting for hello",
                    self.config.shard_id
                );
                self.transport = Some(transport);
            }
            Err(e) => {
                tracing::warn!("shard {}: connect failed: {}", self.config.shard_id, e);
                self.schedule_reconnect(ReconnectReason::TransportClosed, None);
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(raw) => self.handle_raw(&raw),
            TransportEvent::Closed { code, reason } => self.on_transport_closed(code, reason),
        }
    }

    fn on_transport_closed(&mut self, code: Option<u16>, reason: String) {
        self.release_transport(Release::Gone);
        if self.is_shutting_down() {
            return;
        }
        match code {
            Some(code) if close_code::is_fatal(code) => {
                tracing::error!(
                    "shard {}: gateway rejected the connection with {} {}",
                    self.config.shard_id,
                    code,
                    reason
                );
                self.cancel_all();
                self.outcome = Err(GatewayError::AuthenticationRejected { code, reason });
                self.transition(ConnectionState::Closed);
            }
            Some(code) if close_code::invalidates_session(code) => {
                tracing::info!(
                    "shard {}: closed with {}, session discarded",
                    self.config.shard_id,
                    code
                );
                self.session.clear_session();
                self.schedule_reconnect(ReconnectReason::TransportClosed, None);
            }
            _ => {
                tracing::info!(
                    "shard {}: transport closed ({:?}) {}",
                    self.config.shard_id,
                    code,
                    reason
                );
                self.schedule_reconnect(ReconnectReason::TransportClosed, None);
            }
        }
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if self.state == ConnectionState::Closed {
            return;
        }
        match fired.kind {
            TimerKind::Heartbeat => match self.heartbeat.on_tick(fired) {
                Some(HeartbeatTick::Beat) => self.send_heartbeat(),
                Some(HeartbeatTick::Zombie) => {
                    let now = Instant::now();
                    tracing::warn!(
                        "shard {}: heartbeat sent {:?} ago not acknowledged (last ack {:?} ago), dropping zombie connection",
                        self.config.shard_id,
                        self.heartbeat.last_sent_at().map(|at| now - at),
                        self.heartbeat.last_acked_at().map(|at| now - at)
                    );
                    self.release_transport(Release::Abort);
                    self.schedule_reconnect(ReconnectReason::HeartbeatTimeout, None);
                }
                None => {}
            },
            TimerKind::Reconnect => {
                if let Some(pending) = self.reconnect.fire(fired) {
                    tracing::debug!(
                        "shard {}: {} reconnect due",
                        self.config.shard_id,
                        pending.reason
                    );
                    match pending.reason {
                        ReconnectReason::InvalidSession => self.identify_or_resume(),
                        _ => self.connect(),
                    }
                }
            }
            TimerKind::Identify => {
                if self.identify_timer.accept_once(fired) {
                    self.identify_slot = None;
                    self.send_identify();
                }
            }
        }
    }

    fn send_identify(&mut self) {
        if self.state != ConnectionState::Identifying || self.transport.is_none() {
            return;
        }
        tracing::info!(
            "shard {}/{}: identifying",
            self.config.shard_id,
            self.config.shard_count
        );
        let data = IdentifyData {
            token: self.config.token.clone(),
            intents: self.config.intents,
            shard: [self.config.shard_id, self.config.shard_count],
            properties: ConnectionProperties::default(),
            large_threshold: self.config.large_threshold,
            presence: self.config.presence.clone(),
        };
        self.send(&Frame::identify(&data));
    }

    fn send(&self, frame: &Frame) {
        let sent = self
            .transport
            .as_ref()
            .is_some_and(|transport| transport.send(codec::encode(frame)));
        if !sent {
            tracing::debug!(
                "shard {}: no writer for op {}, frame dropped",
                self.config.shard_id,
                frame.op
            );
        }
    }

    /// Timers tied to the transport stop before the transport goes away.
    fn release_transport(&mut self, release: Release) {
        self.heartbeat.stop();
        self.cancel_deferred_identify();
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        match release {
            Release::Close(code) => transport.close(code),
            Release::Abort => transport.abort(),
            Release::Gone => {}
        }
    }

    /// Drop a waiting Identify and hand its slot back to the queue.
    fn cancel_deferred_identify(&mut self) {
        self.identify_timer.cancel();
        let Some(slot_at) = self.identify_slot.take() else {
            return;
        };
        if let Some(queue) = &self.identify_queue {
            if queue.release(self.config.shard_id, slot_at) {
                tracing::debug!(
                    "shard {}: released unused identify slot",
                    self.config.shard_id
                );
            }
        }
    }

    fn cancel_connect_attempt(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.heartbeat.stop();
        self.cancel_deferred_identify();
        self.reconnect.cancel();
        self.cancel_connect_attempt();
    }

    fn is_shutting_down(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(
            "shard {}: {} -> {}",
            self.config.shard_id,
            self.state,
            next
        );
        self.state = next;
        self.state_tx.send_replace(next);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn next_transport_event(transport: &mut Option<Transport>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}
