//! Reconnect delay policy and the single pending-reconnect timer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::jitter::Jitter;
use super::timer::{TimerFired, TimerKind, TimerSlot};

/// Lower bound of the Invalid Session delay.
pub const INVALID_SESSION_DELAY_MIN: Duration = Duration::from_secs(1);
/// Exclusive upper bound of the Invalid Session delay.
pub const INVALID_SESSION_DELAY_MAX: Duration = Duration::from_secs(5);
/// Delay before honouring a server-requested reconnect.
pub const RECONNECT_REQUESTED_DELAY: Duration = Duration::from_millis(100);

/// Smallest backoff base. A zero base would never grow.
pub const MIN_BACKOFF_FLOOR: Duration = Duration::from_millis(100);

const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    InvalidSession,
    HeartbeatTimeout,
    TransportClosed,
    ReconnectRequested,
}

impl ReconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconnectReason::InvalidSession => "invalid_session",
            ReconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            ReconnectReason::TransportClosed => "transport_closed",
            ReconnectReason::ReconnectRequested => "reconnect_requested",
        }
    }
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    pub due_at: Instant,
    pub reason: ReconnectReason,
}

/// Exponential backoff with equal jitter: attempt `n` waits somewhere in
/// `[b/2, b)` where `b = min * 2^n`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_BACKOFF_FLOOR);
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self, jitter: &dyn Jitter) -> Duration {
        let ceiling = self
            .min
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.max);
        self.attempt = (self.attempt + 1).min(MAX_BACKOFF_EXPONENT);
        let floor = ceiling / 2;
        jitter.between(floor, ceiling)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub struct ReconnectScheduler {
    backoff: Backoff,
    jitter: Arc<dyn Jitter>,
    pending: Option<PendingReconnect>,
    timer: TimerSlot,
}

impl ReconnectScheduler {
    pub fn new(backoff: Backoff, jitter: Arc<dyn Jitter>) -> Self {
        Self {
            backoff,
            jitter,
            pending: None,
            timer: TimerSlot::new(TimerKind::Reconnect),
        }
    }

    /// Delay the policy assigns to `reason`. Backoff reasons advance the
    /// attempt counter.
    pub fn delay_for(&mut self, reason: ReconnectReason) -> Duration {
        match reason {
            ReconnectReason::InvalidSession => self
                .jitter
                .between(INVALID_SESSION_DELAY_MIN, INVALID_SESSION_DELAY_MAX),
            ReconnectReason::HeartbeatTimeout | ReconnectReason::TransportClosed => {
                self.backoff.next_delay(self.jitter.as_ref())
            }
            ReconnectReason::ReconnectRequested => RECONNECT_REQUESTED_DELAY,
        }
    }

    /// Arm the reconnect timer, superseding any pending reconnect.
    pub fn schedule(
        &mut self,
        reason: ReconnectReason,
        explicit_delay: Option<Duration>,
        tx: &mpsc::UnboundedSender<TimerFired>,
    ) -> (PendingReconnect, Duration) {
        let delay = match explicit_delay {
            Some(delay) => delay,
            None => self.delay_for(reason),
        };
        let pending = PendingReconnect {
            due_at: Instant::now() + delay,
            reason,
        };
        if let Some(previous) = self.pending.replace(pending) {
            tracing::debug!(
                "pending {} reconnect superseded by {}",
                previous.reason,
                reason
            );
        }
        self.timer.schedule_once(delay, tx);
        (pending, delay)
    }

    /// Take the pending reconnect if `fired` is the live timer.
    pub fn fire(&mut self, fired: TimerFired) -> Option<PendingReconnect> {
        if !self.timer.accept_once(fired) {
            return None;
        }
        self.pending.take()
    }

    pub fn cancel(&mut self) -> Option<PendingReconnect> {
        self.timer.cancel();
        self.pending.take()
    }

    pub fn pending(&self) -> Option<PendingReconnect> {
        self.pending
    }

    pub fn reset_backoff(&mut self) {
        self.backoff.reset();
    }

    pub fn backoff_attempt(&self) -> u32 {
        self.backoff.attempt()
    }
}
