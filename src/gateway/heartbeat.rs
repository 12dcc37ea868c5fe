//! Heartbeat liveness tracking.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::timer::{TimerFired, TimerKind, TimerSlot};

/// Heartbeat interval used when Hello carries none.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(41_250);

/// What the connection should do for a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Send a heartbeat now.
    Beat,
    /// The previous heartbeat was never acknowledged.
    Zombie,
}

/// Owns the heartbeat timer and the sent/acked timestamps of one connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Option<Duration>,
    last_sent_at: Option<Instant>,
    last_acked_at: Option<Instant>,
    latency: Option<Duration>,
    timer: TimerSlot,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            interval: None,
            last_sent_at: None,
            last_acked_at: None,
            latency: None,
            timer: TimerSlot::new(TimerKind::Heartbeat),
        }
    }

    /// Arm the repeating timer at `interval`, forgetting previous timestamps.
    pub fn start(&mut self, interval: Duration, tx: &mpsc::UnboundedSender<TimerFired>) {
        self.interval = Some(interval);
        self.last_sent_at = None;
        self.last_acked_at = None;
        self.timer.schedule_repeating(interval, tx);
    }

    /// Re-arm at the last known interval, first tick one interval from now.
    /// Send and ack timestamps are kept, so an unanswered heartbeat still
    /// counts. Returns false when no interval is known yet.
    pub fn restart(&mut self, tx: &mpsc::UnboundedSender<TimerFired>) -> bool {
        match self.interval {
            Some(interval) => {
                self.timer.schedule_repeating(interval, tx);
                true
            }
            None => false,
        }
    }

    pub fn stop(&mut self) {
        self.timer.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Classify a timer firing. Stale firings yield `None`.
    pub fn on_tick(&self, fired: TimerFired) -> Option<HeartbeatTick> {
        if !self.timer.accept_tick(fired) {
            return None;
        }
        if self.awaiting_ack() {
            Some(HeartbeatTick::Zombie)
        } else {
            Some(HeartbeatTick::Beat)
        }
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
    }

    pub fn record_ack(&mut self, now: Instant) {
        self.last_acked_at = Some(now);
        self.latency = self
            .last_sent_at
            .map(|sent| now.saturating_duration_since(sent));
    }

    /// True when a heartbeat went out after the last ack.
    pub fn awaiting_ack(&self) -> bool {
        match (self.last_sent_at, self.last_acked_at) {
            (Some(sent), Some(acked)) => sent > acked,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    pub fn last_acked_at(&self) -> Option<Instant> {
        self.last_acked_at
    }

    /// Round trip of the most recent acknowledged heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}
