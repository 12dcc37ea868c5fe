//! Cancellable timers owned by a connection.
//!
//! Each slot holds at most one spawned timer task. Arming a slot aborts the
//! task it held before, and every firing carries the slot generation so a
//! firing already queued before an abort is recognised as stale.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Heartbeat,
    Reconnect,
    Identify,
}

/// Message sent to the owning connection when a timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug)]
pub struct TimerSlot {
    kind: TimerKind,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            handle: None,
        }
    }

    /// Whether a timer task is currently armed in this slot.
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Fire once after `delay`, replacing any timer already in the slot.
    pub fn schedule_once(&mut self, delay: Duration, tx: &mpsc::UnboundedSender<TimerFired>) {
        let fired = self.rearm();
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(fired);
        }));
    }

    /// Fire every `period`, first after one full period, replacing any timer
    /// already in the slot.
    pub fn schedule_repeating(&mut self, period: Duration, tx: &mpsc::UnboundedSender<TimerFired>) {
        let fired = self.rearm();
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut ticks = time::interval_at(time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(fired).is_err() {
                    break;
                }
            }
        }));
    }

    /// Abort the armed timer. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Accept a one-shot firing. Stale firings return false; a current one
    /// disarms the slot.
    pub fn accept_once(&mut self, fired: TimerFired) -> bool {
        if !self.is_current(fired) {
            return false;
        }
        self.handle = None;
        true
    }

    /// Accept a repeating firing without disarming.
    pub fn accept_tick(&self, fired: TimerFired) -> bool {
        self.is_current(fired)
    }

    fn is_current(&self, fired: TimerFired) -> bool {
        fired.kind == self.kind && fired.generation == self.generation && self.handle.is_some()
    }

    fn rearm(&mut self) -> TimerFired {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        TimerFired {
            kind: self.kind,
            generation: self.generation,
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
