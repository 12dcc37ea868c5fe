//! Reactions to each inbound control opcode.

use std::time::Duration;

use super::connection::{Connection, ConnectionState};
use super::dispatcher::OpcodeHandler;
use super::events::{DispatchEvent, Frame, ReadyData};
use super::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use super::reconnect::ReconnectReason;

/// Opcode 10. Starts heartbeating and authenticates.
pub struct HelloHandler;

impl OpcodeHandler for HelloHandler {
    fn handle(&self, conn: &mut Connection, frame: Frame) {
        if conn.state() != ConnectionState::Connecting {
            tracing::warn!(
                "shard {}: ignoring hello while {}",
                conn.shard_id(),
                conn.state()
            );
            return;
        }
        let interval = hello_interval(&frame.d).unwrap_or_else(|| {
            tracing::warn!(
                "shard {}: hello without heartbeat interval, using {:?}",
                conn.shard_id(),
                DEFAULT_HEARTBEAT_INTERVAL
            );
            DEFAULT_HEARTBEAT_INTERVAL
        });
        tracing::debug!(
            "shard {}: hello, heartbeat every {:?}",
            conn.shard_id(),
            interval
        );
        conn.start_heartbeat(interval);
        conn.identify_or_resume();
    }
}

/// Accepts `{"heartbeat_interval": ms}` as well as a bare millisecond count.
fn hello_interval(data: &serde_json::Value) -> Option<Duration> {
    let millis = data
        .get("heartbeat_interval")
        .and_then(|v| v.as_u64())
        .or_else(|| data.as_u64())?;
    (millis > 0).then(|| Duration::from_millis(millis))
}

/// Opcode 0.
pub struct DispatchHandler;

impl OpcodeHandler for DispatchHandler {
    fn handle(&self, conn: &mut Connection, frame: Frame) {
        if let Some(seq) = frame.s {
            if let Err(e) = conn.session_mut().observe_dispatch(seq) {
                tracing::warn!("shard {}: {}", conn.shard_id(), e);
            }
        }
        let name = frame.t.unwrap_or_default();

        match name.as_str() {
            "READY" => match serde_json::from_value::<ReadyData>(frame.d.clone()) {
                Ok(ready) => {
                    let session = conn.session_mut();
                    session.assign_session(ready.session_id);
                    session.set_resume_url(ready.resume_gateway_url);
                    session.mark_resumable(true);
                }
                Err(e) => {
                    tracing::warn!("shard {}: READY without usable session: {}", conn.shard_id(), e);
                }
            },
            "RESUMED" => {
                tracing::info!(
                    "shard {}: resumed at sequence {}",
                    conn.shard_id(),
                    conn.session().sequence()
                );
            }
            _ => {}
        }

        if matches!(
            conn.state(),
            ConnectionState::Identifying | ConnectionState::Resuming
        ) {
            conn.mark_connected();
        }

        let event = DispatchEvent {
            shard_id: conn.shard_id(),
            name,
            data: frame.d,
            sequence: frame.s,
        };
        conn.deliver(event);
    }
}

/// Opcode 1 from the server: it wants a heartbeat right now.
pub struct HeartbeatRequestHandler;

impl OpcodeHandler for HeartbeatRequestHandler {
    fn handle(&self, conn: &mut Connection, _frame: Frame) {
        conn.send_heartbeat();
    }
}

/// Opcode 11.
pub struct HeartbeatAckHandler;

impl OpcodeHandler for HeartbeatAckHandler {
    fn handle(&self, conn: &mut Connection, _frame: Frame) {
        conn.heartbeat_acked();
    }
}

/// Opcode 7. The server wants us to reconnect and resume.
pub struct ReconnectHandler;

impl OpcodeHandler for ReconnectHandler {
    fn handle(&self, conn: &mut Connection, _frame: Frame) {
        tracing::info!("shard {}: gateway requested reconnect", conn.shard_id());
        conn.session_mut().mark_resumable(true);
        conn.close_for_reconnect(ReconnectReason::ReconnectRequested);
    }
}

/// Opcode 9. `d` says whether the session can still be resumed.
pub struct InvalidSessionHandler;

impl OpcodeHandler for InvalidSessionHandler {
    fn handle(&self, conn: &mut Connection, frame: Frame) {
        let resumable = match frame.d.as_bool() {
            Some(resumable) => resumable,
            None => {
                tracing::warn!(
                    "shard {}: invalid session payload {} is not a boolean, treating as not resumable",
                    conn.shard_id(),
                    frame.d
                );
                false
            }
        };
        if resumable {
            tracing::info!("shard {}: invalid session, will resume", conn.shard_id());
        } else {
            tracing::info!("shard {}: invalid session, will identify", conn.shard_id());
            conn.session_mut().clear_session();
        }
        conn.schedule_reconnect(ReconnectReason::InvalidSession, None);
    }
}
