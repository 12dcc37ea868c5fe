use crate::error::GatewayError;

/// Server-assigned session used to resume after a dropped connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    session_id: Option<String>,
    sequence: u64,
    resumable: bool,
    resume_url: Option<String>,
}

impl Session {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// A Resume is possible only with a session id that is still marked resumable.
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.resumable
    }

    /// Record the sequence number of a Dispatch frame.
    ///
    /// The value is always stored. A sequence lower than the previous one is
    /// returned as a protocol violation for the caller to report.
    pub fn observe_dispatch(&mut self, sequence: u64) -> Result<(), GatewayError> {
        let previous = self.sequence;
        self.sequence = sequence;
        if sequence < previous {
            return Err(GatewayError::ProtocolViolation(format!(
                "dispatch sequence went backwards from {previous} to {sequence}"
            )));
        }
        Ok(())
    }

    pub fn mark_resumable(&mut self, resumable: bool) {
        self.resumable = resumable;
    }

    pub fn assign_session(&mut self, session_id: String) {
        self.session_id = Some(session_id);
    }

    pub fn set_resume_url(&mut self, url: Option<String>) {
        self.resume_url = url;
    }

    /// Forget the session id so the next attempt identifies from scratch.
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.resumable = false;
    }

    /// Drop everything, including the sequence and resume URL.
    pub fn reset(&mut self) {
        *self = Session::default();
    }
}
