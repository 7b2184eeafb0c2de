use crate::errors::RecorderError;
use crate::session::{Session, SessionSeed};
use crate::types::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDisposition {
    /// Nothing is recording; the stop is accepted as a successful no-op.
    NoOp,
    Requested { session_id: String },
}

/// The only writer of "is recording active".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMachine {
    state: SessionState,
    active: Option<Session>,
    transitions: Vec<Transition>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            active: None,
            transitions: Vec::new(),
        }
    }
}

impl SessionMachine {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Transitions since the last call, oldest first.
    pub fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.transitions)
    }

    fn transition(&mut self, next: SessionState) -> Result<(), RecorderError> {
        validate_transition(self.state, next)?;
        self.transitions.push(Transition {
            from: self.state,
            to: next,
        });
        self.state = next;
        Ok(())
    }

    /// A second start while recording is a protocol error and leaves the
    /// active session, its counter and its code lines untouched.
    pub fn start(&mut self, seed: SessionSeed, now_ms: u64) -> Result<&Session, RecorderError> {
        if let Some(active) = &self.active {
            return Err(RecorderError::Protocol(format!(
                "recording_started for {} while session {} is {}",
                seed.id,
                active.id,
                self.state.as_str()
            )));
        }
        self.transition(SessionState::Recording)?;
        Ok(self.active.insert(seed.into_session(now_ms)))
    }

    /// Assigns the next 1-based sequence number of the active session.
    pub fn record_action(&mut self) -> Result<(u64, &Session), RecorderError> {
        if self.state != SessionState::Recording {
            return Err(RecorderError::Protocol(format!(
                "action frame discarded in state {}",
                self.state.as_str()
            )));
        }
        let session = self.active.as_mut().ok_or_else(|| {
            RecorderError::Protocol("recording without an active session".to_string())
        })?;
        session.action_count = session.action_count.saturating_add(1);
        Ok((session.action_count, session))
    }

    /// Freezes the action counter. No action is accepted after this.
    pub fn begin_stop(&mut self) -> Result<&Session, RecorderError> {
        if self.state != SessionState::Recording {
            return Err(RecorderError::Protocol(format!(
                "recording_stopped received in state {}",
                self.state.as_str()
            )));
        }
        self.transition(SessionState::Stopping)?;
        self.active.as_ref().ok_or_else(|| {
            RecorderError::Protocol("stopping without an active session".to_string())
        })
    }

    /// Stopping -> Stopped -> Idle, handing back the finished session.
    pub fn finish_stop(&mut self) -> Result<Session, RecorderError> {
        self.transition(SessionState::Stopped)?;
        let session = self.active.take().ok_or_else(|| {
            RecorderError::Protocol("stopped without an active session".to_string())
        })?;
        self.transition(SessionState::Idle)?;
        Ok(session)
    }

    pub fn request_stop(&self) -> StopDisposition {
        match (&self.state, &self.active) {
            (SessionState::Recording, Some(session)) => StopDisposition::Requested {
                session_id: session.id.clone(),
            },
            _ => StopDisposition::NoOp,
        }
    }
}

pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), RecorderError> {
    use SessionState as S;

    let allowed = match from {
        S::Idle => matches!(to, S::Recording),
        S::Recording => matches!(to, S::Stopping | S::Stopped),
        S::Stopping => matches!(to, S::Stopped),
        S::Stopped => matches!(to, S::Idle),
    };

    if !allowed {
        return Err(RecorderError::Protocol(format!(
            "illegal transition: {} -> {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}
