use std::fmt::{Display, Formatter};

use tokio::time::Instant;

use super::game_server::GameServerSnapshot;
use super::{SidecarError, SidecarResult};

/// Identity of the connection a session belongs to.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Lifecycle of a session. Variants are ordered: a session only ever moves forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    #[default]
    Unknown,
    Ready,
    ShuttingDown,
    Terminated,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Unknown => "Unknown",
            LifecycleState::Ready => "Ready",
            LifecycleState::ShuttingDown => "ShuttingDown",
            LifecycleState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Unknown, LifecycleState::Ready)
                | (LifecycleState::Unknown, LifecycleState::ShuttingDown)
                | (LifecycleState::Ready, LifecycleState::ShuttingDown)
                | (LifecycleState::ShuttingDown, LifecycleState::Terminated)
        )
    }

    /// Whether heartbeats still count towards liveness in this state.
    pub fn tracks_liveness(self) -> bool {
        matches!(self, LifecycleState::Unknown | LifecycleState::Ready)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    Shutdown,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Termination {
    pub reason: TerminationReason,
    pub at: Instant,
}

/// Server-side record of one connected process.
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    lifecycle_state: LifecycleState,
    created_at: Instant,
    last_health_signal_at: Option<Instant>,
    game_server: Option<GameServerSnapshot>,
    termination: Option<Termination>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            lifecycle_state: LifecycleState::default(),
            created_at: Instant::now(),
            last_health_signal_at: None,
            game_server: None,
            termination: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle_state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_health_signal_at(&self) -> Option<Instant> {
        self.last_health_signal_at
    }

    pub fn game_server(&self) -> Option<&GameServerSnapshot> {
        self.game_server.as_ref()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn transition(&mut self, next: LifecycleState) -> SidecarResult<()> {
        if !self.lifecycle_state.can_transition_to(next) {
            return Err(SidecarError::invalid_state(
                transition_name(next),
                self.lifecycle_state,
            ));
        }
        self.lifecycle_state = next;
        Ok(())
    }

    /// Move through ShuttingDown into Terminated and remember why.
    pub fn terminate(&mut self, reason: TerminationReason, at: Instant) -> SidecarResult<()> {
        if self.lifecycle_state != LifecycleState::ShuttingDown {
            self.transition(LifecycleState::ShuttingDown)?;
        }
        self.transition(LifecycleState::Terminated)?;
        self.termination = Some(Termination { reason, at });
        Ok(())
    }

    /// Never moves the timestamp backwards.
    pub fn record_health_signal(&mut self, at: Instant) {
        self.last_health_signal_at = Some(match self.last_health_signal_at {
            Some(last) => last.max(at),
            None => at,
        });
    }

    pub(crate) fn cache_game_server(&mut self, snapshot: GameServerSnapshot) {
        self.game_server = Some(snapshot);
    }
}

fn transition_name(next: LifecycleState) -> &'static str {
    match next {
        LifecycleState::Unknown => "reset",
        LifecycleState::Ready => "ready",
        LifecycleState::ShuttingDown => "shut down",
        LifecycleState::Terminated => "terminate",
    }
}
