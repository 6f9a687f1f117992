use std::sync::PoisonError;

use super::session::{LifecycleState, SessionId};
use super::store::StoreError;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SidecarError {
    #[error("session doesn't exist: {id}")]
    SessionNotFound { id: SessionId },
    #[error("game server record is not available for session {id}")]
    GameServerNotFound { id: SessionId },
    #[error("can't {operation} a session in {state} state")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    #[error("backing store is unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("`{operation}` is not implemented by this deployment")]
    Unimplemented { operation: &'static str },
    #[error("failed to lock inner mutex: {reason}")]
    MutexPoison { reason: String },
}

impl<T> From<PoisonError<T>> for SidecarError {
    fn from(value: PoisonError<T>) -> Self {
        Self::MutexPoison {
            reason: value.to_string(),
        }
    }
}

impl From<StoreError> for SidecarError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(reason) => Self::Unavailable { reason },
            StoreError::NotRegistered { id } => Self::GameServerNotFound { id },
            StoreError::MutexPoison(reason) => Self::MutexPoison { reason },
        }
    }
}

impl SidecarError {
    pub fn session_not_found(id: &SessionId) -> Self {
        Self::SessionNotFound { id: id.clone() }
    }

    pub fn game_server_not_found(id: &SessionId) -> Self {
        Self::GameServerNotFound { id: id.clone() }
    }

    pub fn invalid_state(operation: &'static str, state: LifecycleState) -> Self {
        Self::InvalidState { operation, state }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn unimplemented(operation: &'static str) -> Self {
        Self::Unimplemented { operation }
    }
}
