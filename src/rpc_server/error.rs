use tonic::Status;

use crate::sidecar::SidecarError;

#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("session identity is missing: no `{key}` metadata and no peer address")]
    MissingSessionIdentity { key: &'static str },
    #[error("session identity is invalid: {0}")]
    InvalidSessionIdentity(String),
    #[error("failed to read from input stream: {0}")]
    StreamingRequestReadFailed(#[from] Status),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
}

impl From<RpcError> for Status {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::MissingSessionIdentity { .. } | RpcError::InvalidSessionIdentity(_) => {
                Status::invalid_argument(value.to_string())
            }
            RpcError::StreamingRequestReadFailed(status) => status,
            RpcError::Sidecar(err) => err.into(),
        }
    }
}

impl From<SidecarError> for Status {
    fn from(value: SidecarError) -> Self {
        match value {
            SidecarError::SessionNotFound { .. } | SidecarError::GameServerNotFound { .. } => {
                Status::not_found(value.to_string())
            }
            SidecarError::InvalidState { .. } => Status::failed_precondition(value.to_string()),
            SidecarError::InvalidArgument { .. } => Status::invalid_argument(value.to_string()),
            SidecarError::Unavailable { .. } => Status::unavailable(value.to_string()),
            SidecarError::Unimplemented { .. } => Status::unimplemented(value.to_string()),
            SidecarError::MutexPoison { .. } => Status::internal(value.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use tonic::Code;

    use super::*;
    use crate::sidecar::LifecycleState;

    #[test]
    fn sidecar_errors_map_to_status_codes() {
        let cases = [
            (SidecarError::session_not_found(&"s".into()), Code::NotFound),
            (SidecarError::game_server_not_found(&"s".into()), Code::NotFound),
            (
                SidecarError::invalid_state("ready", LifecycleState::Terminated),
                Code::FailedPrecondition,
            ),
            (SidecarError::invalid_argument("empty"), Code::InvalidArgument),
            (
                SidecarError::Unavailable {
                    reason: "down".into(),
                },
                Code::Unavailable,
            ),
            (SidecarError::unimplemented("Ready"), Code::Unimplemented),
            (
                SidecarError::MutexPoison {
                    reason: "poisoned".into(),
                },
                Code::Internal,
            ),
        ];
        for (err, code) in cases {
            let message = err.to_string();
            let status = Status::from(RpcError::from(err));
            assert_eq!(status.code(), code);
            assert_eq!(status.message(), message);
        }
    }

    #[test]
    fn stream_status_is_passed_through() {
        let status = Status::from(RpcError::from(Status::cancelled("client went away")));
        assert_eq!(status.code(), Code::Cancelled);
        assert_eq!(status.message(), "client went away");
    }
}
