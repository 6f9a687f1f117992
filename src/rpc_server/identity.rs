use tonic::Request;

use super::{RpcError, RpcInnerResult};
use crate::sidecar::SessionId;

/// Request metadata key overriding the connection based session identity.
pub const METADATA_KEY_SESSION_ID: &str = "x-sdk-session-id";

/// Resolve the session a request belongs to: the `METADATA_KEY_SESSION_ID` value if present,
/// otherwise the peer address of the connection.
pub fn session_id<T>(request: &Request<T>) -> RpcInnerResult<SessionId> {
    if let Some(value) = request.metadata().get(METADATA_KEY_SESSION_ID) {
        let id = value
            .to_str()
            .map_err(|err| RpcError::InvalidSessionIdentity(err.to_string()))?;
        if id.is_empty() {
            return Err(RpcError::InvalidSessionIdentity(format!(
                "`{}` is empty",
                METADATA_KEY_SESSION_ID
            )));
        }
        return Ok(SessionId::from(id));
    }
    request
        .remote_addr()
        .map(|addr| SessionId::from(addr.to_string()))
        .ok_or(RpcError::MissingSessionIdentity {
            key: METADATA_KEY_SESSION_ID,
        })
}
