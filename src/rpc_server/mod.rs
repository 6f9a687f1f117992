mod error;
mod identity;
pub mod rpc;

use tonic::{Response, Status};
use tonic_reflection::server::{Builder, Error, ServerReflection, ServerReflectionServer};

use crate::proto::FILE_DESCRIPTOR_SET;

pub use error::RpcError;
pub use identity::{session_id, METADATA_KEY_SESSION_ID};
pub use rpc::SdkImpl;

pub type RpcResult<T> = Result<Response<T>, Status>;
pub type RpcInnerResult<T> = Result<T, RpcError>;

pub fn reflection_service() -> Result<ServerReflectionServer<impl ServerReflection>, Error> {
    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;
    Ok(reflection)
}
