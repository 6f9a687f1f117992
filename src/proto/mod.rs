tonic::include_proto!("stable.agones.dev.sdk");

use crate::sidecar::{GamePort, GameServerSnapshot};

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("sdk_descriptor");

impl From<GamePort> for game_server::status::Port {
    fn from(value: GamePort) -> Self {
        Self {
            name: value.name,
            port: value.port,
        }
    }
}

impl From<GameServerSnapshot> for GameServer {
    fn from(value: GameServerSnapshot) -> Self {
        Self {
            object_meta: Some(game_server::ObjectMeta {
                name: value.name,
                namespace: value.namespace,
                uid: value.uid,
                resource_version: value.generation.to_string(),
                generation: value.generation,
                creation_timestamp: value.creation_timestamp,
                deletion_timestamp: 0,
                annotations: value.annotations,
                labels: value.labels,
            }),
            status: Some(game_server::Status {
                state: value.state.to_string(),
                address: value.address,
                ports: value.ports.into_iter().map(Into::into).collect(),
            }),
        }
    }
}
