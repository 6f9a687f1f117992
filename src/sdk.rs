//! Client used by game servers to talk to their sidecar.

use std::str::FromStr;

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tonic::{Request, Status, Streaming};

use crate::proto::{sdk_client::SdkClient, Empty, GameServer, KeyValue};
use crate::rpc_server::METADATA_KEY_SESSION_ID;

pub const DEFAULT_SDK_ADDRESS: &str = "http://localhost:9357";

pub type SdkResult<T> = Result<T, SdkError>;

#[derive(thiserror::Error, Debug)]
pub enum SdkError {
    #[error("could not connect to the sidecar: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("sidecar call failed: {0}")]
    Rpc(#[from] Status),
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("health stream is closed")]
    HealthStreamClosed,
    #[error("health task failed: {0}")]
    HealthTaskFailed(String),
}

#[derive(Clone, Debug)]
pub struct Sdk {
    client: SdkClient<Channel>,
    session: Option<MetadataValue<Ascii>>,
}

impl Sdk {
    pub async fn connect(address: impl Into<String>) -> SdkResult<Self> {
        let client = SdkClient::connect(address.into()).await?;
        Ok(Self {
            client,
            session: None,
        })
    }

    /// Identify as `session` instead of relying on the connection.
    pub fn with_session(mut self, session: &str) -> SdkResult<Self> {
        let value = MetadataValue::from_str(session)
            .map_err(|err| SdkError::InvalidSessionId(err.to_string()))?;
        self.session = Some(value);
        Ok(self)
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(session) = &self.session {
            request
                .metadata_mut()
                .insert(METADATA_KEY_SESSION_ID, session.clone());
        }
        request
    }

    pub async fn ready(&self) -> SdkResult<()> {
        let mut client = self.client.clone();
        client.ready(self.request(Empty {})).await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> SdkResult<()> {
        let mut client = self.client.clone();
        client.shutdown(self.request(Empty {})).await?;
        Ok(())
    }

    pub async fn get_gameserver(&self) -> SdkResult<GameServer> {
        let mut client = self.client.clone();
        Ok(client
            .get_game_server(self.request(Empty {}))
            .await?
            .into_inner())
    }

    pub async fn watch_gameserver(&self) -> SdkResult<Streaming<GameServer>> {
        let mut client = self.client.clone();
        Ok(client
            .watch_game_server(self.request(Empty {}))
            .await?
            .into_inner())
    }

    pub async fn set_label(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> SdkResult<()> {
        let mut client = self.client.clone();
        client
            .set_label(self.request(KeyValue {
                key: key.into(),
                value: value.into(),
            }))
            .await?;
        Ok(())
    }

    pub async fn set_annotation(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> SdkResult<()> {
        let mut client = self.client.clone();
        client
            .set_annotation(self.request(KeyValue {
                key: key.into(),
                value: value.into(),
            }))
            .await?;
        Ok(())
    }

    /// Open the health stream. Heartbeats are sent with [`HealthCheck::beat`].
    pub fn health_check(&self) -> HealthCheck {
        let mut client = self.client.clone();
        let (sender, receiver) = unbounded_channel();
        let request = self.request(UnboundedReceiverStream::new(receiver));
        let call = tokio::spawn(async move { client.health(request).await.map(|_| ()) });
        HealthCheck {
            sender: Some(sender),
            call,
        }
    }
}

/// Open health stream of an [`Sdk`].
pub struct HealthCheck {
    sender: Option<UnboundedSender<Empty>>,
    call: JoinHandle<Result<(), Status>>,
}

impl HealthCheck {
    pub fn beat(&self) -> SdkResult<()> {
        let sender = self.sender.as_ref().ok_or(SdkError::HealthStreamClosed)?;
        sender
            .send(Empty {})
            .map_err(|_| SdkError::HealthStreamClosed)
    }

    /// Close the stream and wait for the sidecar's reply.
    pub async fn close(mut self) -> SdkResult<()> {
        self.sender.take();
        self.call
            .await
            .map_err(|err| SdkError::HealthTaskFailed(err.to_string()))??;
        Ok(())
    }

    /// Drop the stream without waiting for a reply.
    pub fn abort(self) {
        self.call.abort();
    }
}
