use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use super::{session_id, RpcError, RpcResult};
use crate::proto::{sdk_server::Sdk, Empty, GameServer, KeyValue};
use crate::sidecar::{MetadataKind, SdkHandler};

/// gRPC face of an [`SdkHandler`].
#[derive(Debug)]
pub struct SdkImpl<H> {
    handler: Arc<H>,
    shutdown: CancellationToken,
}

impl<H> Clone for SdkImpl<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H> SdkImpl<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            shutdown: CancellationToken::new(),
        }
    }

    /// Open server streams end once `ct` is cancelled, so a graceful server shutdown
    /// doesn't wait on them.
    pub fn with_shutdown(mut self, ct: CancellationToken) -> Self {
        self.shutdown = ct;
        self
    }
}

impl<H: SdkHandler> SdkImpl<H> {
    fn set_metadata(&self, request: Request<KeyValue>, kind: MetadataKind) -> RpcResult<Empty> {
        let session = session_id(&request)?;
        let KeyValue { key, value } = request.into_inner();
        debug!(%session, ?kind, %key, "set metadata");
        self.handler
            .set_metadata(&session, kind, &key, &value)
            .map_err(RpcError::from)?;
        Ok(Response::new(Empty {}))
    }
}

#[tonic::async_trait]
impl<H: SdkHandler> Sdk for SdkImpl<H> {
    async fn ready(&self, request: Request<Empty>) -> RpcResult<Empty> {
        let session = session_id(&request)?;
        debug!(%session, "ready");
        self.handler.ready(&session).map_err(RpcError::from)?;
        Ok(Response::new(Empty {}))
    }

    async fn shutdown(&self, request: Request<Empty>) -> RpcResult<Empty> {
        let session = session_id(&request)?;
        debug!(%session, "shutdown");
        self.handler.shutdown(&session).map_err(RpcError::from)?;
        Ok(Response::new(Empty {}))
    }

    async fn health(&self, request: Request<Streaming<Empty>>) -> RpcResult<Empty> {
        let session = session_id(&request)?;
        debug!(%session, "health stream opened");

        let mut input_stream = request.into_inner();
        while let Some(signal) = input_stream.next().await {
            if let Err(status) = signal {
                warn!(%session, "health stream aborted: {}", status);
                return Err(RpcError::from(status).into());
            }
            self.handler.health(&session).map_err(RpcError::from)?;
        }
        self.handler
            .health_stream_closed(&session)
            .map_err(RpcError::from)?;
        Ok(Response::new(Empty {}))
    }

    async fn get_game_server(&self, request: Request<Empty>) -> RpcResult<GameServer> {
        let session = session_id(&request)?;
        debug!(%session, "get game server");
        let game_server = self
            .handler
            .get_game_server(&session)
            .map_err(RpcError::from)?;
        Ok(Response::new(game_server.into()))
    }

    type WatchGameServerStream =
        Pin<Box<dyn Stream<Item = Result<GameServer, Status>> + Send + 'static>>;

    async fn watch_game_server(
        &self,
        request: Request<Empty>,
    ) -> RpcResult<Self::WatchGameServerStream> {
        let session = session_id(&request)?;
        debug!(%session, "watch game server");

        let mut updates = self
            .handler
            .watch_game_server(&session)
            .map_err(RpcError::from)?;
        let shutdown = self.shutdown.clone();
        let out_stream = async_stream::stream! {
            loop {
                let current = updates.borrow_and_update().clone();
                if let Some(update) = current {
                    let is_final = update.is_final();
                    yield Result::<_, Status>::Ok(GameServer::from(update.game_server));
                    if is_final {
                        debug!(%session, "watched session terminated");
                        break;
                    }
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    // sender is dropped when the session is evicted
                    changed = updates.changed() => if changed.is_err() {
                        break;
                    },
                }
            }
        };

        Ok(Response::new(Box::pin(out_stream)))
    }

    async fn set_label(&self, request: Request<KeyValue>) -> RpcResult<Empty> {
        self.set_metadata(request, MetadataKind::Label)
    }

    async fn set_annotation(&self, request: Request<KeyValue>) -> RpcResult<Empty> {
        self.set_metadata(request, MetadataKind::Annotation)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use tokio::sync::watch;
    use tonic::metadata::MetadataValue;
    use tonic::Code;

    use super::*;
    use crate::rpc_server::METADATA_KEY_SESSION_ID;
    use crate::sidecar::{
        GameServerSnapshot, GameServerState, GameServerTemplate, GameServerUpdate, LifecycleState,
        MockSdkHandler, SessionId, SidecarError,
    };

    fn request<T>(message: T, session: &str) -> Request<T> {
        let mut req = Request::new(message);
        req.metadata_mut().insert(
            METADATA_KEY_SESSION_ID,
            MetadataValue::from_str(session).unwrap(),
        );
        req
    }

    struct Bare;

    impl SdkHandler for Bare {}

    #[tokio::test]
    async fn unary_calls_reach_handler_with_session() {
        let mut handler = MockSdkHandler::new();
        handler
            .expect_ready()
            .withf(|session| *session == SessionId::from("game-1"))
            .times(1)
            .returning(|_| Ok(()));
        handler
            .expect_shutdown()
            .withf(|session| *session == SessionId::from("game-1"))
            .times(1)
            .returning(|_| Ok(()));
        handler
            .expect_set_metadata()
            .withf(|session, kind, key, value| {
                session.as_str() == "game-1"
                    && *kind == MetadataKind::Annotation
                    && key == "map"
                    && value == "dust"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let sdk = SdkImpl::new(Arc::new(handler));

        sdk.ready(request(Empty {}, "game-1")).await.unwrap();
        sdk.set_annotation(request(
            KeyValue {
                key: "map".into(),
                value: "dust".into(),
            },
            "game-1",
        ))
        .await
        .unwrap();
        sdk.shutdown(request(Empty {}, "game-1")).await.unwrap();
    }

    #[tokio::test]
    async fn handler_errors_become_statuses() {
        let mut handler = MockSdkHandler::new();
        handler
            .expect_get_game_server()
            .returning(|session| Err(SidecarError::session_not_found(session)));
        handler.expect_ready().returning(|_| {
            Err(SidecarError::Unavailable {
                reason: "store down".into(),
            })
        });
        let sdk = SdkImpl::new(Arc::new(handler));

        let status = sdk
            .get_game_server(request(Empty {}, "game-1"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        let status = sdk.ready(request(Empty {}, "game-1")).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let sdk = SdkImpl::new(Arc::new(MockSdkHandler::new()));
        let status = sdk.ready(Request::new(Empty {})).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn bare_handler_is_unimplemented() {
        let sdk = SdkImpl::new(Arc::new(Bare));
        let codes = [
            sdk.ready(request(Empty {}, "s")).await.unwrap_err().code(),
            sdk.shutdown(request(Empty {}, "s")).await.unwrap_err().code(),
            sdk.get_game_server(request(Empty {}, "s"))
                .await
                .unwrap_err()
                .code(),
            sdk.set_label(request(KeyValue::default(), "s"))
                .await
                .unwrap_err()
                .code(),
        ];
        assert!(codes.iter().all(|code| *code == Code::Unimplemented));
        assert!(sdk
            .watch_game_server(request(Empty {}, "s"))
            .await
            .is_err());
    }

    fn update(state: GameServerState, session_state: LifecycleState) -> GameServerUpdate {
        let mut game_server =
            GameServerSnapshot::from_template(&GameServerTemplate::default(), "local-0", 0);
        game_server.state = state;
        GameServerUpdate {
            game_server,
            session_state,
        }
    }

    #[tokio::test]
    async fn watch_ends_after_final_update() {
        let (sender, receiver) =
            watch::channel(Some(update(GameServerState::Ready, LifecycleState::Ready)));
        let mut handler = MockSdkHandler::new();
        handler
            .expect_watch_game_server()
            .returning(move |_| Ok(receiver.clone()));
        let sdk = SdkImpl::new(Arc::new(handler));

        let mut stream = sdk
            .watch_game_server(request(Empty {}, "s"))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status.unwrap().state, "Ready");

        sender.send_replace(Some(update(GameServerState::Shutdown, LifecycleState::Terminated)));
        let last = stream.next().await.unwrap().unwrap();
        assert_eq!(last.status.unwrap().state, "Shutdown");
        // sender is still alive, the stream ends on its own
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn watch_ends_on_server_shutdown() {
        let (_sender, receiver) =
            watch::channel(Some(update(GameServerState::Ready, LifecycleState::Ready)));
        let mut handler = MockSdkHandler::new();
        handler
            .expect_watch_game_server()
            .returning(move |_| Ok(receiver.clone()));
        let ct = CancellationToken::new();
        let sdk = SdkImpl::new(Arc::new(handler)).with_shutdown(ct.clone());

        let mut stream = sdk
            .watch_game_server(request(Empty {}, "s"))
            .await
            .unwrap()
            .into_inner();
        assert!(stream.next().await.unwrap().is_ok());

        ct.cancel();
        assert!(stream.next().await.is_none());
    }
}
