use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::game_server::{GameServerSnapshot, MetadataKind};
use super::health::HealthMonitor;
use super::lifecycle::LifecycleController;
use super::query::QueryService;
use super::reaper::Reaper;
use super::registry::{GameServerUpdates, SessionRegistry};
use super::session::SessionId;
use super::store::GameServerStore;
use super::{SidecarError, SidecarResult};

/// Operations a deployment can support. Anything left at its default answers `Unimplemented`.
#[cfg_attr(test, mockall::automock)]
pub trait SdkHandler: Send + Sync + 'static {
    fn ready(&self, _session: &SessionId) -> SidecarResult<()> {
        Err(SidecarError::unimplemented("Ready"))
    }

    fn shutdown(&self, _session: &SessionId) -> SidecarResult<()> {
        Err(SidecarError::unimplemented("Shutdown"))
    }

    /// One heartbeat from the health stream.
    fn health(&self, _session: &SessionId) -> SidecarResult<()> {
        Err(SidecarError::unimplemented("Health"))
    }

    /// The caller closed its health stream.
    fn health_stream_closed(&self, _session: &SessionId) -> SidecarResult<()> {
        Ok(())
    }

    fn get_game_server(&self, _session: &SessionId) -> SidecarResult<GameServerSnapshot> {
        Err(SidecarError::unimplemented("GetGameServer"))
    }

    fn watch_game_server(&self, _session: &SessionId) -> SidecarResult<GameServerUpdates> {
        Err(SidecarError::unimplemented("WatchGameServer"))
    }

    fn set_metadata(
        &self,
        _session: &SessionId,
        _kind: MetadataKind,
        _key: &str,
        _value: &str,
    ) -> SidecarResult<()> {
        Err(SidecarError::unimplemented("SetMetadata"))
    }
}

#[derive(Clone, Debug)]
pub struct SidecarConfig {
    /// Maximum gap between heartbeats.
    pub health_timeout: Duration,
    pub health_disabled: bool,
    /// How long a terminated session stays readable before eviction.
    pub eviction_grace: Duration,
    pub evict_on_timeout: bool,
    pub sweep_interval: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(5),
            health_disabled: false,
            eviction_grace: Duration::from_secs(30),
            evict_on_timeout: false,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Full implementation of the sidecar: registry, liveness, lifecycle and queries.
pub struct Sidecar {
    config: SidecarConfig,
    registry: Arc<SessionRegistry>,
    store: Arc<dyn GameServerStore>,
    health: Arc<HealthMonitor>,
    lifecycle: LifecycleController,
    query: QueryService,
}

impl Sidecar {
    pub fn new(config: SidecarConfig, store: Arc<dyn GameServerStore>) -> Self {
        let registry = Arc::new(SessionRegistry::default());
        let health = Arc::new(HealthMonitor::new(registry.clone()));
        let health_timeout = (!config.health_disabled).then_some(config.health_timeout);
        let lifecycle = LifecycleController::new(
            registry.clone(),
            store.clone(),
            health.clone(),
            health_timeout,
            config.evict_on_timeout,
        );
        let query = QueryService::new(registry.clone());
        Self {
            config,
            registry,
            store,
            health,
            lifecycle,
            query,
        }
    }

    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Spawn background workers. They stop once `ct` is cancelled.
    pub fn start_workers(&self, ct: CancellationToken) -> Reaper {
        Reaper::new(
            self.registry.clone(),
            self.store.clone(),
            self.config.eviction_grace,
            self.config.sweep_interval,
            ct,
        )
    }
}

impl SdkHandler for Sidecar {
    fn ready(&self, session: &SessionId) -> SidecarResult<()> {
        self.lifecycle.ready(session)
    }

    fn shutdown(&self, session: &SessionId) -> SidecarResult<()> {
        self.lifecycle.shutdown(session)
    }

    fn health(&self, session: &SessionId) -> SidecarResult<()> {
        self.health.record_signal(session, Instant::now())?;
        Ok(())
    }

    fn health_stream_closed(&self, session: &SessionId) -> SidecarResult<()> {
        // the running deadline stays in place, a closed stream doesn't prove anything
        debug!(session = %session, "health stream closed");
        Ok(())
    }

    fn get_game_server(&self, session: &SessionId) -> SidecarResult<GameServerSnapshot> {
        self.query.get_state(session)
    }

    fn watch_game_server(&self, session: &SessionId) -> SidecarResult<GameServerUpdates> {
        Ok(self.registry.get(session)?.subscribe())
    }

    fn set_metadata(
        &self,
        session: &SessionId,
        kind: MetadataKind,
        key: &str,
        value: &str,
    ) -> SidecarResult<()> {
        self.lifecycle.set_metadata(session, kind, key, value)
    }
}
