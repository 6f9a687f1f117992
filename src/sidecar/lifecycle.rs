use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::game_server::{GameServerState, MetadataKind};
use super::health::HealthMonitor;
use super::registry::{SessionEntry, SessionRegistry};
use super::session::{LifecycleState, SessionId, TerminationReason};
use super::store::GameServerStore;
use super::{SidecarError, SidecarResult};

/// Drives sessions through Unknown -> Ready -> ShuttingDown -> Terminated and keeps the
/// backing store informed.
#[derive(Clone)]
pub struct LifecycleController {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn GameServerStore>,
    health: Arc<HealthMonitor>,
    /// `None` disables liveness checks.
    health_timeout: Option<Duration>,
    evict_on_timeout: bool,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn GameServerStore>,
        health: Arc<HealthMonitor>,
        health_timeout: Option<Duration>,
        evict_on_timeout: bool,
    ) -> Self {
        Self {
            registry,
            store,
            health,
            health_timeout,
            evict_on_timeout,
        }
    }

    /// Mark the session ready. Repeating the call on a ready session succeeds without side effects.
    pub fn ready(&self, id: &SessionId) -> SidecarResult<()> {
        let entry = self.registry.create_or_get(id)?;
        {
            let mut session = entry.lock()?;
            match session.lifecycle_state() {
                LifecycleState::Ready => {
                    debug!(session = %id, "already ready");
                    return Ok(());
                }
                LifecycleState::Unknown => {}
                state => return Err(SidecarError::invalid_state("ready", state)),
            }
            let snapshot = self.store.update_state(id, GameServerState::Ready)?;
            session.transition(LifecycleState::Ready)?;
            entry.publish(&mut session, snapshot);
        }
        info!(session = %id, "session is ready");

        if let Some(timeout) = self.health_timeout {
            let controller = self.clone();
            self.health.start_watch(
                id.clone(),
                timeout,
                Box::new(move |id: &SessionId| controller.on_liveness_lost(id)),
            )?;
            self.drop_stale_watch(id, &entry)?;
        }
        Ok(())
    }

    /// A shutdown between the transition and `start_watch` finds no watch to stop. Stop it here
    /// once the session has moved past Ready.
    fn drop_stale_watch(&self, id: &SessionId, entry: &SessionEntry) -> SidecarResult<()> {
        let state = entry.lock()?.lifecycle_state();
        if state != LifecycleState::Ready && self.health.stop_watch(id)? {
            debug!(session = %id, %state, "dropped watch of a session that left Ready");
        }
        Ok(())
    }

    /// Shut the session down. Shutting down a terminated session succeeds without side effects.
    pub fn shutdown(&self, id: &SessionId) -> SidecarResult<()> {
        // must happen before the session lock is taken: a firing timer holds its watch lock
        // while it locks the session. A watch started after this point is dropped by `ready`.
        self.health.stop_watch(id)?;

        let entry = self.registry.create_or_get(id)?;
        let mut session = entry.lock()?;
        match session.lifecycle_state() {
            LifecycleState::Terminated => {
                debug!(session = %id, "already terminated");
                return Ok(());
            }
            LifecycleState::ShuttingDown => {}
            _ => session.transition(LifecycleState::ShuttingDown)?,
        }
        // a failing store leaves the session in ShuttingDown, a retry picks up from there
        let snapshot = self.store.update_state(id, GameServerState::Shutdown)?;
        session.terminate(TerminationReason::Shutdown, Instant::now())?;
        entry.publish(&mut session, snapshot);
        info!(session = %id, "session shut down");
        Ok(())
    }

    /// Set a label or an annotation on the game server of a live session.
    pub fn set_metadata(
        &self,
        id: &SessionId,
        kind: MetadataKind,
        key: &str,
        value: &str,
    ) -> SidecarResult<()> {
        if key.is_empty() {
            return Err(SidecarError::invalid_argument("metadata key is empty"));
        }
        let entry = self.registry.get(id)?;
        let mut session = entry.lock()?;
        let state = session.lifecycle_state();
        if !state.tracks_liveness() {
            return Err(SidecarError::invalid_state("update metadata of", state));
        }
        if session.game_server().is_none() {
            return Err(SidecarError::game_server_not_found(id));
        }
        let snapshot = self.store.set_metadata(id, kind, key, value)?;
        entry.publish(&mut session, snapshot);
        debug!(session = %id, ?kind, key, "metadata updated");
        Ok(())
    }

    /// Called by the health monitor when `id` missed its heartbeat deadline.
    fn on_liveness_lost(&self, id: &SessionId) {
        match self.terminate_timed_out(id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(session = %id, "liveness lost on an already terminated session");
                return;
            }
            Err(err) => {
                error!(session = %id, "failed to terminate timed out session: {}", err);
                return;
            }
        }
        if self.evict_on_timeout {
            if let Err(err) = self.registry.remove(id) {
                error!(session = %id, "failed to evict timed out session: {}", err);
            }
            if let Err(err) = self.store.remove(id) {
                warn!(session = %id, "failed to drop game server record: {}", err);
            }
        }
    }

    fn terminate_timed_out(&self, id: &SessionId) -> SidecarResult<bool> {
        let entry = self.registry.get(id)?;
        let mut session = entry.lock()?;
        if session.lifecycle_state() == LifecycleState::Terminated {
            return Ok(false);
        }
        if session.lifecycle_state() != LifecycleState::ShuttingDown {
            session.transition(LifecycleState::ShuttingDown)?;
        }
        let snapshot = match self.store.update_state(id, GameServerState::Unhealthy) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(session = %id, "failed to mark game server unhealthy: {}", err);
                None
            }
        };
        session.terminate(TerminationReason::TimedOut, Instant::now())?;
        match snapshot {
            Some(snapshot) => entry.publish(&mut session, snapshot),
            // watchers still learn that the session is over
            None => entry.notify(&session),
        }
        warn!(session = %id, reason = "timed out", "liveness lost, session terminated");
        Ok(true)
    }
}
