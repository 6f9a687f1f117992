use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::game_server::GameServerSnapshot;
use super::session::{LifecycleState, Session, SessionId};
use super::{SidecarError, SidecarResult};

/// Game server record together with the state of the session owning it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameServerUpdate {
    pub game_server: GameServerSnapshot,
    pub session_state: LifecycleState,
}

impl GameServerUpdate {
    /// No update follows a final one.
    pub fn is_final(&self) -> bool {
        self.session_state == LifecycleState::Terminated
    }
}

pub type GameServerUpdates = watch::Receiver<Option<GameServerUpdate>>;

/// A registered session together with the channel announcing its game server changes.
#[derive(Debug)]
pub struct SessionEntry {
    session: Mutex<Session>,
    updates: watch::Sender<Option<GameServerUpdate>>,
}

impl SessionEntry {
    fn new(id: SessionId) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            session: Mutex::new(Session::new(id)),
            updates,
        }
    }

    pub fn lock(&self) -> SidecarResult<MutexGuard<'_, Session>> {
        Ok(self.session.lock()?)
    }

    /// Complete copy of the session as of now.
    pub fn snapshot(&self) -> SidecarResult<Session> {
        Ok(self.lock()?.clone())
    }

    /// Cache the record on the locked session and notify watchers.
    pub fn publish(&self, session: &mut Session, snapshot: GameServerSnapshot) {
        session.cache_game_server(snapshot);
        self.notify(session);
    }

    /// Send the cached record with the current session state. No-op before the first record.
    pub fn notify(&self, session: &Session) {
        let Some(game_server) = session.game_server() else {
            return;
        };
        self.updates.send_replace(Some(GameServerUpdate {
            game_server: game_server.clone(),
            session_state: session.lifecycle_state(),
        }));
    }

    pub fn subscribe(&self) -> GameServerUpdates {
        self.updates.subscribe()
    }
}

/// Single authoritative mapping from session id to session.
#[derive(Debug, Default)]
pub struct SessionRegistry(Mutex<HashMap<SessionId, Arc<SessionEntry>>>);

impl SessionRegistry {
    pub fn get(&self, id: &SessionId) -> SidecarResult<Arc<SessionEntry>> {
        let guard = self.0.lock()?;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| SidecarError::session_not_found(id))
    }

    pub fn create_or_get(&self, id: &SessionId) -> SidecarResult<Arc<SessionEntry>> {
        let mut guard = self.0.lock()?;
        let entry = match guard.entry(id.clone()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                tracing::debug!(session = %id, "new session");
                e.insert(Arc::new(SessionEntry::new(id.clone()))).clone()
            }
        };
        Ok(entry)
    }

    pub fn session(&self, id: &SessionId) -> SidecarResult<Session> {
        self.get(id)?.snapshot()
    }

    pub fn remove(&self, id: &SessionId) -> SidecarResult<Option<Arc<SessionEntry>>> {
        Ok(self.0.lock()?.remove(id))
    }

    pub fn len(&self) -> SidecarResult<usize> {
        Ok(self.0.lock()?.len())
    }

    pub fn is_empty(&self) -> SidecarResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop sessions that have been terminated for at least `grace`, and sessions that never
    /// became ready within `grace` of their creation. Returns their ids.
    pub fn evict_expired(&self, grace: Duration, now: Instant) -> SidecarResult<Vec<SessionId>> {
        let mut guard = self.0.lock()?;
        let mut expired = vec![];
        for (id, entry) in guard.iter() {
            let session = entry.lock()?;
            let since = match session.lifecycle_state() {
                // clones are only handed out under the map lock, an extra one is an operation
                // in flight
                LifecycleState::Unknown if Arc::strong_count(entry) > 1 => continue,
                LifecycleState::Unknown => session.created_at(),
                LifecycleState::Terminated => match session.termination() {
                    Some(termination) => termination.at,
                    None => continue,
                },
                LifecycleState::Ready | LifecycleState::ShuttingDown => continue,
            };
            if now.saturating_duration_since(since) >= grace {
                expired.push(id.clone());
            }
        }
        for id in expired.iter() {
            guard.remove(id);
        }
        Ok(expired)
    }
}
