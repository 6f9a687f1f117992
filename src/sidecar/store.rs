use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::game_server::{GameServerSnapshot, GameServerState, GameServerTemplate, MetadataKind};
use super::session::SessionId;

/// Prefix the store puts in front of every label and annotation key set over the SDK.
pub const METADATA_PREFIX: &str = "agones.dev/sdk-";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("store can't be reached: {0}")]
    Unavailable(String),
    #[error("no game server is registered for session {id}")]
    NotRegistered { id: SessionId },
    #[error("failed to lock inner mutex: {0}")]
    MutexPoison(String),
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(value: PoisonError<T>) -> Self {
        Self::MutexPoison(value.to_string())
    }
}

/// Authoritative record of game servers. Every method returns the record as it is after the change.
#[cfg_attr(test, mockall::automock)]
pub trait GameServerStore: Send + Sync + 'static {
    /// Record a new state, registering the game server first if this session has none yet.
    fn update_state(
        &self,
        session: &SessionId,
        state: GameServerState,
    ) -> StoreResult<GameServerSnapshot>;

    /// Set a prefixed label or annotation on an already registered game server.
    fn set_metadata(
        &self,
        session: &SessionId,
        kind: MetadataKind,
        key: &str,
        value: &str,
    ) -> StoreResult<GameServerSnapshot>;

    /// Forget the game server of `session`. Removing an unknown session is not an error.
    fn remove(&self, session: &SessionId) -> StoreResult<()>;
}

/// Store used in local mode: every session gets its own copy of the template.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    template: GameServerTemplate,
    records: Mutex<HashMap<SessionId, GameServerSnapshot>>,
    next_uid: AtomicU64,
}

impl InMemoryStore {
    pub fn new(template: GameServerTemplate) -> Self {
        Self {
            template,
            records: Default::default(),
            next_uid: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.records.lock()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn register(&self) -> StoreResult<GameServerSnapshot> {
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| StoreError::Unavailable(format!("system clock error: {}", err)))?;
        let created = i64::try_from(created.as_secs())
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(GameServerSnapshot::from_template(
            &self.template,
            format!("{}-{}", self.template.name, uid),
            created,
        ))
    }
}

impl GameServerStore for InMemoryStore {
    fn update_state(
        &self,
        session: &SessionId,
        state: GameServerState,
    ) -> StoreResult<GameServerSnapshot> {
        let mut guard = self.records.lock()?;
        let record = match guard.entry(session.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(self.register()?),
        };
        record.state = state;
        record.generation += 1;
        debug!(%session, %state, generation = record.generation, "game server state updated");
        Ok(record.clone())
    }

    fn set_metadata(
        &self,
        session: &SessionId,
        kind: MetadataKind,
        key: &str,
        value: &str,
    ) -> StoreResult<GameServerSnapshot> {
        let mut guard = self.records.lock()?;
        let record = guard.get_mut(session).ok_or_else(|| StoreError::NotRegistered {
            id: session.clone(),
        })?;
        let target = match kind {
            MetadataKind::Label => &mut record.labels,
            MetadataKind::Annotation => &mut record.annotations,
        };
        target.insert(format!("{}{}", METADATA_PREFIX, key), value.to_owned());
        record.generation += 1;
        Ok(record.clone())
    }

    fn remove(&self, session: &SessionId) -> StoreResult<()> {
        self.records.lock()?.remove(session);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn update_state_registers_on_first_use() {
        let store = InMemoryStore::new(GameServerTemplate {
            name: "arena".into(),
            ..Default::default()
        });
        let s1 = SessionId::from("s1");
        let s2 = SessionId::from("s2");

        let first = store.update_state(&s1, GameServerState::Ready).unwrap();
        assert_eq!(first.state, GameServerState::Ready);
        assert_eq!(first.generation, 1);
        assert_eq!(first.uid, "arena-0");

        let other = store.update_state(&s2, GameServerState::Ready).unwrap();
        assert_eq!(other.uid, "arena-1");

        let second = store.update_state(&s1, GameServerState::Shutdown).unwrap();
        assert_eq!(second.state, GameServerState::Shutdown);
        assert_eq!(second.generation, 2);
        assert_eq!(second.uid, first.uid);
        assert_eq!(second.creation_timestamp, first.creation_timestamp);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn set_metadata_prefixes_keys() {
        let store = InMemoryStore::default();
        let id = SessionId::from("s1");
        assert_eq!(
            store
                .set_metadata(&id, MetadataKind::Label, "mode", "ctf")
                .unwrap_err(),
            StoreError::NotRegistered { id: id.clone() }
        );

        store.update_state(&id, GameServerState::Ready).unwrap();
        store
            .set_metadata(&id, MetadataKind::Label, "mode", "ctf")
            .unwrap();
        let record = store
            .set_metadata(&id, MetadataKind::Annotation, "map", "dust")
            .unwrap();
        assert_eq!(record.generation, 3);
        assert_eq!(
            record.labels.get("agones.dev/sdk-mode").map(String::as_str),
            Some("ctf")
        );
        assert_eq!(
            record
                .annotations
                .get("agones.dev/sdk-map")
                .map(String::as_str),
            Some("dust")
        );
    }

    #[test]
    fn remove_forgets_record() {
        let store = InMemoryStore::default();
        let id = SessionId::from("s1");
        store.update_state(&id, GameServerState::Ready).unwrap();
        store.remove(&id).unwrap();
        store.remove(&id).unwrap();
        assert!(store.is_empty().unwrap());
    }
}
