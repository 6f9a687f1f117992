use std::sync::Arc;

use super::game_server::GameServerSnapshot;
use super::registry::SessionRegistry;
use super::session::SessionId;
use super::{SidecarError, SidecarResult};

/// Read side of the sidecar. Only touches the registry, never the backing store.
#[derive(Clone, Debug)]
pub struct QueryService {
    registry: Arc<SessionRegistry>,
}

impl QueryService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn get_state(&self, id: &SessionId) -> SidecarResult<GameServerSnapshot> {
        let entry = self.registry.get(id)?;
        let session = entry.lock()?;
        session
            .game_server()
            .cloned()
            .ok_or_else(|| SidecarError::game_server_not_found(id))
    }
}

#[cfg(test)]
mod test {
    use tokio::time::Instant;

    use super::*;
    use crate::sidecar::game_server::{GameServerState, MetadataKind};
    use crate::sidecar::health::HealthMonitor;
    use crate::sidecar::lifecycle::LifecycleController;
    use crate::sidecar::store::InMemoryStore;

    fn setup() -> (Arc<SessionRegistry>, Arc<HealthMonitor>, LifecycleController) {
        let registry = Arc::new(SessionRegistry::default());
        let health = Arc::new(HealthMonitor::new(registry.clone()));
        let controller = LifecycleController::new(
            registry.clone(),
            Arc::new(InMemoryStore::default()),
            health.clone(),
            None,
            false,
        );
        (registry, health, controller)
    }

    #[tokio::test]
    async fn not_found_before_ready() {
        let (registry, health, controller) = setup();
        let query = QueryService::new(registry.clone());
        let id = SessionId::from("s1");
        assert!(matches!(
            query.get_state(&id).unwrap_err(),
            SidecarError::SessionNotFound { .. }
        ));

        // heartbeats don't register the session
        health.record_signal(&id, Instant::now()).unwrap();
        assert!(matches!(
            query.get_state(&id).unwrap_err(),
            SidecarError::SessionNotFound { .. }
        ));

        // registered, but no record yet
        registry.create_or_get(&id).unwrap();
        assert!(matches!(
            query.get_state(&id).unwrap_err(),
            SidecarError::GameServerNotFound { .. }
        ));

        controller.ready(&id).unwrap();
        assert_eq!(query.get_state(&id).unwrap().state, GameServerState::Ready);
    }

    #[tokio::test]
    async fn returned_snapshot_is_detached() {
        let (registry, _, controller) = setup();
        let query = QueryService::new(registry);
        let id = SessionId::from("s1");
        controller.ready(&id).unwrap();

        let mut snapshot = query.get_state(&id).unwrap();
        snapshot.labels.insert("mutated".into(), "yes".into());
        snapshot.state = GameServerState::Unhealthy;

        let fresh = query.get_state(&id).unwrap();
        assert!(fresh.labels.is_empty());
        assert_eq!(fresh.state, GameServerState::Ready);
    }

    #[tokio::test]
    async fn reflects_latest_mutation() {
        let (registry, _, controller) = setup();
        let query = QueryService::new(registry);
        let id = SessionId::from("s1");
        controller.ready(&id).unwrap();

        for n in 0..10 {
            controller
                .set_metadata(&id, MetadataKind::Annotation, "round", &n.to_string())
                .unwrap();
            let snapshot = query.get_state(&id).unwrap();
            // one generation for Ready plus one per mutation
            assert_eq!(snapshot.generation, n + 2);
            assert_eq!(
                snapshot
                    .annotations
                    .get("agones.dev/sdk-round")
                    .map(String::as_str),
                Some(n.to_string().as_str())
            );
        }
    }
}
