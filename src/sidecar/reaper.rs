use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::registry::SessionRegistry;
use super::store::GameServerStore;

/// Worker that evicts sessions once they have been terminated, or stuck before Ready, for longer
/// than the grace period.
pub struct Reaper(JoinHandle<()>);

impl IntoFuture for Reaper {
    type Output = <JoinHandle<()> as Future>::Output;
    type IntoFuture = JoinHandle<()>;

    fn into_future(self) -> Self::IntoFuture {
        self.0.into_future()
    }
}

impl Reaper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn GameServerStore>,
        grace: Duration,
        sweep_interval: Duration,
        ct: CancellationToken,
    ) -> Self {
        let worker = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = ct.cancelled() => {
                        info!("reaper: cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = match registry.evict_expired(grace, Instant::now()) {
                            Ok(evicted) => evicted,
                            Err(err) => {
                                warn!("reaper: failed to sweep sessions: {}", err);
                                continue;
                            }
                        };
                        for id in evicted {
                            info!(session = %id, "reaper: session evicted");
                            if let Err(err) = store.remove(&id) {
                                warn!(
                                    session = %id,
                                    "reaper: failed to drop game server record: {}", err
                                );
                            }
                        }
                    }
                }
            }
        });
        Self(worker)
    }
}

#[cfg(test)]
mod test {
    use tokio::time::sleep;

    use super::*;
    use crate::sidecar::game_server::GameServerState;
    use crate::sidecar::session::{LifecycleState, SessionId, TerminationReason};
    use crate::sidecar::store::{InMemoryStore, MockGameServerStore};

    #[tokio::test(start_paused = true)]
    async fn evicts_after_grace_and_stops_on_cancel() {
        let registry = Arc::new(SessionRegistry::default());
        let id = SessionId::from("s1");
        let mut store = MockGameServerStore::new();
        store
            .expect_remove()
            .withf(|session| session.as_str() == "s1")
            .times(1)
            .returning(|_| Ok(()));

        registry
            .create_or_get(&id)
            .unwrap()
            .lock()
            .unwrap()
            .terminate(TerminationReason::Shutdown, Instant::now())
            .unwrap();

        let ct = CancellationToken::new();
        let reaper = Reaper::new(
            registry.clone(),
            Arc::new(store),
            Duration::from_secs(30),
            Duration::from_secs(5),
            ct.clone(),
        );

        sleep(Duration::from_secs(20)).await;
        assert!(registry.get(&id).is_ok());

        sleep(Duration::from_secs(20)).await;
        assert!(registry.get(&id).is_err());

        ct.cancel();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_live_sessions() {
        let registry = Arc::new(SessionRegistry::default());
        let store = Arc::new(InMemoryStore::default());
        let id = SessionId::from("s1");
        registry
            .create_or_get(&id)
            .unwrap()
            .lock()
            .unwrap()
            .transition(LifecycleState::Ready)
            .unwrap();
        store.update_state(&id, GameServerState::Ready).unwrap();

        let ct = CancellationToken::new();
        let reaper = Reaper::new(
            registry.clone(),
            store.clone(),
            Duration::ZERO,
            Duration::from_secs(1),
            ct.clone(),
        );
        sleep(Duration::from_secs(10)).await;
        assert!(registry.get(&id).is_ok());
        assert_eq!(store.len().unwrap(), 1);

        ct.cancel();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_sessions_that_never_become_ready() {
        let registry = Arc::new(SessionRegistry::default());
        for n in 0..1000 {
            registry
                .create_or_get(&SessionId::from(format!("10.0.0.1:{}", n)))
                .unwrap();
        }

        let ct = CancellationToken::new();
        let reaper = Reaper::new(
            registry.clone(),
            Arc::new(InMemoryStore::default()),
            Duration::from_secs(30),
            Duration::from_secs(5),
            ct.clone(),
        );
        sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.len().unwrap(), 1000);

        sleep(Duration::from_secs(60)).await;
        assert!(registry.is_empty().unwrap());

        ct.cancel();
        reaper.await.unwrap();
    }
}
