//! Liveness tracking.
//!
//! Every watched session owns one timer task. Heartbeats push the deadline forward under the
//! watch lock and the timer re-checks the deadline under that same lock before firing, so a
//! heartbeat and a timeout can never both win. The callback runs while the lock is held: once
//! [`HealthMonitor::stop_watch`] returns, the callback has either already finished or will
//! never run.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::registry::SessionRegistry;
use super::session::SessionId;
use super::{SidecarError, SidecarResult};

/// Invoked once when a watched session misses its deadline.
pub type TimeoutCallback = Box<dyn FnOnce(&SessionId) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Heartbeat counted towards liveness.
    Recorded,
    /// Session is unregistered, shutting down or gone; heartbeat accepted and dropped.
    Ignored,
}

struct WatchState {
    deadline: Instant,
    timeout: Duration,
    stopped: bool,
    on_timeout: Option<TimeoutCallback>,
}

impl WatchState {
    fn extend(&mut self, signal_at: Instant) {
        self.deadline = self.deadline.max(signal_at + self.timeout);
    }
}

struct Watch {
    state: Mutex<WatchState>,
    cancel: CancellationToken,
}

impl Watch {
    fn new(deadline: Instant, timeout: Duration, on_timeout: TimeoutCallback) -> Self {
        Self {
            state: Mutex::new(WatchState {
                deadline,
                timeout,
                stopped: false,
                on_timeout: Some(on_timeout),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Blocks while the callback is running.
    fn stop(&self) -> SidecarResult<()> {
        let mut state = self.state.lock()?;
        state.stopped = true;
        state.on_timeout = None;
        self.cancel.cancel();
        Ok(())
    }
}

#[derive(Clone, Default)]
struct WatchMap(Arc<Mutex<HashMap<SessionId, Arc<Watch>>>>);

impl Deref for WatchMap {
    type Target = Arc<Mutex<HashMap<SessionId, Arc<Watch>>>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WatchMap {
    /// Remove `watch` only if it is still the one registered for `id`.
    fn remove_if_current(&self, id: &SessionId, watch: &Arc<Watch>) -> SidecarResult<()> {
        let mut guard = self.lock()?;
        if guard.get(id).is_some_and(|current| Arc::ptr_eq(current, watch)) {
            guard.remove(id);
        }
        Ok(())
    }
}

pub struct HealthMonitor {
    registry: Arc<SessionRegistry>,
    watches: WatchMap,
}

impl HealthMonitor {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            watches: Default::default(),
        }
    }

    /// Start expecting heartbeats from `id` at least every `timeout`. Replaces an existing watch.
    /// Must be called from within a tokio runtime.
    pub fn start_watch(
        &self,
        id: SessionId,
        timeout: Duration,
        on_timeout: TimeoutCallback,
    ) -> SidecarResult<()> {
        let watch = Arc::new(Watch::new(Instant::now() + timeout, timeout, on_timeout));
        let previous = self.watches.lock()?.insert(id.clone(), watch.clone());
        if let Some(previous) = previous {
            previous.stop()?;
        }
        debug!(session = %id, timeout_ms = timeout.as_millis() as u64, "liveness watch started");
        tokio::spawn(run_timer(id, watch, self.watches.clone()));
        Ok(())
    }

    /// Stop watching `id`. No timeout fires for this watch after this returns.
    pub fn stop_watch(&self, id: &SessionId) -> SidecarResult<bool> {
        let watch = self.watches.lock()?.remove(id);
        let Some(watch) = watch else {
            return Ok(false);
        };
        watch.stop()?;
        debug!(session = %id, "liveness watch stopped");
        Ok(true)
    }

    pub fn is_watched(&self, id: &SessionId) -> SidecarResult<bool> {
        Ok(self.watches.lock()?.contains_key(id))
    }

    /// Record a heartbeat received at `at`. Heartbeats never register a session.
    pub fn record_signal(&self, id: &SessionId, at: Instant) -> SidecarResult<SignalOutcome> {
        let entry = match self.registry.get(id) {
            Ok(entry) => entry,
            Err(SidecarError::SessionNotFound { .. }) => {
                trace!(session = %id, "heartbeat from unregistered session ignored");
                return Ok(SignalOutcome::Ignored);
            }
            Err(err) => return Err(err),
        };
        let watch = self.watches.lock()?.get(id).cloned();
        let mut watch_state = match &watch {
            Some(watch) => Some(watch.state.lock()?),
            None => None,
        };
        let mut session = entry.lock()?;
        if !session.lifecycle_state().tracks_liveness() {
            trace!(session = %id, state = %session.lifecycle_state(), "heartbeat ignored");
            return Ok(SignalOutcome::Ignored);
        }
        session.record_health_signal(at);
        if let Some(state) = watch_state.as_mut().filter(|state| !state.stopped) {
            state.extend(at);
        }
        trace!(session = %id, "heartbeat recorded");
        Ok(SignalOutcome::Recorded)
    }
}

async fn run_timer(id: SessionId, watch: Arc<Watch>, watches: WatchMap) {
    loop {
        let deadline = match watch.state.lock() {
            Ok(state) if state.stopped => return,
            Ok(state) => state.deadline,
            Err(err) => {
                error!(session = %id, "liveness timer: {}", err);
                return;
            }
        };
        tokio::select! {
            biased;
            _ = watch.cancel.cancelled() => return,
            _ = sleep_until(deadline) => {}
        }
        match fire_if_expired(&id, &watch) {
            Ok(true) => break,
            Ok(false) => continue,
            Err(err) => {
                error!(session = %id, "liveness timer: {}", err);
                return;
            }
        }
    }
    if let Err(err) = watches.remove_if_current(&id, &watch) {
        error!(session = %id, "liveness timer: failed to drop watch: {}", err);
    }
}

/// Returns `true` once the watch is finished, either fired now or stopped meanwhile.
fn fire_if_expired(id: &SessionId, watch: &Watch) -> SidecarResult<bool> {
    let mut state = watch.state.lock()?;
    if state.stopped {
        return Ok(true);
    }
    if Instant::now() < state.deadline {
        return Ok(false);
    }
    state.stopped = true;
    if let Some(on_timeout) = state.on_timeout.take() {
        debug!(session = %id, "liveness deadline missed");
        on_timeout(id);
    }
    Ok(true)
}
