//! Session tracking, liveness and lifecycle of game servers connected to the sidecar.

mod error;
mod game_server;
mod handler;
mod health;
mod lifecycle;
mod query;
mod reaper;
mod registry;
mod session;
mod store;

pub use error::SidecarError;
pub use game_server::{
    GamePort, GameServerSnapshot, GameServerState, GameServerTemplate, MetadataKind,
};
pub use handler::{SdkHandler, Sidecar, SidecarConfig};
pub use health::{HealthMonitor, SignalOutcome, TimeoutCallback};
pub use lifecycle::LifecycleController;
pub use query::QueryService;
pub use reaper::Reaper;
pub use registry::{GameServerUpdate, GameServerUpdates, SessionEntry, SessionRegistry};
pub use session::{LifecycleState, Session, SessionId, Termination, TerminationReason};
pub use store::{GameServerStore, InMemoryStore, StoreError, StoreResult, METADATA_PREFIX};

#[cfg(test)]
pub use handler::MockSdkHandler;

pub type SidecarResult<T> = Result<T, SidecarError>;
