use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::sidecar::{GameServerTemplate, SidecarConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to open game server file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse game server file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Sidecar settings. Every option can also be given through the environment or a `.env` file.
#[derive(Debug, Parser)]
#[command(name = "sidecar", version, about = "Game server sidecar exposing the SDK over gRPC")]
pub struct Settings {
    /// Address the SDK gRPC service listens on
    #[arg(long, env = "SDK_ADDRESS", default_value = "[::1]:9357")]
    pub address: SocketAddr,

    /// Seconds a session may go without a heartbeat before it is terminated
    #[arg(
        long,
        env = "SDK_HEALTH_TIMEOUT_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub health_timeout_secs: u64,

    /// Don't terminate sessions that stop sending heartbeats
    #[arg(long, env = "SDK_HEALTH_DISABLED")]
    pub health_disabled: bool,

    /// Seconds a terminated or never readied session stays in the registry before it is evicted
    #[arg(long, env = "SDK_EVICTION_GRACE_SECS", default_value_t = 30)]
    pub eviction_grace_secs: u64,

    /// Evict sessions as soon as their liveness timeout fires
    #[arg(long, env = "SDK_EVICT_ON_TIMEOUT")]
    pub evict_on_timeout: bool,

    /// Seconds between eviction sweeps
    #[arg(
        long,
        env = "SDK_SWEEP_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_secs: u64,

    /// JSON file describing the game server record served in local mode
    #[arg(long, env = "SDK_GAMESERVER_FILE")]
    pub gameserver_file: Option<PathBuf>,
}

impl Settings {
    pub fn sidecar_config(&self) -> SidecarConfig {
        SidecarConfig {
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            health_disabled: self.health_disabled,
            eviction_grace: Duration::from_secs(self.eviction_grace_secs),
            evict_on_timeout: self.evict_on_timeout,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    pub fn gameserver_template(&self) -> Result<GameServerTemplate, ConfigError> {
        let Some(path) = &self.gameserver_file else {
            return Ok(GameServerTemplate::default());
        };
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })
    }
}
