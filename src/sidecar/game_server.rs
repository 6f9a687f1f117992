use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::Deserialize;

/// State of the game server as recorded by the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameServerState {
    Scheduled,
    Ready,
    Shutdown,
    Unhealthy,
}

impl Display for GameServerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GameServerState::Scheduled => "Scheduled",
            GameServerState::Ready => "Ready",
            GameServerState::Shutdown => "Shutdown",
            GameServerState::Unhealthy => "Unhealthy",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataKind {
    Label,
    Annotation,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GamePort {
    pub name: String,
    pub port: i32,
}

/// Static description of the game server, loaded from a JSON file in local mode.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GameServerTemplate {
    pub name: String,
    pub namespace: String,
    pub address: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub ports: Vec<GamePort>,
}

impl Default for GameServerTemplate {
    fn default() -> Self {
        Self {
            name: "local".into(),
            namespace: "default".into(),
            address: "127.0.0.1".into(),
            labels: Default::default(),
            annotations: Default::default(),
            ports: vec![GamePort {
                name: "default".into(),
                port: 7777,
            }],
        }
    }
}

/// Owned copy of a game server record. Changing it never affects the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameServerSnapshot {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub generation: i64,
    pub creation_timestamp: i64,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub state: GameServerState,
    pub address: String,
    pub ports: Vec<GamePort>,
}

impl GameServerSnapshot {
    pub fn from_template(
        template: &GameServerTemplate,
        uid: impl Into<String>,
        creation_timestamp: i64,
    ) -> Self {
        Self {
            name: template.name.clone(),
            namespace: template.namespace.clone(),
            uid: uid.into(),
            generation: 0,
            creation_timestamp,
            labels: template.labels.clone(),
            annotations: template.annotations.clone(),
            state: GameServerState::Scheduled,
            address: template.address.clone(),
            ports: template.ports.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn template_fills_missing_fields_with_defaults() {
        let template: GameServerTemplate =
            serde_json::from_str(r#"{"name": "arena", "labels": {"mode": "ctf"}}"#).unwrap();
        assert_eq!(template.name, "arena");
        assert_eq!(template.namespace, "default");
        assert_eq!(template.labels.get("mode").map(String::as_str), Some("ctf"));
        assert_eq!(template.ports, GameServerTemplate::default().ports);
    }

    #[test]
    fn snapshot_from_template_starts_scheduled() {
        let snapshot = GameServerSnapshot::from_template(&Default::default(), "uid-1", 42);
        assert_eq!(snapshot.state, GameServerState::Scheduled);
        assert_eq!(snapshot.generation, 0);
        assert_eq!(snapshot.uid, "uid-1");
        assert_eq!(snapshot.creation_timestamp, 42);
    }
}
