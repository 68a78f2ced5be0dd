//! Decoded status document.

use serde::Deserialize;

/// Status document returned in the status response packet.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub version: ServerVersion,
    pub players: Players,
    /// Message of the day, either a plain string or a chat component.
    #[serde(default)]
    pub description: serde_json::Value,
    #[serde(default)]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Players {
    pub max: u32,
    pub online: u32,
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

impl ServerStatus {
    /// Parse the JSON document carried by a status response.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Number of players currently online.
    pub fn online(&self) -> u32 {
        self.players.online
    }

    /// Message of the day flattened to plain text.
    pub fn motd(&self) -> String {
        let mut out = String::new();
        flatten_component(&self.description, &mut out);
        out
    }
}

fn flatten_component(component: &serde_json::Value, out: &mut String) {
    match component {
        serde_json::Value::String(text) => out.push_str(text),
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(serde_json::Value::Array(extra)) = map.get("extra") {
                for child in extra {
                    flatten_component(child, out);
                }
            }
        }
        serde_json::Value::Array(parts) => {
            for part in parts {
                flatten_component(part, out);
            }
        }
        _ => {}
    }
}
