use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use super::resolver::Side;

const HOME_FALLBACK: &str = "\u{1F3E0}\u{FE0F}";
const AWAY_FALLBACK: &str = "\u{2708}\u{FE0F}";

/// Display emoji per team, loaded from a JSON object of `team -> emoji`.
/// Teams without an entry get a house (home) or airplane (away) marker.
#[derive(Debug, Clone, Default)]
pub struct TeamDirectory {
    emojis: HashMap<String, String>,
}

impl TeamDirectory {
    pub fn new(emojis: HashMap<String, String>) -> Self {
        Self { emojis }
    }

    pub async fn load(path: Option<&str>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match tokio::fs::read_to_string(Path::new(path)).await {
            Ok(body) => match serde_json::from_str::<HashMap<String, String>>(&body) {
                Ok(emojis) => {
                    info!("Loaded {} team emojis from {}", emojis.len(), path);
                    Self::new(emojis)
                }
                Err(e) => {
                    warn!("Ignoring malformed team file {}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read team file {}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn emoji(&self, team: &str, side: Side) -> &str {
        self.emojis.get(team).map(String::as_str).unwrap_or(match side {
            Side::Home => HOME_FALLBACK,
            Side::Away => AWAY_FALLBACK,
        })
    }

    pub fn label(&self, team: &str, side: Side) -> String {
        format!("{} {}", self.emoji(team, side), team)
    }
}
