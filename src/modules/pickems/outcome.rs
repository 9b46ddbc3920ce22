use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use std::fmt;
use tracing::debug;

use super::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameState {
    Scheduled,
    InProgress,
    Final,
    Postponed,
    Other(String),
}

impl GameState {
    /// Maps the feed's `gameState` / `gameScheduleState` pair. A postponed
    /// schedule state wins over whatever the game state says.
    pub fn from_feed(game_state: &str, schedule_state: Option<&str>) -> Self {
        if schedule_state.is_some_and(|s| s.eq_ignore_ascii_case("PPD")) {
            return Self::Postponed;
        }
        match game_state.to_ascii_uppercase().as_str() {
            "FUT" | "PRE" => Self::Scheduled,
            "LIVE" | "CRIT" => Self::InProgress,
            "FINAL" | "OFF" => Self::Final,
            "PPD" => Self::Postponed,
            _ => Self::Other(game_state.to_string()),
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "Scheduled"),
            Self::InProgress => write!(f, "In Progress"),
            Self::Final => write!(f, "Final"),
            Self::Postponed => write!(f, "Postponed"),
            Self::Other(state) => write!(f, "{state}"),
        }
    }
}

/// Score and state of a game as reported by its result feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub game_state: GameState,
    pub scheduled_start: DateTime<Utc>,
}

#[async_trait]
pub trait OutcomeProvider: Send + Sync {
    async fn fetch(&self, link: &str) -> Result<Outcome, FetchError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameFeed {
    game_state: String,
    #[serde(default)]
    game_schedule_state: Option<String>,
    #[serde(rename = "startTimeUTC")]
    start_time_utc: String,
    home_team: FeedTeam,
    away_team: FeedTeam,
}

#[derive(Deserialize)]
struct FeedTeam {
    #[serde(default)]
    score: Option<u32>,
}

impl TryFrom<GameFeed> for Outcome {
    type Error = FetchError;

    fn try_from(feed: GameFeed) -> Result<Self, Self::Error> {
        let scheduled_start = DateTime::parse_from_rfc3339(&feed.start_time_utc)
            .map_err(|e| {
                FetchError::Unavailable(format!("bad startTimeUTC {:?}: {}", feed.start_time_utc, e))
            })?
            .with_timezone(&Utc)
            .trunc_subsecs(0);

        Ok(Outcome {
            home_score: feed.home_team.score,
            away_score: feed.away_team.score,
            game_state: GameState::from_feed(&feed.game_state, feed.game_schedule_state.as_deref()),
            scheduled_start,
        })
    }
}

pub fn parse_feed(body: &str) -> Result<Outcome, FetchError> {
    let feed: GameFeed =
        serde_json::from_str(body).map_err(|e| FetchError::Unavailable(e.to_string()))?;
    Outcome::try_from(feed)
}

/// Pulls game feeds over HTTP from the link stored on each pick'em.
#[derive(Debug, Clone, Default)]
pub struct HttpOutcomeProvider {
    client: reqwest::Client,
}

impl HttpOutcomeProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutcomeProvider for HttpOutcomeProvider {
    async fn fetch(&self, link: &str) -> Result<Outcome, FetchError> {
        let start = std::time::Instant::now();
        let response = self.client.get(link).send().await?;
        debug!("Fetched {} in {:?}", link, start.elapsed());

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!("{link} returned {status}")));
        }

        let body = response.text().await?;
        parse_feed(&body)
    }
}
