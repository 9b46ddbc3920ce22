//! Fixtures shared by the pick'em tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    clock::Clock,
    error::FetchError,
    outcome::{GameState, Outcome, OutcomeProvider},
    record::{ScheduledGame, VoteRecord},
};

pub const GUILD: u64 = 1_000;

pub fn ts(value: &str) -> DateTime<Utc> {
    value.parse().unwrap()
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn at(value: &str) -> FixedClock {
    FixedClock(ts(value))
}

pub fn game(contest_id: u64, start: &str) -> ScheduledGame {
    ScheduledGame {
        contest_id: Some(contest_id),
        home_team: "Boston Bruins".to_string(),
        away_team: "Toronto Maple Leafs".to_string(),
        game_start: ts(start),
        name: format!("TOR @ BOS {contest_id}"),
        link: Some(format!("https://feeds.example/{contest_id}")),
        game_type: "R".to_string(),
    }
}

pub fn record(start: &str) -> VoteRecord {
    VoteRecord::new(GUILD, game(2023020001, start))
}

pub fn final_score(home: u32, away: u32, start: &str) -> Outcome {
    Outcome {
        home_score: Some(home),
        away_score: Some(away),
        game_state: GameState::Final,
        scheduled_start: ts(start),
    }
}

/// Provider that counts calls and answers with a canned outcome, or
/// `Unavailable` when it has none.
#[derive(Debug, Default)]
pub struct CountingProvider {
    pub calls: AtomicUsize,
    pub outcome: Option<Outcome>,
}

impl CountingProvider {
    pub fn answering(outcome: Outcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Some(outcome),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutcomeProvider for CountingProvider {
    async fn fetch(&self, link: &str) -> Result<Outcome, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .ok_or_else(|| FetchError::Unavailable(format!("{link} is down")))
    }
}
