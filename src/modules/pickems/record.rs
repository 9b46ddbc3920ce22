use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use tracing::{debug, info, warn};

use super::{
    clock::Clock,
    error::{SnapshotError, VoteError},
    outcome::{GameState, Outcome, OutcomeProvider},
    resolver::{ContestResolver, Decision, Side},
};

/// Timestamp layout used in snapshots, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SnapshotError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| SnapshotError::Timestamp {
            value: value.to_string(),
            source,
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted(String),
    Changed { previous: String, current: String },
    Unchanged(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// A game as the schedule reports it. Used both to create a pick'em and to
/// check whether an existing one still describes the same game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledGame {
    pub contest_id: Option<u64>,
    pub home_team: String,
    pub away_team: String,
    pub game_start: DateTime<Utc>,
    pub name: String,
    pub link: Option<String>,
    pub game_type: String,
}

/// Passed through untouched by the voting rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContestMetadata {
    pub name: String,
    pub link: Option<String>,
    pub game_type: String,
    pub state: String,
    pub messages: Vec<String>,
}

fn default_game_type() -> String {
    "R".to_string()
}

/// Persisted form of a [`VoteRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSnapshot {
    #[serde(default)]
    pub contest_id: Option<u64>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub messages: Vec<String>,
    pub guild: u64,
    pub game_start: String,
    pub home_team: String,
    pub away_team: String,
    pub votes: HashMap<String, String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default = "default_game_type")]
    pub game_type: String,
}

/// One pick'em: who picked which team in a single game, and who won.
///
/// `game_start` doubles as the voting deadline. `dirty` tracks whether the
/// record changed since it was last written out.
#[derive(Debug, Clone)]
pub struct VoteRecord {
    contest_id: Option<u64>,
    guild: u64,
    home_team: String,
    away_team: String,
    game_start: DateTime<Utc>,
    votes: HashMap<String, String>,
    winner: Option<String>,
    metadata: ContestMetadata,
    dirty: bool,
}

impl VoteRecord {
    pub fn new(guild: u64, game: ScheduledGame) -> Self {
        Self {
            contest_id: game.contest_id,
            guild,
            home_team: game.home_team,
            away_team: game.away_team,
            game_start: game.game_start.trunc_subsecs(0),
            votes: HashMap::new(),
            winner: None,
            metadata: ContestMetadata {
                name: game.name,
                link: game.link,
                game_type: game.game_type,
                state: GameState::Scheduled.to_string(),
                messages: Vec::new(),
            },
            // new records have never been written
            dirty: true,
        }
    }

    pub fn contest_id(&self) -> Option<u64> {
        self.contest_id
    }

    pub fn guild(&self) -> u64 {
        self.guild
    }

    /// Storage key within a guild: the contest id, or the name for records
    /// that never had one.
    pub fn key(&self) -> String {
        self.contest_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| self.metadata.name.clone())
    }

    pub fn home_team(&self) -> &str {
        &self.home_team
    }

    pub fn away_team(&self) -> &str {
        &self.away_team
    }

    pub fn team(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home_team,
            Side::Away => &self.away_team,
        }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.game_start
    }

    pub fn votes(&self) -> &HashMap<String, String> {
        &self.votes
    }

    pub fn vote_of(&self, user_id: &str) -> Option<&str> {
        self.votes.get(user_id).map(String::as_str)
    }

    /// (home, away) vote totals.
    pub fn vote_counts(&self) -> (usize, usize) {
        let home = self.votes.values().filter(|v| *v == &self.home_team).count();
        (home, self.votes.len() - home)
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn metadata(&self) -> &ContestMetadata {
        &self.metadata
    }

    pub fn link(&self) -> Option<&str> {
        self.metadata.link.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_voting_open(&self, now: DateTime<Utc>) -> bool {
        self.winner.is_none() && now <= self.game_start
    }

    pub fn add_message(&mut self, reference: impl Into<String>) {
        self.metadata.messages.push(reference.into());
        self.dirty = true;
    }

    /// Canonical team name for a user's choice, matched case-insensitively.
    pub fn team_for(&self, choice: &str) -> Option<&str> {
        let choice = choice.trim();
        [self.home_team.as_str(), self.away_team.as_str()]
            .into_iter()
            .find(|team| team.eq_ignore_ascii_case(choice))
    }

    pub fn cast_vote<C: Clock + ?Sized>(
        &mut self,
        user_id: &str,
        choice: &str,
        clock: &C,
    ) -> Result<VoteOutcome, VoteError> {
        let choice = self
            .team_for(choice)
            .ok_or_else(|| VoteError::InvalidOption(choice.to_string()))?
            .to_string();
        let open = self.is_voting_open(clock.now());

        if let Some(existing) = self.votes.get_mut(user_id) {
            if !open {
                return Err(VoteError::VotingClosed {
                    locked_in: Some(existing.clone()),
                });
            }
            if *existing == choice {
                return Ok(VoteOutcome::Unchanged(choice));
            }
            let previous = std::mem::replace(existing, choice.clone());
            self.dirty = true;
            debug!("{} changed vote from {} to {} on {}", user_id, previous, choice, self);
            return Ok(VoteOutcome::Changed {
                previous,
                current: choice,
            });
        }

        if !open {
            return Err(VoteError::VotingClosed { locked_in: None });
        }
        self.votes.insert(user_id.to_string(), choice.clone());
        self.dirty = true;
        debug!("{} voted {} on {}", user_id, choice, self);
        Ok(VoteOutcome::Accepted(choice))
    }

    pub fn apply_outcome(&mut self, outcome: Option<&Outcome>) -> Resolution {
        let Some(outcome) = outcome else {
            return Resolution::Unresolved;
        };

        // a postponement moves the deadline even after a winner was called,
        // but never clears that winner
        match (ContestResolver::decide(self, outcome), self.winner.clone()) {
            (Decision::Reschedule(start), _) => {
                info!(
                    "{} postponed, moving start from {} to {}",
                    self,
                    format_timestamp(&self.game_start),
                    format_timestamp(&start)
                );
                self.game_start = start;
                self.dirty = true;
                Resolution::Unresolved
            }
            (_, Some(winner)) => Resolution::Resolved(winner),
            (Decision::Pending, None) => Resolution::Unresolved,
            (Decision::Winner(side), None) => {
                let team = self.team(side).to_string();
                self.winner = Some(team.clone());
                self.dirty = true;
                info!("Set winner {} for {}", team, self);
                Resolution::Resolved(team)
            }
        }
    }

    /// Sweep entry point. Returns true once the record has a winner.
    pub async fn resolve<P, C>(&mut self, outcome: Option<Outcome>, provider: &P, clock: &C) -> bool
    where
        P: OutcomeProvider + ?Sized,
        C: Clock + ?Sized,
    {
        if self.winner.is_some() {
            return true;
        }
        if let Some(outcome) = outcome {
            return self.apply_outcome(Some(&outcome)).is_resolved();
        }

        let Some(link) = ContestResolver::fetch_target(self, clock.now()).map(str::to_string)
        else {
            return false;
        };

        debug!("Checking winner for {}", self);
        match provider.fetch(&link).await {
            Ok(outcome) => self.apply_outcome(Some(&outcome)).is_resolved(),
            Err(e) => {
                warn!("Could not fetch outcome for {}: {}", self, e);
                false
            }
        }
    }

    /// Operator correction for a game that was called too early. Unlike
    /// `apply_outcome` this may clear an existing winner.
    pub fn correct_postponement(&mut self, new_start: DateTime<Utc>) -> Option<String> {
        let cleared = self.winner.take();
        self.game_start = new_start.trunc_subsecs(0);
        self.metadata.state = GameState::Postponed.to_string();
        self.dirty = true;
        info!("Postponement corrected for {}, cleared winner {:?}", self, cleared);
        cleared
    }

    pub fn matches(&self, candidate: &ScheduledGame) -> bool {
        self.home_team == candidate.home_team
            && self.away_team == candidate.away_team
            && self.game_start == candidate.game_start.trunc_subsecs(0)
    }

    pub fn to_snapshot(&self) -> VoteSnapshot {
        VoteSnapshot {
            contest_id: self.contest_id,
            state: self.metadata.state.clone(),
            messages: self.metadata.messages.clone(),
            guild: self.guild,
            game_start: format_timestamp(&self.game_start),
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            votes: self.votes.clone(),
            name: self.metadata.name.clone(),
            winner: self.winner.clone(),
            link: self.metadata.link.clone(),
            game_type: self.metadata.game_type.clone(),
        }
    }

    pub fn from_snapshot(data: VoteSnapshot) -> Result<Self, SnapshotError> {
        let game_start = parse_timestamp(&data.game_start)?;
        let is_team = |team: &str| team == data.home_team || team == data.away_team;

        if let Some(winner) = data.winner.as_deref().filter(|w| !is_team(*w)) {
            return Err(SnapshotError::InvalidWinner(winner.to_string()));
        }
        if let Some((user, choice)) = data.votes.iter().find(|(_, choice)| !is_team(choice.as_str())) {
            return Err(SnapshotError::InvalidVote {
                user: user.clone(),
                choice: choice.clone(),
            });
        }

        Ok(Self {
            contest_id: data.contest_id,
            guild: data.guild,
            home_team: data.home_team,
            away_team: data.away_team,
            game_start,
            votes: data.votes,
            winner: data.winner,
            metadata: ContestMetadata {
                name: data.name,
                link: data.link,
                game_type: data.game_type,
                state: data.state,
                messages: data.messages,
            },
            // loaded records are always eligible for a re-save
            dirty: true,
        })
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, SnapshotError> {
        Self::from_snapshot(serde_json::from_value(value)?)
    }
}

impl fmt::Display for VoteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Pickems contest_id={} state={} game_type={} name={} guild={} winner={}>",
            self.contest_id
                .map_or_else(|| "None".to_string(), |id| id.to_string()),
            self.metadata.state,
            self.metadata.game_type,
            self.metadata.name,
            self.guild,
            self.winner.as_deref().unwrap_or("None"),
        )
    }
}
