use thiserror::Error;

use crate::database::DbError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("{0:?} is not one of the teams in this game")]
    InvalidOption(String),
    /// Voting has ended. `locked_in` holds the user's vote if they cast one.
    #[error("voting has ended")]
    VotingClosed { locked_in: Option<String> },
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("invalid game_start {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
    #[error("winner {0:?} is neither the home nor the away team")]
    InvalidWinner(String),
    #[error("vote {choice:?} by {user} is neither the home nor the away team")]
    InvalidVote { user: String, choice: String },
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("outcome unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no pick'em found for {0}")]
    NotFound(String),
    #[error("a pick'em for {0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Db(#[from] DbError),
}
