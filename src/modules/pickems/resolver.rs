use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use tracing::{debug, warn};

use super::{
    outcome::{GameState, Outcome},
    record::VoteRecord,
};

/// How long after puck drop before a result is worth fetching.
pub const GRACE_WINDOW_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Reschedule(DateTime<Utc>),
    Winner(Side),
}

/// Pure rules turning an outcome into a decision for one pick'em.
pub struct ContestResolver;

impl ContestResolver {
    pub fn grace_window() -> TimeDelta {
        TimeDelta::hours(GRACE_WINDOW_HOURS)
    }

    /// The link to fetch, if the game is old enough and has one.
    pub fn fetch_target(record: &VoteRecord, now: DateTime<Utc>) -> Option<&str> {
        if now < record.deadline() + Self::grace_window() {
            debug!("{} is still inside the grace window", record);
            return None;
        }
        record.link()
    }

    pub fn decide(record: &VoteRecord, outcome: &Outcome) -> Decision {
        if outcome.game_state == GameState::Postponed {
            let start = outcome.scheduled_start.trunc_subsecs(0);
            return if start != record.deadline() {
                Decision::Reschedule(start)
            } else {
                Decision::Pending
            };
        }

        match (outcome.home_score, outcome.away_score) {
            (Some(home), Some(away)) if home > away => Decision::Winner(Side::Home),
            (Some(home), Some(away)) if away > home => Decision::Winner(Side::Away),
            (Some(_), Some(_)) => Decision::Pending,
            _ => {
                if outcome.game_state == GameState::Final {
                    warn!("Final outcome for {} is missing scores", record);
                }
                Decision::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::pickems::testing::*;

    const START: &str = "2024-01-01T00:00:00Z";

    #[test]
    fn fetch_waits_out_grace_window() {
        let r = record(START);
        assert_eq!(ContestResolver::fetch_target(&r, ts("2024-01-01T01:59:59Z")), None);
        assert_eq!(
            ContestResolver::fetch_target(&r, ts("2024-01-01T02:00:00Z")),
            Some("https://feeds.example/2023020001")
        );
    }

    #[test]
    fn scores_pick_a_side() {
        let r = record(START);
        assert_eq!(
            ContestResolver::decide(&r, &final_score(5, 2, START)),
            Decision::Winner(Side::Home)
        );
        assert_eq!(
            ContestResolver::decide(&r, &final_score(0, 1, START)),
            Decision::Winner(Side::Away)
        );
        assert_eq!(
            ContestResolver::decide(&r, &final_score(3, 3, START)),
            Decision::Pending
        );
    }

    #[test]
    fn leading_game_in_progress_still_decides() {
        let r = record(START);
        let mut live = final_score(2, 1, START);
        live.game_state = GameState::InProgress;
        assert_eq!(ContestResolver::decide(&r, &live), Decision::Winner(Side::Home));
    }

    #[test]
    fn postponed_never_picks_a_winner() {
        let r = record(START);
        let mut postponed = final_score(4, 0, START);
        postponed.game_state = GameState::Postponed;
        assert_eq!(ContestResolver::decide(&r, &postponed), Decision::Pending);

        postponed.scheduled_start = ts("2024-02-01T00:00:00Z");
        assert_eq!(
            ContestResolver::decide(&r, &postponed),
            Decision::Reschedule(ts("2024-02-01T00:00:00Z"))
        );
    }

    #[test]
    fn missing_scores_are_pending() {
        let r = record(START);
        let mut outcome = final_score(1, 0, START);
        outcome.away_score = None;
        assert_eq!(ContestResolver::decide(&r, &outcome), Decision::Pending);
    }
}
