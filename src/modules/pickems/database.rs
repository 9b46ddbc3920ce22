use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::record::VoteSnapshot;
use crate::database::Database;

#[derive(Default, Serialize, Deserialize, Clone, Debug)]
pub struct PickemsDatabase {
    /// guild -> contest key -> snapshot
    pub contests: HashMap<u64, HashMap<String, VoteSnapshot>>,
}

pub type PickemsHandler = Database<PickemsDatabase>;

impl PickemsHandler {
    pub async fn snapshots(&self) -> Vec<VoteSnapshot> {
        self.read(|db| {
            db.contests
                .values()
                .flat_map(|contests| contests.values().cloned())
                .collect()
        })
        .await
    }

    pub async fn guild_count(&self) -> usize {
        self.read(|db| db.contests.len()).await
    }
}
