use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time};
use tracing::{debug, error, info, warn};

use super::{
    clock::Clock,
    database::PickemsHandler,
    error::StoreError,
    outcome::{Outcome, OutcomeProvider},
    record::{Resolution, ScheduledGame, VoteOutcome, VoteRecord},
    resolver::ContestResolver,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContestKey {
    pub guild: u64,
    pub contest: String,
}

impl ContestKey {
    pub fn new(guild: u64, contest: impl Into<String>) -> Self {
        Self {
            guild,
            contest: contest.into(),
        }
    }

    pub fn of(record: &VoteRecord) -> Self {
        Self::new(record.guild(), record.key())
    }
}

impl fmt::Display for ContestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild, self.contest)
    }
}

pub type RecordHandle = Arc<Mutex<VoteRecord>>;

/// Live pick'ems, one lock per record. Votes and outcomes for a contest are
/// serialized on its lock; different contests never wait on each other.
/// Changes reach disk through [`ContestStore::flush`].
#[derive(Debug)]
pub struct ContestStore {
    db: PickemsHandler,
    records: DashMap<ContestKey, RecordHandle>,
}

impl ContestStore {
    pub async fn load(db: PickemsHandler) -> Self {
        let records = DashMap::new();
        for snapshot in db.snapshots().await {
            let label = format!("{}/{:?}", snapshot.guild, snapshot.contest_id);
            match VoteRecord::from_snapshot(snapshot) {
                Ok(record) => {
                    records.insert(ContestKey::of(&record), Arc::new(Mutex::new(record)));
                }
                Err(e) => error!("Skipping unreadable pick'em {}: {}", label, e),
            }
        }
        info!(
            "Loaded {} pick'ems across {} guilds",
            records.len(),
            db.guild_count().await
        );
        Self { db, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&self, record: VoteRecord) -> Result<ContestKey, StoreError> {
        let key = ContestKey::of(&record);
        match self.records.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(key.to_string())),
            Entry::Vacant(slot) => {
                debug!("Tracking {}", record);
                slot.insert(Arc::new(Mutex::new(record)));
                Ok(key)
            }
        }
    }

    pub fn get(&self, key: &ContestKey) -> Option<RecordHandle> {
        self.records.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn handle(&self, key: &ContestKey) -> Result<RecordHandle, StoreError> {
        self.get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    // Clones the handles out so no map guard is held across an await.
    fn entries(&self) -> Vec<(ContestKey, RecordHandle)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Looks a contest up by key, then by case-insensitive name.
    pub async fn find(&self, guild: u64, query: &str) -> Option<(ContestKey, RecordHandle)> {
        let query = query.trim();
        let key = ContestKey::new(guild, query);
        if let Some(handle) = self.get(&key) {
            return Some((key, handle));
        }

        for (key, handle) in self.entries() {
            if key.guild != guild {
                continue;
            }
            if handle.lock().await.metadata().name.eq_ignore_ascii_case(query) {
                return Some((key, handle));
            }
        }
        None
    }

    pub async fn find_matching(&self, guild: u64, candidate: &ScheduledGame) -> Option<ContestKey> {
        for (key, handle) in self.entries() {
            if key.guild == guild && handle.lock().await.matches(candidate) {
                return Some(key);
            }
        }
        None
    }

    pub async fn unresolved(&self) -> Vec<ContestKey> {
        let mut keys = Vec::new();
        for (key, handle) in self.entries() {
            if handle.lock().await.winner().is_none() {
                keys.push(key);
            }
        }
        keys
    }

    pub async fn cast_vote(
        &self,
        key: &ContestKey,
        user_id: &str,
        choice: &str,
        clock: &dyn Clock,
    ) -> Result<VoteOutcome, StoreError> {
        let handle = self.handle(key)?;
        let mut record = handle.lock().await;
        Ok(record.cast_vote(user_id, choice, clock)?)
    }

    pub async fn apply_outcome(
        &self,
        key: &ContestKey,
        outcome: Option<&Outcome>,
    ) -> Result<Resolution, StoreError> {
        let handle = self.handle(key)?;
        let mut record = handle.lock().await;
        Ok(record.apply_outcome(outcome))
    }

    pub async fn postpone(
        &self,
        key: &ContestKey,
        new_start: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let handle = self.handle(key)?;
        let mut record = handle.lock().await;
        Ok(record.correct_postponement(new_start))
    }

    /// Same rules as [`VoteRecord::resolve`], but the record is unlocked
    /// while the outcome is fetched so votes are never stuck behind the
    /// network. A failed or timed out fetch leaves the record as it was.
    pub async fn resolve(
        &self,
        key: &ContestKey,
        provider: &dyn OutcomeProvider,
        clock: &dyn Clock,
        fetch_timeout: Duration,
    ) -> bool {
        let Some(handle) = self.get(key) else {
            return false;
        };

        let (link, deadline) = {
            let record = handle.lock().await;
            if record.winner().is_some() {
                return true;
            }
            match ContestResolver::fetch_target(&record, clock.now()) {
                Some(link) => (link.to_string(), record.deadline()),
                None => return false,
            }
        };

        let outcome = match time::timeout(fetch_timeout, provider.fetch(&link)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("Could not fetch outcome for {}: {}", key, e);
                return false;
            }
            Err(_) => {
                warn!("Timed out fetching outcome for {} from {}", key, link);
                return false;
            }
        };

        let mut record = handle.lock().await;
        // the game was moved or re-targeted while the fetch was in flight
        if record.deadline() != deadline
            || ContestResolver::fetch_target(&record, clock.now()) != Some(link.as_str())
        {
            debug!("Discarding stale outcome for {}", key);
            return record.winner().is_some();
        }
        record.apply_outcome(Some(&outcome)).is_resolved()
    }

    /// Writes every dirty record in one transaction. Records are re-marked
    /// dirty if the write fails so the next flush retries them.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let mut pending = Vec::new();
        for (key, handle) in self.entries() {
            let mut record = handle.lock().await;
            if record.is_dirty() {
                pending.push((key, record.to_snapshot()));
                record.mark_clean();
            }
        }

        if pending.is_empty() {
            return Ok(0);
        }

        let keys: Vec<ContestKey> = pending.iter().map(|(key, _)| key.clone()).collect();
        let written = pending.len();
        let result = self
            .db
            .transaction(move |db| {
                for (key, snapshot) in pending {
                    db.contests
                        .entry(key.guild)
                        .or_default()
                        .insert(key.contest, snapshot);
                }
            })
            .await;

        if let Err(e) = result {
            for key in &keys {
                if let Some(handle) = self.get(key) {
                    handle.lock().await.mark_dirty();
                }
            }
            return Err(e.into());
        }

        debug!("Flushed {} pick'ems", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{tests::temp_path, Database};
    use crate::modules::pickems::{error::FetchError, testing::*};
    use async_trait::async_trait;

    const START: &str = "2024-01-01T00:00:00Z";
    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn store(label: &str) -> (ContestStore, std::path::PathBuf) {
        let path = temp_path(label);
        let db = Database::open(&path).await.unwrap();
        (ContestStore::load(db).await, path)
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let (store, _) = store("duplicate").await;
        let key = store.insert(record(START)).unwrap();
        assert_eq!(key, ContestKey::new(GUILD, "2023020001"));
        assert!(matches!(
            store.insert(record(START)),
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_votes_are_all_recorded() {
        let (store, _) = store("concurrent").await;
        let store = Arc::new(store);
        let key = store.insert(record(START)).unwrap();
        let clock = at("2023-12-31T20:00:00Z");

        let mut tasks = Vec::new();
        for user in 0..50 {
            let store = Arc::clone(&store);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                let team = if user % 2 == 0 { "Boston Bruins" } else { "Toronto Maple Leafs" };
                store
                    .cast_vote(&key, &user.to_string(), team, &clock)
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let handle = store.get(&key).unwrap();
        assert_eq!(handle.lock().await.vote_counts(), (25, 25));
    }

    #[tokio::test]
    async fn vote_on_unknown_contest_is_not_found() {
        let (store, _) = store("unknown").await;
        let result = store
            .cast_vote(&ContestKey::new(GUILD, "nope"), "1", "Boston Bruins", &at(START))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn flush_persists_and_clears_dirty() {
        let (store, path) = store("flush").await;
        let key = store.insert(record("2030-01-01T00:00:00Z")).unwrap();
        store
            .cast_vote(&key, "42", "Boston Bruins", &at("2029-12-31T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(store.flush().await.unwrap(), 1);
        assert_eq!(store.flush().await.unwrap(), 0);

        let reloaded = ContestStore::load(Database::open(&path).await.unwrap()).await;
        let handle = reloaded.get(&key).unwrap();
        let record = handle.lock().await;
        assert_eq!(record.vote_of("42"), Some("Boston Bruins"));
        assert!(record.is_dirty());
    }

    #[tokio::test]
    async fn find_by_key_or_name() {
        let (store, _) = store("find").await;
        let key = store.insert(record(START)).unwrap();

        assert_eq!(store.find(GUILD, "2023020001").await.map(|(k, _)| k), Some(key.clone()));
        assert_eq!(
            store.find(GUILD, " tor @ bos 2023020001 ").await.map(|(k, _)| k),
            Some(key.clone())
        );
        assert!(store.find(GUILD + 1, "2023020001").await.is_none());

        assert_eq!(store.find_matching(GUILD, &game(1, START)).await, Some(key));
        assert_eq!(
            store
                .find_matching(GUILD, &game(1, "2024-01-02T00:00:00Z"))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn resolve_respects_grace_window_and_failures() {
        let (store, _) = store("resolve").await;
        let key = store.insert(record(START)).unwrap();
        store.flush().await.unwrap();

        let down = CountingProvider::unavailable();
        assert!(!store.resolve(&key, &down, &at("2024-01-01T01:00:00Z"), TIMEOUT).await);
        assert_eq!(down.calls(), 0);

        assert!(!store.resolve(&key, &down, &at("2024-01-01T05:00:00Z"), TIMEOUT).await);
        assert_eq!(down.calls(), 1);
        assert_eq!(store.flush().await.unwrap(), 0);

        let up = CountingProvider::answering(final_score(1, 2, START));
        assert!(store.resolve(&key, &up, &at("2024-01-01T05:00:00Z"), TIMEOUT).await);
        assert!(store.unresolved().await.is_empty());

        assert!(store.resolve(&key, &up, &at("2024-01-01T06:00:00Z"), TIMEOUT).await);
        assert_eq!(up.calls(), 1);
        assert_eq!(store.flush().await.unwrap(), 1);
    }

    struct StalledProvider;

    #[async_trait]
    impl OutcomeProvider for StalledProvider {
        async fn fetch(&self, _link: &str) -> Result<Outcome, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(FetchError::Unavailable("never".into()))
        }
    }

    #[tokio::test]
    async fn stalled_fetch_times_out_without_blocking_votes() {
        let (store, _) = store("stalled").await;
        let store = Arc::new(store);
        let key = store.insert(record(START)).unwrap();

        let resolving = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .resolve(
                        &key,
                        &StalledProvider,
                        &at("2024-01-01T05:00:00Z"),
                        Duration::from_millis(200),
                    )
                    .await
            })
        };

        // the record lock is free while the fetch is in flight
        let vote = store
            .cast_vote(&key, "42", "Boston Bruins", &at("2023-12-31T00:00:00Z"))
            .await;
        assert!(vote.is_ok());

        assert!(!resolving.await.unwrap());
        assert_eq!(store.unresolved().await, vec![key]);
    }

    struct SlowProvider(Outcome);

    #[async_trait]
    impl OutcomeProvider for SlowProvider {
        async fn fetch(&self, _link: &str) -> Result<Outcome, FetchError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn outcome_fetched_before_postponement_is_discarded() {
        let (store, _) = store("stale").await;
        let store = Arc::new(store);
        let key = store.insert(record(START)).unwrap();

        let resolving = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                let provider = SlowProvider(final_score(3, 1, START));
                store
                    .resolve(&key, &provider, &at("2024-01-01T05:00:00Z"), TIMEOUT)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.postpone(&key, ts("2024-01-10T00:00:00Z")).await.unwrap();

        assert!(!resolving.await.unwrap());
        let handle = store.get(&key).unwrap();
        let record = handle.lock().await;
        assert_eq!(record.winner(), None);
        assert_eq!(record.deadline(), ts("2024-01-10T00:00:00Z"));
    }

    #[tokio::test]
    async fn failed_flush_keeps_records_dirty() {
        let (store, path) = store("unwritable").await;
        let key = store.insert(record(START)).unwrap();

        // swap the database directory for a regular file so the write fails
        let dir = path.parent().unwrap().to_path_buf();
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"not a directory").unwrap();

        assert!(matches!(store.flush().await, Err(StoreError::Db(_))));
        assert!(store.get(&key).unwrap().lock().await.is_dirty());

        std::fs::remove_file(&dir).unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(store.flush().await.unwrap(), 1);

        let reloaded = ContestStore::load(Database::open(&path).await.unwrap()).await;
        assert!(reloaded.get(&key).is_some());
    }

    #[tokio::test]
    async fn postpone_reopens_a_called_game() {
        let (store, _) = store("postpone").await;
        let key = store.insert(record(START)).unwrap();
        store
            .apply_outcome(&key, Some(&final_score(3, 1, START)))
            .await
            .unwrap();

        let cleared = store.postpone(&key, ts("2024-01-04T00:00:00Z")).await.unwrap();
        assert_eq!(cleared.as_deref(), Some("Boston Bruins"));
        assert_eq!(store.unresolved().await, vec![key.clone()]);

        let vote = store
            .cast_vote(&key, "42", "Toronto Maple Leafs", &at("2024-01-03T00:00:00Z"))
            .await;
        assert!(vote.is_ok());
    }
}
