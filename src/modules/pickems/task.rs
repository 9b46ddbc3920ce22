use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use poise::serenity_prelude::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{clock::Clock, outcome::OutcomeProvider, store::ContestStore};
use crate::tasks::Task;

/// Tries to settle every open pick'em. Each record resolves independently,
/// so a slow feed only holds up its own game.
#[derive(Clone)]
pub struct ResolveTask {
    store: Arc<ContestStore>,
    provider: Arc<dyn OutcomeProvider>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    fetch_timeout: Duration,
}

impl ResolveTask {
    pub fn new(
        store: Arc<ContestStore>,
        provider: Arc<dyn OutcomeProvider>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            interval,
            fetch_timeout,
        }
    }

    pub async fn run(&self) -> usize {
        let start = std::time::Instant::now();
        let keys = self.store.unresolved().await;
        debug!("Checking {} unresolved pick'ems", keys.len());

        let mut pending: FuturesUnordered<_> = keys
            .iter()
            .map(|key| {
                self.store.resolve(
                    key,
                    self.provider.as_ref(),
                    self.clock.as_ref(),
                    self.fetch_timeout,
                )
            })
            .collect();

        let mut resolved = 0;
        while let Some(done) = pending.next().await {
            if done {
                resolved += 1;
            }
        }

        if resolved > 0 {
            info!(
                "Resolved {} of {} pick'ems in {:?}",
                resolved,
                keys.len(),
                start.elapsed()
            );
        }
        resolved
    }
}

#[async_trait]
impl Task for ResolveTask {
    fn name(&self) -> &str {
        "PickemsResolve"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn execute(
        &mut self,
        _ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run().await;
        Ok(())
    }
}

/// Writes dirty pick'ems back to the database.
#[derive(Clone, Debug)]
pub struct FlushTask {
    store: Arc<ContestStore>,
    interval: Duration,
}

impl FlushTask {
    pub fn new(store: Arc<ContestStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl Task for FlushTask {
    fn name(&self) -> &str {
        "PickemsFlush"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn execute(
        &mut self,
        _ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let written = self.store.flush().await?;
        if written > 0 {
            debug!("Saved {} pick'ems", written);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{tests::temp_path, Database};
    use crate::modules::pickems::{record::VoteRecord, testing::*};

    #[tokio::test]
    async fn sweep_resolves_only_finished_games() {
        let db = Database::open(temp_path("sweep")).await.unwrap();
        let store = Arc::new(ContestStore::load(db).await);
        store.insert(VoteRecord::new(GUILD, game(1, "2024-01-01T00:00:00Z"))).unwrap();
        store.insert(VoteRecord::new(GUILD, game(2, "2024-01-01T03:00:00Z"))).unwrap();

        let provider = Arc::new(CountingProvider::answering(final_score(
            2,
            0,
            "2024-01-01T00:00:00Z",
        )));
        let task = ResolveTask::new(
            Arc::clone(&store),
            provider.clone(),
            Arc::new(at("2024-01-01T03:30:00Z")),
            Duration::from_secs(300),
            Duration::from_secs(5),
        );

        assert_eq!(task.run().await, 1);
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.unresolved().await.len(), 1);
    }
}
