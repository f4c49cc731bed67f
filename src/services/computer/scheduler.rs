use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::TierJob;
use crate::db::{CandidateStore, InteractionLog};
use crate::error::{AppError, AppResult};

/// Drives the tier jobs: reads the log, computes, writes the candidate store
///
/// Jobs share nothing but the log and the store. Each runs on its own task
/// and its failures (errors or panics) never stop its own loop or the others.
pub struct RecommendationComputer {
    log: Arc<dyn InteractionLog>,
    store: Arc<dyn CandidateStore>,
}

impl RecommendationComputer {
    pub fn new(log: Arc<dyn InteractionLog>, store: Arc<dyn CandidateStore>) -> Self {
        Self { log, store }
    }

    /// Runs `job` once over a fresh log snapshot
    ///
    /// Returns the number of entries written; zero when the log is empty.
    pub async fn run_once(&self, job: &dyn TierJob) -> AppResult<usize> {
        let snapshot = self.log.read_all().await?;
        if snapshot.is_empty() {
            tracing::debug!(job = job.name(), "Interaction log empty, skipping run");
            return Ok(0);
        }

        let started = Instant::now();
        let rows = snapshot.len();
        let entries = job.compute(snapshot).await?;

        let written = entries.len();
        for (key, item_ids) in entries {
            self.store.set(&key, item_ids).await?;
        }

        tracing::info!(
            job = job.name(),
            rows,
            entries = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tier recomputed"
        );
        Ok(written)
    }

    /// Spawns the endless periodic loop for `job`
    pub fn spawn(self: &Arc<Self>, job: Arc<dyn TierJob>, cadence: Duration) -> JoinHandle<()> {
        let computer = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!(job = job.name(), cadence_secs = cadence.as_secs_f64(), "Starting tier job");
            let mut timer = interval(cadence);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                timer.tick().await;

                let run = {
                    let computer = Arc::clone(&computer);
                    let job = Arc::clone(&job);
                    tokio::spawn(async move { computer.run_once(job.as_ref()).await })
                };

                match run.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(AppError::Model(reason))) => {
                        tracing::warn!(job = job.name(), %reason, "Model produced no result this run");
                    }
                    Ok(Err(e)) => {
                        tracing::error!(job = job.name(), error = %e, "Tier job failed");
                    }
                    Err(e) => {
                        tracing::error!(job = job.name(), error = %e, "Tier job panicked");
                    }
                }
            }
        })
    }
}
