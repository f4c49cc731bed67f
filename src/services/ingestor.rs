use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::db::InteractionLog;
use crate::error::AppResult;
use crate::models::{Interaction, InteractionMessage};
use crate::services::event_source::{EventSource, Received};

/// Batches interaction events in memory and flushes them to the log
///
/// A flush happens once the flush interval has elapsed since the batch
/// started; an elapsed interval with nothing buffered only restarts the timer.
/// A failed flush is returned to the caller and ends ingestion.
pub struct Ingestor {
    log: Arc<dyn InteractionLog>,
    flush_interval: Duration,
    buffer: Vec<Interaction>,
    batch_started: Instant,
}

impl Ingestor {
    pub fn new(log: Arc<dyn InteractionLog>, flush_interval: Duration) -> Self {
        Self {
            log,
            flush_interval,
            buffer: Vec::new(),
            batch_started: Instant::now(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes a raw payload into the pending batch
    ///
    /// Malformed payloads are dropped with a warning and reported as `false`;
    /// they are still acknowledged so they are not redelivered forever.
    pub fn accept(&mut self, payload: &[u8]) -> bool {
        let rows = serde_json::from_slice::<InteractionMessage>(payload)
            .map_err(Into::into)
            .and_then(InteractionMessage::explode);

        match rows {
            Ok(rows) => {
                self.buffer.extend(rows);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed interaction message");
                false
            }
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.duration_since(self.batch_started) > self.flush_interval
    }

    fn time_until_due(&self, now: Instant) -> Duration {
        (self.batch_started + self.flush_interval)
            .saturating_duration_since(now)
            .max(Duration::from_millis(1))
    }

    /// Flushes if the interval has elapsed; returns the number of rows written
    pub async fn maybe_flush(&mut self, now: Instant) -> AppResult<usize> {
        if !self.is_due(now) {
            return Ok(0);
        }
        let written = self.flush().await?;
        self.batch_started = now;
        Ok(written)
    }

    /// Writes the pending batch to the log unconditionally
    pub async fn flush(&mut self) -> AppResult<usize> {
        if self.buffer.is_empty() {
            tracing::debug!("Flush interval elapsed with no buffered events");
            return Ok(0);
        }

        let rows = std::mem::take(&mut self.buffer);
        let count = rows.len();
        self.log.append(rows).await?;
        tracing::info!(count, "Saved interaction events to the log");
        Ok(count)
    }

    /// Consumes `source` until it closes
    ///
    /// Each delivery is acknowledged right after it joins the pending batch.
    pub async fn run<S: EventSource + ?Sized>(mut self, source: &mut S) -> AppResult<()> {
        tracing::info!(
            flush_interval_secs = self.flush_interval.as_secs_f64(),
            "Ingestor started"
        );

        loop {
            let wait = self.time_until_due(Instant::now());
            match source.receive(wait).await? {
                Received::Message(delivery) => {
                    self.accept(&delivery.payload);
                    source.ack(&delivery.id).await?;
                }
                Received::Idle => {}
                Received::Closed => {
                    tracing::info!(pending = self.buffer.len(), "Event source closed, final flush");
                    self.flush().await?;
                    return Ok(());
                }
            }

            self.maybe_flush(Instant::now()).await?;
        }
    }
}
