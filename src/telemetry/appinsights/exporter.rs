//! Background batch exporter.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::envelope::Envelope;

pub(super) struct Exporter {
    pub client: reqwest::Client,
    pub url: String,
    pub max_batch: usize,
    pub flush_interval: Duration,
}

impl Exporter {
    /// Drains `rx` until every sender is gone, flushing whenever the batch
    /// is full or the interval elapses. The last partial batch is flushed
    /// before returning.
    pub async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        let mut batch = Vec::with_capacity(self.max_batch);
        let first = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = tokio::time::interval_at(first, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(envelope) => {
                        batch.push(envelope);
                        if batch.len() >= self.max_batch {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },

                _ = ticker.tick() => self.flush(&mut batch).await,
            }
        }

        self.flush(&mut batch).await;
        debug!("telemetry exporter stopped");
    }

    async fn flush(&self, batch: &mut Vec<Envelope>) {
        if batch.is_empty() {
            return;
        }
        let items = std::mem::take(batch);
        let count = items.len();

        // No retry: a failed batch is logged and dropped.
        match self.client.post(&self.url).json(&items).send().await {
            Ok(res) if res.status().is_success() => {
                debug!(count, status = res.status().as_u16(), "telemetry batch sent");
            }
            Ok(res) => {
                let status = res.status().as_u16();
                let body = res.text().await.unwrap_or_default();
                warn!(count, status, body = %body, "telemetry batch rejected by ingestion endpoint");
            }
            Err(e) => {
                warn!(count, error = %e, "telemetry batch could not be sent");
            }
        }
    }
}
