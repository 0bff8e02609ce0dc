//! The delivery loop.
//!
//! Each drain pass repeatedly pulls a batch of subscribers whose deadline has
//! passed and moves every one of them forward: not-sendable subscribers are
//! skipped, everybody else gets today's message. The deadline advances in both
//! cases, and also when the send fails, so a provider outage costs at most one
//! day's message instead of a retry storm.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::{day_of_week_label, Clock};
use crate::config::DeliverySettings;
use crate::domain::phone_number::PhoneNumber;
use crate::domain::subscriber::Subscriber;
use crate::sms_client::OutboundChannel;
use crate::startup::Dependencies;
use crate::storage::{StoreError, SubscriberStore};

pub const DEFAULT_BATCH_SIZE: i64 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Outcome counts of a single drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub store_errors: usize,
}

impl DrainReport {
    pub fn visited(&self) -> usize {
        self.sent + self.failed + self.skipped + self.invalid
    }
}

pub struct DeliveryScheduler {
    store: Arc<dyn SubscriberStore>,
    channel: Arc<dyn OutboundChannel>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
    interval: Duration,
}

impl DeliveryScheduler {
    /// Fails when `settings` holds a zero interval or a non-positive batch
    /// size.
    pub fn new(dependencies: &Dependencies, settings: &DeliverySettings) -> Result<Self, String> {
        Ok(Self {
            store: dependencies.store.clone(),
            channel: dependencies.channel.clone(),
            clock: dependencies.clock.clone(),
            batch_size: settings.get_batch_size()?,
            interval: settings.get_interval()?,
        })
    }

    /// Runs one drain pass per tick until `cancel` fires. The first tick is
    /// immediate.
    pub async fn run_until_stopped(self, cancel: CancellationToken) {
        tracing::info!(
            interval_seconds = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Starting delivery loop"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            // A failed pass is retried on the next tick.
            if let Err(err) = self.drain_until(&cancel).await {
                tracing::error!("Delivery run aborted, retrying next tick: {:?}", err);
            }
        }

        tracing::info!("Delivery loop stopped");
    }

    /// A single drain pass, for one-shot invocations.
    pub async fn drain(&self) -> Result<DrainReport, StoreError> {
        self.drain_until(&CancellationToken::new()).await
    }

    #[tracing::instrument(name = "Delivery run", skip(self, cancel))]
    async fn drain_until(&self, cancel: &CancellationToken) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();
        // Records whose write failed come back in the next batch; they are
        // not processed twice in one pass.
        let mut visited: HashSet<PhoneNumber> = HashSet::new();

        loop {
            let now = self.clock.now();
            let batch = self.store.get_due_before(now, self.batch_size).await?;
            let fresh: Vec<Subscriber> = batch
                .into_iter()
                .filter(|subscriber| !visited.contains(&subscriber.number))
                .collect();

            if fresh.is_empty() {
                break;
            }

            for subscriber in fresh {
                // Checked between records only, never between a send and its
                // store update.
                if cancel.is_cancelled() {
                    tracing::info!(?report, "Delivery run interrupted by shutdown");
                    return Ok(report);
                }

                visited.insert(subscriber.number.clone());
                self.visit(&subscriber, now, &mut report).await;
            }
        }

        tracing::info!(?report, "Delivery run finished");

        Ok(report)
    }

    #[tracing::instrument(
        name = "Visiting subscriber",
        skip(self, subscriber, report),
        fields(number = %subscriber.number)
    )]
    async fn visit(&self, subscriber: &Subscriber, now: DateTime<Utc>, report: &mut DrainReport) {
        if !subscriber.is_sendable {
            tracing::debug!("Skipping unsendable number");
            report.skipped += 1;
            self.skip(&subscriber.number, now, report).await;
            return;
        }

        let tz = match subscriber.time_zone() {
            Ok(tz) => tz,
            Err(err) => {
                tracing::error!("{:?}", StoreError::InvalidRecord(err));
                report.invalid += 1;
                self.skip(&subscriber.number, now, report).await;
                return;
            }
        };

        let body = format!("Today is {}", day_of_week_label(now, tz));

        match self.channel.send(&subscriber.number, &body).await {
            Ok(message_id) => {
                tracing::info!(%message_id, "Delivered today's message");
                report.sent += 1;
            }
            Err(err) => {
                tracing::warn!("Failed to deliver message: {:?}", err);
                report.failed += 1;
            }
        }

        // Today's slot is used up whatever the provider said.
        if let Err(err) = self.store.update_sent(&subscriber.number, now).await {
            tracing::error!("Failed to record delivery: {:?}", err);
            report.store_errors += 1;
        }
    }

    async fn skip(&self, number: &PhoneNumber, now: DateTime<Utc>, report: &mut DrainReport) {
        if let Err(err) = self.store.update_skipped(number, now).await {
            tracing::error!("Failed to advance skipped subscriber: {:?}", err);
            report.store_errors += 1;
        }
    }
}
