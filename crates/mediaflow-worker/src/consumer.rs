//! Consumer pool: one task per partition, sequential within a partition.
//!
//! A handler error is logged and the delivery acknowledged unless
//! [`ConsumerConfig::max_attempts`] allows retries. Retries use capped
//! exponential backoff; once attempts run out the raw payload goes to the
//! dead-letter topic, if one is configured. A panicking handler counts as a
//! failed attempt and never takes the partition task down with it.
//!
//! Shutdown: [`ConsumerPool::shutdown`] stops pulling new deliveries and waits
//! for in-flight handlers to finish.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::broker::{Delivery, MessageBroker, Subscription};
use crate::handler::{is_recoverable, MessageHandler};

/// Default cap on the delay between handler retries.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Backoff before retry number `retry_count + 1`: 1, 2, 4 ... seconds, capped.
#[inline]
pub(crate) fn compute_retry_backoff(retry_count: u32, cap: Duration) -> Duration {
    let secs = 2_u64.saturating_pow(retry_count);
    Duration::from_secs(secs).min(cap)
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Handler invocations per delivery, including the first. `1` disables retries.
    pub max_attempts: u32,
    pub retry_backoff_cap: Duration,
    /// Where deliveries go once attempts are exhausted.
    pub dead_letter_topic: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_backoff_cap: Duration::from_secs(MAX_RETRY_BACKOFF_SECS),
            dead_letter_topic: None,
        }
    }
}

pub struct ConsumerPool {
    topic: String,
    group: String,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerPool {
    /// Start draining every partition of `subscription` with `handler`.
    ///
    /// `broker` is used only to publish dead letters.
    pub fn start(
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
        broker: Arc<dyn MessageBroker>,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let Subscription {
            topic,
            group,
            partitions,
        } = subscription;

        tracing::info!(
            topic = %topic,
            group = %group,
            partitions = partitions.len(),
            max_attempts = config.max_attempts,
            dead_letter_topic = ?config.dead_letter_topic,
            "Consumer pool started"
        );

        let workers = partitions
            .into_iter()
            .enumerate()
            .map(|(partition, receiver)| {
                tokio::spawn(Self::partition_loop(
                    group.clone(),
                    partition,
                    receiver,
                    handler.clone(),
                    broker.clone(),
                    config.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        Self {
            topic,
            group,
            shutdown_tx,
            workers,
        }
    }

    async fn partition_loop(
        group: String,
        partition: usize,
        mut receiver: mpsc::UnboundedReceiver<Delivery>,
        handler: Arc<dyn MessageHandler>,
        broker: Arc<dyn MessageBroker>,
        config: ConsumerConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                delivery = receiver.recv() => match delivery {
                    Some(delivery) => {
                        Self::process_with_retry(&group, delivery, &handler, broker.as_ref(), &config).await;
                    }
                    None => break,
                },
            }
        }

        tracing::debug!(group = %group, partition, "Partition consumer stopped");
    }

    #[tracing::instrument(
        skip_all,
        fields(topic = %delivery.topic, group = %group, partition = delivery.partition, offset = delivery.offset, key = %delivery.key)
    )]
    async fn process_with_retry(
        group: &str,
        delivery: Delivery,
        handler: &Arc<dyn MessageHandler>,
        broker: &dyn MessageBroker,
        config: &ConsumerConfig,
    ) {
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let task_handler = handler.clone();
            let task_delivery = delivery.clone();
            let outcome =
                tokio::spawn(async move { task_handler.handle(&task_delivery).await }).await;

            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(join_error) => anyhow::anyhow!("Handler panicked: {}", join_error),
            };

            let recoverable = is_recoverable(&error);
            if !recoverable || attempt >= max_attempts {
                tracing::error!(
                    error = %error,
                    attempt,
                    max_attempts,
                    recoverable,
                    "Message handling failed, acknowledging"
                );
                if let Some(ref dead_letter_topic) = config.dead_letter_topic {
                    Self::dead_letter(broker, dead_letter_topic, &delivery).await;
                }
                return;
            }

            let backoff = compute_retry_backoff(attempt - 1, config.retry_backoff_cap);
            tracing::warn!(
                error = %error,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Message handling failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn dead_letter(broker: &dyn MessageBroker, topic: &str, delivery: &Delivery) {
        match broker
            .publish(topic, &delivery.key, delivery.payload.clone())
            .await
        {
            Ok(()) => tracing::info!(dead_letter_topic = %topic, "Delivery dead-lettered"),
            Err(e) => tracing::error!(
                error = %e,
                dead_letter_topic = %topic,
                "Failed to dead-letter delivery, dropping it"
            ),
        }
    }

    /// Stop pulling new deliveries and wait for in-flight handlers.
    pub async fn shutdown(self) {
        tracing::info!(topic = %self.topic, group = %self.group, "Initiating consumer pool shutdown");
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Partition consumer task failed");
            }
        }
        tracing::info!(topic = %self.topic, group = %self.group, "Consumer pool stopped");
    }

    /// Wait until every partition receiver is closed by the broker.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Partition consumer task failed");
            }
        }
    }
}
