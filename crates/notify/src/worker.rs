//! Bus worker that delivers queued channel messages.
//!
//! Consumes `kurier.notify.<channel>` records, dispatches each through the
//! [`Dispatcher`] and publishes a dead-letter record for every delivery
//! that could not be completed. A record is committed only after its
//! outcome (delivered or dead-lettered) is durable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use kurier_bus::{topics, BusError, EventPublisher, GroupConsumer, Message, Record, Worker, WorkerStatus};
use kurier_core::{ChannelMessage, DeadLetter, PipelineStats};

use crate::dispatcher::Dispatcher;

/// Consecutive failed deliveries before the worker reports itself degraded.
const DEGRADED_AFTER: u64 = 5;

pub struct DeliveryWorker {
    consumer: Arc<dyn GroupConsumer>,
    publisher: Arc<dyn EventPublisher>,
    dispatcher: Dispatcher,
    stats: Arc<PipelineStats>,
    processed: AtomicU64,
    failing_streak: AtomicU64,
}

impl DeliveryWorker {
    pub fn new(
        consumer: Arc<dyn GroupConsumer>,
        publisher: Arc<dyn EventPublisher>,
        dispatcher: Dispatcher,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            consumer,
            publisher,
            dispatcher,
            stats,
            processed: AtomicU64::new(0),
            failing_streak: AtomicU64::new(0),
        }
    }

    /// Deliver one record. Errors mean the outcome could not be recorded
    /// and the record must not be committed.
    pub async fn handle(&self, record: &Record) -> Result<(), BusError> {
        let message: ChannelMessage = match record.message.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(topic = %record.message.topic, offset = record.offset, error = %e, "malformed channel message");
                self.stats.record_malformed();
                let letter = DeadLetter::new(
                    record.message.topic.clone(),
                    record.message.payload_value(),
                    "malformed",
                    e.to_string(),
                    0,
                );
                return self.dead_letter(letter, record).await;
            }
        };

        let report = self.dispatcher.dispatch(std::slice::from_ref(&message)).await;
        for outcome in &report.outcomes {
            self.stats.record_notification(outcome.success);
            if outcome.success {
                self.failing_streak.store(0, Ordering::Relaxed);
            } else {
                self.failing_streak.fetch_add(1, Ordering::Relaxed);
            }
        }
        for letter in report.dead_letters() {
            self.dead_letter(letter.clone(), record).await?;
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn dead_letter(&self, letter: DeadLetter, record: &Record) -> Result<(), BusError> {
        let letter = letter.with_correlation(record.message.correlation_id);
        let message = Message::with_correlation(
            topics::DEADLETTER,
            record.message.key.clone(),
            &letter,
            record.message.correlation_id,
        )?;
        self.publisher.publish(message).await?;
        self.stats.record_dead_letter();
        Ok(())
    }

    async fn commit(&self, record: &Record) {
        match self.consumer.commit(record).await {
            Ok(()) => {}
            Err(e @ BusError::StaleGeneration { .. }) | Err(e @ BusError::NotAssigned { .. }) => {
                info!(error = %e, "commit after rebalance, record will be redelivered");
            }
            Err(e) => warn!(error = %e, "commit failed"),
        }
    }
}

#[async_trait]
impl Worker for DeliveryWorker {
    async fn start(&self) -> Result<(), BusError> {
        let channels: Vec<String> = self.dispatcher.channels().map(|c| c.to_string()).collect();
        info!(?channels, "delivery worker started");
        Ok(())
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        loop {
            let record = tokio::select! {
                received = self.consumer.recv() => received?,
                _ = shutdown.changed() => break,
            };
            match self.handle(&record).await {
                Ok(()) => self.commit(&record).await,
                Err(e) => warn!(topic = %record.message.topic, offset = record.offset, error = %e, "failed to record delivery outcome"),
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BusError> {
        let snapshot = self.stats.snapshot();
        info!(
            processed = self.processed(),
            sent = snapshot.notifications_sent,
            failed = snapshot.notifications_failed,
            dead_lettered = snapshot.dead_lettered,
            "delivery worker stopped"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "notify-worker"
    }

    fn status(&self) -> WorkerStatus {
        if self.failing_streak.load(Ordering::Relaxed) >= DEGRADED_AFTER {
            WorkerStatus::Degraded
        } else {
            WorkerStatus::Healthy
        }
    }

    fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use kurier_bus::InMemoryBus;
    use kurier_core::{Channel, RenderedContent, RetryPolicy};

    use crate::traits::{ChannelSender, NotifyError};

    struct FixedSender {
        channel: Channel,
        ok: bool,
    }

    #[async_trait]
    impl ChannelSender for FixedSender {
        async fn send(&self, _message: &ChannelMessage) -> Result<(), NotifyError> {
            if self.ok {
                Ok(())
            } else {
                Err(NotifyError::Rejected {
                    status: 422,
                    body: "nope".into(),
                })
            }
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn sms_message() -> ChannelMessage {
        ChannelMessage {
            channel: Channel::Sms,
            trigger_id: "t-1".into(),
            rendered_content: RenderedContent::Sms { text: "hi".into() },
            recipient_address: "+14155552671".into(),
        }
    }

    fn worker(bus: &InMemoryBus, sms_ok: bool) -> (DeliveryWorker, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let dispatcher = Dispatcher::new(RetryPolicy::no_retry(), Duration::from_secs(1)).with_sender(Arc::new(
            FixedSender {
                channel: Channel::Sms,
                ok: sms_ok,
            },
        ));
        let consumer = bus.subscribe(&[&topics::notify(Channel::Sms)], "notify");
        let worker = DeliveryWorker::new(Arc::new(consumer), Arc::new(bus.clone()), dispatcher, stats.clone());
        (worker, stats)
    }

    #[tokio::test]
    async fn delivered_message_is_counted() {
        let bus = InMemoryBus::new(2);
        let (worker, stats) = worker(&bus, true);
        let msg = Message::new(topics::notify(Channel::Sms), "USER_1", &sms_message()).unwrap();
        bus.publish(msg).await.unwrap();

        let record = worker.consumer.recv().await.unwrap();
        worker.handle(&record).await.unwrap();

        assert_eq!(stats.snapshot().notifications_sent, 1);
        assert_eq!(bus.topic_len(topics::DEADLETTER), 0);
        assert_eq!(worker.processed(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_dead_lettered_with_correlation() {
        let bus = InMemoryBus::new(2);
        let (worker, stats) = worker(&bus, false);
        let msg = Message::new(topics::notify(Channel::Sms), "USER_1", &sms_message()).unwrap();
        let correlation = msg.correlation_id;
        bus.publish(msg).await.unwrap();

        let record = worker.consumer.recv().await.unwrap();
        worker.handle(&record).await.unwrap();

        let letters = bus.messages(topics::DEADLETTER);
        assert_eq!(letters.len(), 1);
        let letter: DeadLetter = letters[0].decode().unwrap();
        assert_eq!(letter.error_type, "rejected");
        assert_eq!(letter.source_topic, "kurier.notify.sms");
        assert_eq!(letter.correlation_id, correlation);
        let snap = stats.snapshot();
        assert_eq!(snap.notifications_failed, 1);
        assert_eq!(snap.dead_lettered, 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_dead_lettered() {
        let bus = InMemoryBus::new(2);
        let (worker, stats) = worker(&bus, true);
        bus.publish(Message::from_raw(topics::notify(Channel::Sms), "k", b"{not json".to_vec()))
            .await
            .unwrap();

        let record = worker.consumer.recv().await.unwrap();
        worker.handle(&record).await.unwrap();

        let letter: DeadLetter = bus.messages(topics::DEADLETTER)[0].decode().unwrap();
        assert_eq!(letter.error_type, "malformed");
        assert_eq!(letter.original_payload, serde_json::json!("{not json"));
        assert_eq!(stats.snapshot().malformed, 1);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let bus = InMemoryBus::new(2);
        let (worker, stats) = worker(&bus, true);
        let worker = Arc::new(worker);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });

        let msg = Message::new(topics::notify(Channel::Sms), "USER_1", &sms_message()).unwrap();
        bus.publish(msg).await.unwrap();
        for _ in 0..100 {
            if stats.snapshot().notifications_sent == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stats.snapshot().notifications_sent, 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
