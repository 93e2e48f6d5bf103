//! Delivers rendered channel messages.
//!
//! Every message goes through its channel's [`ChannelSender`] concurrently,
//! bounded by a per-attempt timeout and wrapped in the retry policy.
//! Individual channel failures don't block or retract other channels;
//! each failure ends in a dead-letter record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use kurier_bus::topics;
use kurier_core::config::{NotifyConfig, RetryConfig};
use kurier_core::{Channel, ChannelMessage, DeadLetter, NotificationTrigger, Retryable, RetryPolicy};

use crate::email::EmailSender;
use crate::gateway::HttpGatewaySender;
use crate::router::ChannelFailure;
use crate::traits::{ChannelSender, NotifyError};

/// Result of delivering (or failing to deliver) one channel message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub trigger_id: String,
    pub success: bool,
    /// Send attempts made; zero when the message never reached a sender.
    pub attempts: u32,
    pub error: Option<String>,
    pub error_type: Option<&'static str>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub dead_letter: Option<DeadLetter>,
}

impl ChannelOutcome {
    /// Outcome for a channel that failed during routing, before dispatch.
    pub fn rejected(failure: &ChannelFailure, trigger: &NotificationTrigger) -> Self {
        let payload = serde_json::to_value(trigger).unwrap_or(Value::Null);
        Self::failed(failure.channel, &failure.trigger_id, &failure.error, 0, 0, payload)
    }

    fn failed(
        channel: Channel,
        trigger_id: &str,
        error: &NotifyError,
        attempts: u32,
        duration_ms: u64,
        payload: Value,
    ) -> Self {
        let dead_letter = DeadLetter::new(
            topics::notify(channel),
            payload,
            error.error_type(),
            error.to_string(),
            attempts.saturating_sub(1),
        );
        Self {
            channel,
            trigger_id: trigger_id.to_string(),
            success: false,
            attempts,
            error: Some(error.to_string()),
            error_type: Some(error.error_type()),
            duration_ms,
            dead_letter: Some(dead_letter),
        }
    }
}

/// Per-channel outcomes for one dispatch call, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome(&self, channel: Channel) -> Option<&ChannelOutcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }

    pub fn dead_letters(&self) -> impl Iterator<Item = &DeadLetter> {
        self.outcomes.iter().filter_map(|o| o.dead_letter.as_ref())
    }
}

pub struct Dispatcher {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            senders: HashMap::new(),
            retry,
            timeout,
        }
    }

    /// Build a dispatcher with every sender the config describes.
    ///
    /// Channels without a configured sender stay unregistered; messages
    /// for them fail with a config error and are dead-lettered.
    pub fn from_config(notify: &NotifyConfig, retry: &RetryConfig) -> Result<Self, NotifyError> {
        let mut dispatcher = Self::new(RetryPolicy::from_config(retry), notify.channel_timeout());

        if let Some(smtp) = &notify.smtp {
            dispatcher.register(Arc::new(EmailSender::from_config(smtp)?));
        }
        let headers: HashMap<String, String> = notify.gateway_headers.clone().into_iter().collect();
        if let Some(url) = &notify.sms_gateway_url {
            dispatcher.register(Arc::new(HttpGatewaySender::new(Channel::Sms, url, headers.clone())?));
        }
        if let Some(url) = &notify.push_gateway_url {
            dispatcher.register(Arc::new(HttpGatewaySender::new(Channel::Push, url, headers)?));
        }

        for channel in Channel::ALL {
            if !dispatcher.senders.contains_key(&channel) {
                tracing::warn!(%channel, "no sender configured for channel");
            }
        }
        Ok(dispatcher)
    }

    /// Register the sender for its channel, replacing any previous one.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        tracing::info!(channel = %sender.channel(), sender = sender.name(), "channel sender registered");
        self.senders.insert(sender.channel(), sender);
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.senders.keys().copied()
    }

    /// Deliver every message concurrently and report per channel.
    pub async fn dispatch(&self, messages: &[ChannelMessage]) -> DispatchReport {
        let outcomes = join_all(messages.iter().map(|m| self.deliver(m))).await;
        DispatchReport { outcomes }
    }

    async fn deliver(&self, message: &ChannelMessage) -> ChannelOutcome {
        let payload = || serde_json::to_value(message).unwrap_or(Value::Null);

        let Some(sender) = self.senders.get(&message.channel) else {
            let error = NotifyError::Config(format!("no sender for channel {}", message.channel));
            tracing::warn!(trigger_id = %message.trigger_id, channel = %message.channel, "no sender registered");
            return ChannelOutcome::failed(message.channel, &message.trigger_id, &error, 0, 0, payload());
        };

        let start = Instant::now();
        let timeout = self.timeout;
        let result = self
            .retry
            .run(|attempt| {
                let sender = sender.clone();
                async move {
                    tracing::debug!(channel = %message.channel, attempt, "sending");
                    match tokio::time::timeout(timeout, sender.send(message)).await {
                        Ok(result) => result,
                        Err(_) => Err(NotifyError::Timeout(timeout)),
                    }
                }
            })
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(((), attempts)) => {
                tracing::info!(
                    trigger_id = %message.trigger_id,
                    channel = %message.channel,
                    attempts,
                    duration_ms,
                    "notification delivered"
                );
                ChannelOutcome {
                    channel: message.channel,
                    trigger_id: message.trigger_id.clone(),
                    success: true,
                    attempts,
                    error: None,
                    error_type: None,
                    duration_ms,
                    dead_letter: None,
                }
            }
            Err(failure) => {
                tracing::warn!(
                    trigger_id = %message.trigger_id,
                    channel = %message.channel,
                    attempts = failure.attempts,
                    exhausted = failure.exhausted,
                    error = %failure.error,
                    duration_ms,
                    "notification delivery failed"
                );
                ChannelOutcome::failed(
                    message.channel,
                    &message.trigger_id,
                    &failure.error,
                    failure.attempts,
                    duration_ms,
                    payload(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use kurier_core::RenderedContent;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        FailTransient,
        FailFatal,
        /// Fail transiently this many times, then succeed.
        Flaky(u32),
        Hang,
    }

    struct MockSender {
        channel: Channel,
        behaviour: Behaviour,
        calls: Arc<AtomicU32>,
    }

    impl MockSender {
        fn new(channel: Channel, behaviour: Behaviour) -> (Arc<dyn ChannelSender>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            let sender = Arc::new(Self {
                channel,
                behaviour,
                calls: calls.clone(),
            });
            (sender, calls)
        }
    }

    #[async_trait::async_trait]
    impl ChannelSender for MockSender {
        async fn send(&self, _message: &ChannelMessage) -> Result<(), NotifyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::FailTransient => Err(NotifyError::Unavailable("503".into())),
                Behaviour::FailFatal => Err(NotifyError::Rejected {
                    status: 400,
                    body: "bad".into(),
                }),
                Behaviour::Flaky(k) if n < k => Err(NotifyError::Unavailable("503".into())),
                Behaviour::Flaky(_) => Ok(()),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn message(channel: Channel) -> ChannelMessage {
        let rendered_content = match channel {
            Channel::Email => RenderedContent::Email {
                subject: "s".into(),
                body: "b".into(),
            },
            Channel::Sms => RenderedContent::Sms { text: "t".into() },
            Channel::Push => RenderedContent::Push {
                title: "t".into(),
                body: "b".into(),
                data: BTreeMap::new(),
            },
        };
        ChannelMessage {
            channel,
            trigger_id: "t-1".into(),
            rendered_content,
            recipient_address: "addr".into(),
        }
    }

    fn all_messages() -> Vec<ChannelMessage> {
        Channel::ALL.into_iter().map(message).collect()
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2), 2.0)
    }

    #[tokio::test]
    async fn email_failure_does_not_block_sms_and_push() {
        let (email, _) = MockSender::new(Channel::Email, Behaviour::FailTransient);
        let (sms, sms_calls) = MockSender::new(Channel::Sms, Behaviour::Succeed);
        let (push, push_calls) = MockSender::new(Channel::Push, Behaviour::Succeed);
        let dispatcher = Dispatcher::new(fast_retry(3), Duration::from_secs(1))
            .with_sender(email)
            .with_sender(sms)
            .with_sender(push);

        let report = dispatcher.dispatch(&all_messages()).await;

        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.outcome(Channel::Sms).unwrap().success);
        assert!(report.outcome(Channel::Push).unwrap().success);
        assert_eq!(sms_calls.load(Ordering::SeqCst), 1);
        assert_eq!(push_calls.load(Ordering::SeqCst), 1);

        let email = report.outcome(Channel::Email).unwrap();
        assert_eq!(email.attempts, 3);
        let dl = email.dead_letter.as_ref().unwrap();
        assert_eq!(dl.retry_count, 2);
        assert_eq!(dl.error_type, "unavailable");
        assert_eq!(dl.source_topic, "kurier.notify.email");
        assert_eq!(dl.original_payload["triggerId"], "t-1");
    }

    #[tokio::test]
    async fn fatal_error_skips_retries() {
        let (sms, calls) = MockSender::new(Channel::Sms, Behaviour::FailFatal);
        let dispatcher = Dispatcher::new(fast_retry(5), Duration::from_secs(1)).with_sender(sms);

        let report = dispatcher.dispatch(&[message(Channel::Sms)]).await;
        let outcome = report.outcome(Channel::Sms).unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.dead_letter.as_ref().unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn transient_failures_recover_within_budget() {
        let (push, calls) = MockSender::new(Channel::Push, Behaviour::Flaky(2));
        let dispatcher = Dispatcher::new(fast_retry(3), Duration::from_secs(1)).with_sender(push);

        let report = dispatcher.dispatch(&[message(Channel::Push)]).await;
        let outcome = report.outcome(Channel::Push).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.dead_letters().count(), 0);
    }

    #[tokio::test]
    async fn slow_sender_times_out() {
        let (email, _) = MockSender::new(Channel::Email, Behaviour::Hang);
        let (sms, _) = MockSender::new(Channel::Sms, Behaviour::Succeed);
        let dispatcher = Dispatcher::new(fast_retry(2), Duration::from_millis(20))
            .with_sender(email)
            .with_sender(sms);

        let started = Instant::now();
        let report = dispatcher
            .dispatch(&[message(Channel::Email), message(Channel::Sms)])
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        let email = report.outcome(Channel::Email).unwrap();
        assert_eq!(email.error_type, Some("timeout"));
        assert_eq!(email.attempts, 2);
        assert!(report.outcome(Channel::Sms).unwrap().success);
    }

    #[test]
    fn from_config_registers_configured_channels() {
        let notify = NotifyConfig {
            sms_gateway_url: Some("http://localhost:9/sms".into()),
            push_gateway_url: Some("http://localhost:9/push".into()),
            ..Default::default()
        };
        let dispatcher = Dispatcher::from_config(&notify, &RetryConfig::default()).unwrap();
        let mut channels: Vec<_> = dispatcher.channels().collect();
        channels.sort();
        assert_eq!(channels, vec![Channel::Sms, Channel::Push]);
    }

    #[tokio::test]
    async fn missing_sender_is_reported() {
        let dispatcher = Dispatcher::new(fast_retry(3), Duration::from_secs(1));
        let report = dispatcher.dispatch(&[message(Channel::Push)]).await;
        let outcome = report.outcome(Channel::Push).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.error_type, Some("config"));
    }
}
