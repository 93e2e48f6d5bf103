//! Channel selection and per-channel rendering.
//!
//! A trigger fans out into one [`ChannelMessage`] per selected channel.
//! Channels fail independently: a missing recipient or a broken template
//! on one channel is reported for that channel only.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::Value;
use tracing::debug;

use kurier_core::config::{Contact, NotifyConfig};
use kurier_core::{Channel, ChannelMessage, NotificationTrigger, RenderedContent};

use crate::templating::{TemplateContext, TemplateRenderer};
use crate::traits::NotifyError;
use crate::validate::{is_valid_device_token, is_valid_email, is_valid_phone};

const ELLIPSIS: &str = "...";

/// A channel that was selected but could not produce a message.
#[derive(Debug)]
pub struct ChannelFailure {
    pub channel: Channel,
    pub trigger_id: String,
    pub error: NotifyError,
}

#[derive(Debug, Default)]
pub struct RouteOutcome {
    pub messages: Vec<ChannelMessage>,
    pub failures: Vec<ChannelFailure>,
}

#[derive(Debug)]
pub struct FanoutRouter {
    channel_defaults: BTreeMap<String, Vec<Channel>>,
    fallback: Vec<Channel>,
    vip_markers: Vec<String>,
    blocked_targets: HashSet<String>,
    directory: BTreeMap<String, Contact>,
    sms_max_length: usize,
    renderer: TemplateRenderer,
}

impl FanoutRouter {
    /// Build a router, rejecting configured templates that do not parse.
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let renderer = TemplateRenderer::new(config.templates.clone());
        renderer.validate_all()?;
        Ok(Self {
            channel_defaults: config.channel_defaults.clone(),
            fallback: config.fallback_channels.clone(),
            vip_markers: config.vip_markers.clone(),
            blocked_targets: config.blocked_targets.iter().cloned().collect(),
            directory: config.recipients.clone(),
            sms_max_length: config.sms_max_length,
            renderer,
        })
    }

    /// Whether the target carries a VIP/PREMIUM marker, either as an id
    /// prefix or as its enriched segment.
    pub fn is_vip(&self, trigger: &NotificationTrigger) -> bool {
        let segment = trigger.payload.get("segment").and_then(Value::as_str);
        self.vip_markers.iter().any(|marker| {
            trigger.target_id.starts_with(marker.as_str())
                || segment.is_some_and(|s| s == marker.trim_end_matches('_'))
        })
    }

    /// Type defaults, widened to every channel for VIP targets. Never narrows.
    pub fn select_channels(&self, trigger: &NotificationTrigger) -> BTreeSet<Channel> {
        let mut channels: BTreeSet<Channel> = self
            .channel_defaults
            .get(&trigger.event_type)
            .unwrap_or(&self.fallback)
            .iter()
            .copied()
            .collect();
        if self.is_vip(trigger) {
            channels.extend(Channel::ALL);
        }
        channels
    }

    pub fn route(&self, trigger: &NotificationTrigger) -> RouteOutcome {
        let channels = self.select_channels(trigger);
        let mut outcome = RouteOutcome::default();

        if self.blocked_targets.contains(&trigger.target_id) {
            debug!(target_id = %trigger.target_id, "target blocked, skipping fan-out");
            outcome.failures = channels
                .into_iter()
                .map(|channel| ChannelFailure {
                    channel,
                    trigger_id: trigger.trigger_id.clone(),
                    error: NotifyError::BlockedTarget(trigger.target_id.clone()),
                })
                .collect();
            return outcome;
        }

        let ctx = TemplateContext::from_trigger(trigger);
        let contact = self.directory.get(&trigger.target_id);
        for channel in channels {
            let built = recipient(channel, trigger, contact).and_then(|address| {
                let content = self.render(channel, &ctx)?;
                Ok(ChannelMessage {
                    channel,
                    trigger_id: trigger.trigger_id.clone(),
                    rendered_content: content,
                    recipient_address: address,
                })
            });
            match built {
                Ok(message) => outcome.messages.push(message),
                Err(error) => outcome.failures.push(ChannelFailure {
                    channel,
                    trigger_id: trigger.trigger_id.clone(),
                    error,
                }),
            }
        }

        debug!(
            trigger_id = %trigger.trigger_id,
            messages = outcome.messages.len(),
            failures = outcome.failures.len(),
            "trigger routed"
        );
        outcome
    }

    fn render(&self, channel: Channel, ctx: &TemplateContext) -> Result<RenderedContent, NotifyError> {
        Ok(match channel {
            Channel::Email => {
                let (subject, body) = self.renderer.render_email(ctx)?;
                RenderedContent::Email { subject, body }
            }
            Channel::Sms => {
                let text = self.renderer.render_sms(ctx)?;
                RenderedContent::Sms {
                    text: truncate_at_word(&text, self.sms_max_length),
                }
            }
            Channel::Push => {
                let (title, body) = self.renderer.render_push(ctx)?;
                let data = BTreeMap::from([
                    ("event_type".to_string(), ctx.event_type.clone()),
                    ("trigger_id".to_string(), ctx.trigger_id.clone()),
                    ("priority".to_string(), format!("{:?}", ctx.priority).to_uppercase()),
                ]);
                RenderedContent::Push { title, body, data }
            }
        })
    }
}

/// Resolve and validate the channel address, from the trigger payload or
/// else the target's directory entry.
fn recipient(
    channel: Channel,
    trigger: &NotificationTrigger,
    contact: Option<&Contact>,
) -> Result<String, NotifyError> {
    let (keys, valid): (&[&str], fn(&str) -> bool) = match channel {
        Channel::Email => (&["email"][..], is_valid_email as fn(&str) -> bool),
        Channel::Sms => (&["phone", "phone_number"][..], is_valid_phone),
        Channel::Push => (&["device_token"][..], is_valid_device_token),
    };
    let invalid = |reason: String| NotifyError::InvalidRecipient { channel, reason };

    let on_file = contact.and_then(|c| match channel {
        Channel::Email => c.email.as_deref(),
        Channel::Sms => c.phone.as_deref(),
        Channel::Push => c.device_token.as_deref(),
    });
    let address = keys
        .iter()
        .find_map(|k| trigger.payload.get(*k).and_then(Value::as_str))
        .or(on_file)
        .map(str::trim)
        .ok_or_else(|| invalid(format!("no {} for {}", keys[0], trigger.target_id)))?;

    if !valid(address) {
        return Err(invalid(format!("'{address}' is not a valid {}", keys[0])));
    }
    Ok(address.to_string())
}

/// Bound `text` to `max` characters, cutting at the last word boundary and
/// marking the cut with an ellipsis.
pub fn truncate_at_word(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= ELLIPSIS.len() {
        return text.chars().take(max).collect();
    }

    let budget = max - ELLIPSIS.len();
    let head: String = text.chars().take(budget + 1).collect();
    // If the character right after the budget is whitespace, the whole
    // budget is made of complete words.
    let cut = match head.char_indices().nth(budget) {
        Some((idx, c)) if c.is_whitespace() => idx,
        _ => head
            .char_indices()
            .take(budget)
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .last()
            .unwrap_or_else(|| head.char_indices().nth(budget).map(|(i, _)| i).unwrap_or(head.len())),
    };

    let mut out = head[..cut].trim_end().to_string();
    if out.is_empty() {
        out = text.chars().take(budget).collect();
    }
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurier_core::{Attributes, Priority};
    use serde_json::json;

    fn trigger(event_type: &str, target: &str, payload: serde_json::Value) -> NotificationTrigger {
        let payload: Attributes = serde_json::from_value(payload).unwrap();
        NotificationTrigger {
            trigger_id: "t-1".into(),
            event_type: event_type.into(),
            target_id: target.into(),
            payload,
            priority: Priority::Normal,
            timestamp: 1_700_000_000_000,
        }
    }

    fn router() -> FanoutRouter {
        FanoutRouter::from_config(&NotifyConfig::default()).unwrap()
    }

    fn full_contact() -> serde_json::Value {
        json!({
            "email": "ada@example.com",
            "phone": "+14155552671",
            "device_token": "a1b2c3d4e5f6g7h8i9"
        })
    }

    #[test]
    fn password_reset_for_regular_user_is_email_only() {
        let channels = router().select_channels(&trigger("PASSWORD_RESET", "USER_1", json!({})));
        assert_eq!(channels, BTreeSet::from([Channel::Email]));
    }

    #[test]
    fn type_defaults() {
        let r = router();
        let sel = |t: &str| r.select_channels(&trigger(t, "USER_1", json!({})));
        assert_eq!(sel("SECURITY_ALERT"), BTreeSet::from(Channel::ALL));
        assert_eq!(sel("ORDER_SHIPPED"), BTreeSet::from([Channel::Email, Channel::Push]));
        assert_eq!(sel("PAYMENT_FAILED"), BTreeSet::from([Channel::Email, Channel::Sms]));
        assert_eq!(sel("PAGE_VIEW"), BTreeSet::from([Channel::Email]));
    }

    #[test]
    fn vip_widens_to_all_channels() {
        let r = router();
        assert_eq!(
            r.select_channels(&trigger("PURCHASE", "VIP_cust_1", json!({}))),
            BTreeSet::from(Channel::ALL)
        );
        assert_eq!(
            r.select_channels(&trigger("PURCHASE", "cust_9", json!({"segment": "PREMIUM"}))),
            BTreeSet::from(Channel::ALL)
        );
    }

    #[test]
    fn route_renders_each_channel() {
        let outcome = router().route(&trigger("SECURITY_ALERT", "USER_1", full_contact()));
        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
        assert_eq!(outcome.messages.len(), 3);

        let push = outcome
            .messages
            .iter()
            .find(|m| m.channel == Channel::Push)
            .unwrap();
        assert_eq!(push.recipient_address, "a1b2c3d4e5f6g7h8i9");
        match &push.rendered_content {
            RenderedContent::Push { data, .. } => {
                assert_eq!(data["event_type"], "SECURITY_ALERT");
                assert_eq!(data["trigger_id"], "t-1");
            }
            other => panic!("expected push content, got {other:?}"),
        }
    }

    #[test]
    fn missing_recipient_fails_only_that_channel() {
        let outcome = router().route(&trigger(
            "SECURITY_ALERT",
            "USER_1",
            json!({"email": "ada@example.com", "phone": "12"}),
        ));
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].channel, Channel::Email);
        let failed: BTreeSet<_> = outcome.failures.iter().map(|f| f.channel).collect();
        assert_eq!(failed, BTreeSet::from([Channel::Sms, Channel::Push]));
        assert!(outcome
            .failures
            .iter()
            .all(|f| matches!(f.error, NotifyError::InvalidRecipient { .. })));
    }

    #[test]
    fn blocked_target_fails_every_channel() {
        let config = NotifyConfig {
            blocked_targets: vec!["USER_BAD".into()],
            ..Default::default()
        };
        let r = FanoutRouter::from_config(&config).unwrap();
        let outcome = r.route(&trigger("PAYMENT_FAILED", "USER_BAD", full_contact()));
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.failures.len(), 2);
    }

    #[test]
    fn directory_supplies_missing_addresses() {
        let config = NotifyConfig {
            recipients: BTreeMap::from([(
                "VIP_cust_1".to_string(),
                Contact {
                    email: Some("vip@example.com".into()),
                    phone: Some("+14155552671".into()),
                    device_token: Some("a1b2c3d4e5f6g7h8i9".into()),
                },
            )]),
            ..Default::default()
        };
        let r = FanoutRouter::from_config(&config).unwrap();

        let outcome = r.route(&trigger("PURCHASE", "VIP_cust_1", json!({"amount": 99.99})));
        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
        assert_eq!(outcome.messages.len(), 3);

        // The payload wins over the directory.
        let outcome = r.route(&trigger(
            "PASSWORD_RESET",
            "VIP_cust_1",
            json!({"email": "other@example.com"}),
        ));
        let email = outcome.messages.iter().find(|m| m.channel == Channel::Email).unwrap();
        assert_eq!(email.recipient_address, "other@example.com");
    }

    #[test]
    fn sms_is_bounded() {
        let long = "word ".repeat(60);
        let outcome = router().route(&trigger(
            "PAYMENT_FAILED",
            "USER_1",
            json!({"phone": "415-555-2671", "message": long}),
        ));
        let sms = outcome
            .messages
            .iter()
            .find(|m| m.channel == Channel::Sms)
            .unwrap();
        match &sms.rendered_content {
            RenderedContent::Sms { text } => {
                assert!(text.chars().count() <= 160);
                assert!(text.ends_with("word..."), "got: {text}");
            }
            other => panic!("expected sms, got {other:?}"),
        }
    }

    #[test]
    fn truncation_cuts_at_word_boundary() {
        assert_eq!(truncate_at_word("short text", 160), "short text");
        assert_eq!(truncate_at_word("hello brave new world", 15), "hello brave...");
        // Exactly at a boundary keeps the full word.
        assert_eq!(truncate_at_word("abcd efgh ijkl", 12), "abcd efgh...");
        // No whitespace: hard cut.
        assert_eq!(truncate_at_word("abcdefghijklmnop", 10), "abcdefg...");
        assert_eq!(truncate_at_word("abcdef", 2), "ab");
    }
}
