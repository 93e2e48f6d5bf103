//! Minijinja rendering for per-channel notification content.
//!
//! Templates are looked up by event type: a configured override wins,
//! otherwise a built-in template is used. Templates are arbitrary strings,
//! so a fresh [`minijinja::Environment`] is created per render call.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use kurier_core::config::ChannelTemplates;
use kurier_core::{Attributes, NotificationTrigger, Priority};

use crate::traits::NotifyError;

/// Data available to every template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub trigger_id: String,
    pub event_type: String,
    pub target_id: String,
    pub priority: Priority,
    pub payload: Attributes,
    /// Trigger time in epoch milliseconds.
    pub timestamp: i64,
    /// Trigger time as RFC 3339.
    pub time: String,
}

impl TemplateContext {
    pub fn from_trigger(trigger: &NotificationTrigger) -> Self {
        let time = Utc
            .timestamp_millis_opt(trigger.timestamp)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        Self {
            trigger_id: trigger.trigger_id.clone(),
            event_type: trigger.event_type.clone(),
            target_id: trigger.target_id.clone(),
            priority: trigger.priority,
            payload: trigger.payload.clone(),
            timestamp: trigger.timestamp,
            time,
        }
    }
}

// ── Built-in templates ────────────────────────────────────────

const GENERIC_SUBJECT: &str = "{{ event_type | humanize }} update";

const DEFAULT_EMAIL_BODY: &str = "Hello {{ payload.name or target_id }},\n\n\
{{ event_type | humanize }} on {{ time }}.\n\
{% if payload.amount is defined %}Amount: {{ payload.amount }}\n{% endif %}\
Reference: {{ trigger_id }}\n";

const DEFAULT_SMS: &str = "{{ event_type | humanize }} for {{ target_id }}\
{% if payload.amount is defined %} ({{ payload.amount }}){% endif %}\
{% if payload.message %}: {{ payload.message }}{% endif %}";

const DEFAULT_PUSH_BODY: &str = "{{ payload.message or event_type | humanize }}";

/// Built-in subject/title for well-known event types.
fn builtin_subject(event_type: &str) -> &'static str {
    match event_type {
        "PASSWORD_RESET" => "Reset your password",
        "SECURITY_ALERT" => "Security alert on your account",
        "PURCHASE" => "Thanks for your purchase",
        "ORDER_SHIPPED" => "Your order is on its way",
        "PAYMENT_FAILED" => "We could not process your payment",
        "ACCOUNT_CREATED" => "Welcome aboard",
        _ => GENERIC_SUBJECT,
    }
}

// ── Renderer ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TemplateRenderer {
    overrides: BTreeMap<String, ChannelTemplates>,
}

impl TemplateRenderer {
    /// `overrides` maps event type to its configured templates.
    pub fn new(overrides: BTreeMap<String, ChannelTemplates>) -> Self {
        Self { overrides }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_filter("humanize", humanize_filter);
        env
    }

    /// Render a template string with the given context.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        Self::build_env()
            .render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Check template syntax without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }

    /// Check every configured override. Run once at startup.
    pub fn validate_all(&self) -> Result<(), NotifyError> {
        for (event_type, t) in &self.overrides {
            for tpl in [&t.email_subject, &t.email_body, &t.sms, &t.push_title, &t.push_body]
                .into_iter()
                .flatten()
            {
                self.validate(tpl).map_err(|e| {
                    NotifyError::Config(format!("template for {event_type}: {e}"))
                })?;
            }
        }
        Ok(())
    }

    fn pick<'a>(
        &'a self,
        event_type: &str,
        field: impl Fn(&'a ChannelTemplates) -> &'a Option<String>,
        fallback: &'a str,
    ) -> &'a str {
        self.overrides
            .get(event_type)
            .and_then(|t| field(t).as_deref())
            .unwrap_or(fallback)
    }

    /// Subject and body for EMAIL.
    pub fn render_email(&self, ctx: &TemplateContext) -> Result<(String, String), NotifyError> {
        let et = ctx.event_type.as_str();
        let subject = self.pick(et, |t| &t.email_subject, builtin_subject(et));
        let body = self.pick(et, |t| &t.email_body, DEFAULT_EMAIL_BODY);
        Ok((self.render(subject, ctx)?, self.render(body, ctx)?))
    }

    /// Untruncated SMS text.
    pub fn render_sms(&self, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let tpl = self.pick(&ctx.event_type, |t| &t.sms, DEFAULT_SMS);
        self.render(tpl, ctx)
    }

    /// Title and body for PUSH.
    pub fn render_push(&self, ctx: &TemplateContext) -> Result<(String, String), NotifyError> {
        let et = ctx.event_type.as_str();
        let title = self.pick(et, |t| &t.push_title, builtin_subject(et));
        let body = self.pick(et, |t| &t.push_body, DEFAULT_PUSH_BODY);
        Ok((self.render(title, ctx)?, self.render(body, ctx)?))
    }
}

/// Round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// `ORDER_SHIPPED` -> `Order shipped`.
fn humanize_filter(value: String) -> String {
    let spaced = value.replace('_', " ").to_lowercase();
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(event_type: &str, payload: serde_json::Value) -> TemplateContext {
        let payload: Attributes = serde_json::from_value(payload).unwrap();
        TemplateContext {
            trigger_id: "t-1".into(),
            event_type: event_type.into(),
            target_id: "USER_1".into(),
            priority: Priority::Normal,
            payload,
            timestamp: 0,
            time: "1970-01-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn builtin_email_uses_type_subject() {
        let renderer = TemplateRenderer::default();
        let (subject, body) = renderer
            .render_email(&ctx("PASSWORD_RESET", json!({"name": "Ada"})))
            .unwrap();
        assert_eq!(subject, "Reset your password");
        assert!(body.starts_with("Hello Ada,"), "got: {body}");
        assert!(body.contains("Reference: t-1"));
    }

    #[test]
    fn generic_subject_is_humanized() {
        let renderer = TemplateRenderer::default();
        let (subject, _) = renderer.render_email(&ctx("ORDER_PLACED", json!({}))).unwrap();
        assert_eq!(subject, "Order placed update");
    }

    #[test]
    fn builtin_sms_includes_amount() {
        let renderer = TemplateRenderer::default();
        let text = renderer
            .render_sms(&ctx("PURCHASE", json!({"amount": 99.99})))
            .unwrap();
        assert_eq!(text, "Purchase for USER_1 (99.99)");
    }

    #[test]
    fn push_body_prefers_message() {
        let renderer = TemplateRenderer::default();
        let (title, body) = renderer
            .render_push(&ctx("ORDER_SHIPPED", json!({"message": "Arrives Tuesday"})))
            .unwrap();
        assert_eq!(title, "Your order is on its way");
        assert_eq!(body, "Arrives Tuesday");

        let (_, body) = renderer.render_push(&ctx("ORDER_SHIPPED", json!({}))).unwrap();
        assert_eq!(body, "Order shipped");
    }

    #[test]
    fn override_wins_per_field() {
        let overrides = BTreeMap::from([(
            "PURCHASE".to_string(),
            ChannelTemplates {
                sms: Some("Paid {{ payload.amount | round(1) }} {{ payload.currency | upper }}".into()),
                ..Default::default()
            },
        )]);
        let renderer = TemplateRenderer::new(overrides);
        let c = ctx("PURCHASE", json!({"amount": 12.345, "currency": "eur"}));

        assert_eq!(renderer.render_sms(&c).unwrap(), "Paid 12.3 EUR");
        // Fields without an override keep the built-in.
        assert_eq!(renderer.render_email(&c).unwrap().0, "Thanks for your purchase");
    }

    #[test]
    fn invalid_override_fails_validation() {
        let overrides = BTreeMap::from([(
            "LOGIN".to_string(),
            ChannelTemplates {
                push_body: Some("{{ unclosed".into()),
                ..Default::default()
            },
        )]);
        let err = TemplateRenderer::new(overrides).validate_all().unwrap_err();
        assert!(err.to_string().contains("LOGIN"), "got: {err}");
    }

    #[test]
    fn render_error_is_template_error() {
        let renderer = TemplateRenderer::default();
        let result = renderer.render("{{ unclosed", &ctx("LOGIN", json!({})));
        assert!(matches!(result, Err(NotifyError::Template(_))));
    }

    #[test]
    fn humanize() {
        assert_eq!(humanize_filter("SECURITY_ALERT".into()), "Security alert");
        assert_eq!(humanize_filter(String::new()), "");
    }
}
