use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::KNOWN_EVENT_TYPES;
use crate::notification::Channel;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_opt(key).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for the pipeline, parsed from `kurier.toml`.
///
/// Every section has defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KurierConfig {
    pub filter: FilterConfig,
    pub enrich: EnrichConfig,
    pub window: WindowConfig,
    pub notify: NotifyConfig,
    pub alerts: AlertConfig,
    pub retry: RetryConfig,
    pub bus: BusConfig,
    pub server: ServerConfig,
}

impl KurierConfig {
    /// Parse config from a TOML string, apply env overrides, then validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `KURIER_SECTION_KEY` overrides `section.key`. List values
    /// are comma separated.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_list("KURIER_FILTER_PROCESSABLE_TYPES") {
            self.filter.processable_types = v;
        }
        if let Some(v) = env_list("KURIER_FILTER_EXCLUDED_PREFIXES") {
            self.filter.excluded_prefixes = v;
        }
        if let Some(v) = env_parse("KURIER_FILTER_MAX_AGE_SECS") {
            self.filter.max_age_secs = v;
        }
        if let Some(v) = env_parse("KURIER_WINDOW_SIZE_SECS") {
            self.window.size_secs = v;
        }
        if let Some(v) = env_parse("KURIER_WINDOW_ADVANCE_SECS") {
            self.window.advance_secs = Some(v);
        }
        if let Some(v) = env_parse("KURIER_WINDOW_SESSION_GAP_SECS") {
            self.window.session_gap_secs = v;
        }
        if let Some(v) = env_parse("KURIER_WINDOW_RETENTION_SECS") {
            self.window.retention_secs = v;
        }
        if let Some(v) = env_list("KURIER_NOTIFY_VIP_MARKERS") {
            self.notify.vip_markers = v;
        }
        if let Some(v) = env_opt("KURIER_NOTIFY_SMS_GATEWAY_URL") {
            self.notify.sms_gateway_url = Some(v);
        }
        if let Some(v) = env_opt("KURIER_NOTIFY_PUSH_GATEWAY_URL") {
            self.notify.push_gateway_url = Some(v);
        }
        if let Some(v) = env_parse("KURIER_ALERTS_LOW_ACTIVITY_FLOOR") {
            self.alerts.low_activity_floor = v;
        }
        if let Some(v) = env_parse("KURIER_ALERTS_HIGH_VALUE_CEILING") {
            self.alerts.high_value_ceiling = v;
        }
        if let Some(v) = env_parse("KURIER_ALERTS_FAILURE_BURST_COUNT") {
            self.alerts.failure_burst_count = v;
        }
        if let Some(v) = env_parse("KURIER_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Some(v) = env_opt("KURIER_BUS_FRONTEND") {
            self.bus.frontend = v;
        }
        if let Some(v) = env_opt("KURIER_BUS_BACKEND") {
            self.bus.backend = v;
        }
        if let Some(v) = env_parse("KURIER_SERVER_PORT") {
            self.server.port = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.filter.processable_types.is_empty() {
            return invalid("filter.processable_types must not be empty".into());
        }
        if self.filter.max_age_secs == 0 {
            return invalid("filter.max_age_secs must be positive".into());
        }
        if self.window.size_secs == 0 {
            return invalid("window.size_secs must be positive".into());
        }
        if self.window.kind == WindowType::Hopping {
            match self.window.advance_secs {
                Some(advance) if advance > 0 && advance < self.window.size_secs => {}
                Some(advance) => {
                    return invalid(format!(
                        "window.advance_secs ({advance}) must be in (0, size_secs={})",
                        self.window.size_secs
                    ))
                }
                None => return invalid("hopping windows require window.advance_secs".into()),
            }
        }
        if self.window.kind == WindowType::Session && self.window.session_gap_secs == 0 {
            return invalid("window.session_gap_secs must be positive".into());
        }
        if self.notify.sms_max_length < 20 {
            return invalid(format!(
                "notify.sms_max_length ({}) is too small",
                self.notify.sms_max_length
            ));
        }
        if self.alerts.failure_burst_count == 0 {
            return invalid("alerts.failure_burst_count must be positive".into());
        }
        if self.alerts.failure_burst_window_secs == 0 {
            return invalid("alerts.failure_burst_window_secs must be positive".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be >= 1.0".into());
        }
        if self.bus.partitions == 0 {
            return invalid("bus.partitions must be positive".into());
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  filter:  types={}, max_age={}s", self.filter.processable_types.len(), self.filter.max_age_secs);
        tracing::info!("  window:  kind={:?}, size={}s, retention={}s", self.window.kind, self.window.size_secs, self.window.retention_secs);
        tracing::info!("  notify:  sms_max={}, timeout={}ms", self.notify.sms_max_length, self.notify.channel_timeout_ms);
        tracing::info!("  retry:   attempts={}, backoff={}ms", self.retry.max_attempts, self.retry.initial_backoff_ms);
        tracing::info!("  bus:     frontend={}, backend={}", self.bus.frontend, self.bus.backend);
        tracing::info!("  server:  {}:{}", self.server.host, self.server.port);
    }
}

// ── Filter ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub processable_types: Vec<String>,
    /// Source entity prefixes marking synthetic (test/internal) traffic.
    pub excluded_prefixes: Vec<String>,
    pub max_age_secs: u64,
    /// Attribute keys ignored by the completeness check.
    pub noise_keys: Vec<String>,
}

impl FilterConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            processable_types: KNOWN_EVENT_TYPES.iter().map(|s| s.to_string()).collect(),
            excluded_prefixes: vec!["TEST_".into(), "INTERNAL_".into()],
            max_age_secs: 24 * 60 * 60,
            noise_keys: vec!["_trace".into(), "_debug".into(), "_meta".into()],
        }
    }
}

// ── Enrichment ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// Ids longer than this classify as ENTERPRISE.
    pub long_id_threshold: usize,
    /// Attribute names probed, in order, for the event's numeric value.
    pub value_fields: Vec<String>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            long_id_threshold: 20,
            value_fields: vec!["amount".into(), "value".into(), "total".into(), "price".into()],
        }
    }
}

// ── Windowing ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[default]
    Tumbling,
    Hopping,
    Session,
}

/// Which event attribute becomes the aggregation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowKeyBy {
    #[default]
    EventType,
    SourceEntity,
    Segment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub kind: WindowType,
    pub size_secs: u64,
    /// Hop between window starts (hopping windows only).
    pub advance_secs: Option<u64>,
    pub session_gap_secs: u64,
    /// How far the watermark trails the newest event time.
    pub allowed_lateness_secs: u64,
    /// How long closed windows stay queryable before eviction.
    pub retention_secs: u64,
    pub eviction_interval_secs: u64,
    pub key_by: WindowKeyBy,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            kind: WindowType::Tumbling,
            size_secs: 300,
            advance_secs: None,
            session_gap_secs: 30 * 60,
            allowed_lateness_secs: 60,
            retention_secs: 24 * 60 * 60,
            eviction_interval_secs: 60,
            key_by: WindowKeyBy::EventType,
        }
    }
}

// ── Notifications ─────────────────────────────────────────────

/// Per-event-type template overrides. Missing entries use built-in text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelTemplates {
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub sms: Option<String>,
    pub push_title: Option<String>,
    pub push_body: Option<String>,
}

/// Addresses on file for one notification target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub device_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub tls: Option<bool>,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Event types that produce notification triggers.
    pub notify_event_types: Vec<String>,
    /// Target id prefixes that widen fan-out to every channel.
    pub vip_markers: Vec<String>,
    /// Default channels per event type.
    pub channel_defaults: BTreeMap<String, Vec<Channel>>,
    /// Channels for event types missing from `channel_defaults`.
    pub fallback_channels: Vec<Channel>,
    pub templates: BTreeMap<String, ChannelTemplates>,
    pub sms_max_length: usize,
    pub channel_timeout_ms: u64,
    /// Identities that must never be notified.
    pub blocked_targets: Vec<String>,
    /// Contact directory by target id. Addresses in the trigger payload
    /// take precedence.
    pub recipients: BTreeMap<String, Contact>,
    pub smtp: Option<SmtpConfig>,
    pub sms_gateway_url: Option<String>,
    pub push_gateway_url: Option<String>,
    /// Headers sent to both gateways. Values may reference `${ENV_VAR}`.
    pub gateway_headers: BTreeMap<String, String>,
}

impl NotifyConfig {
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        use Channel::*;
        let channel_defaults = BTreeMap::from([
            ("PASSWORD_RESET".to_string(), vec![Email]),
            ("SECURITY_ALERT".to_string(), vec![Email, Sms, Push]),
            ("PURCHASE".to_string(), vec![Email]),
            ("ORDER_SHIPPED".to_string(), vec![Email, Push]),
            ("PAYMENT_FAILED".to_string(), vec![Email, Sms]),
            ("ACCOUNT_CREATED".to_string(), vec![Email]),
        ]);
        Self {
            notify_event_types: channel_defaults.keys().cloned().collect(),
            vip_markers: vec!["VIP_".into(), "PREMIUM_".into()],
            channel_defaults,
            fallback_channels: vec![Email],
            templates: BTreeMap::new(),
            sms_max_length: 160,
            channel_timeout_ms: 5_000,
            blocked_targets: Vec::new(),
            recipients: BTreeMap::new(),
            smtp: None,
            sms_gateway_url: None,
            push_gateway_url: None,
            gateway_headers: BTreeMap::new(),
        }
    }
}

// ── Alerts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Closed windows with fewer events raise LOW_ACTIVITY.
    pub low_activity_floor: i64,
    /// Single events above this value raise HIGH_VALUE_EVENT.
    pub high_value_ceiling: f64,
    pub failure_burst_count: i64,
    pub failure_burst_window_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            low_activity_floor: 5,
            high_value_ceiling: 10_000.0,
            failure_burst_count: 5,
            failure_burst_window_secs: 300,
        }
    }
}

// ── Retry ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

// ── Bus ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Endpoint publishers connect to.
    pub frontend: String,
    /// Endpoint subscribers connect to.
    pub backend: String,
    pub partitions: u32,
    pub consumer_group: String,
    /// How many recently processed event ids are remembered for redelivery checks.
    pub dedup_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            frontend: "tcp://127.0.0.1:5560".into(),
            backend: "tcp://127.0.0.1:5561".into(),
            partitions: 6,
            consumer_group: "kurier-pipeline".into(),
            dedup_capacity: 10_000,
        }
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = KurierConfig::from_toml("").unwrap();
        assert_eq!(config.window.kind, WindowType::Tumbling);
        assert_eq!(config.window.size_secs, 300);
        assert_eq!(config.notify.sms_max_length, 160);
        assert_eq!(config.filter.excluded_prefixes, vec!["TEST_", "INTERNAL_"]);
        assert_eq!(
            config.notify.channel_defaults["PASSWORD_RESET"],
            vec![Channel::Email]
        );
    }

    #[test]
    fn parses_sections() {
        let config = KurierConfig::from_toml(
            r#"
[filter]
processable_types = ["PURCHASE", "LOGIN"]
max_age_secs = 300

[window]
kind = "hopping"
size_secs = 600
advance_secs = 60
key_by = "source_entity"

[notify.channel_defaults]
LOGIN = ["PUSH"]

[notify.templates.PURCHASE]
sms = "Thanks for buying {{ payload.item }}"

[alerts]
high_value_ceiling = 500.0
"#,
        )
        .unwrap();

        assert_eq!(config.filter.processable_types, vec!["PURCHASE", "LOGIN"]);
        assert_eq!(config.filter.max_age(), Duration::from_secs(300));
        assert_eq!(config.window.kind, WindowType::Hopping);
        assert_eq!(config.window.key_by, WindowKeyBy::SourceEntity);
        assert_eq!(config.notify.channel_defaults["LOGIN"], vec![Channel::Push]);
        assert_eq!(
            config.notify.templates["PURCHASE"].sms.as_deref(),
            Some("Thanks for buying {{ payload.item }}")
        );
        assert_eq!(config.alerts.high_value_ceiling, 500.0);
    }

    #[test]
    fn hopping_requires_advance_smaller_than_size() {
        let err = KurierConfig::from_toml(
            r#"
[window]
kind = "hopping"
size_secs = 60
advance_secs = 60
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("advance_secs"), "got: {err}");

        let err = KurierConfig::from_toml("[window]\nkind = \"hopping\"\n").unwrap_err();
        assert!(err.to_string().contains("advance_secs"), "got: {err}");
    }

    #[test]
    fn rejects_zero_retry_attempts() {
        let err = KurierConfig::from_toml("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = KurierConfig::from_toml("[window\nsize_secs = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9100").unwrap();
        let config = KurierConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = KurierConfig::from_file("/definitely/not/here/kurier.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
