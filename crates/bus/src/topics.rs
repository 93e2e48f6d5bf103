//! Topic names.
//!
//! Topics follow the pattern `kurier.<domain>.<event>` so a single SUB
//! prefix (`kurier.`) can observe the whole pipeline.

use kurier_core::Channel;

pub const PREFIX: &str = "kurier.";

// ── Event flow ────────────────────────────────────────────────

/// Raw events from external producers.
pub const EVENTS_RAW: &str = "kurier.events.raw";

pub const EVENTS_ENRICHED: &str = "kurier.events.enriched";

/// Validation failures, with their violations.
pub const EVENTS_REJECTED: &str = "kurier.events.rejected";

/// Filter rejections, with their reason.
pub const EVENTS_FILTERED: &str = "kurier.events.filtered";

// ── Outputs ───────────────────────────────────────────────────

pub const ALERTS: &str = "kurier.alerts";

/// Closed aggregate windows.
pub const METRICS_WINDOWS: &str = "kurier.metrics.windows";

pub const DEADLETTER: &str = "kurier.deadletter";

pub const WORKER_HEALTH: &str = "kurier.worker.health";

/// Per-segment stream of enriched events, e.g. `kurier.segment.vip`.
pub fn segment(segment: &str) -> String {
    format!("kurier.segment.{}", segment.to_ascii_lowercase())
}

/// Prefix shared by every per-channel delivery stream.
pub const NOTIFY_PREFIX: &str = "kurier.notify.";

/// Per-channel delivery stream, e.g. `kurier.notify.sms`.
pub fn notify(channel: Channel) -> String {
    format!("{NOTIFY_PREFIX}{}", channel.as_str().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_topics_share_prefix() {
        assert_eq!(segment("HIGH_VALUE"), "kurier.segment.high_value");
        assert_eq!(notify(Channel::Push), "kurier.notify.push");
        assert!(segment("VIP").starts_with(PREFIX));
        assert!(EVENTS_RAW.starts_with(PREFIX));
        assert!(notify(Channel::Email).starts_with(NOTIFY_PREFIX));
    }
}
