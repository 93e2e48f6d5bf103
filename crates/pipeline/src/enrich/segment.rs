use std::fmt;

use serde::{Deserialize, Serialize};

/// Customer segment derived from a source entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Segment {
    Vip,
    Premium,
    Corporate,
    Gold,
    Silver,
    Enterprise,
    HighValue,
    Standard,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Vip => "VIP",
            Segment::Premium => "PREMIUM",
            Segment::Corporate => "CORPORATE",
            Segment::Gold => "GOLD",
            Segment::Silver => "SILVER",
            Segment::Enterprise => "ENTERPRISE",
            Segment::HighValue => "HIGH_VALUE",
            Segment::Standard => "STANDARD",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MIN_DIGIT_RUN: usize = 4;

/// Classify an id. The first matching rule wins; matching is case-sensitive.
pub fn calculate_segment(source_entity_id: &str, long_id_threshold: usize) -> Segment {
    let id = source_entity_id;
    if id.starts_with("VIP_") {
        Segment::Vip
    } else if id.starts_with("PREMIUM_") {
        Segment::Premium
    } else if id.contains("CORP") {
        Segment::Corporate
    } else if id.contains("GOLD") {
        Segment::Gold
    } else if id.contains("SILVER") {
        Segment::Silver
    } else if id.chars().count() > long_id_threshold {
        Segment::Enterprise
    } else if has_digit_run(id, MIN_DIGIT_RUN) {
        Segment::HighValue
    } else {
        Segment::Standard
    }
}

fn has_digit_run(s: &str, min: usize) -> bool {
    let mut run = 0;
    for c in s.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= min {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
