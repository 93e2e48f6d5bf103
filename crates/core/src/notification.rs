use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::Push => "PUSH",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMAIL" => Ok(Channel::Email),
            "SMS" => Ok(Channel::Sms),
            "PUSH" => Ok(Channel::Push),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

/// A request to notify one target, before channel selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTrigger {
    pub trigger_id: String,
    pub event_type: String,
    pub target_id: String,
    pub payload: Attributes,
    pub priority: Priority,
    pub timestamp: i64,
}

/// Channel-specific rendered content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderedContent {
    Email {
        subject: String,
        body: String,
    },
    Sms {
        text: String,
    },
    Push {
        title: String,
        body: String,
        data: BTreeMap<String, String>,
    },
}

impl RenderedContent {
    /// The serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderedContent::Email { .. } => "email",
            RenderedContent::Sms { .. } => "sms",
            RenderedContent::Push { .. } => "push",
        }
    }
}

/// One logical delivery produced by fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub channel: Channel,
    pub trigger_id: String,
    pub rendered_content: RenderedContent,
    pub recipient_address: String,
}
