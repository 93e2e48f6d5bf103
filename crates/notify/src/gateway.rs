//! HTTP gateway sender for SMS and PUSH.
//!
//! Posts each [`ChannelMessage`] as JSON to a provider gateway. URL and
//! header values may reference environment variables as `${VAR_NAME}`;
//! they are resolved at construction time.

use std::collections::HashMap;

use serde::Serialize;

use kurier_core::{Channel, ChannelMessage, RenderedContent};

use crate::traits::{ChannelSender, NotifyError};

const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequest<'a> {
    to: &'a str,
    trigger_id: &'a str,
    channel: Channel,
    content: &'a RenderedContent,
}

#[derive(Debug)]
pub struct HttpGatewaySender {
    channel: Channel,
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpGatewaySender {
    pub fn new(
        channel: Channel,
        url: &str,
        headers: HashMap<String, String>,
    ) -> Result<Self, NotifyError> {
        let url = resolve_env_vars(url)?;
        let mut resolved = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved.insert(key.clone(), resolve_env_vars(value)?);
        }

        Ok(Self {
            channel,
            name: format!("{}-gateway", channel.as_str().to_lowercase()),
            url,
            headers: resolved,
            client: reqwest::Client::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ChannelSender for HttpGatewaySender {
    async fn send(&self, message: &ChannelMessage) -> Result<(), NotifyError> {
        let body = GatewayRequest {
            to: &message.recipient_address,
            trigger_id: &message.trigger_id,
            channel: message.channel,
            content: &message.rendered_content,
        };

        let mut request = self.client.post(&self.url).json(&body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(url = %self.url, %status, trigger_id = %message.trigger_id, "gateway accepted message");
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(NotifyError::RateLimited { retry_after_secs });
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        tracing::warn!(url = %self.url, %status, body = %body_text, "gateway returned non-2xx status");

        if status.is_server_error() {
            Err(NotifyError::Unavailable(format!("{status}: {body_text}")))
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: body_text,
            })
        }
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resolve `${VAR_NAME}` references using the process environment.
fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(NotifyError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name)
                .map_err(|_| NotifyError::Config(format!("env var not found: {var_name}")))?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
