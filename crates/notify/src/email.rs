//! SMTP email sender via `lettre`.
//!
//! One transport per process, recipients come from each
//! [`ChannelMessage`]. SMTP credentials are read from `SMTP_USERNAME` and
//! `SMTP_PASSWORD` when both are set.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use kurier_core::config::SmtpConfig;
use kurier_core::{Channel, ChannelMessage, RenderedContent};

use crate::traits::{ChannelSender, NotifyError};

#[derive(Debug)]
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    /// Port defaults to 587. Port 465 and `tls != Some(false)` both use a
    /// TLS relay; `tls = Some(false)` on any other port is plaintext.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let port = config.port.unwrap_or(587);
        let use_tls = port == 465 || config.tls.unwrap_or(true);

        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else if use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(port)
        };

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, message: &ChannelMessage) -> Result<Message, NotifyError> {
        let RenderedContent::Email { subject, body } = &message.rendered_content else {
            return Err(NotifyError::Config(format!(
                "email sender got {} content",
                message.rendered_content.kind()
            )));
        };

        let to: Mailbox = message.recipient_address.parse().map_err(
            |e: lettre::address::AddressError| NotifyError::InvalidRecipient {
                channel: Channel::Email,
                reason: e.to_string(),
            },
        )?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.clone())
            .map_err(|e| NotifyError::Smtp {
                message: e.to_string(),
                permanent: true,
            })
    }
}

#[async_trait::async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, message: &ChannelMessage) -> Result<(), NotifyError> {
        let email = self.build_message(message)?;

        self.transport.send(email).await.map_err(|e| NotifyError::Smtp {
            permanent: e.is_permanent(),
            message: e.to_string(),
        })?;

        tracing::debug!(trigger_id = %message.trigger_id, "email accepted by relay");
        Ok(())
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp(from: &str, port: Option<u16>, tls: Option<bool>) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port,
            tls,
            from: from.into(),
        }
    }

    fn email_message(to: &str) -> ChannelMessage {
        ChannelMessage {
            channel: Channel::Email,
            trigger_id: "t-1".into(),
            rendered_content: RenderedContent::Email {
                subject: "Reset your password".into(),
                body: "Hello".into(),
            },
            recipient_address: to.into(),
        }
    }

    #[test]
    fn from_config_variants() {
        assert!(EmailSender::from_config(&smtp("alerts@example.com", Some(587), Some(true))).is_ok());
        assert!(EmailSender::from_config(&smtp("Alerts <alerts@example.com>", Some(465), None)).is_ok());
        assert!(EmailSender::from_config(&smtp("alerts@example.com", Some(25), Some(false))).is_ok());
    }

    #[test]
    fn invalid_from_is_config_error() {
        let err = EmailSender::from_config(&smtp("bad-address", None, None)).unwrap_err();
        assert!(err.to_string().contains("Configuration error"), "got: {err}");
    }

    #[tokio::test]
    async fn builds_message_for_recipient() {
        let sender = EmailSender::from_config(&smtp("alerts@example.com", None, None)).unwrap();
        let built = sender.build_message(&email_message("ada@example.com")).unwrap();
        let headers = String::from_utf8(built.formatted()).unwrap();
        assert!(headers.contains("To: ada@example.com"), "got: {headers}");
        assert!(headers.contains("Subject: Reset your password"));
    }

    #[tokio::test]
    async fn bad_recipient_is_invalid_recipient() {
        let sender = EmailSender::from_config(&smtp("alerts@example.com", None, None)).unwrap();
        let err = sender.build_message(&email_message("nope")).unwrap_err();
        assert!(matches!(err, NotifyError::InvalidRecipient { channel: Channel::Email, .. }));
    }

    #[tokio::test]
    async fn wrong_content_kind_is_rejected() {
        let sender = EmailSender::from_config(&smtp("alerts@example.com", None, None)).unwrap();
        let mut msg = email_message("ada@example.com");
        msg.rendered_content = RenderedContent::Sms { text: "hi".into() };
        assert!(matches!(sender.build_message(&msg), Err(NotifyError::Config(_))));
    }
}
