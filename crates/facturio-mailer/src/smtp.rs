//! Async SMTP sending via lettre (STARTTLS relay).

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use facturio_core::config::SmtpConfig;
use facturio_core::error::{FacturioError, Result};
use facturio_core::repo::{MailTransport, OutboundEmail};

/// SMTP implementation of the mail transport boundary. The relay is
/// built once; lettre pools connections underneath.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        if config.from_email.is_empty() {
            return Err(FacturioError::Config("smtp.from_email is not set".into()));
        }
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| FacturioError::Config(format!("invalid from address: {e}")))?;

        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| FacturioError::Transport(format!("SMTP relay: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { from, transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &OutboundEmail) -> Result<String> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&message.subject);
        for recipient in &message.to {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| FacturioError::Validation(format!("invalid recipient: {e}")))?;
            builder = builder.to(to);
        }

        let text = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone());
        let email = match &message.attachment {
            Some(att) => {
                let content_type = ContentType::parse(&att.content_type).map_err(|e| {
                    FacturioError::Render(format!("bad attachment content type: {e}"))
                })?;
                let part =
                    Attachment::new(att.filename.clone()).body(att.bytes.clone(), content_type);
                builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))
            }
            None => builder.singlepart(text),
        }
        .map_err(|e| FacturioError::Transport(format!("build email: {e}")))?;

        let response = self
            .transport
            .send(email)
            .await
            .map_err(|e| FacturioError::Transport(format!("SMTP send: {e}")))?;

        let delivery_id = response.message().collect::<Vec<&str>>().join(" ");
        tracing::info!("📤 Email sent to {}", message.to.join(", "));
        Ok(delivery_id)
    }
}
