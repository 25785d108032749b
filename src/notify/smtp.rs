use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info, instrument};

use super::{Email, MailError, Mailer};
use crate::config::SmtpConfig;

/// SMTP transport. The sender mailbox is parsed per message so a bad
/// sender surfaces as a request failure instead of a startup crash.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    from_name: String,
}

impl SmtpMailer {
    #[instrument(name = "smtp_mailer_new", skip(config), fields(host = %config.host, port = %config.port, use_tls = %config.use_tls))]
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Config(format!("{e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        debug!("SMTP transport initialized");
        Ok(Self {
            transport: builder.build(),
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
        })
    }

    fn from_mailbox(&self) -> Result<Mailbox, MailError> {
        format!("{} <{}>", self.from_name, self.from_address)
            .parse()
            .map_err(|e| MailError::Config(format!("sender address: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(name = "smtp_send", skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| MailError::Address(format!("{e}")))?;

        let message = Message::builder()
            .from(self.from_mailbox()?)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.body_text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.body_html.clone()),
                    ),
            )
            .map_err(|e| MailError::Send(format!("failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(format!("{e}")))?;

        info!("email sent");
        Ok(())
    }
}
