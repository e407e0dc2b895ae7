use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Transport(String),
}

/// Outbound email. A trait so tests can substitute a recording mailer.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        smtp_username: &str,
        smtp_password: &str,
        from_address: &str,
    ) -> Result<Self, MailError> {
        let creds = Credentials::new(smtp_username.to_string(), smtp_password.to_string());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from_address: from_address.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|e| MailError::Address(format!("{:?}", e)))?,
            )
            .to(to.parse().map_err(|e| MailError::Address(format!("{:?}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map(|_resp| ())
            .map_err(|e| MailError::Transport(e.to_string()))
    }
}

/// Development fallback when no SMTP host is configured: the message is
/// logged instead of sent, so verification links stay reachable.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        tracing::info!(to, subject, body = html_body, "SMTP not configured, logging email");
        Ok(())
    }
}

/// Build the configured mailer: SMTP when a host is set, LogMailer otherwise.
pub fn from_config(config: &MailConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match &config.smtp_host {
        Some(host) => Ok(Arc::new(SmtpMailer::new(
            host,
            config.smtp_port,
            &config.smtp_username,
            &config.smtp_password,
            &config.from_address,
        )?)),
        None => Ok(Arc::new(LogMailer)),
    }
}

pub fn verification_url(base_url: &str, token: &str) -> String {
    format!("{}/verify-email?token={}", base_url.trim_end_matches('/'), token)
}

fn verification_body(url: &str) -> String {
    format!(
        "<p>Welcome to Commons!</p>\
         <p>Click the link below to verify your email address and finish \
         creating your account:</p>\
         <p><a href=\"{url}\">{url}</a></p>\
         <p>If you did not register, you can ignore this email.</p>"
    )
}

/// Send the verification email on a background task so SMTP latency never
/// blocks the HTTP response. Failures are logged with the recipient; the
/// token stays valid either way.
pub fn dispatch_verification(mailer: Arc<dyn Mailer>, base_url: String, to: String, token: String) {
    tokio::spawn(async move {
        let url = verification_url(&base_url, &token);
        let body = verification_body(&url);
        if let Err(e) = mailer.send(&to, "Verify your Commons account", &body).await {
            tracing::error!(%to, error = %e, "Failed to send verification email");
        }
    });
}
