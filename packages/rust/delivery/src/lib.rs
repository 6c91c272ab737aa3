//! Email delivery transport.
//!
//! [`MailTransport`] is the seam the scheduler sends through. [`SmtpMailer`]
//! delivers over SMTP with implicit TLS (`secure = true`, usually port 465)
//! or required STARTTLS.

use std::time::Duration;

use async_trait::async_trait;
use leadflow_shared::{LeadflowError, Result, SmtpSettings};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, instrument};

/// Capability name used in classified errors.
const CAPABILITY: &str = "delivery";

/// One outgoing email.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingEmail {
    /// Bodies that start with markup are sent as HTML.
    pub fn is_html(&self) -> bool {
        self.body.trim_start().starts_with('<')
    }
}

/// Server acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryAck {
    pub code: String,
    pub message: String,
}

/// Sends email. Errors are classified as transient or permanent.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryAck>;
}

// ---------------------------------------------------------------------------
// SMTP
// ---------------------------------------------------------------------------

/// SMTP transport built from [`SmtpSettings`] and a password read from the environment.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings, password: String, timeout: Duration) -> Result<Self> {
        settings.validate()?;

        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| LeadflowError::config(format!("invalid smtp host '{}': {e}", settings.host)))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(settings.username.clone(), password))
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    #[instrument(skip_all, fields(html = email.is_html()))]
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryAck> {
        let message = build_message(email)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(classify_smtp_error)?;

        let ack = DeliveryAck {
            code: response.code().to_string(),
            message: response.message().collect::<Vec<_>>().join(" "),
        };
        debug!(code = %ack.code, "smtp accepted message");
        Ok(ack)
    }
}

fn classify_smtp_error(e: lettre::transport::smtp::Error) -> LeadflowError {
    let code = e.status().map(|c| c.to_string());
    let message = e.to_string();
    if is_auth_rejection(code.as_deref(), &message) {
        // every later send would fail the same way
        LeadflowError::config(format!("smtp authentication rejected: {message}"))
    } else if e.is_permanent() {
        LeadflowError::permanent(CAPABILITY, message)
    } else {
        // 4xx replies, timeouts, connection and TLS failures
        LeadflowError::transient(CAPABILITY, message)
    }
}

/// Reply codes that mean the account, not the recipient, was refused.
const AUTH_REPLY_CODES: &[&str] = &["530", "534", "535", "538"];

/// Enhanced status codes for credential problems (RFC 4954).
const AUTH_ENHANCED_CODES: &[&str] = &["5.7.8", "5.7.9", "5.7.11", "5.7.14"];

fn is_auth_rejection(code: Option<&str>, message: &str) -> bool {
    code.is_some_and(|c| AUTH_REPLY_CODES.contains(&c))
        || AUTH_ENHANCED_CODES.iter().any(|c| message.contains(c))
}

fn mailbox(name: Option<&str>, email: &str, role: &str) -> Result<Mailbox> {
    let address: Address = email.trim().parse().map_err(|e| {
        LeadflowError::permanent(CAPABILITY, format!("invalid {role} address '{email}': {e}"))
    })?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
    Ok(Mailbox::new(name, address))
}

/// Build the MIME message. Invalid addresses are permanent failures.
pub fn build_message(email: &OutgoingEmail) -> Result<Message> {
    let mut builder = Message::builder()
        .from(mailbox(email.from_name.as_deref(), &email.from_email, "sender")?)
        .to(mailbox(email.to_name.as_deref(), &email.to, "recipient")?)
        .subject(email.subject.clone());

    if let Some(reply_to) = &email.reply_to {
        builder = builder.reply_to(mailbox(None, reply_to, "reply-to")?);
    }

    let content_type = if email.is_html() {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };

    builder
        .header(content_type)
        .body(email.body.clone())
        .map_err(|e| LeadflowError::permanent(CAPABILITY, format!("failed to build message: {e}")))
}
