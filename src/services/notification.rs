//! Notification Dispatcher
//!
//! Transactional email is best effort. [`NotificationDispatcher::dispatch`]
//! renders a plain-text message and hands it to a detached task; the caller
//! never awaits the result, and a failed send is only logged.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::EmailConfig;
use crate::services::text_generation::CollaboratorError;

/// A rendered plain-text email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outgoing email transport
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), CollaboratorError>;
}

pub type DynEmailSender = Arc<dyn EmailSender>;

/// SMTP relay sender
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &EmailConfig) -> anyhow::Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| anyhow::anyhow!("Failed to create SMTP transport: {}", e))?
            .port(config.smtp_port);
        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        let from = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid from address: {}", e))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), CollaboratorError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| CollaboratorError::Rejected(format!("Invalid recipient: {}", e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| CollaboratorError::Rejected(format!("Failed to build email: {}", e)))?;

        self.transport.send(email).await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout
            } else if e.is_permanent() {
                CollaboratorError::Rejected(e.to_string())
            } else {
                CollaboratorError::Unavailable(e.to_string())
            }
        })?;

        Ok(())
    }
}

/// Sender used when no SMTP relay is configured
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), CollaboratorError> {
        tracing::debug!("Email disabled, dropping '{}' to {}", message.subject, message.to);
        Err(CollaboratorError::Unavailable("email is not configured".to_string()))
    }
}

/// Build the sender for the configuration: SMTP when a relay is set,
/// otherwise the disabled sender.
pub fn sender_from_config(config: &EmailConfig) -> anyhow::Result<DynEmailSender> {
    if config.is_enabled() {
        Ok(Arc::new(SmtpEmailSender::new(config)?))
    } else {
        tracing::info!("SMTP not configured, notifications are disabled");
        Ok(Arc::new(DisabledEmailSender))
    }
}

/// The emails Quillpress sends, with their template data
#[derive(Debug, Clone)]
pub enum Notification {
    /// A post was published
    NewPost { title: String, url: String, excerpt: String },
    /// A translation job stored its result
    TranslationComplete {
        source_title: String,
        target_locale: String,
        result_post_id: i64,
    },
    /// A newsletter issue for one subscriber
    NewsletterIssue {
        subject: String,
        body: String,
        unsubscribe_url: String,
    },
    /// Double opt-in confirmation
    VerifySubscription { verify_url: String },
}

impl Notification {
    pub fn template_name(&self) -> &'static str {
        match self {
            Notification::NewPost { .. } => "new_post",
            Notification::TranslationComplete { .. } => "translation_complete",
            Notification::NewsletterIssue { .. } => "newsletter_issue",
            Notification::VerifySubscription { .. } => "verify_subscription",
        }
    }

    /// Render subject and body for `recipient`
    pub fn render(&self, site_name: &str, recipient: &str) -> EmailMessage {
        let (subject, body) = match self {
            Notification::NewPost { title, url, excerpt } => (
                format!("[{}] New post: {}", site_name, title),
                format!("A new post was published.\n\n{}\n\n{}\n\nRead it at {}\n", title, excerpt, url),
            ),
            Notification::TranslationComplete {
                source_title,
                target_locale,
                result_post_id,
            } => (
                format!("[{}] Translation ready: {} ({})", site_name, source_title, target_locale),
                format!(
                    "The {} translation of \"{}\" is ready for review as draft post #{}.\n",
                    target_locale, source_title, result_post_id
                ),
            ),
            Notification::NewsletterIssue {
                subject,
                body,
                unsubscribe_url,
            } => (
                subject.clone(),
                format!("{}\n\n--\nUnsubscribe: {}\n", body, unsubscribe_url),
            ),
            Notification::VerifySubscription { verify_url } => (
                format!("[{}] Confirm your subscription", site_name),
                format!(
                    "Thanks for subscribing to {}.\n\nConfirm your address by opening:\n{}\n\nIf you did not subscribe, ignore this email.\n",
                    site_name, verify_url
                ),
            ),
        };

        EmailMessage {
            to: recipient.to_string(),
            subject,
            body,
        }
    }
}

/// Renders notifications and sends them without blocking the caller
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: DynEmailSender,
    site_name: String,
}

impl NotificationDispatcher {
    pub fn new(sender: DynEmailSender, site_name: impl Into<String>) -> Self {
        Self {
            sender,
            site_name: site_name.into(),
        }
    }

    /// Render and send, returning the outcome. Used where the caller tracks
    /// results itself (newsletter sends).
    pub async fn deliver(&self, notification: &Notification, recipient: &str) -> Result<(), CollaboratorError> {
        let message = notification.render(&self.site_name, recipient);
        self.sender.send(&message).await
    }

    /// Fire and forget. The handle exists for tests; request handlers drop it.
    pub fn dispatch(&self, notification: Notification, recipient: impl Into<String>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        let recipient = recipient.into();

        tokio::spawn(async move {
            match dispatcher.deliver(&notification, &recipient).await {
                Ok(()) => tracing::debug!(
                    "Sent {} notification to {}",
                    notification.template_name(),
                    recipient
                ),
                Err(e) => tracing::warn!(
                    "Failed to send {} notification to {}: {}",
                    notification.template_name(),
                    recipient,
                    e
                ),
            }
        })
    }
}
