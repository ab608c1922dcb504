//! Newsletter service
//!
//! Double opt-in subscriptions and newsletter sends. Subscribing stores an
//! unverified subscriber and mails a verification link; only verified,
//! active subscribers receive issues. Unsubscribing is a soft state.

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::db::repositories::{is_unique_violation, SubscriberRepository};
use crate::models::{is_valid_email, normalize_email, ListParams, PagedResult, Subscriber};
use crate::services::notification::{Notification, NotificationDispatcher};

/// Concurrent SMTP sends per newsletter issue
const MAX_CONCURRENT_SENDS: usize = 8;
const MAX_SUBJECT_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum SubscriberServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{0} is already subscribed")]
    AlreadySubscribed(String),

    /// Unknown verify/unsubscribe token
    #[error("Subscription link is invalid or expired")]
    InvalidToken,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Outcome of one newsletter send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NewsletterReport {
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct SubscriberService {
    repo: Arc<dyn SubscriberRepository>,
    notifier: NotificationDispatcher,
    public_url: String,
}

impl SubscriberService {
    pub fn new(
        repo: Arc<dyn SubscriberRepository>,
        notifier: NotificationDispatcher,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            notifier,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Subscribe `email` and send the verification link.
    ///
    /// A previously unsubscribed address starts over as unverified with a
    /// fresh token.
    pub async fn subscribe(&self, email: &str) -> Result<Subscriber, SubscriberServiceError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(SubscriberServiceError::ValidationError(format!(
                "'{}' is not a valid email address",
                email
            )));
        }

        let now = Utc::now();
        let token = new_token();

        let subscriber = match self
            .repo
            .get_by_email(&email)
            .await
            .context("Failed to look up subscriber")?
        {
            Some(existing) if existing.is_active() => {
                return Err(SubscriberServiceError::AlreadySubscribed(email));
            }
            Some(existing) => {
                self.repo
                    .reactivate(existing.id, &token, now)
                    .await
                    .context("Failed to reactivate subscriber")?;
                tracing::info!("Subscriber {} re-subscribed", existing.id);
                Subscriber {
                    verified: false,
                    token: token.clone(),
                    subscribed_at: now,
                    verified_at: None,
                    unsubscribed_at: None,
                    ..existing
                }
            }
            None => match self.repo.create(&email, &token, now).await {
                Ok(subscriber) => subscriber,
                Err(e) if is_unique_violation(&e) => {
                    return Err(SubscriberServiceError::AlreadySubscribed(email));
                }
                Err(e) => return Err(e.context("Failed to create subscriber").into()),
            },
        };

        self.notifier.dispatch(
            Notification::VerifySubscription {
                verify_url: format!("{}/api/v1/newsletter/verify?token={}", self.public_url, token),
            },
            subscriber.email.clone(),
        );
        Ok(subscriber)
    }

    /// Confirm a subscription from its verification link
    pub async fn verify(&self, token: &str) -> Result<Subscriber, SubscriberServiceError> {
        let subscriber = self.by_token(token).await?;
        if !subscriber.is_active() {
            return Err(SubscriberServiceError::InvalidToken);
        }
        if subscriber.verified {
            return Ok(subscriber);
        }

        let now = Utc::now();
        self.repo
            .mark_verified(subscriber.id, now)
            .await
            .context("Failed to verify subscriber")?;
        tracing::info!("Subscriber {} verified", subscriber.id);

        Ok(Subscriber {
            verified: true,
            verified_at: Some(now),
            ..subscriber
        })
    }

    /// Idempotent
    pub async fn unsubscribe(&self, token: &str) -> Result<Subscriber, SubscriberServiceError> {
        let subscriber = self.by_token(token).await?;
        if !subscriber.is_active() {
            return Ok(subscriber);
        }

        let now = Utc::now();
        self.repo
            .mark_unsubscribed(subscriber.id, now)
            .await
            .context("Failed to unsubscribe")?;
        tracing::info!("Subscriber {} unsubscribed", subscriber.id);

        Ok(Subscriber {
            unsubscribed_at: Some(now),
            ..subscriber
        })
    }

    pub async fn list(&self, params: &ListParams) -> Result<PagedResult<Subscriber>, SubscriberServiceError> {
        let items = self
            .repo
            .list(params.offset(), params.limit())
            .await
            .context("Failed to list subscribers")?;
        let total = self.repo.count().await.context("Failed to count subscribers")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Start sending an issue to every verified, active subscriber.
    ///
    /// Returns the recipient count immediately; the send runs detached and
    /// individual failures are only logged.
    pub async fn send_newsletter(
        &self,
        subject: &str,
        body: &str,
    ) -> Result<(usize, JoinHandle<NewsletterReport>), SubscriberServiceError> {
        let subject = subject.trim();
        if subject.is_empty() || subject.chars().count() > MAX_SUBJECT_CHARS {
            return Err(SubscriberServiceError::ValidationError(format!(
                "Subject must be 1-{} characters",
                MAX_SUBJECT_CHARS
            )));
        }
        if body.trim().is_empty() {
            return Err(SubscriberServiceError::ValidationError("Body cannot be empty".to_string()));
        }

        let recipients = self
            .repo
            .list_recipients()
            .await
            .context("Failed to load newsletter recipients")?;
        let count = recipients.len();

        let notifier = self.notifier.clone();
        let public_url = self.public_url.clone();
        let subject = subject.to_string();
        let body = body.to_string();

        let handle = tokio::spawn(async move {
            send_issue(notifier, public_url, subject, body, recipients).await
        });

        Ok((count, handle))
    }

    async fn by_token(&self, token: &str) -> Result<Subscriber, SubscriberServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SubscriberServiceError::InvalidToken);
        }
        self.repo
            .get_by_token(token)
            .await
            .context("Failed to look up subscription token")?
            .ok_or(SubscriberServiceError::InvalidToken)
    }
}

async fn send_issue(
    notifier: NotificationDispatcher,
    public_url: String,
    subject: String,
    body: String,
    recipients: Vec<Subscriber>,
) -> NewsletterReport {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_SENDS));
    let total = recipients.len();

    let tasks = recipients
        .into_iter()
        .map(|subscriber| {
            let notifier = notifier.clone();
            let semaphore = semaphore.clone();
            let issue = Notification::NewsletterIssue {
                subject: subject.clone(),
                body: body.clone(),
                unsubscribe_url: format!(
                    "{}/api/v1/newsletter/unsubscribe?token={}",
                    public_url, subscriber.token
                ),
            };

            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match notifier.deliver(&issue, &subscriber.email).await {
                    Ok(()) => Some(true),
                    Err(e) => {
                        tracing::warn!("Newsletter to subscriber {} failed: {}", subscriber.id, e);
                        Some(false)
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    let mut report = NewsletterReport {
        recipients: total,
        ..Default::default()
    };
    for result in join_all(tasks).await {
        match result {
            Ok(Some(true)) => report.sent += 1,
            Ok(_) => report.failed += 1,
            Err(err) => {
                tracing::error!("Newsletter send task panicked: {}", err);
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        "Newsletter '{}' finished: {} sent, {} failed",
        subject,
        report.sent,
        report.failed
    );
    report
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxSubscriberRepository;
    use crate::db::{create_test_pool, migrations};
    use crate::services::notification::testing::RecordingSender;

    async fn setup_with(sender: Arc<RecordingSender>) -> SubscriberService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        SubscriberService::new(
            SqlxSubscriberRepository::boxed(pool),
            NotificationDispatcher::new(sender, "Quillpress"),
            "https://blog.example.com",
        )
    }

    async fn wait_for_messages(sender: &RecordingSender, n: usize) {
        for _ in 0..100 {
            if sender.messages().await.len() >= n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_subscribe_sends_verification_link() {
        let sender = Arc::new(RecordingSender::default());
        let service = setup_with(sender.clone()).await;

        let subscriber = service.subscribe("  Reader@Example.com ").await.unwrap();
        assert_eq!(subscriber.email, "reader@example.com");
        assert!(!subscriber.verified);

        wait_for_messages(&sender, 1).await;
        let sent = sender.messages().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .body
            .contains(&format!("/api/v1/newsletter/verify?token={}", subscriber.token)));
    }

    #[tokio::test]
    async fn test_duplicate_active_email_is_rejected() {
        let service = setup_with(Arc::new(RecordingSender::default())).await;

        service.subscribe("a@example.com").await.unwrap();
        assert!(matches!(
            service.subscribe("A@example.com").await,
            Err(SubscriberServiceError::AlreadySubscribed(_))
        ));
        assert!(matches!(
            service.subscribe("not-an-email").await,
            Err(SubscriberServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_unsubscribe_resubscribe() {
        let service = setup_with(Arc::new(RecordingSender::default())).await;

        let first = service.subscribe("a@example.com").await.unwrap();
        let verified = service.verify(&first.token).await.unwrap();
        assert!(verified.verified);

        let gone = service.unsubscribe(&first.token).await.unwrap();
        assert!(gone.unsubscribed_at.is_some());
        // Idempotent.
        assert!(service.unsubscribe(&first.token).await.is_ok());
        // A dead subscription cannot be verified.
        assert!(matches!(
            service.verify(&first.token).await,
            Err(SubscriberServiceError::InvalidToken)
        ));

        let again = service.subscribe("a@example.com").await.unwrap();
        assert_eq!(again.id, first.id);
        assert!(!again.verified);
        assert_ne!(again.token, first.token);
        assert!(matches!(
            service.verify("unknown").await,
            Err(SubscriberServiceError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_newsletter_goes_to_verified_active_only() {
        let sender = Arc::new(RecordingSender::default());
        let service = setup_with(sender.clone()).await;

        let a = service.subscribe("a@example.com").await.unwrap();
        service.verify(&a.token).await.unwrap();
        let b = service.subscribe("b@example.com").await.unwrap();
        service.verify(&b.token).await.unwrap();
        service.unsubscribe(&b.token).await.unwrap();
        service.subscribe("c@example.com").await.unwrap();
        wait_for_messages(&sender, 3).await;

        let (recipients, handle) = service.send_newsletter("October", "News").await.unwrap();
        assert_eq!(recipients, 1);

        let report = handle.await.unwrap();
        assert_eq!(report, NewsletterReport { recipients: 1, sent: 1, failed: 0 });

        let issues: Vec<_> = sender
            .messages()
            .await
            .into_iter()
            .filter(|m| m.subject == "October")
            .collect();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].to, "a@example.com");
        assert!(issues[0].body.contains("unsubscribe?token="));
    }

    #[tokio::test]
    async fn test_newsletter_failures_are_counted_not_raised() {
        let sender = Arc::new(RecordingSender::failing());
        let service = setup_with(sender).await;

        for email in ["a@example.com", "b@example.com"] {
            let s = service.subscribe(email).await.unwrap();
            service.verify(&s.token).await.unwrap();
        }

        let (recipients, handle) = service.send_newsletter("Hi", "Body").await.unwrap();
        assert_eq!(recipients, 2);
        assert_eq!(handle.await.unwrap().failed, 2);

        assert!(matches!(
            service.send_newsletter(" ", "Body").await,
            Err(SubscriberServiceError::ValidationError(_))
        ));
    }
}
