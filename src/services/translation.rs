//! Translation State Tracker and translation pipeline
//!
//! The tracker owns the record state machine
//! `NONE -> PENDING -> {COMPLETED, FAILED}`. Each transition is one
//! conditional statement in the store, so racing callers cannot both win:
//! a second pending insert for a pair inserts nothing, and
//! completion/failure only match rows still in `pending`.
//!
//! The pipeline runs a requested translation as a detached job: generate
//! the translated title and body, store the target-locale post, complete
//! the record, and notify the admin.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::db::repositories::{PostRepository, TranslationRepository};
use crate::models::{
    canonical_locale, same_locale, CreatePostInput, Post, TranslationRecord, TranslationState,
    UpdatePostInput,
};
use crate::services::markdown::MarkdownRenderer;
use crate::services::notification::{Notification, NotificationDispatcher};
use crate::services::text_generation::{first_line, CollaboratorError, DynTextGenerator, GenerationParams};

/// Failure reason recorded by the stale sweep
pub const STALE_REASON: &str = "stale";

/// Errors of tracker operations
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A pending record already exists for the (post, locale) pair
    #[error("A translation of post {post_id} to {locale} is already pending")]
    AlreadyPending { post_id: i64, locale: String },

    /// The record exists but is completed or failed
    #[error("Translation record {0} is not pending")]
    NotPending(i64),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid translation request: {0}")]
    Invalid(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Tracks translation records per (post, target locale)
pub struct TranslationTracker {
    records: Arc<dyn TranslationRepository>,
    posts: Arc<dyn PostRepository>,
}

impl TranslationTracker {
    pub fn new(records: Arc<dyn TranslationRepository>, posts: Arc<dyn PostRepository>) -> Self {
        Self { records, posts }
    }

    /// Open a pending record for `post_id` in `target_locale`.
    ///
    /// # Errors
    /// - `Invalid` if the locale is not a language tag or equals the post's own locale
    /// - `NotFound` if the post does not exist
    /// - `AlreadyPending` if a pending record exists for the pair
    pub async fn request_translation(
        &self,
        post_id: i64,
        target_locale: &str,
    ) -> Result<TranslationRecord, TrackerError> {
        let locale = canonical_locale(target_locale)
            .ok_or_else(|| TrackerError::Invalid(format!("'{}' is not a locale tag", target_locale)))?;
        let post = self.require_post(post_id).await?;
        if same_locale(&post.locale, &locale) {
            return Err(TrackerError::Invalid(format!(
                "Post {} is already written in {}",
                post_id, post.locale
            )));
        }

        match self.records.create_pending(post_id, &locale, Utc::now()).await? {
            Some(record) => {
                tracing::info!("Translation {} requested: post {} -> {}", record.id, post_id, locale);
                Ok(record)
            }
            None => Err(TrackerError::AlreadyPending { post_id, locale }),
        }
    }

    /// Move a pending record to completed and attach the produced post.
    pub async fn complete_translation(
        &self,
        record_id: i64,
        result_post_id: i64,
    ) -> Result<TranslationRecord, TrackerError> {
        if self.posts.get_by_id(result_post_id).await?.is_none() {
            return Err(TrackerError::Invalid(format!(
                "Result post {} does not exist",
                result_post_id
            )));
        }

        let updated = self
            .records
            .mark_completed(record_id, result_post_id, Utc::now())
            .await?;
        self.after_transition(record_id, updated).await
    }

    /// Move a pending record to failed with `reason`.
    pub async fn fail_translation(&self, record_id: i64, reason: &str) -> Result<TranslationRecord, TrackerError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TrackerError::Invalid("Failure reason must not be empty".to_string()));
        }

        let updated = self.records.mark_failed(record_id, reason, Utc::now()).await?;
        self.after_transition(record_id, updated).await
    }

    pub async fn get(&self, record_id: i64) -> Result<TranslationRecord, TrackerError> {
        self.records
            .get_by_id(record_id)
            .await?
            .ok_or_else(|| record_not_found(record_id))
    }

    /// All records of a post, newest first
    pub async fn history(&self, post_id: i64) -> Result<Vec<TranslationRecord>, TrackerError> {
        self.require_post(post_id).await?;
        Ok(self.records.list_by_post(post_id).await?)
    }

    pub async fn status_for(&self, post_id: i64, target_locale: &str) -> Result<TranslationState, TrackerError> {
        let locale = canonical_locale(target_locale)
            .ok_or_else(|| TrackerError::Invalid(format!("'{}' is not a locale tag", target_locale)))?;
        let records = self.records.list_by_post_locale(post_id, &locale).await?;
        Ok(TranslationState::derive(&records))
    }

    /// Derived state for every locale the post has records for
    pub async fn status_overview(&self, post_id: i64) -> Result<BTreeMap<String, TranslationState>, TrackerError> {
        let records = self.records.list_by_post(post_id).await?;

        let mut by_locale: BTreeMap<String, Vec<&TranslationRecord>> = BTreeMap::new();
        for record in &records {
            by_locale.entry(record.target_locale.clone()).or_default().push(record);
        }

        Ok(by_locale
            .into_iter()
            .map(|(locale, records)| (locale, TranslationState::derive(records)))
            .collect())
    }

    /// Fail every pending record requested more than `older_than` ago.
    pub async fn fail_stale(&self, older_than: Duration) -> Result<u64, TrackerError> {
        let now = Utc::now();
        let failed = self
            .records
            .fail_pending_before(now - older_than, STALE_REASON, now)
            .await?;
        if failed > 0 {
            tracing::warn!("Failed {} stale pending translation(s)", failed);
        }
        Ok(failed)
    }

    /// Resolve the outcome of a conditional update: the updated record, or
    /// why nothing matched.
    async fn after_transition(&self, record_id: i64, updated: bool) -> Result<TranslationRecord, TrackerError> {
        let record = self.records.get_by_id(record_id).await?;
        match (updated, record) {
            (true, Some(record)) => {
                tracing::info!("Translation {} is now {}", record_id, record.status);
                Ok(record)
            }
            (false, Some(_)) => Err(TrackerError::NotPending(record_id)),
            (_, None) => Err(record_not_found(record_id)),
        }
    }

    async fn require_post(&self, post_id: i64) -> Result<Post, TrackerError> {
        self.posts
            .get_by_id(post_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("Post {} not found", post_id)))
    }
}

fn record_not_found(record_id: i64) -> TrackerError {
    TrackerError::NotFound(format!("Translation record {} not found", record_id))
}

/// Runs requested translations through the text generator
pub struct TranslationPipeline {
    tracker: Arc<TranslationTracker>,
    posts: Arc<dyn PostRepository>,
    generator: DynTextGenerator,
    notifier: NotificationDispatcher,
    markdown: MarkdownRenderer,
    admin_address: Option<String>,
}

impl TranslationPipeline {
    pub fn new(
        tracker: Arc<TranslationTracker>,
        posts: Arc<dyn PostRepository>,
        generator: DynTextGenerator,
        notifier: NotificationDispatcher,
        admin_address: Option<String>,
    ) -> Self {
        Self {
            tracker,
            posts,
            generator,
            notifier,
            markdown: MarkdownRenderer::new(),
            admin_address,
        }
    }

    pub fn tracker(&self) -> &Arc<TranslationTracker> {
        &self.tracker
    }

    /// Request a translation and start the job. Returns the pending record
    /// and the job handle; handlers drop the handle.
    pub async fn start(
        self: &Arc<Self>,
        post_id: i64,
        target_locale: &str,
    ) -> Result<(TranslationRecord, JoinHandle<()>), TrackerError> {
        let record = self.tracker.request_translation(post_id, target_locale).await?;
        let pipeline = Arc::clone(self);
        let job = record.clone();

        let handle = tokio::spawn(async move {
            pipeline.run(job).await;
        });

        Ok((record, handle))
    }

    async fn run(&self, record: TranslationRecord) {
        let (source_title, result_post_id) = match self.translate(&record).await {
            Ok(done) => done,
            Err(reason) => {
                tracing::warn!("Translation {} failed: {}", record.id, reason);
                if let Err(e) = self.tracker.fail_translation(record.id, &reason).await {
                    tracing::warn!("Could not mark translation {} failed: {}", record.id, e);
                }
                return;
            }
        };

        match self.tracker.complete_translation(record.id, result_post_id).await {
            Ok(_) => {
                if let Some(admin) = &self.admin_address {
                    self.notifier.dispatch(
                        Notification::TranslationComplete {
                            source_title,
                            target_locale: record.target_locale.clone(),
                            result_post_id,
                        },
                        admin.clone(),
                    );
                }
            }
            Err(e) => tracing::warn!(
                "Translation {} produced post {} but could not complete: {}",
                record.id,
                result_post_id,
                e
            ),
        }
    }

    /// Generate and store the translated post. Returns the source title and
    /// the id of the stored post, or a failure reason.
    async fn translate(&self, record: &TranslationRecord) -> Result<(String, i64), String> {
        let source = self
            .posts
            .get_by_id(record.source_post_id)
            .await
            .map_err(|e| format!("store error: {}", e))?
            .ok_or_else(|| format!("source post {} no longer exists", record.source_post_id))?;

        let locale = &record.target_locale;
        let title = self
            .generator
            .generate(&source.title, &GenerationParams::with_system(title_instruction(locale)).temperature(0.2))
            .await
            .map_err(|e| failure_reason(&e))?;
        let body = self
            .generator
            .generate(&source.body, &GenerationParams::with_system(body_instruction(locale)).temperature(0.2))
            .await
            .map_err(|e| failure_reason(&e))?;

        let title = first_line(&title);
        let body_html = self.markdown.render(&body);

        let existing = self
            .posts
            .get_by_locale_slug(locale, &source.slug)
            .await
            .map_err(|e| format!("store error: {}", e))?;

        let stored = match existing {
            // A re-translation replaces the earlier variant of the same source.
            Some(post) if post.source_post_id == Some(source.id) => {
                let update = UpdatePostInput {
                    title: Some(title),
                    body: Some(body),
                    ..Default::default()
                };
                self.posts
                    .update(post.id, &update, Some(&body_html))
                    .await
                    .map_err(|e| format!("store error: {}", e))?
            }
            Some(_) => return Err(format!("slug '{}' is already used in {}", source.slug, locale)),
            None => {
                let input = CreatePostInput::new(locale.clone(), title, body)
                    .with_slug(source.slug.clone())
                    .translated_from(source.id);
                self.posts
                    .create(&source.slug, &input, &body_html)
                    .await
                    .map_err(|e| format!("store error: {}", e))?
            }
        };

        tracing::info!(
            "Translation {} stored post {} ({}/{})",
            record.id,
            stored.id,
            stored.locale,
            stored.slug
        );
        Ok((source.title, stored.id))
    }
}

fn title_instruction(locale: &str) -> String {
    format!(
        "Translate the blog post title into the language with tag {}. Reply with the translated title only.",
        locale
    )
}

fn body_instruction(locale: &str) -> String {
    format!(
        "Translate the Markdown blog post into the language with tag {}. Keep the Markdown structure. Reply with the translation only.",
        locale
    )
}

fn failure_reason(error: &CollaboratorError) -> String {
    match error {
        CollaboratorError::Timeout => "timeout".to_string(),
        CollaboratorError::Unavailable(detail) => format!("unavailable: {}", detail),
        CollaboratorError::Rejected(detail) => format!("rejected: {}", detail),
    }
}
