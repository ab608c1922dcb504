//! Analytics report
//!
//! Aggregate counts across posts, subscribers, translation records and
//! landing pages. Request statistics are collected by the HTTP layer and
//! added to the report there.

use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::repositories::{
    LandingPageRepository, PostRepository, SubscriberRepository, TranslationRepository,
};
use crate::models::{PostStatus, SubscriberStats, TranslationStatus};

#[derive(Debug, Clone, Serialize)]
pub struct PostCounts {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_locale: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentReport {
    pub posts: PostCounts,
    pub subscribers: SubscriberStats,
    pub translations: BTreeMap<String, i64>,
    pub landing_pages: i64,
}

pub struct AnalyticsService {
    posts: Arc<dyn PostRepository>,
    subscribers: Arc<dyn SubscriberRepository>,
    translations: Arc<dyn TranslationRepository>,
    landing_pages: Arc<dyn LandingPageRepository>,
}

impl AnalyticsService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        subscribers: Arc<dyn SubscriberRepository>,
        translations: Arc<dyn TranslationRepository>,
        landing_pages: Arc<dyn LandingPageRepository>,
    ) -> Self {
        Self {
            posts,
            subscribers,
            translations,
            landing_pages,
        }
    }

    pub async fn report(&self) -> anyhow::Result<ContentReport> {
        let (by_status, by_locale, subscribers, translations, landing_pages) = tokio::try_join!(
            async { self.posts.count_by_status().await.context("Failed to count posts by status") },
            async { self.posts.count_by_locale().await.context("Failed to count posts by locale") },
            async { self.subscribers.stats().await.context("Failed to load subscriber stats") },
            async {
                self.translations
                    .count_by_status()
                    .await
                    .context("Failed to count translations")
            },
            async { self.landing_pages.count().await.context("Failed to count landing pages") },
        )?;

        // Every known status is reported, zero when absent.
        let mut post_statuses = zeroed([PostStatus::Draft, PostStatus::Published, PostStatus::Archived].map(|s| s.as_str()));
        post_statuses.extend(by_status);
        let mut translation_statuses = zeroed(
            [TranslationStatus::Pending, TranslationStatus::Completed, TranslationStatus::Failed].map(|s| s.as_str()),
        );
        translation_statuses.extend(translations);

        Ok(ContentReport {
            posts: PostCounts {
                total: post_statuses.values().sum(),
                by_status: post_statuses,
                by_locale: by_locale.into_iter().collect(),
            },
            subscribers,
            translations: translation_statuses,
            landing_pages,
        })
    }
}

fn zeroed<const N: usize>(keys: [&str; N]) -> BTreeMap<String, i64> {
    keys.into_iter().map(|k| (k.to_string(), 0)).collect()
}
