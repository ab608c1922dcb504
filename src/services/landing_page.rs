//! Landing Page Content Generator
//!
//! Builds an SEO landing page from a niche/topic parameter set: title, meta
//! description and Markdown body come from the text generator, then a
//! "Related" section links up to five existing pages of the same niche, at
//! `{public_url}/api/v1/landing/{slug}`.
//! Slugs derive from the title; collisions get `-2`, `-3`, ... appended.

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;

use crate::db::repositories::{is_unique_violation, LandingPageRepository};
use crate::models::{GenerateLandingPageInput, LandingPage, LandingPageLink, NewLandingPage};
use crate::services::markdown::MarkdownRenderer;
use crate::services::post::generate_slug;
use crate::services::text_generation::{first_line, CollaboratorError, DynTextGenerator, GenerationParams};

const RELATED_LIMIT: usize = 5;
const MAX_KEYWORDS: usize = 10;
const MAX_FIELD_CHARS: usize = 120;
const MAX_TITLE_CHARS: usize = 90;
const MAX_META_CHARS: usize = 160;
const MAX_SLUG_ATTEMPTS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum LandingPageError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The text generator failed
    #[error("Content generation failed: {0}")]
    Upstream(#[from] CollaboratorError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// A page with the pages it links to
#[derive(Debug, Clone, Serialize)]
pub struct LandingPageView {
    #[serde(flatten)]
    pub page: LandingPage,
    pub related: Vec<LandingPageLink>,
}

pub struct LandingPageService {
    repo: Arc<dyn LandingPageRepository>,
    generator: DynTextGenerator,
    markdown: MarkdownRenderer,
    public_url: String,
}

impl LandingPageService {
    pub fn new(
        repo: Arc<dyn LandingPageRepository>,
        generator: DynTextGenerator,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            generator,
            markdown: MarkdownRenderer::new(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Generate and store a landing page
    pub async fn generate(&self, input: GenerateLandingPageInput) -> Result<LandingPageView, LandingPageError> {
        let input = normalize_input(input)?;
        let brief = brief(&input);

        let title = self
            .generator
            .generate(
                &brief,
                &GenerationParams::with_system(
                    "Write one SEO page title for this brief, at most 60 characters. Reply with the title only.",
                ),
            )
            .await?;
        let title = truncate_chars(&first_line(&title), MAX_TITLE_CHARS);

        let meta_description = self
            .generator
            .generate(
                &brief,
                &GenerationParams::with_system(
                    "Write one meta description for this brief, at most 155 characters. Reply with the description only.",
                ),
            )
            .await?;
        let meta_description = truncate_chars(&first_line(&meta_description), MAX_META_CHARS);

        let body = self
            .generator
            .generate(
                &brief,
                &GenerationParams::with_system(
                    "Write a landing page in Markdown for this brief, with H2 sections and no H1. Reply with the Markdown only.",
                )
                .temperature(0.7),
            )
            .await?;

        if title.is_empty() {
            return Err(CollaboratorError::Rejected("Generated title is empty".to_string()).into());
        }

        let related: Vec<LandingPageLink> = self
            .repo
            .list(Some(&input.niche), RELATED_LIMIT as i64)
            .await
            .context("Failed to load related landing pages")?
            .iter()
            .map(LandingPageLink::from)
            .collect();

        let body = with_related_section(body.trim(), &related, &self.public_url);
        let body_html = self.markdown.render(&body);

        let base_slug = match generate_slug(&title) {
            s if s.is_empty() => generate_slug(&input.topic),
            s => s,
        };
        let base_slug = if base_slug.is_empty() { "page".to_string() } else { base_slug };

        let mut page = NewLandingPage {
            slug: base_slug.clone(),
            niche: input.niche,
            topic: input.topic,
            title,
            meta_description,
            body,
            body_html,
        };

        for attempt in 1..=MAX_SLUG_ATTEMPTS {
            page.slug = slug_candidate(&base_slug, attempt);
            match self.repo.create(&page).await {
                Ok(stored) => {
                    tracing::info!(
                        "Generated landing page {} '{}' in niche {}",
                        stored.id,
                        stored.slug,
                        stored.niche
                    );
                    return Ok(LandingPageView { page: stored, related });
                }
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.context("Failed to store landing page").into()),
            }
        }

        Err(LandingPageError::InternalError(anyhow::anyhow!(
            "No free slug for '{}' after {} attempts",
            base_slug,
            MAX_SLUG_ATTEMPTS
        )))
    }

    /// A page and its related pages (same niche, excluding itself)
    pub async fn get(&self, slug: &str) -> Result<Option<LandingPageView>, LandingPageError> {
        let Some(page) = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get landing page")?
        else {
            return Ok(None);
        };

        let related = self
            .repo
            .list(Some(&page.niche), RELATED_LIMIT as i64 + 1)
            .await
            .context("Failed to load related landing pages")?
            .iter()
            .filter(|p| p.id != page.id)
            .take(RELATED_LIMIT)
            .map(LandingPageLink::from)
            .collect();

        Ok(Some(LandingPageView { page, related }))
    }

    pub async fn list(&self, niche: Option<&str>, limit: i64) -> Result<Vec<LandingPage>, LandingPageError> {
        let niche = niche.map(normalize_niche).filter(|n| !n.is_empty());
        Ok(self
            .repo
            .list(niche.as_deref(), limit.clamp(1, 100))
            .await
            .context("Failed to list landing pages")?)
    }
}

fn normalize_niche(niche: &str) -> String {
    niche.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn normalize_input(input: GenerateLandingPageInput) -> Result<GenerateLandingPageInput, LandingPageError> {
    let niche = normalize_niche(&input.niche);
    let topic = input.topic.trim().to_string();

    for (name, value) in [("niche", &niche), ("topic", &topic)] {
        if value.is_empty() {
            return Err(LandingPageError::ValidationError(format!("{} cannot be empty", name)));
        }
        if value.chars().count() > MAX_FIELD_CHARS {
            return Err(LandingPageError::ValidationError(format!(
                "{} cannot exceed {} characters",
                name, MAX_FIELD_CHARS
            )));
        }
    }

    let keywords: Vec<String> = input
        .keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.len() > MAX_KEYWORDS {
        return Err(LandingPageError::ValidationError(format!(
            "At most {} keywords are allowed",
            MAX_KEYWORDS
        )));
    }

    Ok(GenerateLandingPageInput {
        niche,
        topic,
        audience: input.audience.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
        keywords,
    })
}

fn brief(input: &GenerateLandingPageInput) -> String {
    let mut brief = format!("Niche: {}\nTopic: {}", input.niche, input.topic);
    if let Some(audience) = &input.audience {
        brief.push_str(&format!("\nAudience: {}", audience));
    }
    if !input.keywords.is_empty() {
        brief.push_str(&format!("\nKeywords: {}", input.keywords.join(", ")));
    }
    brief
}

fn with_related_section(body: &str, related: &[LandingPageLink], public_url: &str) -> String {
    if related.is_empty() {
        return format!("{}\n", body);
    }

    let mut out = format!("{}\n\n## Related\n\n", body);
    for link in related {
        out.push_str(&format!(
            "- [{}]({}/api/v1/landing/{})\n",
            link.title.replace(['[', ']'], ""),
            public_url,
            link.slug
        ));
    }
    out
}

fn slug_candidate(base: &str, attempt: usize) -> String {
    if attempt == 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
