//! SEO landing page model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A generated landing page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandingPage {
    pub id: i64,
    pub slug: String,
    /// Grouping used for interlinking
    pub niche: String,
    pub topic: String,
    pub title: String,
    pub meta_description: String,
    /// Markdown body, including the related-pages section
    pub body: String,
    pub body_html: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for generating a landing page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateLandingPageInput {
    pub niche: String,
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Row data for a new landing page
#[derive(Debug, Clone)]
pub struct NewLandingPage {
    pub slug: String,
    pub niche: String,
    pub topic: String,
    pub title: String,
    pub meta_description: String,
    pub body: String,
    pub body_html: String,
}

/// Lightweight reference used in related-page lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandingPageLink {
    pub slug: String,
    pub title: String,
}

impl From<&LandingPage> for LandingPageLink {
    fn from(page: &LandingPage) -> Self {
        Self {
            slug: page.slug.clone(),
            title: page.title.clone(),
        }
    }
}
