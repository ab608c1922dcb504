//! Data models
//!
//! This module contains the data structures shared across Quillpress:
//! - Database entities (Post, TranslationRecord, Subscriber, LandingPage)
//! - Session claims and the admin identity
//! - API input types

mod landing_page;
mod post;
mod session;
mod subscriber;
mod translation;

pub use landing_page::{GenerateLandingPageInput, LandingPage, LandingPageLink, NewLandingPage};
pub use post::{CreatePostInput, ListParams, PagedResult, Post, PostStatus, UpdatePostInput};
pub use session::{AdminIdentity, SessionClaims};
pub use subscriber::{is_valid_email, normalize_email, Subscriber, SubscriberStats};
pub use translation::{
    canonical_locale, is_valid_locale, same_locale, TranslationRecord, TranslationState,
    TranslationStatus,
};
