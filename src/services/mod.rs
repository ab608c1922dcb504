//! Services layer - Business logic
//!
//! Services sit between the HTTP handlers and the repositories:
//! - validation and slug/locale normalization
//! - the translation state machine and its pipeline
//! - remote collaborators (text generation, email)

pub mod analytics;
pub mod landing_page;
pub mod markdown;
pub mod notification;
pub mod password;
pub mod post;
pub mod rate_limiter;
pub mod session_token;
pub mod subscriber;
pub mod text_generation;
pub mod translation;

pub use analytics::{AnalyticsService, ContentReport};
pub use landing_page::{LandingPageError, LandingPageService, LandingPageView};
pub use markdown::MarkdownRenderer;
pub use notification::{
    sender_from_config, DynEmailSender, EmailSender, Notification, NotificationDispatcher,
    SmtpEmailSender,
};
pub use password::{hash_password, verify_password};
pub use post::{generate_slug, PostService, PostServiceError};
pub use rate_limiter::LoginRateLimiter;
pub use session_token::{AuthError, IssuedToken, SessionTokenService};
pub use subscriber::{NewsletterReport, SubscriberService, SubscriberServiceError};
pub use text_generation::{CollaboratorError, DynTextGenerator, OpenAiClient, TextGenerator};
pub use translation::{TrackerError, TranslationPipeline, TranslationTracker};
