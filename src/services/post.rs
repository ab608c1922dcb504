//! Post service
//!
//! Admin CRUD for posts plus the public published listing. Posts are never
//! hard-deleted; deleting archives. Publishing a post notifies the admin
//! address, best effort.

use anyhow::Context;
use std::sync::Arc;

use crate::db::repositories::{is_unique_violation, PostRepository};
use crate::models::{
    canonical_locale, CreatePostInput, ListParams, PagedResult, Post, PostStatus, UpdatePostInput,
};
use crate::services::markdown::MarkdownRenderer;
use crate::services::notification::{Notification, NotificationDispatcher};

const MAX_TITLE_CHARS: usize = 200;
const MAX_SLUG_CHARS: usize = 120;
const EXCERPT_CHARS: usize = 280;

/// Errors of post operations
#[derive(Debug, thiserror::Error)]
pub enum PostServiceError {
    #[error("Post not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// `(locale, slug)` already taken
    #[error("Slug '{slug}' already exists in locale {locale}")]
    DuplicateSlug { locale: String, slug: String },

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct PostService {
    repo: Arc<dyn PostRepository>,
    markdown: MarkdownRenderer,
    notifier: NotificationDispatcher,
    admin_address: Option<String>,
    public_url: String,
}

impl PostService {
    pub fn new(
        repo: Arc<dyn PostRepository>,
        notifier: NotificationDispatcher,
        admin_address: Option<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            markdown: MarkdownRenderer::new(),
            notifier,
            admin_address,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a post. The slug is generated from the title when omitted.
    pub async fn create(&self, mut input: CreatePostInput) -> Result<Post, PostServiceError> {
        input.locale = canonical_locale(&input.locale).ok_or_else(|| {
            PostServiceError::ValidationError(format!("'{}' is not a locale tag", input.locale))
        })?;
        validate_title(&input.title)?;
        validate_body(&input.body)?;

        let slug = match input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => validate_slug(slug)?,
            None => generate_slug(&input.title),
        };
        if slug.is_empty() {
            return Err(PostServiceError::ValidationError(
                "Cannot derive a slug from the title; provide one".to_string(),
            ));
        }

        if self
            .repo
            .exists_by_locale_slug(&input.locale, &slug)
            .await
            .context("Failed to check slug uniqueness")?
        {
            return Err(duplicate(&input.locale, &slug));
        }

        let body_html = self.markdown.render(&input.body);
        let post = match self.repo.create(&slug, &input, &body_html).await {
            Ok(post) => post,
            // Lost a race with a concurrent create.
            Err(e) if is_unique_violation(&e) => return Err(duplicate(&input.locale, &slug)),
            Err(e) => return Err(e.context("Failed to create post").into()),
        };

        tracing::info!("Created post {} ({}/{})", post.id, post.locale, post.slug);
        if post.status == PostStatus::Published {
            self.notify_published(&post);
        }
        Ok(post)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Post>, PostServiceError> {
        Ok(self.repo.get_by_id(id).await.context("Failed to get post")?)
    }

    pub async fn update(&self, id: i64, mut input: UpdatePostInput) -> Result<Post, PostServiceError> {
        let existing = self.require(id).await?;
        if !input.has_changes() {
            return Ok(existing);
        }

        if let Some(title) = &input.title {
            validate_title(title)?;
        }
        if let Some(body) = &input.body {
            validate_body(body)?;
        }
        if let Some(slug) = input.slug.take() {
            let slug = validate_slug(slug.trim())?;
            if slug != existing.slug
                && self
                    .repo
                    .exists_by_locale_slug(&existing.locale, &slug)
                    .await
                    .context("Failed to check slug uniqueness")?
            {
                return Err(duplicate(&existing.locale, &slug));
            }
            input.slug = Some(slug);
        }

        let body_html = input.body.as_deref().map(|body| self.markdown.render(body));
        let post = match self.repo.update(id, &input, body_html.as_deref()).await {
            Ok(post) => post,
            Err(e) if is_unique_violation(&e) => {
                return Err(duplicate(&existing.locale, input.slug.as_deref().unwrap_or(&existing.slug)))
            }
            Err(e) => return Err(e.context("Failed to update post").into()),
        };

        if existing.status != PostStatus::Published && post.status == PostStatus::Published {
            self.notify_published(&post);
        }
        Ok(post)
    }

    /// Soft delete
    pub async fn archive(&self, id: i64) -> Result<Post, PostServiceError> {
        let existing = self.require(id).await?;
        if existing.status == PostStatus::Archived {
            return Ok(existing);
        }

        let input = UpdatePostInput {
            status: Some(PostStatus::Archived),
            ..Default::default()
        };
        let post = self
            .repo
            .update(id, &input, None)
            .await
            .context("Failed to archive post")?;
        tracing::info!("Archived post {}", id);
        Ok(post)
    }

    /// All posts, newest first
    pub async fn list(&self, params: &ListParams) -> Result<PagedResult<Post>, PostServiceError> {
        let items = self
            .repo
            .list(params.offset(), params.limit())
            .await
            .context("Failed to list posts")?;
        let total = self.repo.count().await.context("Failed to count posts")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Published posts, optionally in one locale
    pub async fn list_published(
        &self,
        locale: Option<&str>,
        params: &ListParams,
    ) -> Result<PagedResult<Post>, PostServiceError> {
        let locale = match locale.map(str::trim).filter(|l| !l.is_empty()) {
            Some(l) => Some(canonical_locale(l).ok_or_else(|| {
                PostServiceError::ValidationError(format!("'{}' is not a locale tag", l))
            })?),
            None => None,
        };

        let items = self
            .repo
            .list_published(locale.as_deref(), params.offset(), params.limit())
            .await
            .context("Failed to list published posts")?;
        let total = self
            .repo
            .count_published(locale.as_deref())
            .await
            .context("Failed to count published posts")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// A published post by locale and slug; drafts and archived posts are hidden
    pub async fn get_published(&self, locale: &str, slug: &str) -> Result<Option<Post>, PostServiceError> {
        let Some(locale) = canonical_locale(locale) else {
            return Ok(None);
        };
        let post = self
            .repo
            .get_by_locale_slug(&locale, slug)
            .await
            .context("Failed to get post")?;
        Ok(post.filter(Post::is_public))
    }

    async fn require(&self, id: i64) -> Result<Post, PostServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get post")?
            .ok_or_else(|| PostServiceError::NotFound(format!("Post with ID {} not found", id)))
    }

    fn notify_published(&self, post: &Post) {
        let Some(admin) = &self.admin_address else {
            return;
        };
        self.notifier.dispatch(
            Notification::NewPost {
                title: post.title.clone(),
                url: format!("{}/posts/{}/{}", self.public_url, post.locale, post.slug),
                excerpt: self.markdown.excerpt(&post.body, EXCERPT_CHARS),
            },
            admin.clone(),
        );
    }
}

fn duplicate(locale: &str, slug: &str) -> PostServiceError {
    PostServiceError::DuplicateSlug {
        locale: locale.to_string(),
        slug: slug.to_string(),
    }
}

fn validate_title(title: &str) -> Result<(), PostServiceError> {
    if title.trim().is_empty() {
        return Err(PostServiceError::ValidationError("Title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(PostServiceError::ValidationError(format!(
            "Title cannot exceed {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(())
}

fn validate_body(body: &str) -> Result<(), PostServiceError> {
    if body.trim().is_empty() {
        return Err(PostServiceError::ValidationError("Body cannot be empty".to_string()));
    }
    Ok(())
}

/// Accept an explicit slug only if it is already in slug form
fn validate_slug(slug: &str) -> Result<String, PostServiceError> {
    if slug.is_empty() || slug.chars().count() > MAX_SLUG_CHARS || generate_slug(slug) != slug {
        return Err(PostServiceError::ValidationError(format!(
            "Invalid slug '{}': use lowercase letters, digits and single hyphens",
            slug
        )));
    }
    Ok(slug.to_string())
}

/// Generate a URL slug from a title.
///
/// ASCII letters are lower-cased, non-ASCII letters (e.g. CJK) are kept,
/// every other run of characters becomes a single hyphen.
pub fn generate_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || (!c.is_ascii() && c.is_alphanumeric()) {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    slug.chars().take(MAX_SLUG_CHARS).collect::<String>().trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxPostRepository;
    use crate::db::{create_test_pool, migrations};
    use crate::services::notification::testing::RecordingSender;

    async fn setup_test_service() -> (PostService, Arc<RecordingSender>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let sender = Arc::new(RecordingSender::default());
        let service = PostService::new(
            SqlxPostRepository::boxed(pool),
            NotificationDispatcher::new(sender.clone(), "Quillpress"),
            Some("admin@example.com".to_string()),
            "https://blog.example.com/",
        );
        (service, sender)
    }

    async fn wait_for_messages(sender: &RecordingSender, n: usize) -> usize {
        for _ in 0..100 {
            let len = sender.messages().await.len();
            if len >= n {
                return len;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        sender.messages().await.len()
    }

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Hello World"), "hello-world");
        assert_eq!(generate_slug("Hello, World!"), "hello-world");
        assert_eq!(generate_slug("  Rust   &  Axum -- 2026 "), "rust-axum-2026");
        assert_eq!(generate_slug("你好 世界"), "你好-世界");
        assert_eq!(generate_slug("!!!"), "");
    }

    #[tokio::test]
    async fn test_create_generates_slug_and_renders_html() {
        let (service, sender) = setup_test_service().await;

        let post = service
            .create(CreatePostInput::new("EN", "My First Post", "Some **bold** text"))
            .await
            .unwrap();

        assert_eq!(post.slug, "my-first-post");
        assert_eq!(post.locale, "en");
        assert_eq!(post.status, PostStatus::Draft);
        assert!(post.body_html.contains("<strong>bold</strong>"));
        // Drafts do not notify.
        assert_eq!(wait_for_messages(&sender, 1).await, 0);
    }

    #[tokio::test]
    async fn test_same_slug_allowed_across_locales_only() {
        let (service, _) = setup_test_service().await;

        service
            .create(CreatePostInput::new("zh", "Hello", "body").with_slug("hello"))
            .await
            .unwrap();
        service
            .create(CreatePostInput::new("en", "Hello", "body").with_slug("hello"))
            .await
            .unwrap();

        let dup = service
            .create(CreatePostInput::new("en", "Hello again", "body").with_slug("hello"))
            .await;
        assert!(matches!(dup, Err(PostServiceError::DuplicateSlug { .. })));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (service, _) = setup_test_service().await;

        for input in [
            CreatePostInput::new("en", "  ", "body"),
            CreatePostInput::new("en", "Title", ""),
            CreatePostInput::new("not a locale", "Title", "body"),
            CreatePostInput::new("en", "Title", "body").with_slug("Not A Slug"),
            CreatePostInput::new("en", "???", "body"),
        ] {
            assert!(matches!(
                service.create(input).await,
                Err(PostServiceError::ValidationError(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_publish_notifies_admin_once() {
        let (service, sender) = setup_test_service().await;

        let post = service
            .create(CreatePostInput::new("en", "Launch", "We are live.").with_status(PostStatus::Published))
            .await
            .unwrap();
        assert!(post.published_at.is_some());

        assert_eq!(wait_for_messages(&sender, 1).await, 1);
        let sent = sender.messages().await;
        assert!(sent[0].subject.contains("Launch"));
        assert!(sent[0].body.contains("https://blog.example.com/posts/en/launch"));

        // Editing an already published post does not notify again.
        service
            .update(
                post.id,
                UpdatePostInput {
                    title: Some("Launch!".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(sender.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_archive() {
        let (service, _) = setup_test_service().await;
        let post = service
            .create(CreatePostInput::new("en", "Draft", "old body"))
            .await
            .unwrap();

        let updated = service
            .update(
                post.id,
                UpdatePostInput {
                    body: Some("# new body".to_string()),
                    slug: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.slug, "renamed");
        assert!(updated.body_html.contains("<h1>new body</h1>"));
        assert_eq!(updated.title, "Draft");

        let archived = service.archive(post.id).await.unwrap();
        assert_eq!(archived.status, PostStatus::Archived);
        assert!(service.get_by_id(post.id).await.unwrap().is_some());

        assert!(matches!(
            service.archive(9999).await,
            Err(PostServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_public_listing_hides_unpublished() {
        let (service, _) = setup_test_service().await;
        service
            .create(CreatePostInput::new("en", "Public", "body").with_status(PostStatus::Published))
            .await
            .unwrap();
        service
            .create(CreatePostInput::new("en", "Hidden", "body"))
            .await
            .unwrap();
        service
            .create(CreatePostInput::new("zh", "Other", "body").with_status(PostStatus::Published))
            .await
            .unwrap();

        let en = service
            .list_published(Some("en"), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(en.total, 1);
        assert_eq!(en.items[0].slug, "public");

        let all = service.list_published(None, &ListParams::default()).await.unwrap();
        assert_eq!(all.total, 2);

        assert!(service.get_published("en", "public").await.unwrap().is_some());
        assert!(service.get_published("en", "hidden").await.unwrap().is_none());
        assert!(service.get_published("xx yy", "public").await.unwrap().is_none());

        let admin = service.list(&ListParams::new(1, 2)).await.unwrap();
        assert_eq!(admin.total, 3);
        assert_eq!(admin.items.len(), 2);
    }
}
