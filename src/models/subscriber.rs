//! Newsletter subscriber model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newsletter subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    /// Lower-cased, unique
    pub email: String,
    pub verified: bool,
    /// Opaque token used in verify and unsubscribe links
    #[serde(skip_serializing)]
    pub token: String,
    pub subscribed_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl Subscriber {
    /// Verified and not unsubscribed
    pub fn receives_issues(&self) -> bool {
        self.verified && self.unsubscribed_at.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribed_at.is_none()
    }
}

/// Subscriber totals for the analytics report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberStats {
    pub total: i64,
    pub verified: i64,
    pub unsubscribed: i64,
}

/// Canonical form of an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one `@`, non-empty local part, dotted domain
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Reader@Example.COM "), "reader@example.com");
    }

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("a@example.com"));
        assert!(is_valid_email("first.last@mail.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a@b@example.com"));
        assert!(!is_valid_email("a@example..com"));
        assert!(!is_valid_email("a b@example.com"));
    }
}
