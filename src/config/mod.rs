//! Configuration management
//!
//! This module handles loading and parsing configuration for Quillpress.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. The session
//! signing secret has no default and must be provided before startup.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Admin authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Outgoing email configuration
    #[serde(default)]
    pub email: EmailConfig,
    /// Text-generation API configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Translation workflow configuration
    #[serde(default)]
    pub translation: TranslationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Public base URL used in links inside emails
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/quillpress.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Admin authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign session tokens
    #[serde(default)]
    pub signing_secret: String,
    /// Session lifetime in hours
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Admin login name
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Argon2 PHC string of the admin password
    #[serde(default)]
    pub admin_password_hash: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            session_ttl_hours: default_session_ttl_hours(),
            admin_username: default_admin_username(),
            admin_password_hash: String::new(),
        }
    }
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_admin_username() -> String {
    "admin".to_string()
}

/// Outgoing email (SMTP) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay host; email is disabled when unset
    #[serde(default)]
    pub smtp_host: Option<String>,
    /// SMTP port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    /// Sender address
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// Sender display name
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Where admin notifications (new post, translation complete) go
    #[serde(default)]
    pub admin_address: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: default_from_address(),
            from_name: default_from_name(),
            admin_address: None,
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "noreply@localhost".to_string()
}

fn default_from_name() -> String {
    "Quillpress".to_string()
}

impl EmailConfig {
    /// Whether an SMTP relay is configured
    pub fn is_enabled(&self) -> bool {
        self.smtp_host.as_deref().is_some_and(|h| !h.trim().is_empty())
    }
}

/// Text-generation API configuration (OpenAI-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API base URL, without the `/chat/completions` suffix
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_max_tokens() -> u32 {
    4000
}

/// Translation workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Pending records older than this are failed as stale
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
    /// How often the stale sweep runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: default_stale_after_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_stale_after_minutes() -> i64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - QUILLPRESS_SERVER_HOST / _PORT / _CORS_ORIGIN / _PUBLIC_URL
    /// - QUILLPRESS_DATABASE_DRIVER / _URL
    /// - QUILLPRESS_AUTH_SIGNING_SECRET / _SESSION_TTL_HOURS / _ADMIN_USERNAME / _ADMIN_PASSWORD_HASH
    /// - QUILLPRESS_EMAIL_SMTP_HOST / _SMTP_PORT / _SMTP_USERNAME / _SMTP_PASSWORD / _FROM_ADDRESS / _ADMIN_ADDRESS
    /// - QUILLPRESS_LLM_BASE_URL / _API_KEY / _MODEL / _TIMEOUT_SECS
    /// - QUILLPRESS_TRANSLATION_STALE_AFTER_MINUTES
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check values that have no usable default
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.signing_secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.signing_secret must be set".to_string(),
            ));
        }
        if self.auth.signing_secret.len() < 32 {
            return Err(ConfigError::ValidationError(
                "auth.signing_secret must be at least 32 bytes".to_string(),
            ));
        }
        if self.auth.session_ttl_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.session_ttl_hours must be positive".to_string(),
            ));
        }
        if self.auth.admin_password_hash.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.admin_password_hash must be set".to_string(),
            ));
        }
        if self.translation.stale_after_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "translation.stale_after_minutes must be positive".to_string(),
            ));
        }
        if self.translation.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "translation.sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("QUILLPRESS_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("QUILLPRESS_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("QUILLPRESS_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }
        if let Ok(public_url) = std::env::var("QUILLPRESS_SERVER_PUBLIC_URL") {
            self.server.public_url = public_url;
        }

        // Database configuration
        if let Ok(driver) = std::env::var("QUILLPRESS_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("QUILLPRESS_DATABASE_URL") {
            self.database.url = url;
        }

        // Auth configuration
        if let Ok(secret) = std::env::var("QUILLPRESS_AUTH_SIGNING_SECRET") {
            self.auth.signing_secret = secret;
        }
        if let Ok(ttl) = std::env::var("QUILLPRESS_AUTH_SESSION_TTL_HOURS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.session_ttl_hours = ttl;
            }
        }
        if let Ok(username) = std::env::var("QUILLPRESS_AUTH_ADMIN_USERNAME") {
            self.auth.admin_username = username;
        }
        if let Ok(hash) = std::env::var("QUILLPRESS_AUTH_ADMIN_PASSWORD_HASH") {
            self.auth.admin_password_hash = hash;
        }

        // Email configuration
        if let Ok(host) = std::env::var("QUILLPRESS_EMAIL_SMTP_HOST") {
            self.email.smtp_host = Some(host);
        }
        if let Ok(port) = std::env::var("QUILLPRESS_EMAIL_SMTP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.email.smtp_port = port;
            }
        }
        if let Ok(username) = std::env::var("QUILLPRESS_EMAIL_SMTP_USERNAME") {
            self.email.smtp_username = username;
        }
        if let Ok(password) = std::env::var("QUILLPRESS_EMAIL_SMTP_PASSWORD") {
            self.email.smtp_password = password;
        }
        if let Ok(from) = std::env::var("QUILLPRESS_EMAIL_FROM_ADDRESS") {
            self.email.from_address = from;
        }
        if let Ok(admin) = std::env::var("QUILLPRESS_EMAIL_ADMIN_ADDRESS") {
            self.email.admin_address = Some(admin);
        }

        // Text-generation configuration
        if let Ok(base_url) = std::env::var("QUILLPRESS_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("QUILLPRESS_LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(model) = std::env::var("QUILLPRESS_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(timeout) = std::env::var("QUILLPRESS_LLM_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.llm.timeout_secs = timeout;
            }
        }

        // Translation configuration
        if let Ok(minutes) = std::env::var("QUILLPRESS_TRANSLATION_STALE_AFTER_MINUTES") {
            if let Ok(minutes) = minutes.parse::<i64>() {
                self.translation.stale_after_minutes = minutes;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
