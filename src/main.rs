//! Quillpress - An admin-authenticated multilingual blog CMS

use anyhow::{Context, Result};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quillpress::{
    api::{self, AppState},
    config::Config,
    db::{self, repositories::Repositories},
    services::{hash_password, sender_from_config, OpenAiClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // `quillpress hash-password [password]` prints a PHC string for the config
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("hash-password") {
        return print_password_hash(args.get(1).cloned());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quillpress=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Quillpress...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    config.validate()?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    pool.ping().await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Remote collaborators
    let generator = Arc::new(OpenAiClient::new(&config.llm)?);
    let sender = sender_from_config(&config.email)?;

    let state = AppState::new(&config, Repositories::sqlx(pool), generator, sender)?;

    // Rate limiter cleanup (every 5 minutes)
    {
        let limiter = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.cleanup().await;
            }
        });
    }

    // Stale translation sweep
    {
        let tracker = state.translation_pipeline.tracker().clone();
        let stale_after = chrono::Duration::minutes(config.translation.stale_after_minutes);
        let period = tokio::time::Duration::from_secs(config.translation.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match tracker.fail_stale(stale_after).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Failed {} stale translation(s)", n),
                    Err(e) => tracing::warn!("Stale translation sweep failed: {}", e),
                }
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn print_password_hash(password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            eprintln!("Password (read from stdin):");
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read password")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    println!("{}", hash_password(&password)?);
    Ok(())
}
