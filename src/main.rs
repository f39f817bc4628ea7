use anyhow::{Context, Result};
use clap::Parser;
use samvad::config::{Config, StoreBackend};
use samvad::session::SessionStore;
use samvad::ml::{OpenAiClient, TranslateClient, VisionClient};
use samvad::storage::{DocumentStore, LocalStore, MongoStore};
use samvad::{create_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "samvad", about = "Document chat, OCR and translation backend")]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("samvad=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let store = open_store(&config).await?;
    store.start().await.context("Failed to start document store")?;

    let state = Arc::new(build_state(&config, store.clone())?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;

    println!("🚀 Samvad backend running on http://{}", config.server.bind);
    println!("📋 Endpoints:");
    println!("   /chats  /files  /users  /models  - CRUD");
    println!("   POST /chats/:id/query            - Ask about a chat's documents");
    println!("   POST /extract_text               - OCR an image or PDF");
    println!("   POST /translate_text             - Translate OCR segments");
    println!("   POST /register /login /logout    - Accounts");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    store.close().await.context("Failed to close document store")?;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Mongodb => {
            tracing::info!(uri = %config.store.uri, database = %config.store.database, "using MongoDB store");
            Arc::new(
                MongoStore::connect(config.store.mongo_settings())
                    .await
                    .context("Failed to configure MongoDB client")?,
            )
        }
        StoreBackend::Local => {
            tracing::info!(data_file = ?config.store.data_file, "using local store");
            Arc::new(
                LocalStore::open(config.store.data_file.clone(), config.store.schema_dir.clone())
                    .context("Failed to open local store")?,
            )
        }
    };
    Ok(store)
}

fn build_state(config: &Config, store: Arc<dyn DocumentStore>) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("samvad/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let credentials = config.google.credentials()?;
    if !credentials.is_configured() {
        tracing::warn!("no Google credentials configured; OCR and translation will return 503");
    }
    if config.openai.api_key.is_empty() {
        tracing::warn!("no OpenAI key configured; chat queries beyond canned replies will return 503");
    }

    let extractor = VisionClient::new(http.clone(), &config.google.vision_url, credentials.clone());
    let translator = TranslateClient::new(http.clone(), &config.google.translate_url, credentials);
    let completer = OpenAiClient::new(http, &config.openai.api_key, &config.openai.base_url);

    let mut state = AppState::new(
        store,
        Arc::new(extractor),
        Arc::new(translator),
        Arc::new(completer),
    );
    state.sessions = SessionStore::with_ttl(config.server.session_ttl());
    state.default_model = config.openai.model.clone();
    state.default_target_language = config.google.default_target_language.clone();
    Ok(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
    tracing::info!("shutting down, draining in-flight requests");
}
