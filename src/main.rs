use std::sync::Arc;

use tabula::config::Config;
use tabula::convert::HttpConverter;
use tabula::db::{self, PgStore, Store};
use tabula::notify::{self, LogMailer, Notifier};
use tabula::state::AppState;
use tabula::storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabula=info,tower_http=info".into()),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    storage::ensure_dirs(&config.data_dir, &config.tmp_dir)?;

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(pool.as_ref()).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let converter = Arc::new(HttpConverter::new(&config.converter_url, config.converter_timeout)?);

    let (notifier, rx) = Notifier::channel();
    tokio::spawn(notify::run_worker(
        rx,
        store.clone(),
        Arc::new(LogMailer),
        config.clone(),
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        converter,
        notifier,
    });

    let app = tabula::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Tabula listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
