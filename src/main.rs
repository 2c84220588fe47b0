//! Small HTTP server exposing the fingerprint engine.
//!
//! The binary wires an [`Engine`] to an Axum API that indexes audio files
//! and answers ranked-match queries. Environment:
//!
//! - `SOUNDMARK_BIND`   listen address, default `0.0.0.0:8080`
//! - `SOUNDMARK_DB`     optional SQLite URL for a durable index
//! - `SOUNDMARK_CONFIG` optional TOML file overriding engine parameters

use std::sync::Arc;

use soundmark::index::SqliteStore;
use soundmark::{server, Engine, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = match std::env::var("SOUNDMARK_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<EngineConfig>(&raw)?
        }
        Err(_) => EngineConfig::default(),
    };

    let engine = match std::env::var("SOUNDMARK_DB") {
        Ok(url) => {
            let store = SqliteStore::connect(&url).await?;
            let engine = Engine::with_store(config, store);
            let loaded = engine.load_from_store().await?;
            tracing::info!(loaded, %url, "restored index from store");
            engine
        }
        Err(_) => Engine::new(config),
    };

    let addr = std::env::var("SOUNDMARK_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let app = server::router(Arc::new(engine));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
