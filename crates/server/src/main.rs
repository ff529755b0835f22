mod api;
mod auth;
mod config;
mod media;
mod range;
mod state;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use api::api_router;
use auth::AuthStore;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use library::Library;
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let mode = config.scope_mode();
    let media_root = resolve_path(&config_path, &config.media_root);
    let index_path = resolve_path(&config_path, &config.index_path);
    std::fs::create_dir_all(&media_root)?;

    let db = Library::open_db(&index_path)?;
    let library = Library::open_with_db(media_root.clone(), Arc::clone(&db), mode)?;
    let stats = library.stats()?;
    info!(
        "Track index ready: {} tracks from {} owners ({} mode)",
        stats.tracks, stats.owners, mode
    );

    let auth = AuthStore::new(db, Duration::from_secs(config.session_ttl_secs));
    if let Err(err) = auth.init_tables() {
        warn!("Failed to create auth tables: {}", err);
    }

    let staging_dir = media_root.join("tmp");
    clear_staging(&staging_dir);

    let bind_addr = config.bind_addr();
    let state = AppState {
        library,
        auth,
        config: Arc::new(config),
        staging_dir,
    };

    let media_routes = Router::new()
        .route("/media/*relpath", get(media::media_file))
        .with_state(state.clone());
    let app = Router::new()
        .nest("/api/v1", api_router(state))
        .merge(media_routes)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Leftovers from interrupted uploads.
fn clear_staging(dir: &std::path::Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        if let Err(err) = std::fs::remove_file(entry.path()) {
            warn!("Failed to remove stale upload {:?}: {}", entry.path(), err);
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
