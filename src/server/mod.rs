// Server module - HTTP surface of the image CDN

mod error;
pub mod routes;

pub use error::ApiError;

use crate::error::Result;
use crate::imaging::Resizer;
use crate::settings::Settings;
use axum::http::Method;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared, read-only state handed to every handler
#[derive(Debug)]
pub struct AppState {
    pub settings: Settings,
    pub resizer: Resizer,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let resizer = Resizer::from_settings(&settings);
        Self { settings, resizer }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/images/{*file_path}", get(routes::serve_image))
        .route("/info/{*file_path}", get(routes::info))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind the configured address and serve until a shutdown signal arrives
pub async fn serve(settings: Settings) -> Result<()> {
    let addr = settings.listen_addr();

    if !settings.assets_dir.is_dir() {
        tracing::warn!(
            "Assets directory does not exist: {}",
            settings.assets_dir.display()
        );
    }

    let listener = TcpListener::bind(addr).await?;
    info!(
        "Serving {} on http://{} (assets: {}, cache: {})",
        routes::SERVICE_NAME,
        listener.local_addr()?,
        settings.assets_dir.display(),
        settings.cache_dir.display()
    );

    axum::serve(listener, router(AppState::new(settings)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down gracefully...");
}
