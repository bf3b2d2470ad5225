// HTTP server
// axum router over the shared services, with graceful shutdown on a watch channel

mod handlers;


use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::Services;

pub use handlers::ApiError;

/// Every route of the public API
#[inline]
pub fn build_router(services: Services, max_body_size: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/upload-document/{user_id}", post(handlers::upload_document))
        .route(
            "/chat/{user_id}",
            post(handlers::chat).delete(handlers::clear_chat),
        )
        .route("/search/{user_id}", get(handlers::search_documents))
        .route("/documents/{user_id}", get(handlers::list_documents))
        .route(
            "/documents/{user_id}/{file_name}",
            delete(handlers::delete_document),
        )
        .route("/api/cleanup/vector-db", post(handlers::run_cleanup))
        .route("/api/cleanup/status", get(handlers::cleanup_status))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

pub struct HttpServer {
    host: String,
    port: u16,
    max_body_size: usize,
    services: Services,
    shutdown_rx: watch::Receiver<bool>,
}

impl HttpServer {
    #[inline]
    pub fn new(services: Services, shutdown_rx: watch::Receiver<bool>) -> Self {
        let server = &services.config.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_body_size: server.max_upload_bytes,
            services,
            shutdown_rx,
        }
    }

    #[inline]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Bind and serve until the shutdown channel flips to `true`
    #[inline]
    pub async fn serve(self) -> Result<()> {
        if self.host == "0.0.0.0" {
            warn!("Binding to 0.0.0.0, the API is reachable from other hosts");
        }

        let router = build_router(self.services, self.max_body_size);
        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", self.host, self.port))?;
        info!("Listening on http://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .context("HTTP server failed")?;

        Ok(())
    }
}
