//! Router assembly and server bootstrap.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use anifold_core::{AnifoldConfig, SourceManager, SourceVerifier, VerificationReport};

use crate::handlers;
use crate::proxy::{self, StreamProxy};

/// Last verification run and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedReport {
    pub report: Arc<VerificationReport>,
    pub stored_at: Instant,
}

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SourceManager>,
    pub proxy: StreamProxy,
    pub verifier: Arc<SourceVerifier>,
    pub verification: Arc<RwLock<Option<CachedReport>>>,
    pub config: Arc<AnifoldConfig>,
    pub started_at: Instant,
}

impl AppState {
    /// # Errors
    ///
    /// - `reqwest::Error` - The proxy client could not be built
    pub fn new(
        manager: Arc<SourceManager>,
        config: AnifoldConfig,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            manager,
            proxy: StreamProxy::new(config.proxy.clone())?,
            verifier: Arc::new(SourceVerifier::new(&config.verifier)),
            verification: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }
}

/// All JSON routes, mounted under `/api` by [`router`].
fn api_routes() -> Router<AppState> {
    Router::new()
        // Catalogue
        .route("/search", get(handlers::search))
        .route("/anime/{id}", get(handlers::anime_detail))
        .route("/anime/{id}/episodes", get(handlers::anime_episodes))
        .route("/trending", get(handlers::trending))
        .route("/latest", get(handlers::latest))
        .route("/top-rated", get(handlers::top_rated))
        .route("/genres", get(handlers::genres))
        .route("/genre/{genre}", get(handlers::genre_titles))
        // Playback
        .route("/servers/{episode_id}", get(handlers::episode_servers))
        .route("/watch/{episode_id}", get(handlers::watch_episode))
        // Sources
        .route("/sources", get(handlers::list_sources))
        .route("/sources/health", get(handlers::sources_health))
        .route("/sources/check", post(handlers::check_sources))
        .route("/sources/preferred", post(handlers::set_preferred))
        .route("/sources/{name}/quality", get(handlers::stream_quality))
        .route("/verify", post(handlers::run_verification))
        .route("/verification", get(handlers::cached_verification))
        .route("/health", get(handlers::liveness))
        .layer(CorsLayer::permissive())
}

/// The proxy answers its own preflights and sets CORS headers on every
/// response, so it sits outside the CORS layer.
fn proxy_routes() -> Router<AppState> {
    Router::new().route(
        "/proxy",
        get(proxy::proxy_get)
            .post(proxy::proxy_post)
            .options(proxy::proxy_options),
    )
}

/// Complete application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes().merge(proxy_routes()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the source registry from `config`, starts the background health
/// monitor and serves the API until Ctrl-C.
///
/// # Errors
///
/// - Source registration, proxy client or socket bind failures
pub async fn run_server(
    config: AnifoldConfig,
    demo: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();
    let manager = Arc::new(SourceManager::from_config(&config, demo, &shutdown)?);
    let monitor =
        manager.spawn_health_monitor(config.sources.health_check_interval, shutdown.child_token());

    let address = config.server.bind_address();
    let state = AppState::new(Arc::clone(&manager), config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        address = %address,
        sources = manager.sources().len(),
        primary = manager.primary().name(),
        "Anifold API listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %error, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    monitor.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use anifold_core::testing::MockSource;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;

    fn test_app() -> Router {
        let manager = SourceManager::builder()
            .register(Arc::new(MockSource::new("A")))
            .build()
            .unwrap();
        let state = AppState::new(Arc::new(manager), AnifoldConfig::for_testing()).unwrap();
        router(state)
    }

    #[tokio::test]
    async fn test_liveness() {
        let response = test_app()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sources"], 1);
    }

    #[tokio::test]
    async fn test_json_routes_carry_cors_headers() {
        let response = test_app()
            .oneshot(
                Request::get("/api/sources")
                    .header(header::ORIGIN, "https://player.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_proxy_preflight_bypasses_cors_layer() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/proxy")
                    .header(header::ORIGIN, "https://player.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let response = test_app()
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
