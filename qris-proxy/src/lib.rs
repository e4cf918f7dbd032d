pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::http::{header::HeaderName, HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use std::future::IntoFuture;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::Config;
use error::AppError;
use middleware::{
    admin_auth_middleware, callback_auth_middleware, metrics_middleware, request_id_middleware,
};
use services::{GithubStore, QrisClient};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: GithubStore,
    pub qris: QrisClient,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
}

impl Application {
    /// Build the application with the given configuration.
    ///
    /// Binds the listener here so tests can pass port 0 and read the real
    /// port back before the server starts.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let store = GithubStore::new(config.store.clone());
        if store.is_configured() {
            tracing::info!("Promo document store initialized");
        } else {
            tracing::warn!(
                "Promo document store not configured - promo and admin endpoints will fail"
            );
        }

        let qris = QrisClient::new(config.upstream.clone());

        let state = AppState {
            config: config.clone(),
            store,
            qris,
        };

        let app = build_router(state);

        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/promos",
            get(handlers::admin::list_promos).post(handlers::admin::upsert_promo),
        )
        .route(
            "/admin/promos/monthly",
            post(handlers::admin::set_monthly_promo),
        )
        .layer(from_fn_with_state(state.clone(), admin_auth_middleware));

    let callback_routes = Router::new()
        .route(
            "/callbacks/status",
            post(handlers::payments::status_callback),
        )
        .layer(from_fn_with_state(state.clone(), callback_auth_middleware));

    Router::new()
        .route("/", get(handlers::service_info))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/payments/qr", post(handlers::payments::create_qr))
        .route(
            "/payments/:id/status",
            get(handlers::payments::transaction_status),
        )
        .route(
            "/payments/:id/cancel",
            post(handlers::payments::cancel_transaction),
        )
        .route("/payments/:id/qr.png", get(handlers::payments::qr_image))
        .merge(admin_routes)
        .merge(callback_routes)
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add CORS layer
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = &config.security.allowed_origins;
    let cors = if origins.iter().any(|origin| origin == "*") {
        CorsLayer::new().allow_origin(tower_http::cors::Any)
    } else {
        CorsLayer::new().allow_origin(
            origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(err) => {
                        tracing::error!("Invalid CORS origin '{}': {}", origin, err);
                        None
                    }
                })
                .collect::<Vec<_>>(),
        )
    };

    cors.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static("x-admin-key"),
            HeaderName::from_static("x-callback-secret"),
            HeaderName::from_static("x-device-id"),
            HeaderName::from_static("x-request-id"),
        ])
}
