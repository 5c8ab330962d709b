use std::sync::Arc;

use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::get,
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};

use crate::firewall::FirewallCli;
use crate::remote::RemoteExecutor;
use crate::server::config::ServerConfig;

pub mod error;
pub mod middleware;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<ServerConfig>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub firewall: Arc<dyn FirewallCli>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_router(
    pool: SqlitePool,
    config: Arc<ServerConfig>,
    executor: Arc<dyn RemoteExecutor>,
    firewall: Arc<dyn FirewallCli>,
) -> Router {
    let app_state = Arc::new(AppState {
        pool,
        config,
        executor,
        firewall,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let protected = Router::new()
        .nest("/api/nodes", routes::node_routes::node_router())
        .nest("/api/wallets", routes::wallet_routes::wallet_router())
        .nest("/api/acl", routes::acl_routes::acl_router())
        .nest("/api/settings", routes::settings_routes::settings_router())
        .merge(routes::transfer_routes::transfer_router())
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            middleware::auth::auth,
        ));

    Router::new()
        .route("/api/health", get(health_check_handler))
        .merge(protected)
        .with_state(app_state)
        .layer(cors)
}
