//! BeyondFire Cloud portal API
//!
//! Self-service portal for booking pre-packaged containerized services and
//! running them on a shared Docker host, either through a Portainer-compatible
//! platform or directly with docker compose.

pub mod auth;
pub mod cloudflare_client;
pub mod compose;
pub mod config;
pub mod deployment;
pub mod direct_deploy;
pub mod handlers;
pub mod portainer_client;
pub mod storage;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use cloudflare_client::CloudflareClient;
pub use config::Config;
pub use deployment::{ComposeRunner, DeploymentService, DnsProvider, StackPlatform};
pub use direct_deploy::DirectDeployer;
pub use handlers::AppState;
pub use portainer_client::PortainerClient;
pub use storage::{BookingStore, ServiceCatalog, UserStore};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/api/register", post(handlers::register_handler))
        .route("/api/login", post(handlers::login_handler))
        .route("/api/profile", get(handlers::get_profile_handler))
        .route("/api/profile", put(handlers::update_profile_handler))
        .route("/api/services", get(handlers::list_services_handler))
        .route(
            "/api/services/{service_id}",
            get(handlers::get_service_handler),
        )
        .route("/api/bookings", post(handlers::create_booking_handler))
        .route("/api/bookings", get(handlers::list_bookings_handler))
        .route(
            "/api/bookings/{booking_id}",
            get(handlers::get_booking_handler),
        )
        .route(
            "/api/bookings/{booking_id}",
            delete(handlers::delete_booking_handler),
        )
        .route(
            "/api/bookings/{booking_id}/deploy",
            post(handlers::deploy_booking_handler),
        )
        .route(
            "/api/bookings/{booking_id}/suspend",
            post(handlers::suspend_booking_handler),
        )
        .route(
            "/api/bookings/{booking_id}/resume",
            post(handlers::resume_booking_handler),
        )
        .route(
            "/api/bookings/{booking_id}/logs",
            get(handlers::booking_logs_handler),
        )
        .route(
            "/api/portainer/status",
            get(handlers::portainer_status_handler),
        )
        .route("/api/admin/users", get(handlers::admin_list_users_handler))
        .route(
            "/api/admin/users/{user_id}",
            get(handlers::admin_get_user_handler),
        )
        .route(
            "/api/admin/users/{user_id}",
            delete(handlers::admin_delete_user_handler),
        )
        .route(
            "/api/admin/users/{user_id}/services",
            get(handlers::admin_user_services_handler),
        )
        .route(
            "/api/admin/users/{user_id}/reset-password",
            post(handlers::admin_reset_password_handler),
        )
        .route(
            "/api/admin/users/{user_id}/role",
            post(handlers::admin_update_role_handler),
        )
        .route(
            "/api/admin/services",
            get(handlers::admin_list_services_handler),
        )
        .route(
            "/api/admin/services/{booking_id}/{action}",
            post(handlers::admin_service_action_handler),
        )
        .route(
            "/api/admin/bookings",
            get(handlers::admin_list_bookings_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
