use anyhow::Result;
use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers;
use crate::state::ApiState;
use crate::websocket;

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn router(state: ApiState) -> Router {
    let cors = cors_layer(&state.ctx.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(websocket::websocket_handler))
        .route(
            "/api/donations",
            get(handlers::list_donations).post(handlers::create_donation),
        )
        .route("/api/donations/:id", get(handlers::get_donation))
        .route("/api/donations/:id/accept", post(handlers::accept_donation))
        .route("/api/donations/:id/transit", post(handlers::transit_donation))
        .route("/api/donations/:id/pickup", post(handlers::pickup_donation))
        .route("/api/donations/:id/reject", post(handlers::reject_donation))
        .route("/api/donations/:id/cancel", post(handlers::cancel_donation))
        .route("/api/notifications", get(handlers::get_notifications))
        .route("/api/notifications/counts", get(handlers::get_notification_counts))
        .route("/api/notifications/read-all", put(handlers::mark_all_notifications_read))
        .route("/api/notifications/:id/read", put(handlers::mark_notification_read))
        .route("/api/notifications/register", post(handlers::register_device_token))
        .route(
            "/api/notifications/unregister",
            axum::routing::delete(handlers::unregister_device_token),
        )
        .route("/api/chat/my-chats", get(handlers::get_my_chats))
        .route("/api/chat/donation/:id", post(handlers::open_donation_chat))
        .route("/api/chat/:id/messages", get(handlers::get_chat_messages))
        .route("/api/chat/:id/mark-read", post(handlers::mark_chat_read))
        .route("/api/admin/users", get(handlers::list_users))
        .route("/api/admin/users/:id", get(handlers::get_user))
        .route("/api/admin/users/:id/verify", axum::routing::patch(handlers::verify_user))
        .route("/api/admin/stats", get(handlers::get_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::auth_middleware)),
        )
}

pub async fn run(state: ApiState) -> Result<()> {
    let host = state.ctx.config.server.host.clone();
    let port = state.ctx.config.server.api_port;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    tracing::info!("Starting API server on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
