use std::sync::Arc;

use axum::{http::Method, response::IntoResponse, routing::get, Json, Router};
use socketioxide::SocketIo;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use consult_call::{
    config::ServerConfig,
    fcm::{DisabledNotifier, FcmNotifier, PushNotifier},
    handlers::{self, AppState, SocketRegistry},
    registry::PresenceRegistry,
    relay::Relay,
};

// ── main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;

    // ── Push fallback ─────────────────────────────────────────────────────────
    let notifier: Arc<dyn PushNotifier> = match &config.service_account {
        Some(path) => {
            let fcm = FcmNotifier::from_service_account(path, config.fcm_project_id.clone())?;
            fcm.check_credentials().await;
            Arc::new(fcm)
        }
        None => {
            warn!("[fcm] GOOGLE_APPLICATION_CREDENTIALS not set, push fallback disabled");
            Arc::new(DisabledNotifier)
        }
    };

    // ── Relay ─────────────────────────────────────────────────────────────────
    let sockets: Arc<SocketRegistry> = Arc::new(SocketRegistry::new());
    let relay   = Arc::new(Relay::new(Arc::new(PresenceRegistry::new()), notifier, sockets.clone()));
    let state   = AppState { relay, sockets };

    // ── Socket.IO ─────────────────────────────────────────────────────────────
    let (sio_layer, io) = SocketIo::builder()
        .with_state(state)
        .build_layer();

    handlers::mount(&io);

    // ── HTTP ──────────────────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/ping", get(ping_handler))
        .layer(sio_layer)
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Signaling server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ping_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "pong" }))
}
