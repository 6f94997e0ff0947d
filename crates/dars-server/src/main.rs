use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use dars_api::auth::{self, AppState, AppStateInner};
use dars_api::middleware::{require_auth, verify_token};
use dars_api::webhooks::Webhooks;
use dars_api::{messages, notifications, private, profile, reactions, snapshot, topics};
use dars_gateway::connection;
use dars_gateway::dispatcher::Dispatcher;

mod config;

use config::Config;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dars=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.jwt_secret == config::DEV_JWT_SECRET {
        warn!("DARS_JWT_SECRET not set, using the development secret");
    }

    // Init database
    let db = dars_db::Database::open(&PathBuf::from(&config.db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let webhooks = Webhooks::new(
        config.message_webhook_url.clone(),
        config.subscription_webhook_url.clone(),
    );
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        webhooks,
    });

    let state = ServerState {
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
    };

    let app = router(app_state, state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("dars server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(app_state: AppState, state: ServerState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/rest/{table}", get(snapshot::read_table))
        .route("/topics", post(topics::create_topic))
        .route("/topics/{topic_id}", patch(topics::update_topic))
        .route("/topics/{topic_id}", delete(topics::delete_topic))
        .route("/topics/{topic_id}/messages", post(messages::send_message))
        .route("/messages/{message_id}/pin", patch(messages::pin_message))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/notifications", post(notifications::create_notification))
        .route("/notifications/{notification_id}", put(notifications::update_notification))
        .route("/notifications/{notification_id}", delete(notifications::delete_notification))
        .route("/webinars/{webinar_id}/reactions", post(reactions::send_reaction))
        .route("/private-messages", post(private::send_private_message))
        .route("/private-messages/{message_id}/read", post(private::mark_read))
        .route("/me", get(profile::me))
        .route("/me/subscription", put(profile::set_subscription))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Authenticate at the HTTP upgrade so the socket starts in the Ready state.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(claims) = verify_token(&state.jwt_secret, &query.token) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection_authenticated(socket, state.dispatcher, claims.sub, claims.username)
    })
}
