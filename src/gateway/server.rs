use super::ws::handle_connection;
use super::ChannelRegistry;
use crate::agent::{AgentClient, HttpAgentClient};
use crate::config::Config;
use crate::dispatcher::{InboundMessage, MessageDispatcher, Origin};
use crate::error::Result;
use crate::metrics;
use crate::storage::{MessageLog, SqliteMessageLog};
use crate::store::{ContextStore, KeyValueStore, MemoryStore, SessionStore};
use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shared state behind every route
pub struct AppState {
    /// Per-message pipeline
    pub dispatcher: Arc<MessageDispatcher>,
    /// Live connections and their channels
    pub channels: Arc<ChannelRegistry>,
    /// Session store, also used by `join`/`leave` frames
    pub sessions: Arc<SessionStore>,
    /// Intents served by `GET /intents`
    pub intents: Vec<String>,
}

impl AppState {
    /// Wire the relay's components over the given backends
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        log: Arc<dyn MessageLog>,
        agent: Arc<dyn AgentClient>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Arc::clone(&store),
            config.session.session_ttl(),
        ));
        let contexts = Arc::new(ContextStore::new(
            store,
            config.session.context_ttl(),
            config.session.max_context_entries,
        ));
        let channels = Arc::new(ChannelRegistry::new());
        let dispatcher = Arc::new(MessageDispatcher::new(
            Arc::clone(&sessions),
            contexts,
            log,
            agent,
            channels.clone(),
            &config.dispatcher,
        ));

        Self {
            dispatcher,
            channels,
            sessions,
            intents: config.server.intents.clone(),
        }
    }
}

/// Build the HTTP and WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/intents", get(intents_handler))
        .route("/chat", post(chat_handler))
        .route("/ws", get(ws_upgrade_handler))
        .with_state(state)
}

/// Run the relay until interrupted
///
/// # Errors
///
/// Returns an error if the message log cannot be opened, the agent client
/// cannot be built, or the listener cannot bind.
pub async fn serve(config: Config) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let log = Arc::new(SqliteMessageLog::open(config.storage.db_path.as_deref())?);
    let agent = Arc::new(HttpAgentClient::new(
        config.agent.url.clone(),
        config.agent.timeout(),
    )?);

    info!(
        agent_url = %config.agent.url,
        db_path = %log.path().display(),
        "Relay components initialized"
    );

    let purge = spawn_purge_task(
        Arc::clone(&store),
        Duration::from_secs(config.session.purge_interval_seconds),
    );
    let state = Arc::new(AppState::new(&config, store, log, agent));
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "ChatRelay listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    purge.abort();
    info!("ChatRelay stopped");
    Ok(())
}

/// Periodically drop expired keys from the in-process store
pub fn spawn_purge_task(store: Arc<MemoryStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = store.len(), "Purged expired keys");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// Handlers

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.channels.connection_count().await,
    }))
}

async fn intents_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": true,
        "intents": state.intents,
    }))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            metrics::record_validation_error();
            return error_response(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };

    let inbound = match InboundMessage::parse(&body) {
        Ok(inbound) => inbound,
        Err(e) => {
            metrics::record_validation_error();
            metrics::record_message("rejected");
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    // Detached so a client hanging up cannot abandon a persisted message
    let user_id = inbound.user_id.clone();
    let dispatcher = Arc::clone(&state.dispatcher);
    let task =
        tokio::spawn(async move { dispatcher.process(&inbound, &Origin::default()).await });

    match task.await {
        Ok(Ok(reply)) => {
            metrics::record_message("replied");
            (StatusCode::OK, Json(reply.response)).into_response()
        }
        Ok(Err(e)) => {
            warn!(user_id = %user_id, error = %e, "chat: processing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process message")
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "chat: processing task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process message")
        }
    }
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, addr))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
