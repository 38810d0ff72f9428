use crate::decode::{MAX_BODY_SIZE, decode_spec, read_body};
use crate::logging::LogLevel;
use crate::orchestrator::{Orchestrator, Outcome};
use crate::respond::respond;
use crate::toggle;
use anyhow::Context;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use kiln_build::Builder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

pub struct AppState {
    pub orchestrator: Orchestrator,
    /// これを超えるボディは 400 で拒否する
    pub body_limit: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        builder: Arc<dyn Builder>,
        root: impl Into<PathBuf>,
        log_level: Arc<LogLevel>,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(builder, root, log_level),
            body_limit: MAX_BODY_SIZE,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

/// ルートのみを受け付けるルーター（メソッドは問わない）
///
/// ボディは debug 判定の後にハンドラ内で読むため、axum の既定上限は効かない。
pub fn router(state: SharedState) -> Router {
    Router::new().route("/", any(handle_build)).with_state(state)
}

async fn handle_build(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if toggle::debug_requested(&uri) {
        toggle::apply(state.orchestrator.log_level(), &method, &uri, &headers);
        return ().into_response();
    }

    let spec = match read_body(body, state.body_limit)
        .await
        .and_then(|bytes| decode_spec(&bytes))
    {
        Ok(spec) => spec,
        Err(e) => {
            tracing::warn!("Rejected request body: {}", e);
            return respond(Outcome::ValidationError(e));
        }
    };
    tracing::info!("Received build spec: {:?}", spec);

    respond(state.orchestrator.run(&spec).await)
}

/// リスナーをバインドし、Ctrl+C まで処理を続ける
pub async fn serve(addr: SocketAddr, state: SharedState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        "Listening on http://{} (build root: {})",
        listener.local_addr()?,
        state.orchestrator.root().display()
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
