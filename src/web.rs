use crate::{
    app::{service::IndexedTransaction, AppError, AppService},
    semantic::{IndexStats, SimilarTransaction, TransactionContext},
    transactions::{Transaction, TransactionCreate, TransactionUpdate},
};
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<AppService>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => log::error!("failed to install signal handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

pub fn router(app: Arc<AppService>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/transactions", get(list).post(create))
        .route(
            "/api/transactions/:id",
            get(get_transaction).patch(update).delete(delete),
        )
        .route("/api/search", post(search))
        .route("/api/context/:id", get(context))
        .route("/api/stats", get(stats))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(app: Arc<AppService>) -> anyhow::Result<()> {
    let listen = app.config().daemon.listen.clone();
    let router = router(app);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    log::info!("listening on {listen}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(app: AppService) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(Arc::new(app)).await })
}

// Wraps `AppError` so handlers can use `?`.
#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            AppError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            AppError::Other(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn create(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<TransactionCreate>,
) -> Result<Json<IndexedTransaction>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    tokio::task::block_in_place(move || app.create(payload))
        .map(Json)
        .map_err(Into::into)
}

async fn list(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<Transaction>>, HttpError> {
    Ok(Json(state.app.list()?))
}

async fn get_transaction(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, HttpError> {
    Ok(Json(state.app.get(id)?))
}

async fn update(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<i64>,
    Json(payload): Json<TransactionUpdate>,
) -> Result<Json<IndexedTransaction>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    tokio::task::block_in_place(move || app.update(id, payload))
        .map(Json)
        .map_err(Into::into)
}

async fn delete(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let app = state.app.clone();
    tokio::task::block_in_place(move || app.delete(id))?;

    Ok(Json(json!({ "deleted": id })))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub k: Option<usize>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Json<Vec<SimilarTransaction>> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    Json(tokio::task::block_in_place(move || {
        app.search(&payload.query, payload.k)
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextParams {
    pub k: Option<usize>,
}

async fn context(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<i64>,
    Query(params): Query<ContextParams>,
) -> Result<Json<TransactionContext>, HttpError> {
    let app = state.app.clone();
    tokio::task::block_in_place(move || app.context(id, params.k))
        .map(Json)
        .map_err(Into::into)
}

async fn stats(State(state): State<Arc<SharedState>>) -> Json<IndexStats> {
    Json(state.app.stats())
}
