mod config;
mod notices;
mod page;
mod tokens;
mod wallet;

use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use config::AppConfig;
use ico_chain_evm::{CryptoDevTokenLedger, CryptoDevsNftLedger, HttpWalletConnector};
use ico_refresher::StateRefresher;
use ico_session::{SessionError, SessionManager};
use notices::NoticeBoard;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

pub(crate) type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) refresher: Arc<StateRefresher>,
    pub(crate) notices: Arc<NoticeBoard>,
    /// Polling task of the live session, if any.
    pub(crate) poller: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    /// Starts polling for the current session unless a poller is still running.
    pub(crate) async fn ensure_polling(&self) {
        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *poller = self.refresher.spawn_polling().await;
    }

    /// Page load: connect and poll. Failures leave the connect button up.
    pub(crate) async fn activate(&self) {
        let mut poller = self.poller.lock().await;
        if let Some(handle) = self.refresher.activate().await {
            *poller = Some(handle);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;
    let notices = Arc::new(NoticeBoard::default());

    let session = Arc::new(SessionManager::new(
        config.session_config(),
        Arc::new(HttpWalletConnector::new(Some(config.rpc_url.clone()))),
        notices.clone(),
    ));
    let refresher = Arc::new(StateRefresher::new(
        session,
        Arc::new(CryptoDevTokenLedger::new(config.token_contract)),
        Arc::new(CryptoDevsNftLedger::new(config.nft_contract)),
        notices.clone(),
        config.refresher_config(),
    ));

    let state = AppState {
        refresher: refresher.clone(),
        notices,
        poller: Arc::new(Mutex::new(None)),
    };

    let activation = state.clone();
    tokio::spawn(async move { activation.activate().await });

    let app = router(state);

    info!(
        "ico-dapp listening on {} (rpc {}, chain {})",
        config.bind_addr, config.rpc_url, config.required_chain_id
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher.deactivate().await;
    Ok(())
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page::index))
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/state", get(wallet::state))
        .route("/wallet/connect", post(wallet::connect))
        .route("/wallet/disconnect", post(wallet::disconnect))
        .route("/tokens/mint", post(tokens::mint))
        .route("/tokens/claim", post(tokens::claim))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "ico-dapp",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "ico-dapp",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub(crate) fn conflict(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::CONFLICT, message)
}

pub(crate) fn bad_gateway(err: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::BAD_GATEWAY, &format!("{err:#}"))
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn session_error(err: &SessionError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        SessionError::Provider(source) => bad_gateway(format!("{err}: {source:#}")),
        SessionError::NetworkMismatch { .. }
        | SessionError::NotConnected
        | SessionError::NoAccounts => conflict(&err.to_string()),
    }
}

pub(crate) fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
