use axum::{Json, extract::State};
use ico_api_types::{ConnectResponse, ReadingView, StateResponse};
use tracing::info;

use crate::{ApiResult, AppState, session_error};

pub(crate) async fn connect(State(state): State<AppState>) -> ApiResult<ConnectResponse> {
    let session = state
        .refresher
        .session()
        .connect()
        .await
        .map_err(|err| session_error(&err))?;

    state.ensure_polling().await;

    Ok(Json(ConnectResponse {
        connected: session.connected,
        network_id: session.network_id,
    }))
}

pub(crate) async fn disconnect(State(state): State<AppState>) -> Json<StateResponse> {
    state.refresher.deactivate().await;
    if let Some(handle) = state.poller.lock().await.take() {
        // Cancelled with the session; just reap it.
        let _ = handle.await;
    }
    info!("page state reset after disconnect");
    Json(snapshot(&state).await)
}

pub(crate) async fn state(State(state): State<AppState>) -> Json<StateResponse> {
    Json(snapshot(&state).await)
}

async fn snapshot(state: &AppState) -> StateResponse {
    let session = state.refresher.session().current().await;
    let refreshed = state.refresher.snapshot();

    StateResponse {
        connected: session.is_some(),
        network_id: session.as_ref().map(|s| s.network_id),
        account: session
            .as_ref()
            .and_then(|s| s.signer())
            .map(|signer| signer.address().to_string()),
        loading: refreshed.loading,
        tokens_to_be_claimed: ReadingView::from(&refreshed.tokens_to_be_claimed),
        tokens_minted: ReadingView::from(&refreshed.tokens_minted),
        balance_of_crypto_dev_tokens: ReadingView::from(&refreshed.balance_of_crypto_dev_tokens),
        refresh_epoch: refreshed.refresh_epoch,
        notices: state.notices.recent(),
    }
}
