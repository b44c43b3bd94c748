use axum::{Json, extract::State, http::StatusCode};
use ico_api_types::{MintRequest, TokenAmount, TxResponse};
use ico_refresher::{ActionError, TxOutcome};

use crate::{ApiResult, AppState, ErrorResponse, bad_gateway, bad_request, conflict, session_error};

pub(crate) async fn mint(
    State(state): State<AppState>,
    Json(request): Json<MintRequest>,
) -> ApiResult<TxResponse> {
    let amount = request
        .amount
        .parse::<TokenAmount>()
        .map_err(|err| bad_request(&err.to_string()))?;

    let outcome = state
        .refresher
        .mint(amount)
        .await
        .map_err(|err| action_error(&err))?;
    Ok(Json(confirmed(outcome)))
}

pub(crate) async fn claim(State(state): State<AppState>) -> ApiResult<TxResponse> {
    let outcome = state
        .refresher
        .claim()
        .await
        .map_err(|err| action_error(&err))?;
    Ok(Json(confirmed(outcome)))
}

fn confirmed(outcome: TxOutcome) -> TxResponse {
    TxResponse {
        tx_hash: outcome.tx_hash.to_string(),
        confirmed: true,
    }
}

fn action_error(err: &ActionError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        ActionError::InvalidAmount | ActionError::PaymentOverflow { .. } => {
            bad_request(&err.to_string())
        }
        ActionError::Session(inner) => session_error(inner),
        ActionError::Reverted { .. } => conflict(&err.to_string()),
        ActionError::TransactionFailure(source) => bad_gateway(format!("{err}: {source:#}")),
    }
}
