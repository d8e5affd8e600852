//! # トリガー状態ハンドラ

use axum::{extract::State, http::HeaderMap, Json};
use notiflow_shared::ApiResponse;

use crate::{
    auth::authenticate, error::ApiError, handler::AppState, trigger::TriggerStatus,
};

/// `GET /api/v1/scheduler/status`
///
/// 定期実行トリガーの有効/稼働状態と直近のサイクル開始時刻を返す。
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<TriggerStatus>>, ApiError> {
    authenticate(state.api_key_repo.as_ref(), &headers).await?;

    Ok(Json(ApiResponse::new(state.trigger.status().await)))
}
