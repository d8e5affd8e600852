//! # SMS 送信ハンドラ
//!
//! ルーティングだけ先行して用意しているスタブ。プロバイダ契約後に
//! メールと同じ構成（ユースケース + プロバイダクライアント）で実装する。

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;

use crate::{auth::authenticate, error::ApiError, handler::AppState};

#[derive(Debug, Deserialize)]
pub struct SendSmsRequest {
    pub to_number: String,
    pub body:      String,
}

/// `POST /api/v1/sms/send`
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(_request): Json<SendSmsRequest>,
) -> Result<(), ApiError> {
    authenticate(state.api_key_repo.as_ref(), &headers).await?;

    Err(ApiError::NotImplemented(
        "SMS 送信は現在未対応です".to_string(),
    ))
}
