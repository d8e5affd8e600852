//! # API キー認証
//!
//! `X-API-Key` ヘッダによるクライアント認証を行う。
//!
//! ## 設計方針
//!
//! - **ヘッダ必須**: ヘッダの欠落・未知のキー・無効化済みキーはすべて
//!   401 で区別しない（キーの存在を漏らさない）
//! - **リソーススコープ**: 認証されたキーがリソースの所有者となり、
//!   スケジュールの参照・取り消しはキー単位に制限される

use axum::http::HeaderMap;
use notiflow_domain::api_key::ApiKey;
use notiflow_infra::repository::ApiKeyRepository;

use crate::error::ApiError;

/// API キーを載せるリクエストヘッダ名
pub const API_KEY_HEADER: &str = "x-api-key";

/// リクエストヘッダから API キーを認証する
///
/// # Errors
///
/// - `ApiError::Unauthorized`: ヘッダが欠落、またはキーが無効
pub async fn authenticate(
    api_key_repo: &dyn ApiKeyRepository,
    headers: &HeaderMap,
) -> Result<ApiKey, ApiError> {
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    api_key_repo
        .find_by_key(key)
        .await?
        .ok_or(ApiError::Unauthorized)
}
