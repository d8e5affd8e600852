//! # ヘルスチェックハンドラ

use axum::Json;
use notiflow_shared::HealthResponse;

/// `GET /health`
///
/// 認証なしで呼び出せる死活監視用エンドポイント。
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status:  "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
