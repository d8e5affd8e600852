//! # API エラー定義
//!
//! ハンドラ・ユースケースで発生するエラーと HTTP レスポンスへの変換。
//!
//! ## 設計方針
//!
//! - **RFC 7807 (Problem Details)**: エラーレスポンスは統一フォーマット
//! - **エラーの変換**: ドメイン層・インフラ層のエラーを HTTP ステータスに
//!   マッピングする
//! - **内部情報の秘匿**: 5xx 系のエラー詳細はログにのみ出力し、
//!   クライアントには汎用メッセージを返す

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notiflow_domain::DomainError;
use notiflow_infra::{InfraError, MailError};
use serde::Serialize;
use thiserror::Error;

/// API 層のエラー
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401: API キーが欠落しているか無効
    #[error("認証に失敗しました")]
    Unauthorized,

    /// 400: リクエストが不正
    #[error("{0}")]
    BadRequest(String),

    /// 403: 他のクライアントのリソースへのアクセス
    #[error("{0}")]
    Forbidden(String),

    /// 404: リソースが存在しない
    #[error("{0}")]
    NotFound(String),

    /// 409: リソースの現在の状態と矛盾する操作
    #[error("{0}")]
    Conflict(String),

    /// 501: 未対応のチャネル
    #[error("{0}")]
    NotImplemented(String),

    /// 502: メールプロバイダ側のエラー
    #[error("メールプロバイダへの送信に失敗しました")]
    Upstream(#[source] MailError),

    /// 500: インフラ層のエラー（NotFound は 404 に変換）
    #[error("内部エラーが発生しました")]
    Infra(#[from] InfraError),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::BadRequest(msg),
            DomainError::NotFound { entity_type, id } => {
                Self::NotFound(format!("{entity_type} が見つかりません: {id}"))
            }
            DomainError::Conflict(msg) => Self::Conflict(msg),
            DomainError::Forbidden(msg) => Self::Forbidden(msg),
        }
    }
}

/// RFC 7807 Problem Details レスポンスボディ
#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title:        &'static str,
    status:       u16,
    detail:       String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Infra(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(status: StatusCode) -> &'static str {
        match status {
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::NOT_IMPLEMENTED => "Not Implemented",
            StatusCode::BAD_GATEWAY => "Bad Gateway",
            _ => "Internal Server Error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 5xx 系は詳細をログに出力し、クライアントには汎用メッセージを返す
        match &self {
            Self::Infra(e) if !e.is_not_found() => {
                tracing::error!(error = %e, span_trace = %e.span_trace(), "インフラエラー");
            }
            Self::Upstream(source) => {
                tracing::warn!(error = %source, "プロバイダエラー");
            }
            _ => {}
        }
        let detail = self.to_string();

        let body = ProblemDetails {
            problem_type: "about:blank",
            title: Self::title(status),
            status: status.as_u16(),
            detail,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_domain_errorが適切なステータスに変換される() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                DomainError::Validation("bad".to_string()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                DomainError::Forbidden("forbidden".to_string()).into(),
                StatusCode::FORBIDDEN,
            ),
            (
                DomainError::Conflict("conflict".to_string()).into(),
                StatusCode::CONFLICT,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected);
        }
    }

    #[test]
    fn test_infra_errorのnot_foundは404になる() {
        let err = ApiError::Infra(InfraError::not_found("Schedule", "SCH-001"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = ApiError::Infra(InfraError::unexpected("boom"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_認証エラーは401になる() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }
}
