//! # HTTP ハンドラ
//!
//! ルーティング定義と各エンドポイントのハンドラ。
//!
//! ## 設計方針
//!
//! - **認証は各ハンドラで実施**: ヘルスチェック以外のすべての
//!   エンドポイントは `X-API-Key` 認証を必要とする
//! - **薄いハンドラ**: DTO の変換と認証のみを行い、ロジックは
//!   ユースケース層に委譲する
//!
//! ## モジュール構成
//!
//! - [`email`] - メール即時送信・スケジュール管理
//! - [`sms`] - SMS 送信（未対応スタブ)
//! - [`scheduler`] - トリガー状態の参照
//! - [`health`] - ヘルスチェック

pub mod email;
pub mod health;
pub mod scheduler;
pub mod sms;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use notiflow_infra::repository::ApiKeyRepository;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    trigger::ExecutionTrigger,
    usecase::{EmailUseCase, ScheduleUseCase},
};

/// ハンドラ間で共有されるアプリケーション状態
#[derive(Clone)]
pub struct AppState {
    pub api_key_repo:     Arc<dyn ApiKeyRepository>,
    pub email_usecase:    Arc<EmailUseCase>,
    pub schedule_usecase: Arc<ScheduleUseCase>,
    pub trigger:          Arc<ExecutionTrigger>,
}

/// アプリケーションのルーターを構築する
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::check))
        .nest("/api/v1", api_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/email/send", post(email::send))
        .route("/email/send/bulk", post(email::send_bulk))
        .route("/email/schedule", post(email::create_schedule))
        .route("/email/schedule/bulk", post(email::create_bulk_schedule))
        .route("/email/schedules", get(email::list_schedules))
        .route("/email/schedules/execute", post(email::execute_schedules))
        .route(
            "/email/schedules/{id}",
            get(email::get_schedule).delete(email::cancel_schedule),
        )
        .route("/sms/send", post(sms::send))
        .route("/scheduler/status", get(scheduler::status))
}
