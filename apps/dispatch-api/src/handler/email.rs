//! # メール送信・スケジュール管理ハンドラ
//!
//! 即時送信とスケジュール CRUD、および手動実行エンドポイント。

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use notiflow_domain::{
    email::{EmailContent, EmailPayload, EmailRecipient},
    schedule::{Schedule, ScheduleId, ScheduleKind, ScheduleStatus},
};
use notiflow_infra::InfraError;
use notiflow_shared::{ApiResponse, PaginatedResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::authenticate,
    error::ApiError,
    handler::AppState,
    trigger::CycleOutcome,
    usecase::{
        ExecutionReport,
        schedule::{CreateScheduleInput, ListSchedulesInput},
    },
};

// =============================================================================
// DTO
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to_email:       String,
    #[serde(default)]
    pub to_name:        Option<String>,
    pub subject:        String,
    pub html_body:      String,
    #[serde(default)]
    pub sender_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecipientRequest {
    pub email: String,
    #[serde(default)]
    pub name:  Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendBulkEmailRequest {
    pub recipients:     Vec<RecipientRequest>,
    pub subject:        String,
    pub html_body:      String,
    #[serde(default)]
    pub sender_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub request_id: String,
    pub accepted:   usize,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleEmailRequest {
    pub name:                String,
    pub scheduled_at:        DateTime<Utc>,
    #[serde(default)]
    pub timezone:            Option<String>,
    pub to_email:            String,
    #[serde(default)]
    pub to_name:             Option<String>,
    pub subject:             String,
    pub html_body:           String,
    #[serde(default)]
    pub sender_address:      Option<String>,
    #[serde(default)]
    pub max_retry:           Option<i32>,
    #[serde(default)]
    pub retry_interval_secs: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBulkEmailRequest {
    pub name:                String,
    pub scheduled_at:        DateTime<Utc>,
    #[serde(default)]
    pub timezone:            Option<String>,
    pub recipients:          Vec<RecipientRequest>,
    pub subject:             String,
    pub html_body:           String,
    #[serde(default)]
    pub sender_address:      Option<String>,
    #[serde(default)]
    pub max_retry:           Option<i32>,
    #[serde(default)]
    pub retry_interval_secs: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub id:                  ScheduleId,
    pub name:                String,
    pub kind:                ScheduleKind,
    pub status:              ScheduleStatus,
    pub scheduled_at:        DateTime<Utc>,
    pub timezone:            String,
    pub max_retry:           i32,
    pub retry_count:         i32,
    pub retry_interval_secs: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at:         Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message:       Option<String>,
    pub created_at:          DateTime<Utc>,
    pub updated_at:          DateTime<Utc>,
}

impl From<&Schedule> for ScheduleResponse {
    fn from(schedule: &Schedule) -> Self {
        Self {
            id:                  schedule.id().clone(),
            name:                schedule.name().to_string(),
            kind:                schedule.kind(),
            status:              schedule.status(),
            scheduled_at:        schedule.scheduled_at(),
            timezone:            schedule.timezone().to_string(),
            max_retry:           schedule.max_retry(),
            retry_count:         schedule.retry_count(),
            retry_interval_secs: schedule.retry_interval_secs(),
            executed_at:         schedule.executed_at(),
            error_message:       schedule.error_message().map(str::to_string),
            created_at:          schedule.created_at(),
            updated_at:          schedule.updated_at(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub kind:   Option<String>,
    #[serde(default)]
    pub limit:  Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteSchedulesQuery {
    #[serde(default)]
    pub kind: Option<String>,
}

fn recipient(request: RecipientRequest) -> EmailRecipient {
    EmailRecipient {
        email: request.email,
        name:  request.name,
    }
}

// =============================================================================
// 即時送信
// =============================================================================

/// `POST /api/v1/email/send`
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendEmailRequest>,
) -> Result<Json<ApiResponse<SendEmailResponse>>, ApiError> {
    let api_key = authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let payload = EmailPayload::single(
        recipient(RecipientRequest {
            email: request.to_email,
            name:  request.to_name,
        }),
        EmailContent::new(request.subject, request.html_body, request.sender_address)?,
    )?;

    let delivery = state
        .email_usecase
        .deliver(&api_key, &payload)
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Json(ApiResponse::new(SendEmailResponse {
        request_id: delivery.request_id,
        accepted:   delivery.accepted,
    })))
}

/// `POST /api/v1/email/send/bulk`
pub async fn send_bulk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendBulkEmailRequest>,
) -> Result<Json<ApiResponse<SendEmailResponse>>, ApiError> {
    let api_key = authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let payload = EmailPayload::bulk(
        request.recipients.into_iter().map(recipient).collect(),
        EmailContent::new(request.subject, request.html_body, request.sender_address)?,
    )?;

    let delivery = state
        .email_usecase
        .deliver(&api_key, &payload)
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Json(ApiResponse::new(SendEmailResponse {
        request_id: delivery.request_id,
        accepted:   delivery.accepted,
    })))
}

// =============================================================================
// スケジュール管理
// =============================================================================

/// `POST /api/v1/email/schedule`
pub async fn create_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ScheduleEmailRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduleResponse>>), ApiError> {
    let api_key = authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let payload = EmailPayload::single(
        recipient(RecipientRequest {
            email: request.to_email,
            name:  request.to_name,
        }),
        EmailContent::new(request.subject, request.html_body, request.sender_address)?,
    )?;

    let schedule = state
        .schedule_usecase
        .create(&api_key, CreateScheduleInput {
            name:                request.name,
            kind:                ScheduleKind::Email,
            scheduled_at:        request.scheduled_at,
            timezone:            request.timezone,
            payload:             payload.encode(),
            max_retry:           request.max_retry,
            retry_interval_secs: request.retry_interval_secs,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(ScheduleResponse::from(&schedule))),
    ))
}

/// `POST /api/v1/email/schedule/bulk`
pub async fn create_bulk_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ScheduleBulkEmailRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduleResponse>>), ApiError> {
    let api_key = authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let payload = EmailPayload::bulk(
        request.recipients.into_iter().map(recipient).collect(),
        EmailContent::new(request.subject, request.html_body, request.sender_address)?,
    )?;

    let schedule = state
        .schedule_usecase
        .create(&api_key, CreateScheduleInput {
            name:                request.name,
            kind:                ScheduleKind::Email,
            scheduled_at:        request.scheduled_at,
            timezone:            request.timezone,
            payload:             payload.encode(),
            max_retry:           request.max_retry,
            retry_interval_secs: request.retry_interval_secs,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(ScheduleResponse::from(&schedule))),
    ))
}

/// `GET /api/v1/email/schedules`
pub async fn list_schedules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListSchedulesQuery>,
) -> Result<Json<PaginatedResponse<ScheduleResponse>>, ApiError> {
    let api_key = authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let status = query
        .status
        .map(|s| s.parse::<ScheduleStatus>())
        .transpose()?;
    let kind = query.kind.map(|k| k.parse::<ScheduleKind>()).transpose()?;

    let page = state
        .schedule_usecase
        .list(&api_key, ListSchedulesInput {
            status,
            kind,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;

    Ok(Json(PaginatedResponse::new(
        page.schedules.iter().map(ScheduleResponse::from).collect(),
        page.total,
        page.limit,
        page.offset,
    )))
}

/// `GET /api/v1/email/schedules/{id}`
pub async fn get_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScheduleResponse>>, ApiError> {
    let api_key = authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let schedule = state
        .schedule_usecase
        .get(&api_key, &ScheduleId::from_uuid(id))
        .await?;

    Ok(Json(ApiResponse::new(ScheduleResponse::from(&schedule))))
}

/// `DELETE /api/v1/email/schedules/{id}`
pub async fn cancel_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScheduleResponse>>, ApiError> {
    let api_key = authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let cancelled = state
        .schedule_usecase
        .cancel(&api_key, &ScheduleId::from_uuid(id))
        .await?;

    Ok(Json(ApiResponse::new(ScheduleResponse::from(&cancelled))))
}

// =============================================================================
// 手動実行
// =============================================================================

/// `POST /api/v1/email/schedules/execute`
///
/// 実行時刻を迎えたスケジュールを即座にディスパッチする。
/// 本番環境では外部スケジューラからこのエンドポイントを定期的に叩く。
/// 実行中のサイクルがある場合は 409 を返す。
pub async fn execute_schedules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExecuteSchedulesQuery>,
) -> Result<Json<ApiResponse<ExecutionReport>>, ApiError> {
    authenticate(state.api_key_repo.as_ref(), &headers).await?;

    let kind = query.kind.map(|k| k.parse::<ScheduleKind>()).transpose()?;

    match state.trigger.run_cycle(kind).await {
        CycleOutcome::Completed(report) => Ok(Json(ApiResponse::new(report))),
        CycleOutcome::Skipped => Err(ApiError::Conflict(
            "実行サイクルが既に実行中です".to_string(),
        )),
        CycleOutcome::Failed(message) => Err(InfraError::unexpected(message).into()),
    }
}
