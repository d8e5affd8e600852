//! # スケジュール管理ユースケース
//!
//! スケジュールの作成・一覧・取得・取り消しを担当する。
//!
//! ## 設計方針
//!
//! - **所有権スコープ**: 一覧は認証キーのスケジュールのみ返し、
//!   他キーのスケジュールへのアクセスは 403 とする
//! - **取り消しは pending のみ**: 実行中・完了・失敗・取り消し済みの
//!   スケジュールは取り消せない

use std::sync::Arc;

use chrono::{DateTime, Utc};
use notiflow_domain::{
    api_key::ApiKey,
    clock::Clock,
    schedule::{NewSchedule, Schedule, ScheduleId, ScheduleKind, ScheduleStatus},
    value_objects::ScheduleName,
};
use notiflow_infra::repository::{ScheduleFilter, ScheduleRepository};
use serde_json::Value as JsonValue;

use crate::error::ApiError;

/// リトライ設定のデフォルト値
pub const DEFAULT_MAX_RETRY: i32 = 3;
pub const DEFAULT_RETRY_INTERVAL_SECS: i32 = 300;

/// タイムゾーンのデフォルト値
pub const DEFAULT_TIMEZONE: &str = "Asia/Seoul";

/// スケジュール作成の入力
///
/// ペイロードはハンドラ側でワイヤ形式にエンコード済みのもの。
pub struct CreateScheduleInput {
    pub name:                String,
    pub kind:                ScheduleKind,
    pub scheduled_at:        DateTime<Utc>,
    pub timezone:            Option<String>,
    pub payload:             JsonValue,
    pub max_retry:           Option<i32>,
    pub retry_interval_secs: Option<i32>,
}

/// 一覧取得の入力
#[derive(Default)]
pub struct ListSchedulesInput {
    pub status: Option<ScheduleStatus>,
    pub kind:   Option<ScheduleKind>,
    pub limit:  Option<i64>,
    pub offset: Option<i64>,
}

/// 一覧取得の結果（1 ページ分）
pub struct SchedulePage {
    pub schedules: Vec<Schedule>,
    pub total:     i64,
    pub limit:     i64,
    pub offset:    i64,
}

/// 一覧のページサイズ上限
const LIST_LIMIT_MAX: i64 = 100;
const LIST_LIMIT_DEFAULT: i64 = 20;

/// スケジュール管理ユースケース
pub struct ScheduleUseCase {
    schedule_repo: Arc<dyn ScheduleRepository>,
    clock:         Arc<dyn Clock>,
}

impl ScheduleUseCase {
    pub fn new(schedule_repo: Arc<dyn ScheduleRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            schedule_repo,
            clock,
        }
    }

    /// スケジュールを作成する
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn create(
        &self,
        api_key: &ApiKey,
        input: CreateScheduleInput,
    ) -> Result<Schedule, ApiError> {
        let schedule = Schedule::new(NewSchedule {
            id: ScheduleId::new(),
            api_key_id: api_key.id().clone(),
            name: ScheduleName::new(input.name)?,
            kind: input.kind,
            scheduled_at: input.scheduled_at,
            timezone: input.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            payload: input.payload,
            max_retry: input.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
            retry_interval_secs: input
                .retry_interval_secs
                .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS),
            now: self.clock.now(),
        })?;

        self.schedule_repo.insert(&schedule).await?;

        tracing::info!(schedule_id = %schedule.id(), "スケジュールを登録しました");

        Ok(schedule)
    }

    /// 認証キーが所有するスケジュールを一覧取得する（作成日時の降順）
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn list(
        &self,
        api_key: &ApiKey,
        input: ListSchedulesInput,
    ) -> Result<SchedulePage, ApiError> {
        let filter = ScheduleFilter {
            status:     input.status,
            kind:       input.kind,
            api_key_id: Some(api_key.id().clone()),
        };
        let limit = input
            .limit
            .unwrap_or(LIST_LIMIT_DEFAULT)
            .clamp(1, LIST_LIMIT_MAX);
        let offset = input.offset.unwrap_or(0).max(0);

        let schedules = self.schedule_repo.list(&filter, limit, offset).await?;
        let total = self.schedule_repo.count(&filter).await?;

        Ok(SchedulePage {
            schedules,
            total,
            limit,
            offset,
        })
    }

    /// スケジュールを取得する
    ///
    /// # Errors
    ///
    /// - `ApiError::NotFound`: スケジュールが存在しない
    /// - `ApiError::Forbidden`: 他のキーが所有するスケジュール
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn get(&self, api_key: &ApiKey, id: &ScheduleId) -> Result<Schedule, ApiError> {
        let schedule = self
            .schedule_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("スケジュールが見つかりません: {id}")))?;

        if schedule.api_key_id() != api_key.id() {
            return Err(ApiError::Forbidden(
                "このスケジュールへのアクセス権がありません".to_string(),
            ));
        }

        Ok(schedule)
    }

    /// スケジュールを取り消す
    ///
    /// # Errors
    ///
    /// - `ApiError::NotFound`: スケジュールが存在しない
    /// - `ApiError::Forbidden`: 他のキーが所有するスケジュール
    /// - `ApiError::Conflict`: pending 以外の状態
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn cancel(&self, api_key: &ApiKey, id: &ScheduleId) -> Result<Schedule, ApiError> {
        // 所有権と存在チェックを先に行い、404 / 403 / 409 を区別する
        let schedule = self.get(api_key, id).await?;

        let cancelled = self
            .schedule_repo
            .cancel(id, self.clock.now())
            .await?
            .ok_or_else(|| {
                ApiError::Conflict(format!(
                    "{} 状態のスケジュールは取り消せません",
                    schedule.status(),
                ))
            })?;

        tracing::info!(schedule_id = %id, "スケジュールを取り消しました");

        Ok(cancelled)
    }
}
