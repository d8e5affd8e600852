//! # スケジュールリポジトリ
//!
//! 通知スケジュールの永続化と状態遷移の書き込みを担当する。
//!
//! ## 設計方針
//!
//! - **条件付き UPDATE**: 状態遷移は `WHERE status = '...'` 付きの UPDATE で
//!   行い、同時実行時の二重処理を DB レベルで防ぐ。対象行がなければ
//!   `RETURNING` が空になるため、競合を呼び出し側で検知できる
//! - **失敗記録の原子性**: リトライ回数の加算・再登録時刻の計算・終端判定を
//!   1 本の UPDATE 文で行い、read-modify-write の競合窓を作らない
//! - **型付き更新**: 自由なカラム更新は公開せず、操作ごとの専用メソッドと
//!   型付きパラメータのみを提供する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{
    api_key::ApiKeyId,
    schedule::{Schedule, ScheduleId, ScheduleKind, ScheduleRecord, ScheduleStatus},
    value_objects::ScheduleName,
};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 一覧取得の絞り込み条件
///
/// `None` のフィールドは条件に含めない。
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub status:     Option<ScheduleStatus>,
    pub kind:       Option<ScheduleKind>,
    pub api_key_id: Option<ApiKeyId>,
}

/// 完了遷移のパラメータ
#[derive(Debug, Clone)]
pub struct ScheduleCompletion {
    /// 実行時刻（実行サイクル開始時に一度だけ取得した時刻）
    pub executed_at: DateTime<Utc>,
    /// プロバイダの実行結果
    pub result:      JsonValue,
}

/// スケジュールリポジトリのトレイト
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// スケジュールを挿入する
    async fn insert(&self, schedule: &Schedule) -> Result<(), InfraError>;

    /// ID でスケジュールを検索する
    async fn find_by_id(&self, id: &ScheduleId) -> Result<Option<Schedule>, InfraError>;

    /// 実行対象のスケジュールを取得する
    ///
    /// `status = pending` かつ `scheduled_at <= now` の行を
    /// `scheduled_at` 昇順で返す。`kind` を指定すると種別で絞り込む。
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        kind: Option<ScheduleKind>,
    ) -> Result<Vec<Schedule>, InfraError>;

    /// 条件に合致するスケジュールを一覧取得する（作成日時の降順）
    async fn list(
        &self,
        filter: &ScheduleFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Schedule>, InfraError>;

    /// 条件に合致するスケジュールの総数を取得する
    async fn count(&self, filter: &ScheduleFilter) -> Result<i64, InfraError>;

    /// pending のスケジュールを processing に遷移させる
    ///
    /// 対象が pending でなくなっていた場合（並行キャンセル等）は
    /// `Ok(None)` を返す。
    async fn mark_processing(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, InfraError>;

    /// processing のスケジュールを completed に遷移させる
    ///
    /// # Errors
    ///
    /// - `InfraError::NotFound`: 対象が存在しないか processing でない
    async fn complete(
        &self,
        id: &ScheduleId,
        completion: &ScheduleCompletion,
    ) -> Result<Schedule, InfraError>;

    /// pending のスケジュールを cancelled に遷移させる
    ///
    /// 対象が pending でなくなっていた場合は `Ok(None)` を返す。
    async fn cancel(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, InfraError>;

    /// processing のスケジュールの失敗を記録する
    ///
    /// リトライ回数を加算し、上限に達していれば failed（終端）、
    /// 達していなければ再登録時刻を設定して pending に戻す。
    /// 再登録時刻は `now` の分境界に丸めた時刻 + `retry_interval_secs`。
    ///
    /// # Errors
    ///
    /// - `InfraError::NotFound`: 対象が存在しないか processing でない
    async fn record_failure(
        &self,
        id: &ScheduleId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Schedule, InfraError>;
}

/// SELECT / RETURNING で取得するカラム一覧
const SCHEDULE_COLUMNS: &str = "id, api_key_id, name, kind, scheduled_at, timezone, payload, \
     status, executed_at, max_retry, retry_count, retry_interval_secs, result, error_message, \
     created_at, updated_at";

/// schedules テーブルの行
#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id:                  Uuid,
    api_key_id:          Uuid,
    name:                String,
    kind:                String,
    scheduled_at:        DateTime<Utc>,
    timezone:            String,
    payload:             JsonValue,
    status:              String,
    executed_at:         Option<DateTime<Utc>>,
    max_retry:           i32,
    retry_count:         i32,
    retry_interval_secs: i32,
    result:              Option<JsonValue>,
    error_message:       Option<String>,
    created_at:          DateTime<Utc>,
    updated_at:          DateTime<Utc>,
}

impl ScheduleRow {
    /// 行をドメインエンティティに復元する
    ///
    /// DB に不正な行が存在する場合（不変条件違反）は `Unexpected` とする。
    fn into_schedule(self) -> Result<Schedule, InfraError> {
        let record = ScheduleRecord {
            id:                  ScheduleId::from_uuid(self.id),
            api_key_id:          ApiKeyId::from_uuid(self.api_key_id),
            name:                ScheduleName::new(self.name)
                .map_err(|e| InfraError::unexpected(format!("不正な name カラム: {e}")))?,
            kind:                self
                .kind
                .parse()
                .map_err(|e| InfraError::unexpected(format!("不正な kind カラム: {e}")))?,
            scheduled_at:        self.scheduled_at,
            timezone:            self.timezone,
            payload:             self.payload,
            status:              self
                .status
                .parse()
                .map_err(|e| InfraError::unexpected(format!("不正な status カラム: {e}")))?,
            executed_at:         self.executed_at,
            max_retry:           self.max_retry,
            retry_count:         self.retry_count,
            retry_interval_secs: self.retry_interval_secs,
            result:              self.result,
            error_message:       self.error_message,
            created_at:          self.created_at,
            updated_at:          self.updated_at,
        };

        Schedule::from_db(record)
            .map_err(|e| InfraError::unexpected(format!("スケジュールの復元に失敗しました: {e}")))
    }
}

/// PostgreSQL 実装
#[derive(Clone)]
pub struct PostgresScheduleRepository {
    pool: PgPool,
}

impl PostgresScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for PostgresScheduleRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, schedule: &Schedule) -> Result<(), InfraError> {
        sqlx::query(
            "INSERT INTO schedules (id, api_key_id, name, kind, scheduled_at, timezone, payload, \
             status, executed_at, max_retry, retry_count, retry_interval_secs, result, \
             error_message, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(schedule.id().as_uuid())
        .bind(schedule.api_key_id().as_uuid())
        .bind(schedule.name().as_str())
        .bind(schedule.kind().to_string())
        .bind(schedule.scheduled_at())
        .bind(schedule.timezone())
        .bind(schedule.payload())
        .bind(schedule.status().to_string())
        .bind(schedule.executed_at())
        .bind(schedule.max_retry())
        .bind(schedule.retry_count())
        .bind(schedule.retry_interval_secs())
        .bind(schedule.result())
        .bind(schedule.error_message())
        .bind(schedule.created_at())
        .bind(schedule.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_by_id(&self, id: &ScheduleId) -> Result<Option<Schedule>, InfraError> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1");
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScheduleRow::into_schedule).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        kind: Option<ScheduleKind>,
    ) -> Result<Vec<Schedule>, InfraError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules \
             WHERE status = 'pending' AND scheduled_at <= $1 \
               AND ($2::varchar IS NULL OR kind = $2) \
             ORDER BY scheduled_at ASC",
        );
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(now)
            .bind(kind.map(|k| k.to_string()))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn list(
        &self,
        filter: &ScheduleFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Schedule>, InfraError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules \
             WHERE ($1::varchar IS NULL OR status = $1) \
               AND ($2::varchar IS NULL OR kind = $2) \
               AND ($3::uuid IS NULL OR api_key_id = $3) \
             ORDER BY created_at DESC \
             LIMIT $4 OFFSET $5",
        );
        let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(filter.status.map(|s| s.to_string()))
            .bind(filter.kind.map(|k| k.to_string()))
            .bind(filter.api_key_id.as_ref().map(ApiKeyId::as_uuid))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn count(&self, filter: &ScheduleFilter) -> Result<i64, InfraError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM schedules \
             WHERE ($1::varchar IS NULL OR status = $1) \
               AND ($2::varchar IS NULL OR kind = $2) \
               AND ($3::uuid IS NULL OR api_key_id = $3)",
        )
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.kind.map(|k| k.to_string()))
        .bind(filter.api_key_id.as_ref().map(ApiKeyId::as_uuid))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn mark_processing(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, InfraError> {
        let sql = format!(
            "UPDATE schedules \
             SET status = 'processing', updated_at = $2 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {SCHEDULE_COLUMNS}",
        );
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(id.as_uuid())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScheduleRow::into_schedule).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn complete(
        &self,
        id: &ScheduleId,
        completion: &ScheduleCompletion,
    ) -> Result<Schedule, InfraError> {
        let sql = format!(
            "UPDATE schedules \
             SET status = 'completed', executed_at = $2, result = $3, updated_at = $2 \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {SCHEDULE_COLUMNS}",
        );
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(id.as_uuid())
            .bind(completion.executed_at)
            .bind(&completion.result)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| InfraError::not_found("Schedule", id.to_string()))?;

        row.into_schedule()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn cancel(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, InfraError> {
        let sql = format!(
            "UPDATE schedules \
             SET status = 'cancelled', updated_at = $2 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {SCHEDULE_COLUMNS}",
        );
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(id.as_uuid())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScheduleRow::into_schedule).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn record_failure(
        &self,
        id: &ScheduleId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Schedule, InfraError> {
        // 終端判定と再登録時刻の計算は RetryPolicy::decide と同じ規則。
        // max_retry = 0 の場合は加算後の retry_count = 1 >= 0 で即終端になる。
        let sql = format!(
            "UPDATE schedules \
             SET retry_count   = retry_count + 1, \
                 error_message = $2, \
                 updated_at    = $3, \
                 status        = CASE WHEN retry_count + 1 >= max_retry \
                                      THEN 'failed' ELSE 'pending' END, \
                 scheduled_at  = CASE WHEN retry_count + 1 >= max_retry \
                                      THEN scheduled_at \
                                      ELSE date_trunc('minute', $3::timestamptz) \
                                           + make_interval(secs => retry_interval_secs) END \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {SCHEDULE_COLUMNS}",
        );
        let row = sqlx::query_as::<_, ScheduleRow>(&sql)
            .bind(id.as_uuid())
            .bind(error_message)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| InfraError::not_found("Schedule", id.to_string()))?;

        row.into_schedule()
    }
}
