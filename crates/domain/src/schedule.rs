//! # 通知スケジュール
//!
//! 予約された通知 1 件を表すエンティティと、その実行ライフサイクルを管理する。
//!
//! 状態遷移は ADT（代数的データ型）で表現し、不正な状態を型レベルで防止する:
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!    │             │
//!    │             ├──▶ pending（リトライ再登録、retry_count をインクリメント）
//!    │             └──▶ failed（retry_count が max_retry に到達）
//!    └──▶ cancelled（外部からの取り消し。pending のみ許可）
//! ```
//!
//! リトライ判定は [`RetryPolicy`] の純粋関数に集約し、
//! エンティティの遷移メソッドと永続化層の双方が同じ規則を共有する。

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::IntoStaticStr;

use crate::{DomainError, api_key::ApiKeyId, value_objects::ScheduleName};

define_uuid_id! {
    /// スケジュール ID
    pub struct ScheduleId;
}

/// 通知チャネル種別
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum ScheduleKind {
    /// メール
    Email,
    /// SMS（スタブ）
    Sms,
    /// カカオトーク通知（スタブ）
    Kakao,
}

impl std::str::FromStr for ScheduleKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "kakao" => Ok(Self::Kakao),
            _ => Err(DomainError::Validation(format!(
                "不正なスケジュール種別: {}",
                s
            ))),
        }
    }
}

/// スケジュールステータス
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum ScheduleStatus {
    /// 実行待ち
    Pending,
    /// 実行中
    Processing,
    /// 実行完了
    Completed,
    /// 失敗（リトライ上限到達、終端状態）
    Failed,
    /// 取り消し
    Cancelled,
}

impl std::str::FromStr for ScheduleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(DomainError::Validation(format!(
                "不正なスケジュールステータス: {}",
                s
            ))),
        }
    }
}

// =============================================================================
// リトライポリシー
// =============================================================================

/// 時刻を分単位に切り詰める（秒・ナノ秒をゼロにする）
///
/// リトライの再登録時刻は分境界に揃える。これにより定期実行サイクルの
/// due 判定と再登録時刻の関係が予測可能になる。
pub fn align_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// リトライ判定の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 再登録する（次回実行時刻つき）
    Reschedule {
        next_scheduled_at: DateTime<Utc>,
    },
    /// リトライ上限に到達した（終端）
    Exhausted,
}

/// リトライポリシー（純粋関数）
///
/// 失敗回数と現在時刻のみから次のアクションを決定する。
/// I/O や時計への依存を持たないため、永続化層の原子的 UPDATE と
/// エンティティの遷移メソッドが同じ判定規則を共有できる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 許容する最大試行回数
    pub max_retry:           i32,
    /// 再登録までの間隔（秒）
    pub retry_interval_secs: i32,
}

impl RetryPolicy {
    /// インクリメント後の失敗回数から次のアクションを決定する
    ///
    /// `failed_count >= max_retry` で打ち切り。`max_retry = 0` の場合は
    /// 初回失敗（`failed_count = 1`）が即座に終端となる。
    /// 再登録時刻は `align_to_minute(now) + retry_interval_secs`。
    pub fn decide(&self, failed_count: i32, now: DateTime<Utc>) -> RetryDecision {
        if failed_count >= self.max_retry {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Reschedule {
                next_scheduled_at: align_to_minute(now)
                    + Duration::seconds(i64::from(self.retry_interval_secs)),
            }
        }
    }
}

// =============================================================================
// スケジュールエンティティ
// =============================================================================

/// スケジュールの状態（ADT ベースステートマシン）
///
/// 各状態で有効なフィールドのみを持たせることで、不正な状態を型レベルで防止する。
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleState {
    /// 実行待ち
    Pending,
    /// 実行中
    Processing,
    /// 実行完了
    Completed(CompletedState),
    /// 失敗（終端）
    Failed,
    /// 取り消し
    Cancelled,
}

/// Completed 状態の固有フィールド
///
/// 完了したスケジュールは必ず実行時刻とプロバイダの実行結果を持つ。
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedState {
    /// 実行時刻（サイクル開始時に一度だけ取得した時刻）
    pub executed_at: DateTime<Utc>,
    /// プロバイダの実行結果（JSON ドキュメント）
    pub result:      JsonValue,
}

/// スケジュールエンティティ
///
/// 共通フィールドを外側に、状態固有フィールドを `state` enum に分離する。
/// `error_message` と `retry_count` はリトライをまたいで保持されるため
/// 共通フィールドとする（pending に戻っても直前の失敗理由が残る）。
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    id: ScheduleId,
    api_key_id: ApiKeyId,
    name: ScheduleName,
    kind: ScheduleKind,
    scheduled_at: DateTime<Utc>,
    timezone: String,
    payload: JsonValue,
    max_retry: i32,
    retry_count: i32,
    retry_interval_secs: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state: ScheduleState,
}

/// スケジュールの新規作成パラメータ
pub struct NewSchedule {
    pub id: ScheduleId,
    pub api_key_id: ApiKeyId,
    pub name: ScheduleName,
    pub kind: ScheduleKind,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub payload: JsonValue,
    pub max_retry: i32,
    pub retry_interval_secs: i32,
    pub now: DateTime<Utc>,
}

/// スケジュールの DB 復元パラメータ
///
/// DB スキーマのフラット構造を表現する。`from_db()` で不変条件を検証して
/// ADT に変換する。
pub struct ScheduleRecord {
    pub id: ScheduleId,
    pub api_key_id: ApiKeyId,
    pub name: ScheduleName,
    pub kind: ScheduleKind,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub payload: JsonValue,
    pub status: ScheduleStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub max_retry: i32,
    pub retry_count: i32,
    pub retry_interval_secs: i32,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `max_retry` の上限（過剰なリトライ登録を防ぐ）
pub const MAX_RETRY_LIMIT: i32 = 10;

/// `retry_interval_secs` の許容範囲
pub const RETRY_INTERVAL_MIN_SECS: i32 = 60;
pub const RETRY_INTERVAL_MAX_SECS: i32 = 3600;

impl Schedule {
    /// 新しいスケジュールを作成する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 実行時刻が過去、リトライ設定が範囲外
    pub fn new(params: NewSchedule) -> Result<Self, DomainError> {
        if params.scheduled_at <= params.now {
            return Err(DomainError::Validation(
                "実行時刻は未来の時刻を指定してください".to_string(),
            ));
        }
        if !(0..=MAX_RETRY_LIMIT).contains(&params.max_retry) {
            return Err(DomainError::Validation(format!(
                "max_retry は 0〜{} の範囲で指定してください",
                MAX_RETRY_LIMIT
            )));
        }
        if !(RETRY_INTERVAL_MIN_SECS..=RETRY_INTERVAL_MAX_SECS)
            .contains(&params.retry_interval_secs)
        {
            return Err(DomainError::Validation(format!(
                "retry_interval_secs は {}〜{} の範囲で指定してください",
                RETRY_INTERVAL_MIN_SECS, RETRY_INTERVAL_MAX_SECS
            )));
        }

        Ok(Self {
            id: params.id,
            api_key_id: params.api_key_id,
            name: params.name,
            kind: params.kind,
            scheduled_at: params.scheduled_at,
            timezone: params.timezone,
            payload: params.payload,
            max_retry: params.max_retry,
            retry_count: 0,
            retry_interval_secs: params.retry_interval_secs,
            error_message: None,
            created_at: params.now,
            updated_at: params.now,
            state: ScheduleState::Pending,
        })
    }

    /// 既存のデータから復元する
    ///
    /// DB のフラット構造から ADT に変換し、不変条件を検証する。
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 不変条件違反
    ///   （例: completed なのに result がない、retry_count が上限を超過）
    pub fn from_db(record: ScheduleRecord) -> Result<Self, DomainError> {
        if record.retry_count < 0 {
            return Err(DomainError::Validation(
                "retry_count は 0 以上である必要があります".to_string(),
            ));
        }
        // max_retry = 0 の場合、唯一許される試行の失敗で retry_count は 1 になる
        if record.retry_count > record.max_retry.max(1) {
            return Err(DomainError::Validation(format!(
                "retry_count({}) が max_retry({}) を超えています",
                record.retry_count, record.max_retry
            )));
        }

        let state = match record.status {
            ScheduleStatus::Pending => ScheduleState::Pending,
            ScheduleStatus::Processing => ScheduleState::Processing,
            ScheduleStatus::Completed => {
                let executed_at = record.executed_at.ok_or_else(|| {
                    DomainError::Validation(
                        "completed スケジュールには executed_at が必要です".to_string(),
                    )
                })?;
                let result = record.result.ok_or_else(|| {
                    DomainError::Validation(
                        "completed スケジュールには result が必要です".to_string(),
                    )
                })?;
                ScheduleState::Completed(CompletedState {
                    executed_at,
                    result,
                })
            }
            ScheduleStatus::Failed => {
                if record.error_message.is_none() {
                    return Err(DomainError::Validation(
                        "failed スケジュールには error_message が必要です".to_string(),
                    ));
                }
                ScheduleState::Failed
            }
            ScheduleStatus::Cancelled => ScheduleState::Cancelled,
        };

        Ok(Self {
            id: record.id,
            api_key_id: record.api_key_id,
            name: record.name,
            kind: record.kind,
            scheduled_at: record.scheduled_at,
            timezone: record.timezone,
            payload: record.payload,
            max_retry: record.max_retry,
            retry_count: record.retry_count,
            retry_interval_secs: record.retry_interval_secs,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at,
            state,
        })
    }

    // Getter メソッド

    pub fn id(&self) -> &ScheduleId {
        &self.id
    }

    pub fn api_key_id(&self) -> &ApiKeyId {
        &self.api_key_id
    }

    pub fn name(&self) -> &ScheduleName {
        &self.name
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn max_retry(&self) -> i32 {
        self.max_retry
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn retry_interval_secs(&self) -> i32 {
        self.retry_interval_secs
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 状態への直接アクセス（パターンマッチ用）
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn status(&self) -> ScheduleStatus {
        match &self.state {
            ScheduleState::Pending => ScheduleStatus::Pending,
            ScheduleState::Processing => ScheduleStatus::Processing,
            ScheduleState::Completed(_) => ScheduleStatus::Completed,
            ScheduleState::Failed => ScheduleStatus::Failed,
            ScheduleState::Cancelled => ScheduleStatus::Cancelled,
        }
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            ScheduleState::Completed(s) => Some(s.executed_at),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&JsonValue> {
        match &self.state {
            ScheduleState::Completed(s) => Some(&s.result),
            _ => None,
        }
    }

    /// このスケジュールに適用されるリトライポリシー
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retry:           self.max_retry,
            retry_interval_secs: self.retry_interval_secs,
        }
    }

    // 状態遷移メソッド

    /// 実行を開始した新しいスケジュールを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: pending 以外の状態で呼び出した場合
    pub fn processing_started(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            ScheduleState::Pending => Ok(Self {
                state: ScheduleState::Processing,
                updated_at: now,
                ..self
            }),
            _ => Err(DomainError::Validation(format!(
                "実行開始は待機状態でのみ可能です（現在: {}）",
                self.status()
            ))),
        }
    }

    /// 実行を完了した新しいスケジュールを返す
    ///
    /// `executed_at` にはサイクル開始時に取得した時刻を記録する。
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: processing 以外の状態で呼び出した場合
    pub fn completed(self, result: JsonValue, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            ScheduleState::Processing => Ok(Self {
                state: ScheduleState::Completed(CompletedState {
                    executed_at: now,
                    result,
                }),
                updated_at: now,
                ..self
            }),
            _ => Err(DomainError::Validation(format!(
                "実行完了は実行中状態でのみ可能です（現在: {}）",
                self.status()
            ))),
        }
    }

    /// 実行失敗を記録した新しいスケジュールを返す
    ///
    /// `retry_count` をインクリメントし、[`RetryPolicy`] の判定に従って
    /// 再登録（pending + 次回実行時刻）または打ち切り（failed）に遷移する。
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: processing 以外の状態で呼び出した場合
    pub fn attempt_failed(
        self,
        error_message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        match self.state {
            ScheduleState::Processing => {
                let failed_count = self.retry_count + 1;
                let decision = self.retry_policy().decide(failed_count, now);
                let error_message = Some(error_message.into());

                match decision {
                    RetryDecision::Exhausted => Ok(Self {
                        state: ScheduleState::Failed,
                        retry_count: failed_count,
                        error_message,
                        updated_at: now,
                        ..self
                    }),
                    RetryDecision::Reschedule { next_scheduled_at } => Ok(Self {
                        state: ScheduleState::Pending,
                        retry_count: failed_count,
                        error_message,
                        scheduled_at: next_scheduled_at,
                        updated_at: now,
                        ..self
                    }),
                }
            }
            _ => Err(DomainError::Validation(format!(
                "失敗記録は実行中状態でのみ可能です（現在: {}）",
                self.status()
            ))),
        }
    }

    /// 取り消した新しいスケジュールを返す
    ///
    /// 実行エンジンの外側からの唯一の遷移。pending のみ取り消し可能で、
    /// 実行中・完了済みのスケジュールは取り消せない。
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: pending 以外の状態で呼び出した場合
    pub fn cancelled(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            ScheduleState::Pending => Ok(Self {
                state: ScheduleState::Cancelled,
                updated_at: now,
                ..self
            }),
            _ => Err(DomainError::Validation(format!(
                "取り消しは待機状態でのみ可能です（現在: {}）",
                self.status()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;

    /// テスト用の固定タイムスタンプ
    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    /// pending かつ実行時刻が過去（due）なレコードを作るヘルパー
    fn due_record(now: DateTime<Utc>) -> ScheduleRecord {
        ScheduleRecord {
            id: ScheduleId::new(),
            api_key_id: ApiKeyId::new(),
            name: ScheduleName::new("テスト通知").unwrap(),
            kind: ScheduleKind::Email,
            scheduled_at: now - Duration::minutes(5),
            timezone: "Asia/Seoul".to_string(),
            payload: json!({"is_bulk": false, "to_email": "user@example.com", "subject": "件名", "html_body": "<p>本文</p>"}),
            status: ScheduleStatus::Pending,
            executed_at: None,
            max_retry: 3,
            retry_count: 0,
            retry_interval_secs: 300,
            result: None,
            error_message: None,
            created_at: now - Duration::hours(1),
            updated_at: now - Duration::hours(1),
        }
    }

    mod retry_policy {
        use pretty_assertions::assert_eq;

        use super::*;

        #[rstest]
        fn test_align_to_minuteは秒とナノ秒をゼロにする(now: DateTime<Utc>) {
            let t = now + Duration::seconds(56) + Duration::nanoseconds(789);
            let aligned = align_to_minute(t);

            assert_eq!(aligned.second(), 0);
            assert_eq!(aligned.nanosecond(), 0);
            assert_eq!(aligned.minute(), t.minute());
        }

        #[rstest]
        fn test_上限未満の失敗は分境界プラス間隔に再登録する(now: DateTime<Utc>) {
            let policy = RetryPolicy {
                max_retry:           3,
                retry_interval_secs: 300,
            };

            let failed_at = now + Duration::seconds(42);
            let decision = policy.decide(1, failed_at);

            assert_eq!(
                decision,
                RetryDecision::Reschedule {
                    next_scheduled_at: align_to_minute(failed_at) + Duration::seconds(300),
                }
            );
        }

        #[rstest]
        fn test_失敗回数が上限に到達したら打ち切る(now: DateTime<Utc>) {
            let policy = RetryPolicy {
                max_retry:           3,
                retry_interval_secs: 300,
            };

            assert_eq!(policy.decide(3, now), RetryDecision::Exhausted);
            assert_eq!(policy.decide(4, now), RetryDecision::Exhausted);
        }

        #[rstest]
        fn test_max_retry_0は初回失敗で打ち切る(now: DateTime<Utc>) {
            let policy = RetryPolicy {
                max_retry:           0,
                retry_interval_secs: 300,
            };

            assert_eq!(policy.decide(1, now), RetryDecision::Exhausted);
        }

        #[rstest]
        fn test_再登録時刻は現在時刻より後になる(now: DateTime<Utc>) {
            // 最小間隔 60 秒なら、分切り詰めで失う最大 59 秒を差し引いても
            // 必ず now より後になる
            let policy = RetryPolicy {
                max_retry:           3,
                retry_interval_secs: 60,
            };
            let late_in_minute = now + Duration::seconds(59);

            let RetryDecision::Reschedule { next_scheduled_at } =
                policy.decide(1, late_in_minute)
            else {
                panic!("Reschedule であること");
            };

            assert!(next_scheduled_at > late_in_minute);
        }
    }

    mod creation {
        use pretty_assertions::assert_eq;

        use super::*;

        fn new_params(now: DateTime<Utc>) -> NewSchedule {
            NewSchedule {
                id: ScheduleId::new(),
                api_key_id: ApiKeyId::new(),
                name: ScheduleName::new("新規通知").unwrap(),
                kind: ScheduleKind::Email,
                scheduled_at: now + Duration::hours(1),
                timezone: "Asia/Seoul".to_string(),
                payload: json!({}),
                max_retry: 3,
                retry_interval_secs: 300,
                now,
            }
        }

        #[rstest]
        fn test_新規作成はpendingでretry_count_0になる(now: DateTime<Utc>) {
            let schedule = Schedule::new(new_params(now)).unwrap();

            assert_eq!(schedule.status(), ScheduleStatus::Pending);
            assert_eq!(schedule.retry_count(), 0);
            assert_eq!(schedule.error_message(), None);
            assert_eq!(schedule.created_at(), now);
        }

        #[rstest]
        fn test_過去の実行時刻は拒否する(now: DateTime<Utc>) {
            let params = NewSchedule {
                scheduled_at: now - Duration::seconds(1),
                ..new_params(now)
            };

            assert!(Schedule::new(params).is_err());
        }

        #[rstest]
        fn test_現在時刻ちょうどの実行時刻は拒否する(now: DateTime<Utc>) {
            let params = NewSchedule {
                scheduled_at: now,
                ..new_params(now)
            };

            assert!(Schedule::new(params).is_err());
        }

        #[rstest]
        #[case(-1)]
        #[case(11)]
        fn test_範囲外のmax_retryは拒否する(now: DateTime<Utc>, #[case] max_retry: i32) {
            let params = NewSchedule {
                max_retry,
                ..new_params(now)
            };

            assert!(Schedule::new(params).is_err());
        }

        #[rstest]
        #[case(59)]
        #[case(3601)]
        fn test_範囲外のretry_intervalは拒否する(
            now: DateTime<Utc>,
            #[case] retry_interval_secs: i32,
        ) {
            let params = NewSchedule {
                retry_interval_secs,
                ..new_params(now)
            };

            assert!(Schedule::new(params).is_err());
        }
    }

    mod transitions {
        use pretty_assertions::assert_eq;

        use super::*;

        #[rstest]
        fn test_pendingから実行開始できる(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now)).unwrap();

            let processing = schedule.processing_started(now).unwrap();

            assert_eq!(processing.status(), ScheduleStatus::Processing);
            assert_eq!(processing.updated_at(), now);
        }

        #[rstest]
        fn test_pending以外から実行開始はエラーになる(now: DateTime<Utc>) {
            let record = ScheduleRecord {
                status: ScheduleStatus::Cancelled,
                ..due_record(now)
            };
            let schedule = Schedule::from_db(record).unwrap();

            assert!(schedule.processing_started(now).is_err());
        }

        #[rstest]
        fn test_完了はexecuted_atとresultを記録する(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now))
                .unwrap()
                .processing_started(now)
                .unwrap();
            let result = json!({"request_id": "req-1", "accepted": 1});

            let completed = schedule.completed(result.clone(), now).unwrap();

            assert_eq!(completed.status(), ScheduleStatus::Completed);
            assert_eq!(completed.executed_at(), Some(now));
            assert_eq!(completed.result(), Some(&result));
        }

        #[rstest]
        fn test_pendingのまま完了はできない(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now)).unwrap();

            assert!(schedule.completed(json!({}), now).is_err());
        }

        #[rstest]
        fn test_上限未満の失敗はpendingに再登録する(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now))
                .unwrap()
                .processing_started(now)
                .unwrap();

            let failed = schedule.attempt_failed("送信失敗", now).unwrap();

            assert_eq!(failed.status(), ScheduleStatus::Pending);
            assert_eq!(failed.retry_count(), 1);
            assert_eq!(failed.error_message(), Some("送信失敗"));
            assert_eq!(
                failed.scheduled_at(),
                align_to_minute(now) + Duration::seconds(300)
            );
        }

        #[rstest]
        fn test_3回目の失敗でfailedになる(now: DateTime<Utc>) {
            let mut schedule = Schedule::from_db(due_record(now)).unwrap();

            // 1 回目・2 回目は pending に戻る
            for attempt in 1..=2 {
                schedule = schedule
                    .processing_started(now)
                    .unwrap()
                    .attempt_failed(format!("{attempt} 回目の失敗"), now)
                    .unwrap();
                assert_eq!(schedule.status(), ScheduleStatus::Pending);
                assert_eq!(schedule.retry_count(), attempt);
            }

            // 3 回目で打ち切り
            let failed = schedule
                .processing_started(now)
                .unwrap()
                .attempt_failed("3 回目の失敗", now)
                .unwrap();

            assert_eq!(failed.status(), ScheduleStatus::Failed);
            assert_eq!(failed.retry_count(), 3);
            assert_eq!(failed.error_message(), Some("3 回目の失敗"));
            assert_eq!(failed.executed_at(), None);
        }

        #[rstest]
        fn test_max_retry_0は初回失敗でfailedになる(now: DateTime<Utc>) {
            let record = ScheduleRecord {
                max_retry: 0,
                ..due_record(now)
            };
            let schedule = Schedule::from_db(record)
                .unwrap()
                .processing_started(now)
                .unwrap();

            let failed = schedule.attempt_failed("初回失敗", now).unwrap();

            assert_eq!(failed.status(), ScheduleStatus::Failed);
            assert_eq!(failed.retry_count(), 1);
        }

        #[rstest]
        fn test_pendingは取り消しできる(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now)).unwrap();

            let cancelled = schedule.cancelled(now).unwrap();

            assert_eq!(cancelled.status(), ScheduleStatus::Cancelled);
        }

        #[rstest]
        fn test_processing中は取り消しできない(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now))
                .unwrap()
                .processing_started(now)
                .unwrap();

            assert!(schedule.cancelled(now).is_err());
        }

        #[rstest]
        fn test_completedは取り消しできない(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now))
                .unwrap()
                .processing_started(now)
                .unwrap()
                .completed(json!({}), now)
                .unwrap();

            assert!(schedule.cancelled(now).is_err());
        }
    }

    mod from_db {
        use pretty_assertions::assert_eq;

        use super::*;

        #[rstest]
        fn test_pendingレコードを復元できる(now: DateTime<Utc>) {
            let schedule = Schedule::from_db(due_record(now)).unwrap();

            assert_eq!(schedule.status(), ScheduleStatus::Pending);
            assert_eq!(schedule.kind(), ScheduleKind::Email);
        }

        #[rstest]
        fn test_completedにはexecuted_atとresultが必要(now: DateTime<Utc>) {
            let record = ScheduleRecord {
                status: ScheduleStatus::Completed,
                executed_at: Some(now),
                result: None,
                ..due_record(now)
            };

            assert!(Schedule::from_db(record).is_err());

            let record = ScheduleRecord {
                status: ScheduleStatus::Completed,
                executed_at: None,
                result: Some(json!({})),
                ..due_record(now)
            };

            assert!(Schedule::from_db(record).is_err());
        }

        #[rstest]
        fn test_failedにはerror_messageが必要(now: DateTime<Utc>) {
            let record = ScheduleRecord {
                status: ScheduleStatus::Failed,
                retry_count: 3,
                error_message: None,
                ..due_record(now)
            };

            assert!(Schedule::from_db(record).is_err());
        }

        #[rstest]
        fn test_retry_countがmax_retryを超えるレコードは拒否する(now: DateTime<Utc>) {
            let record = ScheduleRecord {
                retry_count: 4,
                max_retry: 3,
                ..due_record(now)
            };

            assert!(Schedule::from_db(record).is_err());
        }

        #[rstest]
        fn test_max_retry_0でもretry_count_1は許容する(now: DateTime<Utc>) {
            let record = ScheduleRecord {
                status: ScheduleStatus::Failed,
                max_retry: 0,
                retry_count: 1,
                error_message: Some("初回失敗".to_string()),
                ..due_record(now)
            };

            assert!(Schedule::from_db(record).is_ok());
        }
    }

    mod parsing {
        use pretty_assertions::assert_eq;

        use super::*;

        #[test]
        fn test_ステータスの文字列表現はラウンドトリップする() {
            for status in [
                ScheduleStatus::Pending,
                ScheduleStatus::Processing,
                ScheduleStatus::Completed,
                ScheduleStatus::Failed,
                ScheduleStatus::Cancelled,
            ] {
                let parsed: ScheduleStatus = status.to_string().parse().unwrap();
                assert_eq!(parsed, status);
            }
        }

        #[test]
        fn test_不正なステータス文字列は拒否する() {
            assert!("running".parse::<ScheduleStatus>().is_err());
        }

        #[test]
        fn test_種別の文字列表現はラウンドトリップする() {
            for kind in [ScheduleKind::Email, ScheduleKind::Sms, ScheduleKind::Kakao] {
                let parsed: ScheduleKind = kind.to_string().parse().unwrap();
                assert_eq!(parsed, kind);
            }
        }

        #[test]
        fn test_不正な種別文字列は拒否する() {
            assert!("push".parse::<ScheduleKind>().is_err());
        }
    }
}
