//! # スケジュール実行エンジン
//!
//! 実行時刻を迎えたスケジュールを取得し、送信単位にディスパッチする。
//!
//! ## 設計方針
//!
//! - **実行時刻はサイクルで一度だけ取得**: サイクル内のすべての判定と
//!   完了時刻に同じ時刻を使う
//! - **processing 遷移はディスパッチループ内で同期的に行う**: 遷移が
//!   確定してから送信タスクを起動するため、同じスケジュールが二重に
//!   送信されることはない。遷移できなかった対象（並行取り消し等）は
//!   スキップとして計上する
//! - **同時送信数の制限**: `Semaphore` で同時に実行される送信タスク数を
//!   制限する。無制限の spawn は対象件数が多いときにプロバイダと
//!   接続プールを圧迫するため行わない
//! - **送信単位のエラーはサイクルを止めない**: 個々の失敗はリトライ
//!   機構に委ね、レポートに計上するだけに留める

use std::sync::Arc;

use chrono::{DateTime, Utc};
use notiflow_domain::{
    clock::Clock,
    email::EmailPayload,
    schedule::{Schedule, ScheduleId, ScheduleKind},
};
use notiflow_infra::{
    InfraError,
    repository::{ApiKeyRepository, ScheduleCompletion, ScheduleRepository},
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;

use super::email::EmailUseCase;

/// 1 回の実行サイクルの結果
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    /// サイクル開始時に取得した実行時刻
    pub execution_time:  DateTime<Utc>,
    /// 実行対象だった件数
    pub total_due:       usize,
    /// 送信タスクを起動した件数
    pub started:         usize,
    /// 起動前に対象でなくなった件数（並行取り消し等）
    pub skipped:         usize,
    /// ストア障害で起動できなかった件数
    pub failed_to_start: usize,
    pub details:         Vec<ExecutionDetail>,
}

/// スケジュール単位のディスパッチ結果
#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    pub schedule_id: ScheduleId,
    #[serde(flatten)]
    pub outcome:     DispatchOutcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Started,
    Skipped,
    FailedToStart { message: String },
}

/// スケジュール実行エンジン
pub struct ScheduleExecutor {
    schedule_repo: Arc<dyn ScheduleRepository>,
    api_key_repo:  Arc<dyn ApiKeyRepository>,
    email_usecase: Arc<EmailUseCase>,
    clock:         Arc<dyn Clock>,
    concurrency:   Arc<Semaphore>,
}

impl ScheduleExecutor {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        api_key_repo: Arc<dyn ApiKeyRepository>,
        email_usecase: Arc<EmailUseCase>,
        clock: Arc<dyn Clock>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            schedule_repo,
            api_key_repo,
            email_usecase,
            clock,
            concurrency: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// 実行時刻を迎えたスケジュールをすべてディスパッチする
    ///
    /// すべての送信タスクの完了を待ってからレポートを返す。
    ///
    /// # Errors
    ///
    /// - `InfraError`: 実行対象の取得に失敗（個々の送信失敗は含まない）
    #[tracing::instrument(skip_all, fields(kind = ?kind))]
    pub async fn execute_pending(
        &self,
        kind: Option<ScheduleKind>,
    ) -> Result<ExecutionReport, InfraError> {
        let execution_time = self.clock.now();
        let due = self.schedule_repo.find_due(execution_time, kind).await?;

        let mut report = ExecutionReport {
            execution_time,
            total_due: due.len(),
            started: 0,
            skipped: 0,
            failed_to_start: 0,
            details: Vec::with_capacity(due.len()),
        };
        tracing::info!(total_due = report.total_due, "実行サイクルを開始します");

        let mut handles = Vec::new();
        for schedule in due {
            let id = schedule.id().clone();
            match self.schedule_repo.mark_processing(&id, execution_time).await {
                Ok(Some(processing)) => {
                    report.started += 1;
                    report.details.push(ExecutionDetail {
                        schedule_id: id,
                        outcome:     DispatchOutcome::Started,
                    });

                    let Ok(permit) = Arc::clone(&self.concurrency).acquire_owned().await else {
                        // Semaphore を close する箇所はないため到達しない
                        break;
                    };
                    let unit = DispatchUnit {
                        schedule_repo: Arc::clone(&self.schedule_repo),
                        api_key_repo:  Arc::clone(&self.api_key_repo),
                        email_usecase: Arc::clone(&self.email_usecase),
                        executed_at:   execution_time,
                    };
                    handles.push(tokio::spawn(async move {
                        unit.run(processing).await;
                        drop(permit);
                    }));
                }
                Ok(None) => {
                    report.skipped += 1;
                    report.details.push(ExecutionDetail {
                        schedule_id: id,
                        outcome:     DispatchOutcome::Skipped,
                    });
                }
                Err(e) => {
                    tracing::error!(schedule_id = %id, error = %e, "processing 遷移に失敗しました");
                    report.failed_to_start += 1;
                    report.details.push(ExecutionDetail {
                        schedule_id: id,
                        outcome:     DispatchOutcome::FailedToStart {
                            message: e.to_string(),
                        },
                    });
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "送信タスクがパニックしました");
            }
        }

        tracing::info!(
            started = report.started,
            skipped = report.skipped,
            failed_to_start = report.failed_to_start,
            "実行サイクルを終了します"
        );

        Ok(report)
    }
}

/// 1 スケジュール分の送信処理
///
/// processing に遷移済みのスケジュールを受け取り、送信結果に応じて
/// completed への遷移または失敗の記録を行う。
struct DispatchUnit {
    schedule_repo: Arc<dyn ScheduleRepository>,
    api_key_repo:  Arc<dyn ApiKeyRepository>,
    email_usecase: Arc<EmailUseCase>,
    executed_at:   DateTime<Utc>,
}

impl DispatchUnit {
    async fn run(self, schedule: Schedule) {
        let id = schedule.id().clone();

        match self.dispatch(&schedule).await {
            Ok(result) => {
                let completion = ScheduleCompletion {
                    executed_at: self.executed_at,
                    result,
                };
                match self.schedule_repo.complete(&id, &completion).await {
                    Ok(_) => tracing::info!(schedule_id = %id, "スケジュールを完了しました"),
                    Err(e) => {
                        tracing::error!(schedule_id = %id, error = %e, "完了遷移に失敗しました");
                    }
                }
            }
            Err(message) => {
                match self
                    .schedule_repo
                    .record_failure(&id, &message, self.executed_at)
                    .await
                {
                    Ok(updated) => tracing::warn!(
                        schedule_id = %id,
                        status = %updated.status(),
                        retry_count = updated.retry_count(),
                        %message,
                        "スケジュールの送信に失敗しました"
                    ),
                    Err(e) => {
                        tracing::error!(schedule_id = %id, error = %e, "失敗の記録に失敗しました");
                    }
                }
            }
        }
    }

    /// スケジュールの種別に応じた送信を行う
    ///
    /// 成功時はスケジュールの実行結果として保存する JSON を返す。
    /// 失敗時のメッセージは `error_message` としてそのまま記録される。
    async fn dispatch(&self, schedule: &Schedule) -> Result<JsonValue, String> {
        match schedule.kind() {
            ScheduleKind::Email => {
                let payload = EmailPayload::decode(schedule.payload())
                    .map_err(|e| format!("ペイロードのデコードに失敗しました: {e}"))?;
                let api_key = self
                    .api_key_repo
                    .find_by_id(schedule.api_key_id())
                    .await
                    .map_err(|e| format!("API キーの取得に失敗しました: {e}"))?
                    .ok_or_else(|| {
                        format!("API キーが見つかりません: {}", schedule.api_key_id())
                    })?;

                let delivery = self
                    .email_usecase
                    .deliver(&api_key, &payload)
                    .await
                    .map_err(|e| e.to_string())?;

                Ok(delivery.raw)
            }
            kind @ (ScheduleKind::Sms | ScheduleKind::Kakao) => {
                Err(format!("{kind} 送信は未対応です"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Duration;
    use notiflow_domain::{
        api_key::{ApiKey, ApiKeyId, ApiKeyRecord},
        clock::FixedClock,
        schedule::{NewSchedule, ScheduleStatus, align_to_minute},
        value_objects::ScheduleName,
    };
    use notiflow_infra::mock::{
        MockApiKeyRepository, MockEmailLogRepository, MockScheduleRepository,
        RecordingMailSender,
    };
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::config::SenderAddressBook;

    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct TestEnv {
        schedule_repo: MockScheduleRepository,
        api_key_repo:  MockApiKeyRepository,
        sender:        RecordingMailSender,
        api_key:       ApiKey,
    }

    impl TestEnv {
        fn new(sender: RecordingMailSender) -> Self {
            let api_key = ApiKey::from_db(ApiKeyRecord {
                id:           ApiKeyId::new(),
                key:          "test-key".to_string(),
                service_name: "billing".to_string(),
                is_active:    true,
                created_at:   DateTime::from_timestamp(1_699_000_000, 0).unwrap(),
            });
            let api_key_repo = MockApiKeyRepository::new();
            api_key_repo.add(api_key.clone());

            Self {
                schedule_repo: MockScheduleRepository::new(),
                api_key_repo,
                sender,
                api_key,
            }
        }

        /// 指定時刻の実行エンジンを作る
        fn executor(&self, now: DateTime<Utc>) -> ScheduleExecutor {
            let clock = Arc::new(FixedClock::new(now));
            let email_usecase = Arc::new(EmailUseCase::new(
                Arc::new(self.sender.clone()),
                Arc::new(MockEmailLogRepository::new()),
                SenderAddressBook::new("default@example.com".to_string(), HashMap::new()),
                Arc::clone(&clock) as Arc<dyn Clock>,
            ));

            ScheduleExecutor::new(
                Arc::new(self.schedule_repo.clone()),
                Arc::new(self.api_key_repo.clone()),
                email_usecase,
                clock,
                4,
            )
        }

        /// `due_at` に実行時刻を迎えるスケジュールを登録する
        async fn insert_schedule(
            &self,
            kind: ScheduleKind,
            due_at: DateTime<Utc>,
            max_retry: i32,
        ) -> Schedule {
            let schedule = Schedule::new(NewSchedule {
                id: ScheduleId::new(),
                api_key_id: self.api_key.id().clone(),
                name: ScheduleName::new("テスト通知").unwrap(),
                kind,
                scheduled_at: due_at,
                timezone: "Asia/Seoul".to_string(),
                payload: json!({
                    "is_bulk": false,
                    "to_email": "taro@example.com",
                    "subject": "件名",
                    "html_body": "<p>本文</p>",
                }),
                max_retry,
                retry_interval_secs: 300,
                now: due_at - Duration::hours(1),
            })
            .unwrap();
            self.schedule_repo.insert(&schedule).await.unwrap();

            schedule
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_実行対象が送信されて完了に遷移する(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new());
        let schedule = env.insert_schedule(ScheduleKind::Email, now, 3).await;

        let report = env.executor(now).execute_pending(None).await.unwrap();

        assert_eq!(report.total_due, 1);
        assert_eq!(report.started, 1);
        assert_eq!(env.sender.send_count(), 1);

        let stored = env.schedule_repo.get(schedule.id()).unwrap();
        assert_eq!(stored.status(), ScheduleStatus::Completed);
        assert_eq!(stored.executed_at(), Some(now));
        assert!(stored.result().is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn test_連続実行しても再送されない(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new());
        env.insert_schedule(ScheduleKind::Email, now, 3).await;

        let first = env.executor(now).execute_pending(None).await.unwrap();
        let second = env.executor(now).execute_pending(None).await.unwrap();

        assert_eq!(first.started, 1);
        assert_eq!(second.total_due, 0);
        assert_eq!(env.sender.send_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_失敗すると分境界基準でリトライ登録される(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new().with_failures(1));
        let schedule = env.insert_schedule(ScheduleKind::Email, now, 3).await;

        env.executor(now).execute_pending(None).await.unwrap();

        let stored = env.schedule_repo.get(schedule.id()).unwrap();
        assert_eq!(stored.status(), ScheduleStatus::Pending);
        assert_eq!(stored.retry_count(), 1);
        assert_eq!(
            stored.scheduled_at(),
            align_to_minute(now) + Duration::seconds(300)
        );
        assert!(stored.error_message().is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn test_3回失敗で終端のfailedになる(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new().with_failures(100));
        let schedule = env.insert_schedule(ScheduleKind::Email, now, 3).await;

        // 各サイクルで再登録された時刻まで時計を進めて再実行する
        let mut cycle_time = now;
        for expected_count in 1..=3 {
            let report = env
                .executor(cycle_time)
                .execute_pending(None)
                .await
                .unwrap();
            assert_eq!(report.started, 1, "{expected_count} 回目のサイクル");

            let stored = env.schedule_repo.get(schedule.id()).unwrap();
            assert_eq!(stored.retry_count(), expected_count);
            if expected_count < 3 {
                assert_eq!(stored.status(), ScheduleStatus::Pending);
                cycle_time = stored.scheduled_at();
            } else {
                assert_eq!(stored.status(), ScheduleStatus::Failed);
            }
        }

        // 終端後は実行対象にならない
        let report = env
            .executor(cycle_time + Duration::hours(1))
            .execute_pending(None)
            .await
            .unwrap();
        assert_eq!(report.total_due, 0);
        assert_eq!(env.sender.send_count(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_max_retry_0は初回失敗で終端になる(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new().with_failures(1));
        let schedule = env.insert_schedule(ScheduleKind::Email, now, 0).await;

        env.executor(now).execute_pending(None).await.unwrap();

        let stored = env.schedule_repo.get(schedule.id()).unwrap();
        assert_eq!(stored.status(), ScheduleStatus::Failed);
        assert_eq!(stored.retry_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_kindフィルタで対象を絞り込める(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new());
        env.insert_schedule(ScheduleKind::Email, now, 3).await;

        let sms_only = env
            .executor(now)
            .execute_pending(Some(ScheduleKind::Sms))
            .await
            .unwrap();
        assert_eq!(sms_only.total_due, 0);
        assert_eq!(env.sender.send_count(), 0);

        let email_only = env
            .executor(now)
            .execute_pending(Some(ScheduleKind::Email))
            .await
            .unwrap();
        assert_eq!(email_only.started, 1);
        assert_eq!(env.sender.send_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_未来のスケジュールは実行対象にならない(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new());
        env.insert_schedule(ScheduleKind::Email, now + Duration::hours(1), 3)
            .await;

        let report = env.executor(now).execute_pending(None).await.unwrap();

        assert_eq!(report.total_due, 0);
        assert_eq!(env.sender.send_count(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_ストア障害はfailed_to_startに計上される(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new());
        let schedule = env.insert_schedule(ScheduleKind::Email, now, 3).await;
        env.schedule_repo.fail_mark_processing(true);

        let report = env.executor(now).execute_pending(None).await.unwrap();

        assert_eq!(report.total_due, 1);
        assert_eq!(report.failed_to_start, 1);
        assert_eq!(report.started, 0);
        assert_eq!(env.sender.send_count(), 0);
        // 起動に失敗した対象は pending のまま残る
        assert_eq!(
            env.schedule_repo.get(schedule.id()).unwrap().status(),
            ScheduleStatus::Pending
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_sms種別のスケジュールは失敗として記録される(now: DateTime<Utc>) {
        let env = TestEnv::new(RecordingMailSender::new());
        let schedule = env.insert_schedule(ScheduleKind::Sms, now, 0).await;

        env.executor(now).execute_pending(None).await.unwrap();

        let stored = env.schedule_repo.get(schedule.id()).unwrap();
        assert_eq!(stored.status(), ScheduleStatus::Failed);
        assert!(stored.error_message().is_some());
        assert_eq!(env.sender.send_count(), 0);
    }
}
