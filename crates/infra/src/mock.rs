//! # テスト用インメモリ実装
//!
//! DB や外部プロバイダに接続せずにユースケース・実行エンジンをテストする
//! ためのモック実装。
//!
//! ## 設計方針
//!
//! - **ドメイン遷移の経由**: 状態変更はドメインの遷移メソッドを通して行い、
//!   PostgreSQL 実装の条件付き UPDATE と同じ振る舞い
//!   （対象が前提状態でなければ更新しない）を再現する
//! - **共有可能**: `Arc<Mutex<...>>` で内部状態を持ち、clone しても
//!   同じストアを参照する

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{
    api_key::{ApiKey, ApiKeyId},
    email::{EmailLogId, EmailRecipient},
    schedule::{Schedule, ScheduleId, ScheduleKind, ScheduleStatus},
};
use serde_json::json;

use crate::{
    error::InfraError,
    mailer::{MailDelivery, MailError, MailSender},
    repository::{
        ApiKeyRepository, EmailLog, EmailLogRepository, NewEmailLog, ScheduleCompletion,
        ScheduleFilter, ScheduleRepository,
    },
};

// =============================================================================
// スケジュールリポジトリ
// =============================================================================

/// インメモリのスケジュールリポジトリ
#[derive(Clone, Default)]
pub struct MockScheduleRepository {
    schedules:            Arc<Mutex<Vec<Schedule>>>,
    fail_mark_processing: Arc<AtomicBool>,
}

impl MockScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次回以降の `mark_processing` を失敗させる（ストア障害の再現）
    pub fn fail_mark_processing(&self, fail: bool) {
        self.fail_mark_processing.store(fail, Ordering::SeqCst);
    }

    /// ID でスケジュールを同期的に取得する（テストの検証用）
    pub fn get(&self, id: &ScheduleId) -> Option<Schedule> {
        self.schedules
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    /// 保持している全スケジュールを返す（テストの検証用）
    pub fn all(&self) -> Vec<Schedule> {
        self.schedules.lock().unwrap().clone()
    }

    fn matches(schedule: &Schedule, filter: &ScheduleFilter) -> bool {
        filter.status.is_none_or(|s| schedule.status() == s)
            && filter.kind.is_none_or(|k| schedule.kind() == k)
            && filter
                .api_key_id
                .as_ref()
                .is_none_or(|id| schedule.api_key_id() == id)
    }

    /// ドメイン遷移を適用し、成功すればストアを更新する
    ///
    /// 遷移が拒否された場合（前提状態でない）は `Ok(None)` を返し、
    /// PostgreSQL 実装の条件付き UPDATE と同じ振る舞いにする。
    fn transition(
        &self,
        id: &ScheduleId,
        apply: impl FnOnce(Schedule) -> Result<Schedule, notiflow_domain::DomainError>,
    ) -> Result<Option<Schedule>, InfraError> {
        let mut schedules = self.schedules.lock().unwrap();
        let Some(index) = schedules.iter().position(|s| s.id() == id) else {
            return Ok(None);
        };

        match apply(schedules[index].clone()) {
            Ok(updated) => {
                schedules[index] = updated.clone();
                Ok(Some(updated))
            }
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl ScheduleRepository for MockScheduleRepository {
    async fn insert(&self, schedule: &Schedule) -> Result<(), InfraError> {
        self.schedules.lock().unwrap().push(schedule.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ScheduleId) -> Result<Option<Schedule>, InfraError> {
        Ok(self.get(id))
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        kind: Option<ScheduleKind>,
    ) -> Result<Vec<Schedule>, InfraError> {
        let mut due: Vec<Schedule> = self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.status() == ScheduleStatus::Pending
                    && s.scheduled_at() <= now
                    && kind.is_none_or(|k| s.kind() == k)
            })
            .cloned()
            .collect();
        due.sort_by_key(Schedule::scheduled_at);

        Ok(due)
    }

    async fn list(
        &self,
        filter: &ScheduleFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Schedule>, InfraError> {
        let mut matched: Vec<Schedule> = self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| Self::matches(s, filter))
            .cloned()
            .collect();
        matched.sort_by_key(|s| std::cmp::Reverse(s.created_at()));

        Ok(matched
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn count(&self, filter: &ScheduleFilter) -> Result<i64, InfraError> {
        let count = self
            .schedules
            .lock()
            .unwrap()
            .iter()
            .filter(|s| Self::matches(s, filter))
            .count();

        Ok(count as i64)
    }

    async fn mark_processing(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, InfraError> {
        if self.fail_mark_processing.load(Ordering::SeqCst) {
            return Err(InfraError::unexpected("mock: mark_processing failure"));
        }

        self.transition(id, |s| s.processing_started(now))
    }

    async fn complete(
        &self,
        id: &ScheduleId,
        completion: &ScheduleCompletion,
    ) -> Result<Schedule, InfraError> {
        let result = completion.result.clone();
        let executed_at = completion.executed_at;

        self.transition(id, move |s| s.completed(result, executed_at))?
            .ok_or_else(|| InfraError::not_found("Schedule", id.to_string()))
    }

    async fn cancel(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, InfraError> {
        self.transition(id, |s| s.cancelled(now))
    }

    async fn record_failure(
        &self,
        id: &ScheduleId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Schedule, InfraError> {
        let message = error_message.to_string();

        self.transition(id, move |s| s.attempt_failed(message, now))?
            .ok_or_else(|| InfraError::not_found("Schedule", id.to_string()))
    }
}

// =============================================================================
// API キーリポジトリ
// =============================================================================

/// インメモリの API キーリポジトリ
#[derive(Clone, Default)]
pub struct MockApiKeyRepository {
    keys: Arc<Mutex<Vec<ApiKey>>>,
}

impl MockApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// API キーを登録する
    pub fn add(&self, key: ApiKey) {
        self.keys.lock().unwrap().push(key);
    }
}

#[async_trait]
impl ApiKeyRepository for MockApiKeyRepository {
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, InfraError> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .iter()
            .find(|k| k.key() == key && k.is_active())
            .cloned())
    }

    async fn find_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, InfraError> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .iter()
            .find(|k| k.id() == id)
            .cloned())
    }
}

// =============================================================================
// メール送信ログリポジトリ
// =============================================================================

/// インメモリのメール送信ログリポジトリ
#[derive(Clone, Default)]
pub struct MockEmailLogRepository {
    logs: Arc<Mutex<Vec<EmailLog>>>,
}

impl MockEmailLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 記録された全ログを返す（テストの検証用）
    pub fn logs(&self) -> Vec<EmailLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailLogRepository for MockEmailLogRepository {
    async fn insert(&self, log: NewEmailLog) -> Result<EmailLogId, InfraError> {
        let id = EmailLogId::new();
        self.logs.lock().unwrap().push(EmailLog {
            id: id.clone(),
            api_key_id: log.api_key_id,
            request_id: log.request_id,
            sender_address: log.sender_address,
            recipient_email: log.recipient_email,
            recipient_name: log.recipient_name,
            subject: log.subject,
            status: log.status,
            provider_request_id: log.provider_request_id,
            error_message: log.error_message,
            sent_at: log.sent_at,
        });

        Ok(id)
    }
}

// =============================================================================
// メール送信
// =============================================================================

/// 記録された送信内容
#[derive(Debug, Clone)]
pub struct SentMail {
    pub sender_address: String,
    pub recipients:     Vec<EmailRecipient>,
    pub subject:        String,
    pub html_body:      String,
}

/// 送信内容を記録するメール送信実装
///
/// `with_failures(n)` で最初の n 回を失敗させ、`with_delay()` で
/// 送信に遅延を加えられる（実行サイクルの重複起動テスト用）。
#[derive(Clone, Default)]
pub struct RecordingMailSender {
    sent:               Arc<Mutex<Vec<SentMail>>>,
    failures_remaining: Arc<Mutex<u32>>,
    delay:              Option<Duration>,
}

impl RecordingMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最初の `n` 回の送信を失敗させる
    pub fn with_failures(self, n: u32) -> Self {
        *self.failures_remaining.lock().unwrap() = n;
        self
    }

    /// 各送信に遅延を加える
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 記録された送信内容を返す
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    /// 成功した送信の回数
    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(
        &self,
        sender_address: &str,
        recipients: &[EmailRecipient],
        subject: &str,
        html_body: &str,
    ) -> Result<MailDelivery, MailError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MailError::Provider {
                    status: 500,
                    body:   "mock provider failure".to_string(),
                });
            }
        }

        self.sent.lock().unwrap().push(SentMail {
            sender_address: sender_address.to_string(),
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });

        Ok(MailDelivery {
            request_id: format!("mock-{}", self.sent.lock().unwrap().len()),
            accepted:   recipients.len(),
            raw:        json!({ "mock": true }),
        })
    }
}
