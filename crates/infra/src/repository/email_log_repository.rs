//! # メール送信ログリポジトリ
//!
//! 送信結果の監査ログを受信者単位で記録する。
//!
//! ## 設計方針
//!
//! ログ記録は fire-and-forget で行われるため、このリポジトリのエラーが
//! 送信処理自体を失敗させることはない（呼び出し側で警告ログに留める）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{api_key::ApiKeyId, email::EmailLogId};
use sqlx::PgPool;

use crate::error::InfraError;

/// メール送信ログの記録パラメータ
///
/// 1 リクエスト内の受信者ごとに 1 行記録する。`request_id` は
/// リクエスト単位の相関 ID で、受信者行をまとめて追跡するために使う。
#[derive(Debug, Clone)]
pub struct NewEmailLog {
    pub api_key_id:          ApiKeyId,
    pub request_id:          String,
    pub sender_address:      String,
    pub recipient_email:     String,
    pub recipient_name:      Option<String>,
    pub subject:             String,
    /// `"sent"` または `"failed"`
    pub status:              String,
    /// プロバイダが発行したリクエスト ID（成功時のみ）
    pub provider_request_id: Option<String>,
    pub error_message:       Option<String>,
    pub sent_at:             DateTime<Utc>,
}

/// 永続化されたメール送信ログ
#[derive(Debug, Clone)]
pub struct EmailLog {
    pub id:                  EmailLogId,
    pub api_key_id:          ApiKeyId,
    pub request_id:          String,
    pub sender_address:      String,
    pub recipient_email:     String,
    pub recipient_name:      Option<String>,
    pub subject:             String,
    pub status:              String,
    pub provider_request_id: Option<String>,
    pub error_message:       Option<String>,
    pub sent_at:             DateTime<Utc>,
}

/// メール送信ログリポジトリのトレイト
#[async_trait]
pub trait EmailLogRepository: Send + Sync {
    /// 送信ログを 1 行記録する
    async fn insert(&self, log: NewEmailLog) -> Result<EmailLogId, InfraError>;
}

/// PostgreSQL 実装
#[derive(Clone)]
pub struct PostgresEmailLogRepository {
    pool: PgPool,
}

impl PostgresEmailLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailLogRepository for PostgresEmailLogRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, log: NewEmailLog) -> Result<EmailLogId, InfraError> {
        let id = EmailLogId::new();

        sqlx::query(
            "INSERT INTO email_logs (id, api_key_id, request_id, sender_address, \
             recipient_email, recipient_name, subject, status, provider_request_id, \
             error_message, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(id.as_uuid())
        .bind(log.api_key_id.as_uuid())
        .bind(&log.request_id)
        .bind(&log.sender_address)
        .bind(&log.recipient_email)
        .bind(&log.recipient_name)
        .bind(&log.subject)
        .bind(&log.status)
        .bind(&log.provider_request_id)
        .bind(&log.error_message)
        .bind(log.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_syncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresEmailLogRepository>();
    }
}
