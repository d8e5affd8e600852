//! # API キーリポジトリ
//!
//! クライアント認証に使用する API キーの読み取りを担当する。
//! キーの発行・失効は運用スクリプトで直接行うため、書き込みは提供しない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::api_key::{ApiKey, ApiKeyId, ApiKeyRecord};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// API キーリポジトリのトレイト
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// キー文字列で有効な API キーを検索する
    ///
    /// `is_active = false` のキーは存在しないものとして扱う。
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, InfraError>;

    /// ID で API キーを検索する
    ///
    /// スケジュール実行時の送信者解決に使用するため、
    /// こちらは無効化済みのキーも返す。
    async fn find_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, InfraError>;
}

/// api_keys テーブルの行
#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id:           Uuid,
    key:          String,
    service_name: String,
    is_active:    bool,
    created_at:   DateTime<Utc>,
}

impl ApiKeyRow {
    fn into_api_key(self) -> ApiKey {
        ApiKey::from_db(ApiKeyRecord {
            id:           ApiKeyId::from_uuid(self.id),
            key:          self.key,
            service_name: self.service_name,
            is_active:    self.is_active,
            created_at:   self.created_at,
        })
    }
}

/// PostgreSQL 実装
#[derive(Clone)]
pub struct PostgresApiKeyRepository {
    pool: PgPool,
}

impl PostgresApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresApiKeyRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_by_key(&self, key: &str) -> Result<Option<ApiKey>, InfraError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, key, service_name, is_active, created_at \
             FROM api_keys WHERE key = $1 AND is_active = TRUE",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKeyRow::into_api_key))
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_by_id(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, InfraError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, key, service_name, is_active, created_at \
             FROM api_keys WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKeyRow::into_api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_syncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresApiKeyRepository>();
    }
}
