//! # API キー
//!
//! クライアント認証に使う API キー。キーの発行・無効化は運用側の操作であり、
//! このシステムでは読み取り専用のエンティティとして扱う。
//! `service_name` は送信元アドレスのサービス別フォールバック解決に使われる。

use chrono::{DateTime, Utc};

define_uuid_id! {
    /// API キー ID
    pub struct ApiKeyId;
}

/// API キーエンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    id: ApiKeyId,
    key: String,
    service_name: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

/// API キーの DB 復元パラメータ
pub struct ApiKeyRecord {
    pub id: ApiKeyId,
    pub key: String,
    pub service_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// 既存のデータから復元する
    pub fn from_db(record: ApiKeyRecord) -> Self {
        Self {
            id: record.id,
            key: record.key,
            service_name: record.service_name,
            is_active: record.is_active,
            created_at: record.created_at,
        }
    }

    pub fn id(&self) -> &ApiKeyId {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
