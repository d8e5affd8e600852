//! # アプリケーション設定
//!
//! 環境変数からアプリケーション設定を読み込む。
//!
//! ## 設計方針
//!
//! - **起動時に一括読み込み**: 必須の環境変数が欠けていれば起動時に
//!   即座に失敗させる（fail fast）
//! - **デフォルト値**: 開発時の利便性のため、接続先以外には妥当な
//!   デフォルト値を設定する

use std::{collections::HashMap, env, time::Duration};

/// 送信者アドレス帳
///
/// 送信者アドレスは配信時に 3 段階のフォールバックで解決する:
///
/// 1. ペイロードで明示された送信者アドレス
/// 2. サービス別の設定（環境変数 `MAILER_SENDER_<SERVICE>`）
/// 3. デフォルト送信者（`MAILER_DEFAULT_SENDER`）
#[derive(Debug, Clone)]
pub struct SenderAddressBook {
    default_address: String,
    by_service:      HashMap<String, String>,
}

impl SenderAddressBook {
    pub fn new(default_address: String, by_service: HashMap<String, String>) -> Self {
        Self {
            default_address,
            by_service,
        }
    }

    /// 送信者アドレスを解決する
    ///
    /// サービス名は大文字小文字を区別せずに照合する。
    pub fn resolve(&self, explicit: Option<&str>, service_name: &str) -> String {
        if let Some(address) = explicit {
            return address.to_string();
        }
        self.by_service
            .get(&service_name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| self.default_address.clone())
    }
}

/// メール送信の設定
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// `"cloud"` または `"noop"`
    pub backend:      String,
    pub api_base_url: String,
    pub access_key:   String,
    pub secret_key:   String,
    pub address_book: SenderAddressBook,
}

/// 定期実行トリガーの設定
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// トリガーを起動するか（`ENVIRONMENT=local` のときのみ有効）
    pub enabled:  bool,
    /// 実行間隔
    pub interval: Duration,
}

/// アプリケーション設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host:            String,
    pub port:            u16,
    pub database_url:    String,
    pub mailer:          MailerConfig,
    pub trigger:         TriggerSettings,
    /// 実行サイクル内で同時に送信する最大件数
    pub max_concurrency: usize,
}

impl AppConfig {
    /// 環境変数から設定を読み込む
    ///
    /// # Panics
    ///
    /// 必須の環境変数（`DISPATCH_PORT`, `DATABASE_URL`）が設定されていない、
    /// または形式が不正な場合はパニックする。
    pub fn from_env() -> Self {
        let host = env::var("DISPATCH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("DISPATCH_PORT")
            .expect("DISPATCH_PORT 環境変数が設定されていません")
            .parse()
            .expect("DISPATCH_PORT は有効なポート番号である必要があります");
        let database_url =
            env::var("DATABASE_URL").expect("DATABASE_URL 環境変数が設定されていません");

        let backend = env::var("MAILER_BACKEND").unwrap_or_else(|_| "noop".to_string());
        let api_base_url = env::var("MAILER_API_BASE_URL").unwrap_or_default();
        let access_key = env::var("MAILER_ACCESS_KEY").unwrap_or_default();
        let secret_key = env::var("MAILER_SECRET_KEY").unwrap_or_default();
        if backend == "cloud" {
            assert!(
                !api_base_url.is_empty() && !access_key.is_empty() && !secret_key.is_empty(),
                "MAILER_BACKEND=cloud には MAILER_API_BASE_URL / MAILER_ACCESS_KEY / \
                 MAILER_SECRET_KEY が必要です",
            );
        }

        let default_sender = env::var("MAILER_DEFAULT_SENDER")
            .unwrap_or_else(|_| "noreply@notiflow.example.com".to_string());
        let address_book = SenderAddressBook::new(default_sender, senders_from_env(env::vars()));

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "local".to_string());
        let interval_minutes: u64 = env::var("SCHEDULER_INTERVAL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let max_concurrency = env::var("EXECUTOR_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8);

        Self {
            host,
            port,
            database_url,
            mailer: MailerConfig {
                backend,
                api_base_url,
                access_key,
                secret_key,
                address_book,
            },
            trigger: TriggerSettings {
                enabled:  environment == "local",
                interval: Duration::from_secs(interval_minutes * 60),
            },
            max_concurrency,
        }
    }
}

/// `MAILER_SENDER_<SERVICE>` 形式の環境変数からサービス別送信者を集める
///
/// サービス名部分は小文字化して保持する（照合時も小文字化する）。
fn senders_from_env(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    const PREFIX: &str = "MAILER_SENDER_";

    vars.filter_map(|(key, value)| {
        key.strip_prefix(PREFIX)
            .filter(|service| !service.is_empty() && !value.is_empty())
            .map(|service| (service.to_lowercase(), value))
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn address_book() -> SenderAddressBook {
        SenderAddressBook::new(
            "default@example.com".to_string(),
            HashMap::from([("billing".to_string(), "billing@example.com".to_string())]),
        )
    }

    #[test]
    fn test_明示された送信者が最優先される() {
        let book = address_book();

        let resolved = book.resolve(Some("explicit@example.com"), "billing");

        assert_eq!(resolved, "explicit@example.com");
    }

    #[test]
    fn test_サービス別設定が2番目に使われる() {
        let book = address_book();

        assert_eq!(book.resolve(None, "billing"), "billing@example.com");
        // サービス名の大文字小文字は区別しない
        assert_eq!(book.resolve(None, "BILLING"), "billing@example.com");
    }

    #[test]
    fn test_設定がなければデフォルト送信者にフォールバックする() {
        let book = address_book();

        assert_eq!(book.resolve(None, "unknown-service"), "default@example.com");
    }

    #[test]
    fn test_プレフィクス付き環境変数からサービス別送信者を集める() {
        let vars = vec![
            (
                "MAILER_SENDER_BILLING".to_string(),
                "billing@example.com".to_string(),
            ),
            ("MAILER_SENDER_".to_string(), "empty@example.com".to_string()),
            ("DATABASE_URL".to_string(), "postgres://".to_string()),
        ];

        let senders = senders_from_env(vars.into_iter());

        assert_eq!(
            senders,
            HashMap::from([("billing".to_string(), "billing@example.com".to_string())])
        );
    }
}
