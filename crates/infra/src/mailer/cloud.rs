//! # クラウドプロバイダ API 実装
//!
//! HMAC-SHA256 署名付き HTTP でプロバイダのメール送信 API を呼び出す。
//!
//! ## 署名方式
//!
//! 署名対象は `"{METHOD} {PATH}\n{TIMESTAMP_MS}\n{ACCESS_KEY}"` で、
//! secret key を鍵とした HMAC-SHA256 を Base64 エンコードして
//! `x-ncp-apigw-signature-v2` ヘッダに載せる。タイムスタンプは
//! エポックミリ秒で、署名とヘッダで同じ値を使う必要がある。

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use hmac::{Hmac, Mac};
use notiflow_domain::email::EmailRecipient;
use serde_json::{Value as JsonValue, json};
use sha2::Sha256;

use super::{MailDelivery, MailError, MailSender};

/// メール送信エンドポイントのパス
const MAIL_SEND_PATH: &str = "/api/v1/mails";

/// プロバイダ API のタイムアウト
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// クラウドプロバイダのメール送信クライアント
pub struct CloudMailSender {
    client:     reqwest::Client,
    base_url:   String,
    access_key: String,
    secret_key: String,
}

impl CloudMailSender {
    /// クライアントを作成する
    ///
    /// # Errors
    ///
    /// - `MailError::Transport`: HTTP クライアントの構築に失敗
    pub fn new(
        base_url: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        })
    }

    /// リクエスト署名を生成する
    fn signature(&self, method: &str, path: &str, timestamp_ms: &str) -> Result<String, MailError> {
        let message = format!("{method} {path}\n{timestamp_ms}\n{}", self.access_key);

        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| MailError::InvalidMessage(format!("署名鍵が不正です: {e}")))?;
        mac.update(message.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// 送信リクエストボディを構築する
    fn request_body(
        sender_address: &str,
        recipients: &[EmailRecipient],
        subject: &str,
        html_body: &str,
    ) -> JsonValue {
        let recipients: Vec<JsonValue> = recipients
            .iter()
            .map(|r| {
                json!({
                    "address": r.email,
                    "name": r.name.clone().unwrap_or_default(),
                    "type": "R",
                })
            })
            .collect();

        json!({
            "senderAddress": sender_address,
            "title": subject,
            "body": html_body,
            "recipients": recipients,
            "individual": true,
            "advertising": false,
        })
    }
}

#[async_trait]
impl MailSender for CloudMailSender {
    #[tracing::instrument(skip_all, level = "debug", fields(recipients = recipients.len()))]
    async fn send(
        &self,
        sender_address: &str,
        recipients: &[EmailRecipient],
        subject: &str,
        html_body: &str,
    ) -> Result<MailDelivery, MailError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.signature("POST", MAIL_SEND_PATH, &timestamp)?;
        let body = Self::request_body(sender_address, recipients, subject, html_body);

        let response = self
            .client
            .post(format!("{}{MAIL_SEND_PATH}", self.base_url))
            .header("x-ncp-apigw-timestamp", &timestamp)
            .header("x-ncp-iam-access-key", &self.access_key)
            .header("x-ncp-apigw-signature-v2", signature)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "メールプロバイダが送信を拒否しました");
            return Err(MailError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let raw: JsonValue = response.json().await?;
        let request_id = raw
            .get("requestId")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        tracing::info!(%request_id, count = recipients.len(), "メール送信をプロバイダが受理しました");

        Ok(MailDelivery {
            request_id,
            accepted: recipients.len(),
            raw,
        })
    }
}
