//! # 何もしないメール送信実装
//!
//! 開発・検証環境用。実際の送信は行わず、送信内容をログに出力して
//! 常に成功を返す。

use async_trait::async_trait;
use notiflow_domain::email::EmailRecipient;
use serde_json::json;
use uuid::Uuid;

use super::{MailDelivery, MailError, MailSender};

/// 何もしないメール送信実装
#[derive(Debug, Clone, Default)]
pub struct NoopMailSender;

impl NoopMailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MailSender for NoopMailSender {
    async fn send(
        &self,
        sender_address: &str,
        recipients: &[EmailRecipient],
        subject: &str,
        _html_body: &str,
    ) -> Result<MailDelivery, MailError> {
        let request_id = Uuid::new_v4().to_string();

        tracing::info!(
            %request_id,
            sender_address,
            subject,
            count = recipients.len(),
            "noop メール送信（実際には送信しません）"
        );

        Ok(MailDelivery {
            accepted: recipients.len(),
            raw: json!({ "requestId": request_id, "backend": "noop" }),
            request_id,
        })
    }
}
