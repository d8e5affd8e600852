//! # メール送信ユースケース
//!
//! 即時送信とスケジュール実行の両方から使われる送信処理。
//!
//! ## 設計方針
//!
//! - **送信者の解決は配信時**: ペイロード → サービス別設定 → デフォルトの
//!   3 段階フォールバックを送信の直前に評価する。スケジュール登録後に
//!   設定を変更しても、実行時には新しい設定が反映される
//! - **監査ログは fire-and-forget**: 受信者単位のログ記録の失敗が
//!   送信結果に影響しないよう、別タスクで記録する

use std::sync::Arc;

use notiflow_domain::{api_key::ApiKey, clock::Clock, email::EmailPayload};
use notiflow_infra::{
    MailDelivery, MailError, MailSender,
    repository::{EmailLogRepository, NewEmailLog},
};
use uuid::Uuid;

use crate::config::SenderAddressBook;

/// メール送信ユースケース
pub struct EmailUseCase {
    mail_sender:    Arc<dyn MailSender>,
    email_log_repo: Arc<dyn EmailLogRepository>,
    address_book:   SenderAddressBook,
    clock:          Arc<dyn Clock>,
}

impl EmailUseCase {
    pub fn new(
        mail_sender: Arc<dyn MailSender>,
        email_log_repo: Arc<dyn EmailLogRepository>,
        address_book: SenderAddressBook,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mail_sender,
            email_log_repo,
            address_book,
            clock,
        }
    }

    /// メールを配信する
    ///
    /// 送信者アドレスを解決してプロバイダに送信し、結果を受信者単位で
    /// 監査ログに記録する。
    ///
    /// # Errors
    ///
    /// - `MailError`: プロバイダが送信を拒否した、または到達できなかった
    #[tracing::instrument(skip_all, level = "debug", fields(service = api_key.service_name()))]
    pub async fn deliver(
        &self,
        api_key: &ApiKey,
        payload: &EmailPayload,
    ) -> Result<MailDelivery, MailError> {
        let sender_address = self
            .address_book
            .resolve(payload.content().sender_address(), api_key.service_name());

        let result = self
            .mail_sender
            .send(
                &sender_address,
                payload.recipients(),
                payload.content().subject(),
                payload.content().html_body(),
            )
            .await;

        self.log_outcome(api_key, payload, sender_address, &result);

        result
    }

    /// 送信結果を受信者単位で監査ログに記録する（fire-and-forget）
    fn log_outcome(
        &self,
        api_key: &ApiKey,
        payload: &EmailPayload,
        sender_address: String,
        result: &Result<MailDelivery, MailError>,
    ) {
        let request_id = Uuid::new_v4().to_string();
        let sent_at = self.clock.now();
        let (status, provider_request_id, error_message) = match result {
            Ok(delivery) => ("sent", Some(delivery.request_id.clone()), None),
            Err(e) => ("failed", None, Some(e.to_string())),
        };

        let logs: Vec<NewEmailLog> = payload
            .recipients()
            .iter()
            .map(|recipient| NewEmailLog {
                api_key_id: api_key.id().clone(),
                request_id: request_id.clone(),
                sender_address: sender_address.clone(),
                recipient_email: recipient.email.clone(),
                recipient_name: recipient.name.clone(),
                subject: payload.content().subject().to_string(),
                status: status.to_string(),
                provider_request_id: provider_request_id.clone(),
                error_message: error_message.clone(),
                sent_at,
            })
            .collect();

        let repo = Arc::clone(&self.email_log_repo);
        tokio::spawn(async move {
            for log in logs {
                if let Err(e) = repo.insert(log).await {
                    tracing::warn!(error = %e, "メール送信ログの記録に失敗しました");
                }
            }
        });
    }
}
