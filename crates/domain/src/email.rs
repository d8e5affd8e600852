//! # メールペイロード
//!
//! スケジュールの `payload` カラム（JSON）とメール送信内容の間の
//! 型付きコーデックを提供する。
//!
//! ## ワイヤ形式
//!
//! フラットな JSON オブジェクトに `is_bulk` フラグを持たせる:
//!
//! ```json
//! { "is_bulk": false, "to_email": "a@example.com", "to_name": "担当者",
//!   "subject": "件名", "html_body": "<p>本文</p>", "sender_address": null }
//!
//! { "is_bulk": true, "recipients": [{"email": "a@example.com", "name": "A"}],
//!   "subject": "件名", "html_body": "<p>本文</p>" }
//! ```
//!
//! `decode` は DB から読み戻したペイロードも再検証する。実行エンジンは
//! デコード失敗を 1 回の実行失敗として扱う（リトライ対象になる）。

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::DomainError;

define_uuid_id! {
    /// メール送信ログ ID
    pub struct EmailLogId;
}

/// 件名の最大文字数
pub const SUBJECT_MAX_LENGTH: usize = 200;

/// 一括送信の最大受信者数
pub const BULK_RECIPIENTS_MAX: usize = 100;

/// メール受信者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipient {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name:  Option<String>,
}

impl EmailRecipient {
    fn validate(&self) -> Result<(), DomainError> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(DomainError::Validation(format!(
                "不正なメールアドレス: {}",
                self.email
            )));
        }
        Ok(())
    }
}

/// メール本文（受信者以外の送信内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    subject:        String,
    html_body:      String,
    sender_address: Option<String>,
}

impl EmailContent {
    /// 件名・本文を検証して生成する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 件名が空または 200 文字超、本文が空、
    ///   送信元アドレスの形式不正
    pub fn new(
        subject: impl Into<String>,
        html_body: impl Into<String>,
        sender_address: Option<String>,
    ) -> Result<Self, DomainError> {
        let subject = subject.into().trim().to_string();
        let html_body = html_body.into();

        if subject.is_empty() {
            return Err(DomainError::Validation("件名は必須です".to_string()));
        }
        if subject.chars().count() > SUBJECT_MAX_LENGTH {
            return Err(DomainError::Validation(format!(
                "件名は {} 文字以内である必要があります",
                SUBJECT_MAX_LENGTH
            )));
        }
        if html_body.trim().is_empty() {
            return Err(DomainError::Validation("本文は必須です".to_string()));
        }
        if let Some(addr) = &sender_address {
            if !addr.contains('@') {
                return Err(DomainError::Validation(format!(
                    "不正な送信元アドレス: {}",
                    addr
                )));
            }
        }

        Ok(Self {
            subject,
            html_body,
            sender_address,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    /// ペイロードで明示された送信元アドレス（フォールバック解決の第 1 候補）
    pub fn sender_address(&self) -> Option<&str> {
        self.sender_address.as_deref()
    }
}

/// メールペイロード（単発送信 / 一括送信）
#[derive(Debug, Clone, PartialEq)]
pub enum EmailPayload {
    /// 単一受信者への送信
    Single {
        recipient: EmailRecipient,
        content:   EmailContent,
    },
    /// 複数受信者への一括送信
    Bulk {
        recipients: Vec<EmailRecipient>,
        content:    EmailContent,
    },
}

/// デコード用の中間表現（ワイヤ形式そのまま）
#[derive(Deserialize)]
struct RawEmailPayload {
    #[serde(default)]
    is_bulk:        bool,
    #[serde(default)]
    to_email:       Option<String>,
    #[serde(default)]
    to_name:        Option<String>,
    #[serde(default)]
    recipients:     Option<Vec<EmailRecipient>>,
    #[serde(default)]
    subject:        Option<String>,
    #[serde(default)]
    html_body:      Option<String>,
    #[serde(default)]
    sender_address: Option<String>,
}

impl EmailPayload {
    /// 単発送信ペイロードを検証して生成する
    pub fn single(
        recipient: EmailRecipient,
        content: EmailContent,
    ) -> Result<Self, DomainError> {
        recipient.validate()?;
        Ok(Self::Single { recipient, content })
    }

    /// 一括送信ペイロードを検証して生成する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 受信者が 0 件または 100 件超、
    ///   いずれかのアドレスが不正
    pub fn bulk(
        recipients: Vec<EmailRecipient>,
        content: EmailContent,
    ) -> Result<Self, DomainError> {
        if recipients.is_empty() {
            return Err(DomainError::Validation(
                "受信者リストが空です".to_string(),
            ));
        }
        if recipients.len() > BULK_RECIPIENTS_MAX {
            return Err(DomainError::Validation(format!(
                "受信者は {} 件以内である必要があります",
                BULK_RECIPIENTS_MAX
            )));
        }
        for recipient in &recipients {
            recipient.validate()?;
        }
        Ok(Self::Bulk {
            recipients,
            content,
        })
    }

    /// JSON ペイロードからデコードする（検証込み）
    pub fn decode(value: &JsonValue) -> Result<Self, DomainError> {
        let raw: RawEmailPayload = serde_json::from_value(value.clone())
            .map_err(|e| DomainError::Validation(format!("ペイロードの形式が不正です: {e}")))?;

        let content = EmailContent::new(
            raw.subject.unwrap_or_default(),
            raw.html_body.unwrap_or_default(),
            raw.sender_address,
        )?;

        if raw.is_bulk {
            let recipients = raw.recipients.ok_or_else(|| {
                DomainError::Validation(
                    "一括送信ペイロードには recipients が必要です".to_string(),
                )
            })?;
            Self::bulk(recipients, content)
        } else {
            let email = raw.to_email.ok_or_else(|| {
                DomainError::Validation("単発送信ペイロードには to_email が必要です".to_string())
            })?;
            Self::single(
                EmailRecipient {
                    email,
                    name: raw.to_name,
                },
                content,
            )
        }
    }

    /// JSON ペイロードにエンコードする
    pub fn encode(&self) -> JsonValue {
        match self {
            Self::Single { recipient, content } => json!({
                "is_bulk": false,
                "to_email": recipient.email,
                "to_name": recipient.name,
                "subject": content.subject,
                "html_body": content.html_body,
                "sender_address": content.sender_address,
            }),
            Self::Bulk {
                recipients,
                content,
            } => json!({
                "is_bulk": true,
                "recipients": recipients,
                "subject": content.subject,
                "html_body": content.html_body,
                "sender_address": content.sender_address,
            }),
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::Bulk { .. })
    }

    pub fn content(&self) -> &EmailContent {
        match self {
            Self::Single { content, .. } | Self::Bulk { content, .. } => content,
        }
    }

    pub fn recipients(&self) -> &[EmailRecipient] {
        match self {
            Self::Single { recipient, .. } => std::slice::from_ref(recipient),
            Self::Bulk { recipients, .. } => recipients,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn content() -> EmailContent {
        EmailContent::new("お知らせ", "<p>本文</p>", None).unwrap()
    }

    #[test]
    fn test_単発ペイロードはエンコードとデコードでラウンドトリップする() {
        let payload = EmailPayload::single(
            EmailRecipient {
                email: "user@example.com".to_string(),
                name:  Some("担当者".to_string()),
            },
            content(),
        )
        .unwrap();

        let decoded = EmailPayload::decode(&payload.encode()).unwrap();

        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_一括ペイロードは全受信者を保ってラウンドトリップする() {
        let recipients: Vec<EmailRecipient> = (0..50)
            .map(|i| EmailRecipient {
                email: format!("user{i}@example.com"),
                name:  (i % 2 == 0).then(|| format!("ユーザー {i}")),
            })
            .collect();
        let payload = EmailPayload::bulk(recipients.clone(), content()).unwrap();

        let decoded = EmailPayload::decode(&payload.encode()).unwrap();

        assert_eq!(decoded.recipients(), recipients.as_slice());
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_is_bulk省略時は単発として扱う() {
        let value = json!({
            "to_email": "user@example.com",
            "subject": "件名",
            "html_body": "<p>本文</p>",
        });

        let payload = EmailPayload::decode(&value).unwrap();

        assert!(!payload.is_bulk());
        assert_eq!(payload.recipients().len(), 1);
    }

    #[test]
    fn test_一括なのにrecipientsがないペイロードは拒否する() {
        let value = json!({
            "is_bulk": true,
            "subject": "件名",
            "html_body": "<p>本文</p>",
        });

        assert!(EmailPayload::decode(&value).is_err());
    }

    #[test]
    fn test_単発なのにto_emailがないペイロードは拒否する() {
        let value = json!({
            "subject": "件名",
            "html_body": "<p>本文</p>",
        });

        assert!(EmailPayload::decode(&value).is_err());
    }

    #[test]
    fn test_件名が空のペイロードは拒否する() {
        let value = json!({
            "to_email": "user@example.com",
            "subject": "   ",
            "html_body": "<p>本文</p>",
        });

        assert!(EmailPayload::decode(&value).is_err());
    }

    #[test]
    fn test_件名が200文字を超えるペイロードは拒否する() {
        assert!(EmailContent::new("あ".repeat(201), "<p>本文</p>", None).is_err());
    }

    #[test]
    fn test_アットマークを含まないアドレスは拒否する() {
        let result = EmailPayload::single(
            EmailRecipient {
                email: "not-an-address".to_string(),
                name:  None,
            },
            content(),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_受信者が100件を超える一括ペイロードは拒否する() {
        let recipients: Vec<EmailRecipient> = (0..101)
            .map(|i| EmailRecipient {
                email: format!("user{i}@example.com"),
                name:  None,
            })
            .collect();

        assert!(EmailPayload::bulk(recipients, content()).is_err());
    }

    #[test]
    fn test_受信者が空の一括ペイロードは拒否する() {
        assert!(EmailPayload::bulk(Vec::new(), content()).is_err());
    }

    #[test]
    fn test_明示された送信元アドレスを保持する() {
        let content =
            EmailContent::new("件名", "<p>本文</p>", Some("sender@example.com".to_string()))
                .unwrap();

        assert_eq!(content.sender_address(), Some("sender@example.com"));
    }
}
