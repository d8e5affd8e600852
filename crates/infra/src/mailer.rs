//! # メールプロバイダクライアント
//!
//! メール送信のためのプロバイダ抽象化を提供する。
//!
//! ## 設計方針
//!
//! - **トレイトによる抽象化**: プロバイダ実装を差し替え可能にする
//! - **実装の切り替え**: 環境変数 `MAILER_BACKEND` で選択
//!   - `cloud`: HMAC 署名付き HTTP API（本番）
//!   - `noop`: ログ出力のみ（開発・検証環境）
//!
//! ## 実装一覧
//!
//! - [`cloud::CloudMailSender`] - クラウドプロバイダ API 実装
//! - [`noop::NoopMailSender`] - 何もしない実装

pub mod cloud;
pub mod noop;

use async_trait::async_trait;
use notiflow_domain::email::EmailRecipient;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// メール送信エラー
#[derive(Debug, Error)]
pub enum MailError {
    /// プロバイダ API が非 2xx を返した
    #[error("プロバイダ API エラー: status={status}, body={body}")]
    Provider { status: u16, body: String },

    /// HTTP リクエスト自体が失敗した（接続エラー、タイムアウト等）
    #[error("HTTP リクエスト失敗: {0}")]
    Transport(#[from] reqwest::Error),

    /// リクエストの構築に失敗した
    #[error("リクエスト構築失敗: {0}")]
    InvalidMessage(String),
}

/// プロバイダに受理された送信の結果
#[derive(Debug, Clone)]
pub struct MailDelivery {
    /// プロバイダが発行したリクエスト ID（追跡用）
    pub request_id: String,
    /// 受理された受信者数
    pub accepted:   usize,
    /// プロバイダの生レスポンス（スケジュール実行結果として保存する）
    pub raw:        JsonValue,
}

/// メール送信トレイト
///
/// 1 回の呼び出しで 1 通のメールを 1 人以上の受信者に送信する。
#[async_trait]
pub trait MailSender: Send + Sync {
    /// メールを送信する
    ///
    /// # Errors
    ///
    /// - `MailError::Provider`: プロバイダが送信を拒否した
    /// - `MailError::Transport`: プロバイダに到達できなかった
    async fn send(
        &self,
        sender_address: &str,
        recipients: &[EmailRecipient],
        subject: &str,
        html_body: &str,
    ) -> Result<MailDelivery, MailError>;
}
