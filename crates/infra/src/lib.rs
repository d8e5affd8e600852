//! # NotiFlow インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 設計方針
//!
//! このクレートはリポジトリトレイトとその PostgreSQL 実装、および
//! メールプロバイダへの HTTP クライアントを提供する。外部システムの詳細を
//! カプセル化し、ドメイン層をインフラの変更から保護する。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理
//! - **リポジトリ実装**: スケジュール・API キー・送信ログの永続化
//! - **メール送信**: プロバイダ API（HMAC 署名付き HTTP）への送信
//!
//! ## 依存関係
//!
//! ```text
//! api → infra → domain
//! ```
//!
//! インフラ層は `domain` に依存する。
//! ドメイン層はインフラ層に依存しない（依存性逆転の原則）。
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`repository`] - リポジトリ実装
//! - [`mailer`] - メールプロバイダクライアント
//! - [`mock`] - テスト用インメモリ実装（`test-utils` feature）

pub mod db;
pub mod error;
pub mod mailer;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod repository;

pub use error::InfraError;
pub use mailer::{MailDelivery, MailError, MailSender};
