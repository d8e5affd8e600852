//! # NotiFlow ドメイン層
//!
//! 通知配信システムの中核となるドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! このクレートは DDD（ドメイン駆動設計）の原則に従い、以下を提供する:
//!
//! - **エンティティ**: 一意の識別子を持つオブジェクト（例: Schedule, ApiKey）
//! - **値オブジェクト**: 識別子を持たない不変オブジェクト（例: ScheduleName,
//!   ScheduleStatus）
//! - **ドメインサービス**: エンティティに属さない純粋なビジネスロジック
//!   （例: RetryPolicy）
//! - **ドメインエラー**: ビジネスルール違反を表現するエラー型
//!
//! ## 依存関係の方向
//!
//! ```text
//! api → infra → domain → shared
//! ```
//!
//! ドメイン層はインフラ層（DB、外部プロバイダ）には一切依存しない。
//! これにより、スケジュールのライフサイクルとリトライ規則が
//! 純粋な関数として検証可能になる。
//!
//! ## モジュール構成
//!
//! - [`schedule`] - スケジュールエンティティと状態遷移、リトライポリシー
//! - [`email`] - メールペイロードの型付きコーデック
//! - [`api_key`] - クライアント認証用の API キー
//! - [`clock`] - テストで時刻を注入するための抽象化
//! - [`error`] - ドメイン層で発生するエラーの定義

#[macro_use]
mod macros;

pub mod api_key;
pub mod clock;
pub mod email;
pub mod error;
pub mod schedule;
pub mod value_objects;

pub use error::DomainError;
