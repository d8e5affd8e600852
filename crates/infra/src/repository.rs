//! # リポジトリ実装
//!
//! データベースへのアクセスを抽象化するリポジトリ層。
//!
//! ## 設計方針
//!
//! - **トレイトによる抽象化**: テスト時にモック実装へ差し替え可能にする
//! - **PostgreSQL 実装**: 各トレイトに対して `Postgres*Repository` を提供
//! - **ドメイン型との変換**: DB のフラットな行をドメインの `from_db()` で
//!   検証してからエンティティに復元する

pub mod api_key_repository;
pub mod email_log_repository;
pub mod schedule_repository;

pub use api_key_repository::{ApiKeyRepository, PostgresApiKeyRepository};
pub use email_log_repository::{
    EmailLog, EmailLogRepository, NewEmailLog, PostgresEmailLogRepository,
};
pub use schedule_repository::{
    PostgresScheduleRepository, ScheduleCompletion, ScheduleFilter, ScheduleRepository,
};
