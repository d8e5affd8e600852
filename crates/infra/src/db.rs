//! # PostgreSQL データベース接続管理
//!
//! データベース接続プールの作成とマイグレーションの適用を行う。
//!
//! ## 設計方針
//!
//! - **接続プール**: 毎回接続を張り直すオーバーヘッドを避け、接続を再利用
//! - **sqlx 採用**: 非同期サポート、マイグレーション埋め込み
//! - **PostgreSQL 専用**: 条件付き UPDATE と JSONB カラムに依存する

use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

/// データベースマイグレーションを実行する
///
/// `sqlx::migrate!()` マクロで埋め込まれたマイグレーションファイルを
/// 順番に適用する。適用済みのマイグレーションはスキップされる。
///
/// sqlx が PostgreSQL の advisory lock を使用するため、
/// 複数プロセスから同時に呼び出しても安全。
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// PostgreSQL 接続プールを作成する
///
/// アプリケーション起動時に一度だけ呼び出し、作成したプールを
/// アプリケーション全体で共有する。
///
/// # 設定値
///
/// - `max_connections(10)`: 最大接続数。本番環境では負荷に応じて調整
/// - `acquire_timeout(5秒)`: 接続取得のタイムアウト。超過時はエラー
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}
