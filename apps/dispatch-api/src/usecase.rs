//! # ユースケース層
//!
//! ハンドラから呼び出されるアプリケーションロジック。
//!
//! ## 設計方針
//!
//! - **リポジトリはトレイト経由**: テスト時はインメモリ実装に差し替える
//! - **所有権スコープ**: スケジュールの参照・取り消しは認証された
//!   API キーが所有するものに限定する
//!
//! ## モジュール構成
//!
//! - [`email`] - メール即時送信と監査ログ記録
//! - [`schedule`] - スケジュールの作成・一覧・取り消し
//! - [`executor`] - 実行対象スケジュールのディスパッチエンジン

pub mod email;
pub mod executor;
pub mod schedule;

pub use email::EmailUseCase;
pub use executor::{ExecutionReport, ScheduleExecutor};
pub use schedule::ScheduleUseCase;
