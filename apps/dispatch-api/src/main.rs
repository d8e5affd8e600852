//! # NotiFlow 通知ディスパッチ API
//!
//! メール通知の即時送信とスケジュール配信を提供する HTTP サーバー。
//!
//! ## 起動フロー
//!
//! 1. 環境変数の読み込み（`.env` 対応）
//! 2. tracing の初期化
//! 3. データベース接続プールの作成とマイグレーション適用
//! 4. メール送信バックエンドの選択（cloud / noop）
//! 5. リポジトリ・ユースケース・実行エンジンの組み立て
//! 6. 定期実行トリガーの起動（ローカル環境のみ）
//! 7. HTTP サーバーの起動（Ctrl-C で graceful shutdown）

mod auth;
mod config;
mod error;
mod handler;
mod trigger;
mod usecase;

use std::sync::Arc;

use anyhow::bail;
use notiflow_domain::clock::{Clock, SystemClock};
use notiflow_infra::{
    MailSender, db,
    mailer::{cloud::CloudMailSender, noop::NoopMailSender},
    repository::{
        ApiKeyRepository, EmailLogRepository, PostgresApiKeyRepository,
        PostgresEmailLogRepository, PostgresScheduleRepository, ScheduleRepository,
    },
};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::{
    config::AppConfig,
    handler::AppState,
    trigger::ExecutionTrigger,
    usecase::{EmailUseCase, ScheduleExecutor, ScheduleUseCase},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,notiflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_error::ErrorLayer::default())
        .init();

    let config = AppConfig::from_env();

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("データベースに接続しました");

    let mail_sender: Arc<dyn MailSender> = match config.mailer.backend.as_str() {
        "cloud" => Arc::new(CloudMailSender::new(
            &config.mailer.api_base_url,
            &config.mailer.access_key,
            &config.mailer.secret_key,
        )?),
        "noop" => Arc::new(NoopMailSender::new()),
        other => bail!("未知の MAILER_BACKEND: {other}"),
    };
    tracing::info!(backend = %config.mailer.backend, "メール送信バックエンドを選択しました");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let schedule_repo: Arc<dyn ScheduleRepository> =
        Arc::new(PostgresScheduleRepository::new(pool.clone()));
    let api_key_repo: Arc<dyn ApiKeyRepository> =
        Arc::new(PostgresApiKeyRepository::new(pool.clone()));
    let email_log_repo: Arc<dyn EmailLogRepository> =
        Arc::new(PostgresEmailLogRepository::new(pool.clone()));

    let email_usecase = Arc::new(EmailUseCase::new(
        mail_sender,
        email_log_repo,
        config.mailer.address_book.clone(),
        Arc::clone(&clock),
    ));
    let schedule_usecase = Arc::new(ScheduleUseCase::new(
        Arc::clone(&schedule_repo),
        Arc::clone(&clock),
    ));
    let executor = Arc::new(ScheduleExecutor::new(
        schedule_repo,
        Arc::clone(&api_key_repo),
        Arc::clone(&email_usecase),
        Arc::clone(&clock),
        config.max_concurrency,
    ));
    let trigger = Arc::new(ExecutionTrigger::new(
        executor,
        config.trigger.clone(),
        clock,
    ));
    trigger.start().await;

    let state = AppState {
        api_key_repo,
        email_usecase,
        schedule_usecase,
        trigger: Arc::clone(&trigger),
    };
    let app = handler::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "notiflow-dispatch-api を起動します");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    trigger.stop().await;

    Ok(())
}

/// Ctrl-C を待つ
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "シグナル待機に失敗しました");
    }
    tracing::info!("シャットダウンを開始します");
}
