//! # 定期実行トリガー
//!
//! 実行エンジンを一定間隔で起動するインプロセスのトリガー。
//!
//! ## 設計方針
//!
//! - **サイクルの重複起動防止**: `try_lock` によるガードで、実行中の
//!   サイクルがあるうちは新しいサイクルを開始しない。定期起動と
//!   手動実行エンドポイントの両方が同じガードを通る
//! - **初回は間隔経過後**: 起動直後ではなく、設定した間隔が経過して
//!   から最初のサイクルを実行する
//! - **graceful shutdown**: `stop()` は watch チャネルでワーカーに
//!   停止を通知し、ワーカータスクの終了を待つ
//!
//! 本番環境では外部のスケジューラ（cron 等）から手動実行エンドポイントを
//! 叩く運用を想定し、このトリガーはローカル環境でのみ有効にする。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use notiflow_domain::{clock::Clock, schedule::ScheduleKind};
use serde::Serialize;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    config::TriggerSettings,
    usecase::{ExecutionReport, ScheduleExecutor},
};

/// 1 回のサイクル起動の結果
#[derive(Debug)]
pub enum CycleOutcome {
    /// サイクルを実行した
    Completed(ExecutionReport),
    /// 実行中のサイクルがあるため開始しなかった
    Skipped,
    /// サイクルの実行に失敗した
    Failed(String),
}

/// トリガーの現在の状態
#[derive(Debug, Serialize)]
pub struct TriggerStatus {
    pub enabled:       bool,
    pub running:       bool,
    pub interval_secs: u64,
    pub last_run_at:   Option<DateTime<Utc>>,
}

/// 起動中のワーカータスク
struct Worker {
    shutdown_tx: watch::Sender<bool>,
    handle:      JoinHandle<()>,
}

/// 定期実行トリガー
pub struct ExecutionTrigger {
    executor:    Arc<ScheduleExecutor>,
    settings:    TriggerSettings,
    cycle_guard: Arc<Mutex<()>>,
    worker:      Mutex<Option<Worker>>,
    last_run_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    clock:       Arc<dyn Clock>,
}

impl ExecutionTrigger {
    pub fn new(
        executor: Arc<ScheduleExecutor>,
        settings: TriggerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            settings,
            cycle_guard: Arc::new(Mutex::new(())),
            worker: Mutex::new(None),
            last_run_at: Arc::new(Mutex::new(None)),
            clock,
        }
    }

    /// ワーカータスクを起動する
    ///
    /// 無効設定の場合と既に起動している場合は何もしない。
    pub async fn start(self: &Arc<Self>) {
        if !self.settings.enabled {
            tracing::info!("定期実行トリガーは無効です");
            return;
        }

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::warn!("定期実行トリガーは既に起動しています");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let trigger = Arc::clone(self);
        let interval = self.settings.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval の初回 tick は即時発火のため読み捨て、
            // 最初のサイクルを間隔経過後にする
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        trigger.run_cycle(None).await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });
        tracing::info!(
            interval_secs = interval.as_secs(),
            "定期実行トリガーを起動しました"
        );
    }

    /// ワーカータスクを停止する
    ///
    /// 停止を通知し、ワーカータスクの終了を待つ。起動していなければ
    /// 何もしない。
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        let _ = worker.shutdown_tx.send(true);
        if let Err(e) = worker.handle.await {
            tracing::error!(error = %e, "トリガーワーカーの終了待ちに失敗しました");
        }

        tracing::info!("定期実行トリガーを停止しました");
    }

    /// 実行サイクルを 1 回起動する
    ///
    /// 実行中のサイクルがある場合は開始せずに `Skipped` を返す。
    /// 定期起動と手動実行エンドポイントの両方から呼ばれる。
    pub async fn run_cycle(&self, kind: Option<ScheduleKind>) -> CycleOutcome {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            tracing::info!("前回の実行サイクルが完了していないためスキップします");
            return CycleOutcome::Skipped;
        };

        *self.last_run_at.lock().await = Some(self.clock.now());

        match self.executor.execute_pending(kind).await {
            Ok(report) => CycleOutcome::Completed(report),
            Err(e) => {
                tracing::error!(error = %e, "実行サイクルが失敗しました");
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    /// トリガーの現在の状態を返す
    pub async fn status(&self) -> TriggerStatus {
        TriggerStatus {
            enabled:       self.settings.enabled,
            running:       self.worker.lock().await.is_some(),
            interval_secs: self.settings.interval.as_secs(),
            last_run_at:   *self.last_run_at.lock().await,
        }
    }
}
