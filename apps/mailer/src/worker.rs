//! # バックグラウンドワーカー
//!
//! ディスパッチエンジンとダイジェストスケジューラーを一定間隔で
//! 駆動するループ。main から `tokio::spawn` される。
//!
//! ## 設計方針
//!
//! - 1 回の実行失敗でループを止めない（記録して次のティックへ）
//! - ティックの遅延時はまとめて実行せず次の間隔まで待つ

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::usecase::{DigestScheduler, DispatchEngine};

/// ディスパッチループを実行する
///
/// `interval` ごとに 1 バッチ分のディスパッチを行う。
pub async fn run_dispatch_loop(engine: Arc<DispatchEngine>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval = ?interval, "ディスパッチワーカーを起動しました");

    loop {
        ticker.tick().await;
        match engine.run_batch(Utc::now()).await {
            Ok(summary) if summary.claimed > 0 || summary.recovered > 0 => {
                tracing::info!(
                    recovered = summary.recovered,
                    claimed = summary.claimed,
                    sent = summary.sent,
                    requeued = summary.requeued,
                    failed = summary.failed,
                    "ディスパッチバッチを実行しました"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "ディスパッチバッチの実行に失敗");
            }
        }
    }
}

/// ダイジェストループを実行する
pub async fn run_digest_loop(scheduler: Arc<DigestScheduler>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval = ?interval, "ダイジェストワーカーを起動しました");

    loop {
        ticker.tick().await;
        match scheduler.run(Utc::now()).await {
            Ok(summary) if summary.due > 0 => {
                tracing::info!(
                    due = summary.due,
                    enqueued = summary.enqueued,
                    empty = summary.empty,
                    suppressed = summary.suppressed,
                    "ダイジェスト実行を完了しました"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "ダイジェスト実行に失敗");
            }
        }
    }
}
