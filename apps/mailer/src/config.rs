//! # メーラー設定
//!
//! 環境変数からメーラーサーバーとワーカーの設定を読み込む。

use std::{env, time::Duration};

/// メーラーサーバーの設定
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// バインドアドレス
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// データベース接続 URL
    pub database_url: String,
    /// ワーカー設定
    pub worker: WorkerConfig,
}

/// ディスパッチ / ダイジェストワーカーの設定
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 1 バッチでクレームするアイテム数の上限
    pub batch_size:         i64,
    /// ディスパッチループの実行間隔
    pub dispatch_interval:  Duration,
    /// ダイジェストループの実行間隔
    pub digest_interval:    Duration,
    /// アイテムごとの送信試行上限（到達で恒久 FAILED）
    pub max_attempts:       i32,
    /// トランスポート送信 1 回あたりのタイムアウト
    pub transport_timeout:  Duration,
    /// クレームの生存期限（これより古い PROCESSING は PENDING に回復）
    pub stuck_claim_after:  chrono::Duration,
}

impl MailerConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            host: env::var("MAILER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("MAILER_PORT")
                .unwrap_or_else(|_| "3002".to_string())
                .parse()
                .expect("MAILER_PORT は有効なポート番号である必要があります"),
            database_url: env::var("DATABASE_URL")?,
            worker: WorkerConfig::from_env(),
        })
    }
}

impl WorkerConfig {
    /// 環境変数からワーカー設定を読み込む
    fn from_env() -> Self {
        Self {
            batch_size:        env_i64("DISPATCH_BATCH_SIZE", 50),
            dispatch_interval: Duration::from_secs(env_i64("DISPATCH_INTERVAL_SECS", 10) as u64),
            digest_interval:   Duration::from_secs(env_i64("DIGEST_INTERVAL_SECS", 60) as u64),
            max_attempts:      env_i64("DISPATCH_MAX_ATTEMPTS", 5) as i32,
            transport_timeout: Duration::from_secs(env_i64("TRANSPORT_TIMEOUT_SECS", 30) as u64),
            stuck_claim_after: chrono::Duration::minutes(env_i64("STUCK_CLAIM_AFTER_MINUTES", 10)),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size:        50,
            dispatch_interval: Duration::from_secs(10),
            digest_interval:   Duration::from_secs(60),
            max_attempts:      5,
            transport_timeout: Duration::from_secs(30),
            stuck_claim_after: chrono::Duration::minutes(10),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{key} は整数である必要があります")),
        Err(_) => default,
    }
}
