//! # grantflow-mailer
//!
//! トランザクショナルメール配信パイプライン。
//!
//! ## 責務
//!
//! - **エンキュー**: 送信意図の受け付けと Outbox への永続化
//! - **ディスパッチ**: Outbox のクレーム → 宛先ファンアウト → 送信
//! - **ダイジェスト**: 低優先度通知の蓄積と定期便化
//! - **観測**: 送信意図・配信結果・イベントの読み取り API
//!
//! HTTP サーバーとバックグラウンドワーカーを 1 プロセスで実行する。
//! 起動経路は `main.rs`、統合テストはこのライブラリクレートから
//! ハンドラを組み立てる。

pub mod config;
pub mod error;
pub mod handler;
pub mod usecase;
pub mod worker;
