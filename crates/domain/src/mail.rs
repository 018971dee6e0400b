//! # メール配信モデル
//!
//! Outbox パターンによるトランザクションメール配信のドメインモデル群。
//!
//! ## モジュール構成
//!
//! - [`outbox`] - 送信意図（論理メール）のキュー行と状態機械
//! - [`delivery`] - 宛先ごとの配信結果レコード
//! - [`suppression`] - 送信禁止アドレスの登録
//! - [`template`] - バージョン付きメールテンプレート
//! - [`sender`] - 送信元（From）アイデンティティ
//! - [`provider`] - トランスポート設定（SMTP / SES）
//! - [`preference`] - ユーザーごとの通知設定とケイデンス
//! - [`digest`] - 低優先度通知の定期ダイジェスト
//! - [`message`] - トランスポートへ渡す送信メッセージと受領票

pub mod delivery;
pub mod digest;
pub mod message;
pub mod outbox;
pub mod preference;
pub mod provider;
pub mod sender;
pub mod suppression;
pub mod template;
