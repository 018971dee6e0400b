//! # GrantFlow メール配信ドメイン層
//!
//! 助成金管理プラットフォームのトランザクションメール配信パイプラインの
//! ドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **エンティティ**: 一意の識別子を持つオブジェクト（例: OutboxItem,
//!   DeliveryRecord）
//! - **値オブジェクト**: 識別子を持たない不変オブジェクト（例: TenantId,
//!   EmailAddress, OutboxStatus）
//! - **状態機械**: Outbox の PENDING → PROCESSING → {SENT, FAILED} 遷移を
//!   メソッドで強制し、不正遷移をコンパイル外でも `MailError` として検出する
//!
//! ## 依存関係の方向
//!
//! ```text
//! mailer → infra → domain
//! ```
//!
//! ドメイン層はインフラ層（DB、SMTP/SES）には一切依存しない。
//!
//! ## モジュール構成
//!
//! - [`error`] - メール配信固有のエラー分類
//! - [`tenant`] - マルチテナント識別子（`None` = グローバル設定）
//! - [`user`] - 受信ユーザー識別子
//! - [`mail`] - Outbox / Delivery / Suppression / Template / Sender /
//!   Provider / Preference / Digest の各モデル

#[macro_use]
mod macros;

pub mod error;
pub mod mail;
pub mod tenant;
pub mod user;

pub use error::{MailError, TransportError};
