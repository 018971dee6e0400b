//! # リポジトリ
//!
//! メール配信パイプラインの永続化を担当するリポジトリ群。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: ユースケース層は trait にのみ依存し、
//!   PostgreSQL 実装とテスト用モックを差し替え可能にする
//! - **行レベルの書き込み**: すべての更新は単一行のキー付き UPDATE。
//!   クロス行の排他が必要なのはクレーム操作のみ（skip-locked）
//! - **アイテム単位のトランザクション**: バッチ全体を 1 トランザクションに
//!   包まない。アイテム B の失敗がアイテム A のコミット済み進捗を
//!   巻き戻さないようにする

pub mod delivery_repository;
pub mod digest_repository;
pub mod outbox_repository;
pub mod preference_repository;
pub mod provider_repository;
pub mod sender_repository;
pub mod suppression_repository;
pub mod template_repository;

pub use delivery_repository::{DeliveryRepository, PostgresDeliveryRepository};
pub use digest_repository::{DigestKey, DigestRepository, PostgresDigestRepository};
pub use outbox_repository::{OutboxRepository, PostgresOutboxRepository};
pub use preference_repository::{PostgresPreferenceRepository, PreferenceRepository};
pub use provider_repository::{PostgresProviderRepository, ProviderRepository};
pub use sender_repository::{PostgresSenderRepository, SenderRepository};
pub use suppression_repository::{PostgresSuppressionRepository, SuppressionRepository};
pub use template_repository::{NewEmailTemplate, PostgresTemplateRepository, TemplateRepository};
