//! # GrantFlow メール配信インフラ層
//!
//! ドメインモデルの永続化（PostgreSQL / sqlx）と外部トランスポート
//! （SMTP / SES）へのアクセスを提供する。
//!
//! ## モジュール構成
//!
//! - [`db`] - 接続プールとマイグレーション
//! - [`error`] - インフラ層エラー（SpanTrace 付き）
//! - [`repository`] - リポジトリトレイトと PostgreSQL 実装
//! - [`transport`] - トランスポート抽象とレジストリ
//! - [`mock`] - テスト用インメモリ実装（`test-utils` feature）

pub mod db;
pub mod error;
pub mod repository;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{InfraError, InfraErrorKind};
