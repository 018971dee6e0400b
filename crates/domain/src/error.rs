//! # メール配信エラー定義
//!
//! 配信パイプラインのエラー分類を表現する。
//!
//! ## 設計方針
//!
//! - **型による分類**: リトライ可否・HTTP ステータスへの対応をバリアントで明示
//! - **thiserror 活用**: `#[error(...)]` マクロでエラーメッセージを自動生成
//! - **伝播ポリシー**: エンキュー時エラーは呼び出し元へ同期的に返す。
//!   ディスパッチ時エラーは OutboxItem / DeliveryRecord に記録され、
//!   観測 API 経由でのみ参照可能
//!
//! ## エラーの種類と性質の対応
//!
//! | エラー種別 | HTTP ステータス | リトライ |
//! |-----------|----------------|---------|
//! | `Validation` | 400 | 不可 |
//! | `TemplateNotFound` | 404 | 不可 |
//! | `TemplateRender` | 400 | 不可 |
//! | `SuppressedRecipient` | 422 | 不可 |
//! | `ProviderConfiguration` | -（記録のみ） | 不可（致命的） |
//! | `Transport` | -（記録のみ） | 上限まで可 |
//! | `NotFound` | 404 | 不可 |

use thiserror::Error;

/// トランスポート（SMTP / API プロバイダー）呼び出しの失敗
///
/// ネットワーク障害・プロバイダー障害・タイムアウトを区別せずに扱う。
/// アイテムレベルでは試行上限までリトライ可能なエラーとして扱われる。
#[derive(Debug, Clone, Error)]
#[error("トランスポート送信失敗: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    /// メッセージからトランスポートエラーを生成する
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// メール配信パイプラインで発生するエラー
///
/// エンキュー操作は同期的にこのエラーを返す。ディスパッチエンジンは
/// このエラーを OutboxItem に記録し、呼び出し元には返さない。
#[derive(Debug, Error)]
pub enum MailError {
    /// バリデーションエラー
    ///
    /// エンキューリクエストが不正な場合に使用する（宛先なし、
    /// 件名・本文とテンプレートの両方が欠落、など）。
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// テンプレートが見つからない
    #[error("テンプレートが見つかりません: {0}")]
    TemplateNotFound(String),

    /// テンプレートレンダリング失敗
    ///
    /// 必須プレースホルダーの欠落など。エンキューを中断し、
    /// OutboxItem は作成されない。
    #[error("テンプレートレンダリングに失敗: {0}")]
    TemplateRender(String),

    /// 主要宛先がサプレッション登録済み
    ///
    /// エンキュー時点で主要 "to" アドレスがブロックされている場合。
    /// 死んだアイテムを静かに作る代わりに、エンキュー自体を失敗させる。
    #[error("宛先はサプレッション登録されています: {email}")]
    SuppressedRecipient {
        /// ブロックされているメールアドレス
        email: String,
    },

    /// 使用可能なプロバイダー / 送信者設定が存在しない
    ///
    /// ディスパッチ時の致命的エラー。設定が無い以上リトライしても
    /// 変わらないため、アイテムは即座に FAILED となる。
    #[error("プロバイダー設定エラー: {0}")]
    ProviderConfiguration(String),

    /// トランスポート送信失敗（アイテムレベルでリトライ可能）
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// エンティティが見つからない
    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        /// エンティティの種類（"OutboxItem", "Sender" など）
        entity_type: &'static str,
        /// 検索に使用した識別子
        id:          String,
    },
}

impl MailError {
    /// ディスパッチ時にリトライ可能なエラーかどうか
    ///
    /// `Transport` のみが試行上限までのリトライ対象。
    /// `ProviderConfiguration` は致命的で即 FAILED となる。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
