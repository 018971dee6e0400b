//! # メールトランスポート
//!
//! レンダリング済みメッセージの実送信を担当するインフラストラクチャ
//! モジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: `Transport` trait で送信方法を抽象化
//! - **3 つの実装**: SMTP（Mailpit 開発用）、SES（本番用）、Noop（テスト用）
//! - **プロバイダー駆動**: どの実装を使うかはコンパイル時ではなく、
//!   アウトボックスアイテムが解決したプロバイダー行（kind + config）で決まる
//! - **受領票**: 送信成功時はプロバイダー発行のメッセージ ID を含む
//!   `TransportReceipt` を返し、配信イベントとの突き合わせに使う

mod noop;
mod ses;
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use grantflow_domain::{
    MailError,
    TransportError,
    mail::{
        message::{OutgoingEmail, TransportReceipt},
        provider::{Provider, ProviderKind},
    },
};
pub use noop::NoopTransport;
use serde::Deserialize;
pub use ses::SesTransport;
pub use smtp::SmtpTransport;

/// メール送信トレイト
///
/// 配信パイプラインの末端。ファンアウト済みの単一宛先メッセージを
/// 受け取り、受領票を返す。失敗は `TransportError`（リトライ可能）。
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// メールを 1 通送信する
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, TransportError>;
}

/// プロバイダー行からトランスポート実装を解決するトレイト
///
/// 解決の失敗（未知の kind、config の欠落）は設定エラーであり
/// リトライしても直らないため `MailError::ProviderConfiguration` を返す。
pub trait TransportResolver: Send + Sync {
    /// プロバイダーに対応するトランスポートを解決する
    fn resolve(&self, provider: &Provider) -> Result<Arc<dyn Transport>, MailError>;
}

/// SMTP プロバイダーの config カラムの形
#[derive(Debug, Deserialize)]
struct SmtpProviderConfig {
    host: String,
    port: u16,
}

/// プロバイダー種別ごとのトランスポートレジストリ
///
/// SES クライアントは起動時に 1 つだけ構築して共有する（AWS SDK の
/// クライアントは内部でコネクションプールを持つ）。SMTP は config に
/// 接続先を持つため、プロバイダーごとに構築する。
pub struct TransportRegistry {
    ses_client: Option<aws_sdk_sesv2::Client>,
}

impl TransportRegistry {
    /// 新しいレジストリを作成する
    ///
    /// `ses_client` が `None` の場合、SES プロバイダーの解決は
    /// 設定エラーになる。
    pub fn new(ses_client: Option<aws_sdk_sesv2::Client>) -> Self {
        Self { ses_client }
    }
}

impl TransportResolver for TransportRegistry {
    fn resolve(&self, provider: &Provider) -> Result<Arc<dyn Transport>, MailError> {
        match provider.kind {
            ProviderKind::Smtp => {
                let config: SmtpProviderConfig = serde_json::from_value(provider.config.clone())
                    .map_err(|e| {
                        MailError::ProviderConfiguration(format!(
                            "SMTP プロバイダー {} の config が不正です: {e}",
                            provider.name
                        ))
                    })?;
                Ok(Arc::new(SmtpTransport::new(&config.host, config.port)))
            }
            ProviderKind::Ses => {
                let client = self.ses_client.clone().ok_or_else(|| {
                    MailError::ProviderConfiguration(format!(
                        "SES クライアントが未構成のためプロバイダー {} を解決できません",
                        provider.name
                    ))
                })?;
                Ok(Arc::new(SesTransport::new(client)))
            }
            ProviderKind::Noop => Ok(Arc::new(NoopTransport)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use grantflow_domain::mail::provider::ProviderId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn provider(kind: ProviderKind, config: serde_json::Value) -> Provider {
        Provider {
            id: ProviderId::new(),
            tenant_id: None,
            name: "テスト".to_string(),
            kind,
            config,
            default_sender_id: None,
            is_default: true,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn smtpプロバイダーはconfigからトランスポートを構築する() {
        let registry = TransportRegistry::new(None);
        let provider = provider(ProviderKind::Smtp, json!({"host": "localhost", "port": 1025}));

        assert!(registry.resolve(&provider).is_ok());
    }

    #[test]
    fn configが欠落したsmtpプロバイダーは設定エラーになる() {
        let registry = TransportRegistry::new(None);
        let provider = provider(ProviderKind::Smtp, json!({"host": "localhost"}));

        let err = registry.resolve(&provider).unwrap_err();
        assert!(matches!(err, MailError::ProviderConfiguration(_)));
        assert_eq!(err.is_retryable(), false);
    }

    #[test]
    fn sesクライアント未構成でsesプロバイダーは設定エラーになる() {
        let registry = TransportRegistry::new(None);
        let provider = provider(ProviderKind::Ses, json!({}));

        let err = registry.resolve(&provider).unwrap_err();
        assert!(matches!(err, MailError::ProviderConfiguration(_)));
    }

    #[test]
    fn noopプロバイダーは常に解決できる() {
        let registry = TransportRegistry::new(None);
        let provider = provider(ProviderKind::Noop, json!({}));

        assert!(registry.resolve(&provider).is_ok());
    }
}
