//! Noop トランスポート実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。
//! テスト環境や送信無効化時に使用する。

use async_trait::async_trait;
use grantflow_domain::{
    TransportError,
    mail::message::{OutgoingEmail, TransportReceipt},
};
use serde_json::json;

use super::Transport;

/// Noop トランスポート（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, TransportError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Noop: メール送信をスキップ"
        );

        Ok(TransportReceipt {
            message_id:        format!("noop-{}", uuid::Uuid::new_v4()),
            provider_response: json!({ "noop": true }),
        })
    }
}
