//! SES トランスポート実装
//!
//! AWS SES v2 API を使用してメールを送信する。
//! 本番環境で使用する。

use async_trait::async_trait;
use aws_sdk_sesv2::{
    Client,
    types::{Body, Content, Destination, EmailContent, Message},
};
use grantflow_domain::{
    TransportError,
    mail::message::{OutgoingEmail, TransportReceipt},
};
use serde_json::json;

use super::Transport;

/// SES トランスポート
///
/// `aws_sdk_sesv2::Client` をラップする。
/// 本番環境で AWS SES を通じてメールを送信する。
#[derive(Debug)]
pub struct SesTransport {
    client: Client,
}

impl SesTransport {
    /// 新しい SES トランスポートを作成
    ///
    /// # 引数
    ///
    /// - `client`: AWS SES v2 クライアント（送信元は SES で検証済みであること）
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn content(data: &str, label: &str) -> Result<Content, TransportError> {
    Content::builder()
        .data(data)
        .build()
        .map_err(|e| TransportError(format!("{label}構築失敗: {e}")))
}

#[async_trait]
impl Transport for SesTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, TransportError> {
        let destination = Destination::builder()
            .to_addresses(email.to.as_str())
            .build();

        let from = match &email.from_name {
            Some(name) => format!("{name} <{}>", email.from),
            None => email.from.to_string(),
        };

        let mut body = Body::builder();
        if let Some(html) = &email.body_html {
            body = body.html(content(html, "HTML 本文")?);
        }
        if let Some(text) = &email.body_text {
            body = body.text(content(text, "テキスト本文")?);
        }

        let email_content = EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(content(&email.subject, "件名")?)
                    .body(body.build())
                    .build(),
            )
            .build();

        let output = self
            .client
            .send_email()
            .from_email_address(from)
            .destination(destination)
            .content(email_content)
            .send()
            .await
            .map_err(|e| TransportError(format!("SES 送信失敗: {e}")))?;

        let message_id = output
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("ses-{}", uuid::Uuid::new_v4()));

        Ok(TransportReceipt {
            provider_response: json!({ "message_id": &message_id }),
            message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SesTransport>();
    }
}
