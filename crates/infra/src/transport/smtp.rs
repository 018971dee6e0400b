//! SMTP トランスポート実装
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//! 開発環境では Mailpit（ローカル SMTP サーバー）に接続する。

use async_trait::async_trait;
use grantflow_domain::{
    TransportError,
    mail::message::{OutgoingEmail, TransportReceipt},
};
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    message::{Mailbox, Message, MultiPart, SinglePart, header::ContentType},
};
use serde_json::json;

use super::Transport;

/// SMTP トランスポート
///
/// `lettre::AsyncSmtpTransport<Tokio1Executor>` をラップする。
/// Mailpit（開発）や SMTP リレー（テスト環境）で使用する。
#[derive(Debug)]
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// 新しい SMTP トランスポートを作成
    ///
    /// # 引数
    ///
    /// - `host`: SMTP サーバーのホスト名（例: "localhost"）
    /// - `port`: SMTP サーバーのポート番号（例: 1025 for Mailpit）
    pub fn new(host: &str, port: u16) -> Self {
        // builder_dangerous: TLS なしで接続（Mailpit 等のローカル SMTP 向け）
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Self { transport }
    }
}

fn mailbox(
    address: &str,
    display_name: Option<&str>,
    role: &str,
) -> Result<Mailbox, TransportError> {
    let address = address
        .parse()
        .map_err(|e| TransportError(format!("{role}アドレス不正: {e}")))?;
    Ok(Mailbox::new(display_name.map(str::to_string), address))
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, TransportError> {
        // メッセージ ID は自前で採番し、受領票と Message-ID ヘッダーで一致させる
        let message_id = format!("{}@grantflow.mailer", uuid::Uuid::new_v4());

        let builder = Message::builder()
            .from(mailbox(
                email.from.as_str(),
                email.from_name.as_deref(),
                "送信元",
            )?)
            .to(mailbox(email.to.as_str(), None, "宛先")?)
            .subject(&email.subject)
            .message_id(Some(format!("<{message_id}>")));

        let message = match (&email.body_html, &email.body_text) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            (Some(html), None) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.clone()),
            ),
            (None, Some(text)) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text.clone()),
            ),
            (None, None) => {
                return Err(TransportError("本文のないメッセージ".to_string()));
            }
        }
        .map_err(|e| TransportError(format!("メッセージ構築失敗: {e}")))?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| TransportError(format!("SMTP 送信失敗: {e}")))?;

        Ok(TransportReceipt {
            message_id,
            provider_response: json!({
                "code": response.code().to_string(),
                "message": response.first_line(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SmtpTransport>();
    }

    #[test]
    fn 表示名付きのメールボックスを構築できる() {
        let mb = mailbox("grants@example.com", Some("助成金事務局"), "送信元").unwrap();
        assert_eq!(mb.email.to_string(), "grants@example.com");
    }
}
