//! # 送信メッセージ
//!
//! トランスポート（SMTP / SES）へ渡す具象メッセージと、その受領票。
//! ディスパッチエンジンのファンアウトにより、宛先 1 件につき 1 通が
//! 独立に送信される。

use serde::{Deserialize, Serialize};

use crate::error::MailError;

/// 検証済みメールアドレス
///
/// trim + 小文字正規化を行い、`@` を含まない文字列を拒否する。
/// RFC 5321 完全準拠の構文検証はトランスポート側（lettre 等）に委ねる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// 文字列からメールアドレスを作成する
    pub fn new(value: impl Into<String>) -> Result<Self, MailError> {
        let value = value.into().trim().to_lowercase();

        if value.is_empty() {
            return Err(MailError::Validation(
                "メールアドレスは必須です".to_string(),
            ));
        }

        // ローカル部とドメイン部が最低 1 文字ずつあること
        let Some((local, domain)) = value.split_once('@') else {
            return Err(MailError::Validation(format!(
                "メールアドレスの形式が不正です: {value}"
            )));
        };
        if local.is_empty() || domain.is_empty() {
            return Err(MailError::Validation(format!(
                "メールアドレスの形式が不正です: {value}"
            )));
        }

        Ok(Self(value))
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 所有権を持つ文字列に変換する
    pub fn into_string(self) -> String {
        self.0
    }
}

/// トランスポートへ渡す送信メッセージ
///
/// ファンアウト後の単一宛先メッセージ。件名・本文はテンプレート
/// レンダリング済みの確定値を持つ。
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    /// 送信元アドレス
    pub from:      EmailAddress,
    /// 送信元表示名
    pub from_name: Option<String>,
    /// 宛先アドレス（ファンアウト済みのため常に 1 件）
    pub to:        EmailAddress,
    /// 件名
    pub subject:   String,
    /// HTML 本文
    pub body_html: Option<String>,
    /// プレーンテキスト本文
    pub body_text: Option<String>,
}

/// トランスポート送信の受領票
///
/// プロバイダーが発行したメッセージ ID と不透明なレスポンスを持つ。
/// DeliveryRecord に記録され、配信イベント（開封・バウンス等）との
/// 突き合わせに使用する。
#[derive(Debug, Clone)]
pub struct TransportReceipt {
    /// プロバイダー発行のメッセージ ID
    pub message_id:        String,
    /// プロバイダーレスポンス（不透明なペイロード）
    pub provider_response: serde_json::Value,
}
