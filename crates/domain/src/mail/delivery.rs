//! # 配信レコード
//!
//! Outbox アイテム 1 件 × 宛先アドレス 1 件 = 配信レコード 1 件。
//! トランスポートの送信結果と、その後の配信イベント（到達・開封・
//! バウンス等）を追跡する。
//!
//! ## 不変条件
//!
//! - (outbox_id, recipient) ごとに厳密に 1 レコード
//! - 終端状態（SUPPRESSED / BOUNCED / SPAM_REPORTED / FAILED）に入った
//!   レコードは以後変更不可

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    error::MailError,
    mail::{message::EmailAddress, outbox::OutboxItemId, provider::ProviderId},
    tenant::TenantId,
};

define_uuid_id! {
    /// 配信レコードの一意識別子
    pub struct DeliveryId;
}

/// 配信レコードの状態
///
/// `email_deliveries.status` カラムに snake_case 文字列で格納される。
/// QUEUED → SENT まではディスパッチエンジンが、DELIVERED 以降は
/// プロバイダーのコールバックイベントが進める。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// 作成済み・トランスポート呼び出し前
    Queued,
    /// トランスポートが受理（メッセージ ID 取得）
    Sent,
    /// 宛先サーバーへ到達
    Delivered,
    /// 開封イベントを受信
    Opened,
    /// リンククリックイベントを受信
    Clicked,
    /// ハードバウンス
    Bounced,
    /// 迷惑メール報告
    SpamReported,
    /// サプレッション登録によりスキップ（トランスポート呼び出しなし）
    Suppressed,
    /// トランスポート送信失敗
    Failed,
}

impl DeliveryStatus {
    /// 終端状態かどうか
    ///
    /// 終端状態のレコードは不変。DELIVERED は開封・クリックの
    /// エンゲージメントイベントを受け付けるため終端扱いにしない。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Suppressed | Self::Bounced | Self::SpamReported | Self::Failed
        )
    }

    /// 自動サプレッションのトリガーとなるイベントかどうか
    ///
    /// ハードバウンスと迷惑メール報告は、該当アドレスを
    /// サプレッション登録するポリシーフックの対象となる。
    pub fn triggers_suppression(self) -> bool {
        matches!(self, Self::Bounced | Self::SpamReported)
    }
}

/// 配信レコード — Outbox アイテムの 1 宛先分の結果
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub id:            DeliveryId,
    pub outbox_id:     OutboxItemId,
    pub tenant_id:     Option<TenantId>,
    /// 送信に使用したプロバイダー（SUPPRESSED の場合は `None`）
    pub provider_id:   Option<ProviderId>,
    /// プロバイダー発行のメッセージ ID（送信成功後に設定）
    pub message_id:    Option<String>,
    pub recipient:     EmailAddress,
    pub status:        DeliveryStatus,
    /// バウンス理由・送信エラーメッセージ
    pub error_reason:  Option<String>,
    /// プロバイダーレスポンス等の不透明なペイロード
    pub provider_data: serde_json::Value,
    pub queued_at:     DateTime<Utc>,
    pub sent_at:       Option<DateTime<Utc>>,
    pub delivered_at:  Option<DateTime<Utc>>,
    pub opened_at:     Option<DateTime<Utc>>,
    pub clicked_at:    Option<DateTime<Utc>>,
    pub failed_at:     Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// 配信イベントを適用する
    ///
    /// 終端状態のレコードへの適用は `MailError::Validation` となる。
    /// イベント種別に対応するタイムスタンプを記録する。
    pub fn apply_event(
        &mut self,
        status: DeliveryStatus,
        reason: Option<String>,
        payload: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), MailError> {
        if self.status.is_terminal() {
            return Err(MailError::Validation(format!(
                "終端状態の配信レコードは変更できません: {}",
                self.status
            )));
        }

        match status {
            DeliveryStatus::Sent => self.sent_at = Some(now),
            DeliveryStatus::Delivered => self.delivered_at = Some(now),
            DeliveryStatus::Opened => self.opened_at = Some(now),
            DeliveryStatus::Clicked => self.clicked_at = Some(now),
            DeliveryStatus::Bounced | DeliveryStatus::SpamReported | DeliveryStatus::Failed => {
                self.failed_at = Some(now);
            }
            DeliveryStatus::Queued | DeliveryStatus::Suppressed => {
                return Err(MailError::Validation(format!(
                    "イベントとして適用できない状態です: {status}"
                )));
            }
        }

        self.status = status;
        if reason.is_some() {
            self.error_reason = reason;
        }
        if let Some(payload) = payload {
            self.provider_data = payload;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn make_record(status: DeliveryStatus) -> DeliveryRecord {
        DeliveryRecord {
            id:            DeliveryId::new(),
            outbox_id:     OutboxItemId::new(),
            tenant_id:     None,
            provider_id:   None,
            message_id:    None,
            recipient:     EmailAddress::new("a@x.com").unwrap(),
            status,
            error_reason:  None,
            provider_data: serde_json::json!({}),
            queued_at:     Utc::now(),
            sent_at:       None,
            delivered_at:  None,
            opened_at:     None,
            clicked_at:    None,
            failed_at:     None,
        }
    }

    #[test]
    fn 終端状態の判定() {
        assert!(DeliveryStatus::Suppressed.is_terminal());
        assert!(DeliveryStatus::Bounced.is_terminal());
        assert!(DeliveryStatus::SpamReported.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Queued.is_terminal());
        assert!(!DeliveryStatus::Sent.is_terminal());
        assert!(!DeliveryStatus::Delivered.is_terminal());
    }

    #[test]
    fn バウンスとスパム報告が自動サプレッション対象() {
        assert!(DeliveryStatus::Bounced.triggers_suppression());
        assert!(DeliveryStatus::SpamReported.triggers_suppression());
        assert!(!DeliveryStatus::Failed.triggers_suppression());
        assert!(!DeliveryStatus::Delivered.triggers_suppression());
    }

    #[test]
    fn 配信イベントで状態とタイムスタンプが進む() {
        let mut record = make_record(DeliveryStatus::Sent);
        let now = Utc::now();

        record
            .apply_event(DeliveryStatus::Delivered, None, None, now)
            .unwrap();
        assert_eq!(record.status, DeliveryStatus::Delivered);
        assert_eq!(record.delivered_at, Some(now));

        record
            .apply_event(DeliveryStatus::Opened, None, None, now)
            .unwrap();
        assert_eq!(record.opened_at, Some(now));
    }

    #[test]
    fn 終端状態のレコードは変更できない() {
        let mut record = make_record(DeliveryStatus::Bounced);
        let result = record.apply_event(DeliveryStatus::Delivered, None, None, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn バウンスイベントで理由が記録される() {
        let mut record = make_record(DeliveryStatus::Sent);
        record
            .apply_event(
                DeliveryStatus::Bounced,
                Some("mailbox does not exist".to_string()),
                None,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(record.status, DeliveryStatus::Bounced);
        assert_eq!(
            record.error_reason.as_deref(),
            Some("mailbox does not exist")
        );
        assert!(record.failed_at.is_some());
    }

    #[test]
    fn ステータスの文字列変換はsnake_case() {
        assert_eq!(DeliveryStatus::SpamReported.to_string(), "spam_reported");
        assert_eq!(
            "spam_reported".parse::<DeliveryStatus>().unwrap(),
            DeliveryStatus::SpamReported
        );
    }
}
