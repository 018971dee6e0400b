//! # 配信イベント
//!
//! プロバイダーのコールバック（到達・開封・バウンス等）を配信レコードへ
//! 反映する。メッセージ ID で該当レコードを特定する。
//!
//! ## ポリシーフック
//!
//! ハードバウンスと迷惑メール報告は、該当アドレスを自動的に
//! サプレッション登録する。以後の送信はエンキュー時（to）または
//! ディスパッチ時（cc / bcc）にブロックされる。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::{
        delivery::{DeliveryRecord, DeliveryStatus},
        suppression::{Suppression, SuppressionId, SuppressionReason},
    },
};
use grantflow_infra::repository::{DeliveryRepository, SuppressionRepository};

use crate::error::ApiError;

/// 配信イベントサービス
pub struct DeliveryEventService {
    delivery_repo:    Arc<dyn DeliveryRepository>,
    suppression_repo: Arc<dyn SuppressionRepository>,
}

impl DeliveryEventService {
    pub fn new(
        delivery_repo: Arc<dyn DeliveryRepository>,
        suppression_repo: Arc<dyn SuppressionRepository>,
    ) -> Self {
        Self {
            delivery_repo,
            suppression_repo,
        }
    }

    /// 配信イベントを記録する
    ///
    /// メッセージ ID に対応するレコードが無ければ `NotFound`。
    /// 終端状態のレコードへのイベントはドメイン層で拒否される。
    #[tracing::instrument(skip_all, fields(message_id = %message_id, status = %status))]
    pub async fn record(
        &self,
        message_id: &str,
        status: DeliveryStatus,
        reason: Option<String>,
        payload: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<DeliveryRecord, ApiError> {
        let mut record = self
            .delivery_repo
            .find_by_message_id(message_id)
            .await?
            .ok_or_else(|| MailError::NotFound {
                entity_type: "DeliveryRecord",
                id:          message_id.to_string(),
            })?;

        record.apply_event(status, reason.clone(), payload, now)?;
        self.delivery_repo.update(&record).await?;

        if status.triggers_suppression() {
            self.auto_suppress(&record, status, reason, now).await?;
        }

        Ok(record)
    }

    /// バウンス / 迷惑メール報告による自動サプレッション登録
    async fn auto_suppress(
        &self,
        record: &DeliveryRecord,
        status: DeliveryStatus,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let reason = match status {
            DeliveryStatus::Bounced => SuppressionReason::Bounce,
            DeliveryStatus::SpamReported => SuppressionReason::SpamComplaint,
            // triggers_suppression が真のバリアントのみ到達する
            _ => return Ok(()),
        };

        let suppression = Suppression {
            id: SuppressionId::new(),
            tenant_id: record.tenant_id,
            email: record.recipient.clone(),
            reason,
            detail,
            active: true,
            expires_at: None,
            created_at: now,
        };
        self.suppression_repo.upsert_active(&suppression).await?;

        tracing::warn!(
            email = %record.recipient,
            reason = %reason,
            "配信イベントによりアドレスを自動サプレッション登録しました"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use grantflow_domain::mail::{
        delivery::DeliveryId,
        message::EmailAddress,
        outbox::OutboxItemId,
    };
    use grantflow_infra::mock::{MockDeliveryRepository, MockSuppressionRepository};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    struct Fixture {
        deliveries:   MockDeliveryRepository,
        suppressions: MockSuppressionRepository,
        service:      DeliveryEventService,
    }

    fn make_fixture() -> Fixture {
        let deliveries = MockDeliveryRepository::new();
        let suppressions = MockSuppressionRepository::new();
        let service = DeliveryEventService::new(
            Arc::new(deliveries.clone()),
            Arc::new(suppressions.clone()),
        );
        Fixture {
            deliveries,
            suppressions,
            service,
        }
    }

    fn sent_record(message_id: &str) -> DeliveryRecord {
        DeliveryRecord {
            id:            DeliveryId::new(),
            outbox_id:     OutboxItemId::new(),
            tenant_id:     None,
            provider_id:   None,
            message_id:    Some(message_id.to_string()),
            recipient:     EmailAddress::new("user@example.com").unwrap(),
            status:        DeliveryStatus::Sent,
            error_reason:  None,
            provider_data: json!({}),
            queued_at:     Utc::now(),
            sent_at:       Some(Utc::now()),
            delivered_at:  None,
            opened_at:     None,
            clicked_at:    None,
            failed_at:     None,
        }
    }

    #[tokio::test]
    async fn 到達イベントで状態とタイムスタンプが更新される() {
        let fixture = make_fixture();
        fixture.deliveries.add_record(sent_record("msg-1"));
        let now = Utc::now();

        let record = fixture
            .service
            .record("msg-1", DeliveryStatus::Delivered, None, None, now)
            .await
            .unwrap();

        assert_eq!(record.status, DeliveryStatus::Delivered);
        assert_eq!(record.delivered_at, Some(now));
        assert_eq!(
            fixture.deliveries.records()[0].status,
            DeliveryStatus::Delivered
        );
    }

    #[tokio::test]
    async fn 未知のメッセージidは404() {
        let fixture = make_fixture();

        let result = fixture
            .service
            .record("unknown", DeliveryStatus::Delivered, None, None, Utc::now())
            .await;

        assert!(matches!(
            result,
            Err(ApiError::Mail(MailError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn バウンスイベントで自動サプレッション登録される() {
        let fixture = make_fixture();
        fixture.deliveries.add_record(sent_record("msg-1"));
        let now = Utc::now();

        let record = fixture
            .service
            .record(
                "msg-1",
                DeliveryStatus::Bounced,
                Some("mailbox does not exist".to_string()),
                Some(json!({"bounce_type": "Permanent"})),
                now,
            )
            .await
            .unwrap();

        assert_eq!(record.status, DeliveryStatus::Bounced);

        let suppressions = fixture.suppressions.suppressions();
        assert_eq!(suppressions.len(), 1);
        assert_eq!(suppressions[0].email.as_str(), "user@example.com");
        assert_eq!(suppressions[0].reason, SuppressionReason::Bounce);
        assert!(suppressions[0].active);
        assert_eq!(
            suppressions[0].detail.as_deref(),
            Some("mailbox does not exist")
        );
    }

    #[tokio::test]
    async fn 迷惑メール報告はspam_complaintとして登録される() {
        let fixture = make_fixture();
        fixture.deliveries.add_record(sent_record("msg-1"));

        fixture
            .service
            .record("msg-1", DeliveryStatus::SpamReported, None, None, Utc::now())
            .await
            .unwrap();

        let suppressions = fixture.suppressions.suppressions();
        assert_eq!(suppressions[0].reason, SuppressionReason::SpamComplaint);
    }

    #[tokio::test]
    async fn 到達イベントはサプレッション登録しない() {
        let fixture = make_fixture();
        fixture.deliveries.add_record(sent_record("msg-1"));

        fixture
            .service
            .record("msg-1", DeliveryStatus::Opened, None, None, Utc::now())
            .await
            .unwrap();

        assert!(fixture.suppressions.suppressions().is_empty());
    }

    #[tokio::test]
    async fn 終端状態のレコードへのイベントは拒否される() {
        let fixture = make_fixture();
        let mut record = sent_record("msg-1");
        record.status = DeliveryStatus::Bounced;
        fixture.deliveries.add_record(record);

        let result = fixture
            .service
            .record("msg-1", DeliveryStatus::Delivered, None, None, Utc::now())
            .await;

        assert!(matches!(
            result,
            Err(ApiError::Mail(MailError::Validation(_)))
        ));
    }
}
