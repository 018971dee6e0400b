//! # DeliveryRepository
//!
//! 配信レコード（`email_deliveries` テーブル）の永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **(outbox_id, recipient) の一意性**: DB の UNIQUE 制約で保証し、
//!   `find_by_outbox_and_recipient` で再ディスパッチ時の冪等性を守る
//! - **終端状態の不変性**: 遷移検証はドメイン層（`apply_event`）が行い、
//!   リポジトリは確定済みレコードの書き込みのみを行う

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::{
        delivery::{DeliveryId, DeliveryRecord, DeliveryStatus},
        message::EmailAddress,
        outbox::OutboxItemId,
        provider::ProviderId,
    },
    tenant::TenantId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 配信レコードリポジトリトレイト
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// 配信レコードを挿入する（ファンアウト時）
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), InfraError>;

    /// 配信レコードの可変フィールドを更新する
    ///
    /// 送信結果の確定（SENT / FAILED）と配信イベントの適用の両方で使用。
    async fn update(&self, record: &DeliveryRecord) -> Result<(), InfraError>;

    /// (outbox, 宛先) でレコードを検索する（冪等性ガード）
    async fn find_by_outbox_and_recipient(
        &self,
        outbox_id: &OutboxItemId,
        recipient: &EmailAddress,
    ) -> Result<Option<DeliveryRecord>, InfraError>;

    /// Outbox アイテムの全配信レコードを取得する（観測 API 用）
    async fn list_by_outbox(
        &self,
        outbox_id: &OutboxItemId,
    ) -> Result<Vec<DeliveryRecord>, InfraError>;

    /// プロバイダーメッセージ ID でレコードを検索する（イベント適用用）
    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeliveryRecord>, InfraError>;
}

/// `email_deliveries` の行型
#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id:            Uuid,
    outbox_id:     Uuid,
    tenant_id:     Option<Uuid>,
    provider_id:   Option<Uuid>,
    message_id:    Option<String>,
    recipient:     String,
    status:        String,
    error_reason:  Option<String>,
    provider_data: serde_json::Value,
    queued_at:     DateTime<Utc>,
    sent_at:       Option<DateTime<Utc>>,
    delivered_at:  Option<DateTime<Utc>>,
    opened_at:     Option<DateTime<Utc>>,
    clicked_at:    Option<DateTime<Utc>>,
    failed_at:     Option<DateTime<Utc>>,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = InfraError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:            DeliveryId::from_uuid(row.id),
            outbox_id:     OutboxItemId::from_uuid(row.outbox_id),
            tenant_id:     row.tenant_id.map(TenantId::from_uuid),
            provider_id:   row.provider_id.map(ProviderId::from_uuid),
            message_id:    row.message_id,
            recipient:     EmailAddress::new(row.recipient)
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            status:        row
                .status
                .parse::<DeliveryStatus>()
                .map_err(|e| InfraError::unexpected(format!("不正な status: {e}")))?,
            error_reason:  row.error_reason,
            provider_data: row.provider_data,
            queued_at:     row.queued_at,
            sent_at:       row.sent_at,
            delivered_at:  row.delivered_at,
            opened_at:     row.opened_at,
            clicked_at:    row.clicked_at,
            failed_at:     row.failed_at,
        })
    }
}

const DELIVERY_COLUMNS: &str = "id, outbox_id, tenant_id, provider_id, message_id, recipient, \
     status, error_reason, provider_data, queued_at, sent_at, delivered_at, \
     opened_at, clicked_at, failed_at";

/// PostgreSQL 実装の DeliveryRepository
#[derive(Debug, Clone)]
pub struct PostgresDeliveryRepository {
    pool: PgPool,
}

impl PostgresDeliveryRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRepository for PostgresDeliveryRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO email_deliveries (
                id, outbox_id, tenant_id, provider_id, message_id, recipient,
                status, error_reason, provider_data,
                queued_at, sent_at, delivered_at, opened_at, clicked_at, failed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.outbox_id.as_uuid())
        .bind(record.tenant_id.as_ref().map(TenantId::as_uuid))
        .bind(record.provider_id.as_ref().map(ProviderId::as_uuid))
        .bind(&record.message_id)
        .bind(record.recipient.as_str())
        .bind(record.status.to_string())
        .bind(&record.error_reason)
        .bind(&record.provider_data)
        .bind(record.queued_at)
        .bind(record.sent_at)
        .bind(record.delivered_at)
        .bind(record.opened_at)
        .bind(record.clicked_at)
        .bind(record.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn update(&self, record: &DeliveryRecord) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_deliveries
            SET status = $2, message_id = $3, error_reason = $4, provider_data = $5,
                sent_at = $6, delivered_at = $7, opened_at = $8,
                clicked_at = $9, failed_at = $10
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.status.to_string())
        .bind(&record.message_id)
        .bind(&record.error_reason)
        .bind(&record.provider_data)
        .bind(record.sent_at)
        .bind(record.delivered_at)
        .bind(record.opened_at)
        .bind(record.clicked_at)
        .bind(record.failed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::unexpected(format!(
                "存在しない配信レコードを更新できません: {}",
                record.id
            )));
        }
        Ok(())
    }

    async fn find_by_outbox_and_recipient(
        &self,
        outbox_id: &OutboxItemId,
        recipient: &EmailAddress,
    ) -> Result<Option<DeliveryRecord>, InfraError> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM email_deliveries \
             WHERE outbox_id = $1 AND recipient = $2"
        ))
        .bind(outbox_id.as_uuid())
        .bind(recipient.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeliveryRecord::try_from).transpose()
    }

    async fn list_by_outbox(
        &self,
        outbox_id: &OutboxItemId,
    ) -> Result<Vec<DeliveryRecord>, InfraError> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM email_deliveries \
             WHERE outbox_id = $1 ORDER BY queued_at"
        ))
        .bind(outbox_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryRecord::try_from).collect()
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeliveryRecord>, InfraError> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM email_deliveries WHERE message_id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeliveryRecord::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresDeliveryRepository>();
    }
}
