//! # OutboxRepository
//!
//! 送信意図キュー（`email_outbox` テーブル）の永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **アトミックなクレーム**: `claim_batch` は `FOR UPDATE SKIP LOCKED` 付き
//!   サブクエリを使った単一 UPDATE 文。並行ワーカーは PENDING 集合を
//!   重複なく分割する（同一アイテムの二重ディスパッチを構造的に防ぐ）
//! - **条件付き状態遷移**: 終端化・再キューの UPDATE は
//!   `WHERE status = 'processing'` を伴い、単調性を永続層でも守る

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::{
        message::EmailAddress,
        outbox::{OutboxItem, OutboxItemId, OutboxStatus, Priority},
        provider::ProviderId,
        sender::SenderId,
        template::EmailTemplateId,
    },
    tenant::TenantId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// Outbox リポジトリトレイト
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// 新しい送信意図を挿入する（エンキュー操作が使用）
    async fn insert(&self, item: &OutboxItem) -> Result<(), InfraError>;

    /// ID でアイテムを検索する
    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, InfraError>;

    /// 作成日時の降順で直近のアイテムを取得する（観測 API 用）
    async fn list_recent(
        &self,
        tenant_id: Option<&TenantId>,
        limit: i64,
    ) -> Result<Vec<OutboxItem>, InfraError>;

    /// PENDING のアイテムを最大 `limit` 件アトミックにクレームする
    ///
    /// 選択と PROCESSING へのマークを単一文で行う。`scheduled_for` が
    /// `now` 以前のアイテムのみが対象で、優先度・作成順に取り出される。
    async fn claim_batch(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxItem>, InfraError>;

    /// PROCESSING → SENT
    async fn mark_sent(&self, id: &OutboxItemId, now: DateTime<Utc>) -> Result<(), InfraError>;

    /// PROCESSING → FAILED（致命的エラーまたは試行上限到達）
    async fn mark_failed(
        &self,
        id: &OutboxItemId,
        attempts: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// PROCESSING → PENDING（バックオフ付きリトライ再キュー）
    async fn requeue_with_backoff(
        &self,
        id: &OutboxItemId,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// クレームが生存期限切れのアイテムを PENDING に戻す
    ///
    /// `claimed_at < cutoff` の PROCESSING 行が対象。ワーカーの
    /// クラッシュ等で宙に浮いたクレームの回復経路。
    async fn recover_stuck(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError>;
}

/// `email_outbox` の行型
#[derive(sqlx::FromRow)]
struct OutboxRow {
    id:            Uuid,
    tenant_id:     Option<Uuid>,
    template_id:   Option<Uuid>,
    sender_id:     Option<Uuid>,
    provider_id:   Option<Uuid>,
    to_addresses:  Vec<String>,
    cc_addresses:  Vec<String>,
    bcc_addresses: Vec<String>,
    subject:       String,
    body_html:     Option<String>,
    body_text:     Option<String>,
    metadata:      serde_json::Value,
    priority:      String,
    scheduled_for: DateTime<Utc>,
    status:        String,
    attempts:      i32,
    last_error:    Option<String>,
    created_at:    DateTime<Utc>,
    claimed_at:    Option<DateTime<Utc>>,
    processed_at:  Option<DateTime<Utc>>,
}

fn parse_addresses(values: Vec<String>) -> Result<Vec<EmailAddress>, InfraError> {
    values
        .into_iter()
        .map(|v| EmailAddress::new(v).map_err(|e| InfraError::unexpected(e.to_string())))
        .collect()
}

impl TryFrom<OutboxRow> for OutboxItem {
    type Error = InfraError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:            OutboxItemId::from_uuid(row.id),
            tenant_id:     row.tenant_id.map(TenantId::from_uuid),
            template_id:   row.template_id.map(EmailTemplateId::from_uuid),
            sender_id:     row.sender_id.map(SenderId::from_uuid),
            provider_id:   row.provider_id.map(ProviderId::from_uuid),
            to:            parse_addresses(row.to_addresses)?,
            cc:            parse_addresses(row.cc_addresses)?,
            bcc:           parse_addresses(row.bcc_addresses)?,
            subject:       row.subject,
            body_html:     row.body_html,
            body_text:     row.body_text,
            metadata:      row.metadata,
            priority:      row
                .priority
                .parse::<Priority>()
                .map_err(|e| InfraError::unexpected(format!("不正な priority: {e}")))?,
            scheduled_for: row.scheduled_for,
            status:        row
                .status
                .parse::<OutboxStatus>()
                .map_err(|e| InfraError::unexpected(format!("不正な status: {e}")))?,
            attempts:      row.attempts,
            last_error:    row.last_error,
            created_at:    row.created_at,
            claimed_at:    row.claimed_at,
            processed_at:  row.processed_at,
        })
    }
}

const OUTBOX_COLUMNS: &str = "id, tenant_id, template_id, sender_id, provider_id, \
     to_addresses, cc_addresses, bcc_addresses, subject, body_html, body_text, \
     metadata, priority, scheduled_for, status, attempts, last_error, \
     created_at, claimed_at, processed_at";

/// PostgreSQL 実装の OutboxRepository
#[derive(Debug, Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, item: &OutboxItem) -> Result<(), InfraError> {
        let to: Vec<String> = item.to.iter().map(|a| a.as_str().to_string()).collect();
        let cc: Vec<String> = item.cc.iter().map(|a| a.as_str().to_string()).collect();
        let bcc: Vec<String> = item.bcc.iter().map(|a| a.as_str().to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO email_outbox (
                id, tenant_id, template_id, sender_id, provider_id,
                to_addresses, cc_addresses, bcc_addresses,
                subject, body_html, body_text, metadata, priority,
                scheduled_for, status, attempts, last_error,
                created_at, claimed_at, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.tenant_id.as_ref().map(TenantId::as_uuid))
        .bind(item.template_id.as_ref().map(EmailTemplateId::as_uuid))
        .bind(item.sender_id.as_ref().map(SenderId::as_uuid))
        .bind(item.provider_id.as_ref().map(ProviderId::as_uuid))
        .bind(&to)
        .bind(&cc)
        .bind(&bcc)
        .bind(&item.subject)
        .bind(&item.body_html)
        .bind(&item.body_text)
        .bind(&item.metadata)
        .bind(item.priority.to_string())
        .bind(item.scheduled_for)
        .bind(item.status.to_string())
        .bind(item.attempts)
        .bind(&item.last_error)
        .bind(item.created_at)
        .bind(item.claimed_at)
        .bind(item.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, InfraError> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM email_outbox WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutboxItem::try_from).transpose()
    }

    async fn list_recent(
        &self,
        tenant_id: Option<&TenantId>,
        limit: i64,
    ) -> Result<Vec<OutboxItem>, InfraError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM email_outbox
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(tenant_id.map(TenantId::as_uuid))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxItem::try_from).collect()
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn claim_batch(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxItem>, InfraError> {
        // 選択と PROCESSING へのマークを単一文で行う。SKIP LOCKED により
        // 並行ワーカーは互いにブロックせず PENDING 集合を分割する。
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            UPDATE email_outbox
            SET status = 'processing', claimed_at = $1
            WHERE id IN (
                SELECT id
                FROM email_outbox
                WHERE status = 'pending' AND scheduled_for <= $1
                ORDER BY
                    CASE priority WHEN 'high' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END,
                    created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxItem::try_from).collect()
    }

    async fn mark_sent(&self, id: &OutboxItemId, now: DateTime<Utc>) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_outbox
            SET status = 'sent', processed_at = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::unexpected(format!(
                "PROCESSING 状態でない Outbox アイテムを SENT にできません: {id}"
            )));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &OutboxItemId,
        attempts: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_outbox
            SET status = 'failed', attempts = $2, last_error = $3, processed_at = $4
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(attempts)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::unexpected(format!(
                "PROCESSING 状態でない Outbox アイテムを FAILED にできません: {id}"
            )));
        }
        Ok(())
    }

    async fn requeue_with_backoff(
        &self,
        id: &OutboxItemId,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_outbox
            SET status = 'pending', attempts = $2, last_error = $3,
                scheduled_for = $4, claimed_at = NULL
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(attempts)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::unexpected(format!(
                "PROCESSING 状態でない Outbox アイテムを再キューできません: {id}"
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn recover_stuck(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_outbox
            SET status = 'pending', claimed_at = NULL
            WHERE status = 'processing' AND claimed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresOutboxRepository>();
    }
}
