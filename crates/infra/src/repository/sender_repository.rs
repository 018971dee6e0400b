//! # SenderRepository
//!
//! 送信者（`email_senders` テーブル）の永続化を担当するリポジトリ。
//!
//! ## 解決規則
//!
//! `find_default` はテナントのアクティブなデフォルト（verified のみ）を
//! 探し、無ければグローバルへフォールバックする。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::{
        message::EmailAddress,
        sender::{Sender, SenderId},
    },
    tenant::TenantId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 送信者リポジトリトレイト
#[async_trait]
pub trait SenderRepository: Send + Sync {
    /// 送信者を登録する
    async fn insert(&self, sender: &Sender) -> Result<(), InfraError>;

    /// ID で送信者を検索する
    async fn find_by_id(&self, id: &SenderId) -> Result<Option<Sender>, InfraError>;

    /// テナントのデフォルト送信者を解決する（グローバルフォールバック付き）
    async fn find_default(&self, tenant_id: Option<&TenantId>)
    -> Result<Option<Sender>, InfraError>;

    /// 送信者一覧を取得する
    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Sender>, InfraError>;
}

/// `email_senders` の行型
#[derive(sqlx::FromRow)]
struct SenderRow {
    id:           Uuid,
    tenant_id:    Option<Uuid>,
    name:         String,
    from_address: String,
    from_name:    Option<String>,
    is_default:   bool,
    verified:     bool,
    created_at:   DateTime<Utc>,
}

impl TryFrom<SenderRow> for Sender {
    type Error = InfraError;

    fn try_from(row: SenderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:           SenderId::from_uuid(row.id),
            tenant_id:    row.tenant_id.map(TenantId::from_uuid),
            name:         row.name,
            from_address: EmailAddress::new(row.from_address)
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            from_name:    row.from_name,
            is_default:   row.is_default,
            verified:     row.verified,
            created_at:   row.created_at,
        })
    }
}

const SENDER_COLUMNS: &str =
    "id, tenant_id, name, from_address, from_name, is_default, verified, created_at";

/// PostgreSQL 実装の SenderRepository
#[derive(Debug, Clone)]
pub struct PostgresSenderRepository {
    pool: PgPool,
}

impl PostgresSenderRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SenderRepository for PostgresSenderRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, sender: &Sender) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO email_senders (
                id, tenant_id, name, from_address, from_name,
                is_default, verified, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(sender.id.as_uuid())
        .bind(sender.tenant_id.as_ref().map(TenantId::as_uuid))
        .bind(&sender.name)
        .bind(sender.from_address.as_str())
        .bind(&sender.from_name)
        .bind(sender.is_default)
        .bind(sender.verified)
        .bind(sender.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &SenderId) -> Result<Option<Sender>, InfraError> {
        let row: Option<SenderRow> = sqlx::query_as(&format!(
            "SELECT {SENDER_COLUMNS} FROM email_senders WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Sender::try_from).transpose()
    }

    async fn find_default(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<Option<Sender>, InfraError> {
        // テナント固有を優先し、グローバルへフォールバック
        let row: Option<SenderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SENDER_COLUMNS}
            FROM email_senders
            WHERE is_default AND verified
              AND (tenant_id IS NULL OR tenant_id = $1)
            ORDER BY tenant_id NULLS LAST
            LIMIT 1
            "#
        ))
        .bind(tenant_id.map(TenantId::as_uuid))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Sender::try_from).transpose()
    }

    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Sender>, InfraError> {
        let rows: Vec<SenderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SENDER_COLUMNS}
            FROM email_senders
            WHERE $1::uuid IS NULL OR tenant_id = $1 OR tenant_id IS NULL
            ORDER BY created_at DESC
            "#
        ))
        .bind(tenant_id.map(TenantId::as_uuid))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Sender::try_from).collect()
    }
}
