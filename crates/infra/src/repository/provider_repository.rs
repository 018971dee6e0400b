//! # ProviderRepository
//!
//! トランスポート設定（`email_providers` テーブル）の永続化を担当する
//! リポジトリ。
//!
//! ## 解決規則
//!
//! `find_default` はテナントのアクティブなデフォルトを探し、無ければ
//! グローバルへフォールバックする。いずれも無ければディスパッチ時に
//! ProviderConfiguration エラー（致命的）となる。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::{
        provider::{Provider, ProviderId, ProviderKind},
        sender::SenderId,
    },
    tenant::TenantId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// プロバイダーリポジトリトレイト
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    /// プロバイダーを登録する
    async fn insert(&self, provider: &Provider) -> Result<(), InfraError>;

    /// ID でプロバイダーを検索する
    async fn find_by_id(&self, id: &ProviderId) -> Result<Option<Provider>, InfraError>;

    /// テナントのデフォルトプロバイダーを解決する（グローバルフォールバック付き）
    async fn find_default(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<Option<Provider>, InfraError>;

    /// プロバイダー一覧を取得する
    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Provider>, InfraError>;
}

/// `email_providers` の行型
#[derive(sqlx::FromRow)]
struct ProviderRow {
    id:                Uuid,
    tenant_id:         Option<Uuid>,
    name:              String,
    kind:              String,
    config:            serde_json::Value,
    default_sender_id: Option<Uuid>,
    is_default:        bool,
    active:            bool,
    created_at:        DateTime<Utc>,
}

impl TryFrom<ProviderRow> for Provider {
    type Error = InfraError;

    fn try_from(row: ProviderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:                ProviderId::from_uuid(row.id),
            tenant_id:         row.tenant_id.map(TenantId::from_uuid),
            name:              row.name,
            kind:              row
                .kind
                .parse::<ProviderKind>()
                .map_err(|e| InfraError::unexpected(format!("不正な kind: {e}")))?,
            config:            row.config,
            default_sender_id: row.default_sender_id.map(SenderId::from_uuid),
            is_default:        row.is_default,
            active:            row.active,
            created_at:        row.created_at,
        })
    }
}

const PROVIDER_COLUMNS: &str = "id, tenant_id, name, kind, config, default_sender_id, \
     is_default, active, created_at";

/// PostgreSQL 実装の ProviderRepository
#[derive(Debug, Clone)]
pub struct PostgresProviderRepository {
    pool: PgPool,
}

impl PostgresProviderRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderRepository for PostgresProviderRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, provider: &Provider) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO email_providers (
                id, tenant_id, name, kind, config, default_sender_id,
                is_default, active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(provider.id.as_uuid())
        .bind(provider.tenant_id.as_ref().map(TenantId::as_uuid))
        .bind(&provider.name)
        .bind(provider.kind.to_string())
        .bind(&provider.config)
        .bind(provider.default_sender_id.as_ref().map(SenderId::as_uuid))
        .bind(provider.is_default)
        .bind(provider.active)
        .bind(provider.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &ProviderId) -> Result<Option<Provider>, InfraError> {
        let row: Option<ProviderRow> = sqlx::query_as(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM email_providers WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Provider::try_from).transpose()
    }

    async fn find_default(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<Option<Provider>, InfraError> {
        let row: Option<ProviderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PROVIDER_COLUMNS}
            FROM email_providers
            WHERE is_default AND active
              AND (tenant_id IS NULL OR tenant_id = $1)
            ORDER BY tenant_id NULLS LAST
            LIMIT 1
            "#
        ))
        .bind(tenant_id.map(TenantId::as_uuid))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Provider::try_from).transpose()
    }

    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Provider>, InfraError> {
        let rows: Vec<ProviderRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PROVIDER_COLUMNS}
            FROM email_providers
            WHERE $1::uuid IS NULL OR tenant_id = $1 OR tenant_id IS NULL
            ORDER BY created_at DESC
            "#
        ))
        .bind(tenant_id.map(TenantId::as_uuid))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Provider::try_from).collect()
    }
}
