//! # SuppressionRepository
//!
//! 送信禁止アドレス（`email_suppressions` テーブル）の永続化を担当する
//! リポジトリ。
//!
//! ## 設計方針
//!
//! - **有効登録の一意性**: (テナント, アドレス) ごとにアクティブな登録は
//!   最大 1 件。上書き登録は既存をデアクティベートしてから挿入する
//! - **グローバルの包含**: `find_effective` はテナント固有 OR グローバル
//!   （tenant_id IS NULL）の両方を検索する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::{
        message::EmailAddress,
        suppression::{Suppression, SuppressionId, SuppressionReason},
    },
    tenant::TenantId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// サプレッションリポジトリトレイト
#[async_trait]
pub trait SuppressionRepository: Send + Sync {
    /// 有効なサプレッションを登録する（既存の有効登録は上書き）
    async fn upsert_active(&self, suppression: &Suppression) -> Result<(), InfraError>;

    /// (テナント, アドレス) の有効登録をデアクティベートする
    ///
    /// 戻り値は 1 件以上をデアクティベートしたかどうか。
    async fn deactivate(
        &self,
        tenant_id: Option<&TenantId>,
        email: &EmailAddress,
    ) -> Result<bool, InfraError>;

    /// 指定時刻に送信をブロックする登録を検索する
    ///
    /// テナント固有の登録とグローバル登録の両方が対象。テナント固有を
    /// 優先して返す。
    async fn find_effective(
        &self,
        tenant_id: Option<&TenantId>,
        email: &EmailAddress,
        now: DateTime<Utc>,
    ) -> Result<Option<Suppression>, InfraError>;

    /// 登録一覧を取得する（観測 API 用）
    async fn list(
        &self,
        tenant_id: Option<&TenantId>,
        limit: i64,
    ) -> Result<Vec<Suppression>, InfraError>;
}

/// `email_suppressions` の行型
#[derive(sqlx::FromRow)]
struct SuppressionRow {
    id:         Uuid,
    tenant_id:  Option<Uuid>,
    email:      String,
    reason:     String,
    detail:     Option<String>,
    active:     bool,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SuppressionRow> for Suppression {
    type Error = InfraError;

    fn try_from(row: SuppressionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:         SuppressionId::from_uuid(row.id),
            tenant_id:  row.tenant_id.map(TenantId::from_uuid),
            email:      EmailAddress::new(row.email)
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            reason:     row
                .reason
                .parse::<SuppressionReason>()
                .map_err(|e| InfraError::unexpected(format!("不正な reason: {e}")))?,
            detail:     row.detail,
            active:     row.active,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

const SUPPRESSION_COLUMNS: &str =
    "id, tenant_id, email, reason, detail, active, expires_at, created_at";

/// PostgreSQL 実装の SuppressionRepository
#[derive(Debug, Clone)]
pub struct PostgresSuppressionRepository {
    pool: PgPool,
}

impl PostgresSuppressionRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuppressionRepository for PostgresSuppressionRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn upsert_active(&self, suppression: &Suppression) -> Result<(), InfraError> {
        // デアクティベート + 挿入を 1 トランザクションで行い、
        // 有効登録の一意性を保つ
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE email_suppressions
            SET active = FALSE
            WHERE email = $1 AND tenant_id IS NOT DISTINCT FROM $2 AND active
            "#,
        )
        .bind(suppression.email.as_str())
        .bind(suppression.tenant_id.as_ref().map(TenantId::as_uuid))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO email_suppressions (
                id, tenant_id, email, reason, detail, active, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(suppression.id.as_uuid())
        .bind(suppression.tenant_id.as_ref().map(TenantId::as_uuid))
        .bind(suppression.email.as_str())
        .bind(suppression.reason.to_string())
        .bind(&suppression.detail)
        .bind(suppression.active)
        .bind(suppression.expires_at)
        .bind(suppression.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn deactivate(
        &self,
        tenant_id: Option<&TenantId>,
        email: &EmailAddress,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_suppressions
            SET active = FALSE
            WHERE email = $1 AND tenant_id IS NOT DISTINCT FROM $2 AND active
            "#,
        )
        .bind(email.as_str())
        .bind(tenant_id.map(TenantId::as_uuid))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_effective(
        &self,
        tenant_id: Option<&TenantId>,
        email: &EmailAddress,
        now: DateTime<Utc>,
    ) -> Result<Option<Suppression>, InfraError> {
        // テナント固有 OR グローバル。NULLS LAST でテナント固有を優先
        let row: Option<SuppressionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SUPPRESSION_COLUMNS}
            FROM email_suppressions
            WHERE email = $1
              AND active
              AND (expires_at IS NULL OR expires_at > $2)
              AND (tenant_id IS NULL OR tenant_id = $3)
            ORDER BY tenant_id NULLS LAST
            LIMIT 1
            "#
        ))
        .bind(email.as_str())
        .bind(now)
        .bind(tenant_id.map(TenantId::as_uuid))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Suppression::try_from).transpose()
    }

    async fn list(
        &self,
        tenant_id: Option<&TenantId>,
        limit: i64,
    ) -> Result<Vec<Suppression>, InfraError> {
        let rows: Vec<SuppressionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SUPPRESSION_COLUMNS}
            FROM email_suppressions
            WHERE active AND ($1::uuid IS NULL OR tenant_id = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(tenant_id.map(TenantId::as_uuid))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Suppression::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresSuppressionRepository>();
    }
}
