//! # TemplateRepository
//!
//! バージョン付きメールテンプレート（`email_templates` テーブル）の
//! 永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **追記のみのバージョニング**: 編集は常に新バージョンの行として挿入。
//!   送信済みアイテムから参照されたテンプレートは不変のまま残る
//! - **シャドウイング解決**: (テナント, キー) の最高バージョンが
//!   (グローバル, キー) をシャドウする

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::template::{EmailTemplate, EmailTemplateId},
    tenant::TenantId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// テンプレート作成リクエスト（リポジトリ INSERT 用データ型）
///
/// バージョン番号はリポジトリが既存の最高バージョン + 1 で採番する。
#[derive(Debug, Clone)]
pub struct NewEmailTemplate {
    pub tenant_id:     Option<TenantId>,
    pub key:           String,
    pub subject_tpl:   String,
    pub body_html_tpl: String,
    pub body_text_tpl: Option<String>,
}

/// テンプレートリポジトリトレイト
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// 新バージョンのテンプレートを作成する
    async fn create(&self, new: NewEmailTemplate) -> Result<EmailTemplate, InfraError>;

    /// ID でテンプレートを検索する
    async fn find_by_id(&self, id: &EmailTemplateId) -> Result<Option<EmailTemplate>, InfraError>;

    /// (テナント, キー) でテンプレートを解決する
    ///
    /// テナント固有の最高バージョン → グローバルの最高バージョンの順。
    async fn resolve(
        &self,
        tenant_id: Option<&TenantId>,
        key: &str,
    ) -> Result<Option<EmailTemplate>, InfraError>;

    /// テンプレート一覧を取得する（各キーの最新バージョンのみ）
    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<EmailTemplate>, InfraError>;

    /// テンプレートをデアクティベートする
    async fn deactivate(&self, id: &EmailTemplateId) -> Result<bool, InfraError>;
}

/// `email_templates` の行型
#[derive(sqlx::FromRow)]
struct TemplateRow {
    id:            Uuid,
    tenant_id:     Option<Uuid>,
    key:           String,
    version:       i32,
    subject_tpl:   String,
    body_html_tpl: String,
    body_text_tpl: Option<String>,
    active:        bool,
    created_at:    DateTime<Utc>,
}

impl From<TemplateRow> for EmailTemplate {
    fn from(row: TemplateRow) -> Self {
        Self {
            id:            EmailTemplateId::from_uuid(row.id),
            tenant_id:     row.tenant_id.map(TenantId::from_uuid),
            key:           row.key,
            version:       row.version,
            subject_tpl:   row.subject_tpl,
            body_html_tpl: row.body_html_tpl,
            body_text_tpl: row.body_text_tpl,
            active:        row.active,
            created_at:    row.created_at,
        }
    }
}

const TEMPLATE_COLUMNS: &str =
    "id, tenant_id, key, version, subject_tpl, body_html_tpl, body_text_tpl, active, created_at";

/// PostgreSQL 実装の TemplateRepository
#[derive(Debug, Clone)]
pub struct PostgresTemplateRepository {
    pool: PgPool,
}

impl PostgresTemplateRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PostgresTemplateRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn create(&self, new: NewEmailTemplate) -> Result<EmailTemplate, InfraError> {
        // バージョン採番と挿入を単一文で行う
        let row: TemplateRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO email_templates (
                id, tenant_id, key, version,
                subject_tpl, body_html_tpl, body_text_tpl, active, created_at
            )
            VALUES (
                $1, $2, $3,
                (
                    SELECT COALESCE(MAX(version), 0) + 1
                    FROM email_templates
                    WHERE key = $3 AND tenant_id IS NOT DISTINCT FROM $2
                ),
                $4, $5, $6, TRUE, $7
            )
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(EmailTemplateId::new().as_uuid())
        .bind(new.tenant_id.as_ref().map(TenantId::as_uuid))
        .bind(&new.key)
        .bind(&new.subject_tpl)
        .bind(&new.body_html_tpl)
        .bind(&new.body_text_tpl)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: &EmailTemplateId) -> Result<Option<EmailTemplate>, InfraError> {
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM email_templates WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EmailTemplate::from))
    }

    async fn resolve(
        &self,
        tenant_id: Option<&TenantId>,
        key: &str,
    ) -> Result<Option<EmailTemplate>, InfraError> {
        // テナント固有の最高バージョンを先に探す
        if let Some(tenant_id) = tenant_id {
            let row: Option<TemplateRow> = sqlx::query_as(&format!(
                r#"
                SELECT {TEMPLATE_COLUMNS}
                FROM email_templates
                WHERE key = $1 AND tenant_id = $2 AND active
                ORDER BY version DESC
                LIMIT 1
                "#
            ))
            .bind(key)
            .bind(tenant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return Ok(Some(row.into()));
            }
        }

        // グローバルへフォールバック
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM email_templates
            WHERE key = $1 AND tenant_id IS NULL AND active
            ORDER BY version DESC
            LIMIT 1
            "#
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EmailTemplate::from))
    }

    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<EmailTemplate>, InfraError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            r#"
            SELECT DISTINCT ON (tenant_id, key) {TEMPLATE_COLUMNS}
            FROM email_templates
            WHERE active AND ($1::uuid IS NULL OR tenant_id = $1 OR tenant_id IS NULL)
            ORDER BY tenant_id, key, version DESC
            "#
        ))
        .bind(tenant_id.map(TenantId::as_uuid))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EmailTemplate::from).collect())
    }

    async fn deactivate(&self, id: &EmailTemplateId) -> Result<bool, InfraError> {
        let result = sqlx::query("UPDATE email_templates SET active = FALSE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresTemplateRepository>();
    }
}
