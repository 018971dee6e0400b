//! # DigestRepository
//!
//! ダイジェスト蓄積行（`email_digests` テーブル）の永続化を担当する
//! リポジトリ。
//!
//! ## 設計方針
//!
//! - **三部キー**: (テナント, ユーザー, メール種別, ケイデンス) ごとに 1 行。
//!   同一ケイデンスでもメール種別ごとに独立したダイジェストになる
//! - **積み込みと実行の分離**: `append_item` は上流プロデューサーが、
//!   `complete_run` はダイジェストスケジューラーのみが呼ぶ。
//!   両者は `SELECT ... FOR UPDATE` で直列化される

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::{
        digest::{Digest, DigestId},
        message::EmailAddress,
        preference::{DigestFrequency, EmailType},
    },
    tenant::TenantId,
    user::UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// ダイジェスト行の識別キー（三部キー + テナント）
#[derive(Debug, Clone)]
pub struct DigestKey {
    pub tenant_id:  Option<TenantId>,
    pub user_id:    UserId,
    pub email_type: EmailType,
    pub frequency:  DigestFrequency,
}

/// ダイジェストリポジトリトレイト
#[async_trait]
pub trait DigestRepository: Send + Sync {
    /// 実行期限が到来したダイジェストを取得する
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Digest>, InfraError>;

    /// 通知項目をダイジェストに積み込む
    ///
    /// キーに一致する行が無ければ新規作成し、初回の `next_run_at` を
    /// `now + ケイデンス間隔` で設定する。
    async fn append_item(
        &self,
        key: &DigestKey,
        recipient: &EmailAddress,
        item: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// 実行完了を記録する（スケジュールを進め、蓄積項目をクリア）
    async fn complete_run(
        &self,
        id: &DigestId,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), InfraError>;
}

/// `email_digests` の行型
#[derive(sqlx::FromRow)]
struct DigestRow {
    id:          Uuid,
    tenant_id:   Option<Uuid>,
    user_id:     Uuid,
    email_type:  String,
    frequency:   String,
    recipient:   String,
    items:       serde_json::Value,
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: DateTime<Utc>,
}

impl TryFrom<DigestRow> for Digest {
    type Error = InfraError;

    fn try_from(row: DigestRow) -> Result<Self, Self::Error> {
        let items = match row.items {
            serde_json::Value::Array(items) => items,
            other => {
                return Err(InfraError::unexpected(format!(
                    "items カラムは JSON 配列である必要があります: {other}"
                )));
            }
        };

        Ok(Self {
            id: DigestId::from_uuid(row.id),
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            user_id: UserId::from_uuid(row.user_id),
            email_type: EmailType::new(row.email_type),
            frequency: row
                .frequency
                .parse::<DigestFrequency>()
                .map_err(|e| InfraError::unexpected(format!("不正な frequency: {e}")))?,
            recipient: EmailAddress::new(row.recipient)
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            items,
            last_run_at: row.last_run_at,
            next_run_at: row.next_run_at,
        })
    }
}

const DIGEST_COLUMNS: &str =
    "id, tenant_id, user_id, email_type, frequency, recipient, items, last_run_at, next_run_at";

/// PostgreSQL 実装の DigestRepository
#[derive(Debug, Clone)]
pub struct PostgresDigestRepository {
    pool: PgPool,
}

impl PostgresDigestRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DigestRepository for PostgresDigestRepository {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Digest>, InfraError> {
        let rows: Vec<DigestRow> = sqlx::query_as(&format!(
            "SELECT {DIGEST_COLUMNS} FROM email_digests \
             WHERE next_run_at <= $1 ORDER BY next_run_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Digest::try_from).collect()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn append_item(
        &self,
        key: &DigestKey,
        recipient: &EmailAddress,
        item: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let Some(initial_next_run) = key.frequency.next_run_after(now) else {
            return Err(InfraError::invalid_input(
                "immediate ケイデンスはダイジェスト蓄積の対象外です".to_string(),
            ));
        };

        // 行の特定と追記を FOR UPDATE で直列化する
        let mut tx = self.pool.begin().await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM email_digests
            WHERE user_id = $1 AND email_type = $2 AND frequency = $3
              AND tenant_id IS NOT DISTINCT FROM $4
            FOR UPDATE
            "#,
        )
        .bind(key.user_id.as_uuid())
        .bind(key.email_type.as_str())
        .bind(key.frequency.to_string())
        .bind(key.tenant_id.as_ref().map(TenantId::as_uuid))
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some((id,)) => {
                sqlx::query(
                    r#"
                    UPDATE email_digests
                    SET items = items || jsonb_build_array($2::jsonb), recipient = $3
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&item)
                .bind(recipient.as_str())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO email_digests (
                        id, tenant_id, user_id, email_type, frequency,
                        recipient, items, last_run_at, next_run_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, jsonb_build_array($7::jsonb), NULL, $8)
                    "#,
                )
                .bind(DigestId::new().as_uuid())
                .bind(key.tenant_id.as_ref().map(TenantId::as_uuid))
                .bind(key.user_id.as_uuid())
                .bind(key.email_type.as_str())
                .bind(key.frequency.to_string())
                .bind(recipient.as_str())
                .bind(&item)
                .bind(initial_next_run)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn complete_run(
        &self,
        id: &DigestId,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_digests
            SET items = '[]'::jsonb, last_run_at = $2, next_run_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::unexpected(format!(
                "存在しないダイジェストの実行を完了できません: {id}"
            )));
        }
        Ok(())
    }
}
