//! # PreferenceRepository
//!
//! ユーザー通知設定（`email_preferences` テーブル）の永続化を担当する
//! リポジトリ。(user_id, email_type) の一意性は UNIQUE 制約 +
//! `ON CONFLICT` の upsert で守る。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    mail::preference::{DigestFrequency, EmailType, Preference},
    user::UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 通知設定リポジトリトレイト
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// 設定を作成または更新する
    async fn upsert(&self, preference: &Preference) -> Result<(), InfraError>;

    /// (ユーザー, メール種別) で設定を検索する
    async fn find(
        &self,
        user_id: &UserId,
        email_type: &EmailType,
    ) -> Result<Option<Preference>, InfraError>;

    /// ユーザーの全設定を取得する
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Preference>, InfraError>;
}

/// `email_preferences` の行型
#[derive(sqlx::FromRow)]
struct PreferenceRow {
    user_id:    Uuid,
    email_type: String,
    enabled:    bool,
    frequency:  String,
    send_time:  Option<String>,
    timezone:   Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PreferenceRow> for Preference {
    type Error = InfraError;

    fn try_from(row: PreferenceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id:    UserId::from_uuid(row.user_id),
            email_type: EmailType::new(row.email_type),
            enabled:    row.enabled,
            frequency:  row
                .frequency
                .parse::<DigestFrequency>()
                .map_err(|e| InfraError::unexpected(format!("不正な frequency: {e}")))?,
            send_time:  row.send_time,
            timezone:   row.timezone,
            updated_at: row.updated_at,
        })
    }
}

const PREFERENCE_COLUMNS: &str =
    "user_id, email_type, enabled, frequency, send_time, timezone, updated_at";

/// PostgreSQL 実装の PreferenceRepository
#[derive(Debug, Clone)]
pub struct PostgresPreferenceRepository {
    pool: PgPool,
}

impl PostgresPreferenceRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceRepository for PostgresPreferenceRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn upsert(&self, preference: &Preference) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO email_preferences (
                user_id, email_type, enabled, frequency, send_time, timezone, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, email_type)
            DO UPDATE SET
                enabled = EXCLUDED.enabled,
                frequency = EXCLUDED.frequency,
                send_time = EXCLUDED.send_time,
                timezone = EXCLUDED.timezone,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(preference.user_id.as_uuid())
        .bind(preference.email_type.as_str())
        .bind(preference.enabled)
        .bind(preference.frequency.to_string())
        .bind(&preference.send_time)
        .bind(&preference.timezone)
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        user_id: &UserId,
        email_type: &EmailType,
    ) -> Result<Option<Preference>, InfraError> {
        let row: Option<PreferenceRow> = sqlx::query_as(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM email_preferences \
             WHERE user_id = $1 AND email_type = $2"
        ))
        .bind(user_id.as_uuid())
        .bind(email_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Preference::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Preference>, InfraError> {
        let rows: Vec<PreferenceRow> = sqlx::query_as(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM email_preferences \
             WHERE user_id = $1 ORDER BY email_type"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Preference::try_from).collect()
    }
}
