//! # サプレッション管理ハンドラ
//!
//! 送信禁止アドレスの手動登録・解除と一覧。自動登録（バウンス /
//! 迷惑メール報告）は配信イベント経由で行われる。
//!
//! ## エンドポイント
//!
//! - `GET /email/suppressions?limit=` - 登録一覧
//! - `POST /email/suppressions` - 登録（既存の有効登録は置き換え）
//! - `DELETE /email/suppressions?email=` - 非アクティブ化

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::{
        message::EmailAddress,
        suppression::{Suppression, SuppressionId, SuppressionReason},
    },
};
use grantflow_infra::repository::SuppressionRepository;
use grantflow_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant_from_headers;
use crate::error::ApiError;

/// サプレッション管理 API の共有状態
pub struct SuppressionState {
    pub suppression_repo: Arc<dyn SuppressionRepository>,
}

/// 一覧取得のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// 非アクティブ化のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub email: String,
}

/// サプレッション登録リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateSuppressionRequest {
    pub email:      String,
    pub reason:     SuppressionReason,
    pub detail:     Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// サプレッション登録のレスポンス表現
#[derive(Debug, Serialize)]
pub struct SuppressionDto {
    pub id:         Uuid,
    pub tenant_id:  Option<Uuid>,
    pub email:      String,
    pub reason:     String,
    pub detail:     Option<String>,
    pub active:     bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Suppression> for SuppressionDto {
    fn from(suppression: Suppression) -> Self {
        Self {
            id:         *suppression.id.as_uuid(),
            tenant_id:  suppression.tenant_id.map(|t| *t.as_uuid()),
            email:      suppression.email.as_str().to_string(),
            reason:     suppression.reason.to_string(),
            detail:     suppression.detail,
            active:     suppression.active,
            expires_at: suppression.expires_at,
            created_at: suppression.created_at,
        }
    }
}

/// GET /email/suppressions
#[tracing::instrument(skip_all)]
pub async fn list_suppressions(
    State(state): State<Arc<SuppressionState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let suppressions = state
        .suppression_repo
        .list(tenant_id.as_ref(), limit)
        .await?;

    let response = ApiResponse::new(
        suppressions
            .into_iter()
            .map(SuppressionDto::from)
            .collect::<Vec<_>>(),
    );
    Ok((StatusCode::OK, Json(response)))
}

/// POST /email/suppressions
///
/// 同一 (テナント, アドレス) の既存の有効登録は非アクティブ化され、
/// 新しい登録に置き換わる。
///
/// ## レスポンス
///
/// - `201 Created`: 登録されたサプレッション
/// - `400 Bad Request`: アドレスが不正
#[tracing::instrument(skip_all)]
pub async fn create_suppression(
    State(state): State<Arc<SuppressionState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSuppressionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let email = EmailAddress::new(&req.email)?;

    let suppression = Suppression {
        id: SuppressionId::new(),
        tenant_id,
        email,
        reason: req.reason,
        detail: req.detail,
        active: true,
        expires_at: req.expires_at,
        created_at: Utc::now(),
    };
    state.suppression_repo.upsert_active(&suppression).await?;

    tracing::info!(
        email = %suppression.email,
        reason = %suppression.reason,
        "アドレスをサプレッション登録しました"
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(SuppressionDto::from(suppression))),
    ))
}

/// DELETE /email/suppressions?email=
///
/// 指定アドレスの有効な登録を非アクティブ化する（行は削除しない）。
///
/// ## レスポンス
///
/// - `204 No Content`: 非アクティブ化成功
/// - `404 Not Found`: 有効な登録が存在しない
#[tracing::instrument(skip_all)]
pub async fn delete_suppression(
    State(state): State<Arc<SuppressionState>>,
    headers: HeaderMap,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let email = EmailAddress::new(&query.email)?;

    let deactivated = state
        .suppression_repo
        .deactivate(tenant_id.as_ref(), &email)
        .await?;

    if !deactivated {
        return Err(MailError::NotFound {
            entity_type: "Suppression",
            id:          email.as_str().to_string(),
        }
        .into());
    }

    Ok(StatusCode::NO_CONTENT)
}
