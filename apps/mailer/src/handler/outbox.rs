//! # Outbox 観測ハンドラ
//!
//! 送信意図と配信結果の読み取り専用 API。
//!
//! ## エンドポイント
//!
//! - `GET /email/outbox?limit=` - 直近の送信意図一覧
//! - `GET /email/outbox/{id}` - 送信意図の詳細
//! - `GET /email/outbox/{id}/deliveries` - 宛先ごとの配信結果

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::{
        delivery::DeliveryRecord,
        outbox::{OutboxItem, OutboxItemId},
    },
    tenant::TenantId,
};
use grantflow_infra::repository::{DeliveryRepository, OutboxRepository};
use grantflow_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant_from_headers;
use crate::error::ApiError;

/// Outbox 観測 API の共有状態
pub struct OutboxState {
    pub outbox_repo:   Arc<dyn OutboxRepository>,
    pub delivery_repo: Arc<dyn DeliveryRepository>,
}

/// 一覧取得のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// 取得件数の上限（デフォルト 50）
    pub limit: Option<i64>,
}

/// Outbox アイテムのレスポンス表現
#[derive(Debug, Serialize)]
pub struct OutboxItemDto {
    pub id:            Uuid,
    pub tenant_id:     Option<Uuid>,
    pub template_id:   Option<Uuid>,
    pub to:            Vec<String>,
    pub cc:            Vec<String>,
    pub bcc:           Vec<String>,
    pub subject:       String,
    pub priority:      String,
    pub status:        String,
    pub attempts:      i32,
    pub last_error:    Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub created_at:    DateTime<Utc>,
    pub processed_at:  Option<DateTime<Utc>>,
}

impl From<OutboxItem> for OutboxItemDto {
    fn from(item: OutboxItem) -> Self {
        Self {
            id:            *item.id.as_uuid(),
            tenant_id:     item.tenant_id.map(|t| *t.as_uuid()),
            template_id:   item.template_id.map(|t| *t.as_uuid()),
            to:            item.to.iter().map(|a| a.as_str().to_string()).collect(),
            cc:            item.cc.iter().map(|a| a.as_str().to_string()).collect(),
            bcc:           item.bcc.iter().map(|a| a.as_str().to_string()).collect(),
            subject:       item.subject,
            priority:      item.priority.to_string(),
            status:        item.status.to_string(),
            attempts:      item.attempts,
            last_error:    item.last_error,
            scheduled_for: item.scheduled_for,
            created_at:    item.created_at,
            processed_at:  item.processed_at,
        }
    }
}

/// 配信レコードのレスポンス表現
#[derive(Debug, Serialize)]
pub struct DeliveryDto {
    pub id:           Uuid,
    pub outbox_id:    Uuid,
    pub recipient:    String,
    pub status:       String,
    pub provider_id:  Option<Uuid>,
    pub message_id:   Option<String>,
    pub error_reason: Option<String>,
    pub queued_at:    DateTime<Utc>,
    pub sent_at:      Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at:    Option<DateTime<Utc>>,
    pub clicked_at:   Option<DateTime<Utc>>,
    pub failed_at:    Option<DateTime<Utc>>,
}

impl From<DeliveryRecord> for DeliveryDto {
    fn from(record: DeliveryRecord) -> Self {
        Self {
            id:           *record.id.as_uuid(),
            outbox_id:    *record.outbox_id.as_uuid(),
            recipient:    record.recipient.as_str().to_string(),
            status:       record.status.to_string(),
            provider_id:  record.provider_id.map(|p| *p.as_uuid()),
            message_id:   record.message_id,
            error_reason: record.error_reason,
            queued_at:    record.queued_at,
            sent_at:      record.sent_at,
            delivered_at: record.delivered_at,
            opened_at:    record.opened_at,
            clicked_at:   record.clicked_at,
            failed_at:    record.failed_at,
        }
    }
}

/// GET /email/outbox
///
/// 直近の送信意図を作成日時の降順で取得する。
#[tracing::instrument(skip_all)]
pub async fn list_outbox(
    State(state): State<Arc<OutboxState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let items = state
        .outbox_repo
        .list_recent(tenant_id.as_ref(), limit)
        .await?;

    let response = ApiResponse::new(
        items
            .into_iter()
            .map(OutboxItemDto::from)
            .collect::<Vec<_>>(),
    );
    Ok((StatusCode::OK, Json(response)))
}

/// GET /email/outbox/{id}
///
/// ## レスポンス
///
/// - `200 OK`: アイテム詳細
/// - `404 Not Found`: アイテムが見つからない
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_outbox_item(
    State(state): State<Arc<OutboxState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .outbox_repo
        .find_by_id(&OutboxItemId::from_uuid(id))
        .await?
        .ok_or_else(|| MailError::NotFound {
            entity_type: "OutboxItem",
            id:          id.to_string(),
        })?;

    Ok((StatusCode::OK, Json(ApiResponse::new(OutboxItemDto::from(item)))))
}

/// GET /email/outbox/{id}/deliveries
///
/// 送信意図 1 件分の宛先ごとの配信結果を取得する。
#[tracing::instrument(skip_all, fields(%id))]
pub async fn list_deliveries(
    State(state): State<Arc<OutboxState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .delivery_repo
        .list_by_outbox(&OutboxItemId::from_uuid(id))
        .await?;

    let response = ApiResponse::new(
        records
            .into_iter()
            .map(DeliveryDto::from)
            .collect::<Vec<_>>(),
    );
    Ok((StatusCode::OK, Json(response)))
}
