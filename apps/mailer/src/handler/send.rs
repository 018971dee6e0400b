//! # メール送信ハンドラ
//!
//! 送信意図の受け付け。成功するとアイテムは PENDING 状態で Outbox に
//! 入り、ディスパッチワーカーが非同期に配信する。
//!
//! ## エンドポイント
//!
//! - `POST /email/send` - 送信意図のエンキュー

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grantflow_domain::mail::{outbox::Priority, provider::ProviderId, sender::SenderId};
use grantflow_shared::ApiResponse;
use serde::Deserialize;
use uuid::Uuid;

use super::{outbox::OutboxItemDto, tenant_from_headers};
use crate::{
    error::ApiError,
    usecase::{EnqueueRequest, EnqueueService},
};

/// 送信 API の共有状態
pub struct SendState {
    pub enqueue: Arc<EnqueueService>,
}

/// 送信リクエスト
///
/// `template_key` 指定時は `template_data` でレンダリングされる。
/// 未指定時は `subject` と本文（html / text の少なくとも一方）が必須。
#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub template_key:  Option<String>,
    #[serde(default)]
    pub template_data: serde_json::Value,
    pub subject:       Option<String>,
    pub body_html:     Option<String>,
    pub body_text:     Option<String>,
    pub to:            Vec<String>,
    #[serde(default)]
    pub cc:            Vec<String>,
    #[serde(default)]
    pub bcc:           Vec<String>,
    pub sender_id:     Option<Uuid>,
    pub provider_id:   Option<Uuid>,
    #[serde(default = "default_priority")]
    pub priority:      Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default = "default_metadata")]
    pub metadata:      serde_json::Value,
}

fn default_priority() -> Priority {
    Priority::Normal
}

fn default_metadata() -> serde_json::Value {
    serde_json::json!({})
}

/// POST /email/send
///
/// ## レスポンス
///
/// - `201 Created`: 作成された Outbox アイテム
/// - `400 Bad Request`: バリデーション / レンダリングエラー
/// - `404 Not Found`: テンプレートが見つからない
/// - `422 Unprocessable Entity`: 主要宛先がサプレッション登録済み
#[tracing::instrument(skip_all)]
pub async fn send_email(
    State(state): State<Arc<SendState>>,
    headers: HeaderMap,
    Json(req): Json<SendEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;

    let request = EnqueueRequest {
        tenant_id,
        template_key: req.template_key,
        template_data: req.template_data,
        subject: req.subject,
        body_html: req.body_html,
        body_text: req.body_text,
        to: req.to,
        cc: req.cc,
        bcc: req.bcc,
        sender_id: req.sender_id.map(SenderId::from_uuid),
        provider_id: req.provider_id.map(ProviderId::from_uuid),
        priority: req.priority,
        scheduled_for: req.scheduled_for,
        metadata: req.metadata,
    };

    let item = state.enqueue.enqueue(request).await?;

    let response = ApiResponse::new(OutboxItemDto::from(item));
    Ok((StatusCode::CREATED, Json(response)))
}
