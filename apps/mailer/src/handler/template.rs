//! # テンプレート管理ハンドラ
//!
//! バージョン管理されたメールテンプレートの CRUD。
//! テンプレートは不変で、更新は常に新バージョンの作成となる。
//!
//! ## エンドポイント
//!
//! - `GET /email/templates` - キーごとの最新バージョン一覧
//! - `GET /email/templates/{id}` - テンプレート詳細
//! - `POST /email/templates` - 新規作成（キーの次バージョン）
//! - `PUT /email/templates/{id}` - 更新（同一キーの新バージョン作成）
//! - `DELETE /email/templates/{id}` - 非アクティブ化

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::template::{EmailTemplate, EmailTemplateId},
};
use grantflow_infra::repository::{NewEmailTemplate, TemplateRepository};
use grantflow_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant_from_headers;
use crate::error::ApiError;

/// テンプレート管理 API の共有状態
pub struct TemplateState {
    pub template_repo: Arc<dyn TemplateRepository>,
}

/// テンプレート作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    /// テンプレートキー（例: "grant_status_changed"）
    pub key:           String,
    pub subject_tpl:   String,
    pub body_html_tpl: String,
    pub body_text_tpl: Option<String>,
}

/// テンプレート更新リクエスト（同一キーの新バージョンを作成）
#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub subject_tpl:   String,
    pub body_html_tpl: String,
    pub body_text_tpl: Option<String>,
}

/// テンプレートのレスポンス表現
#[derive(Debug, Serialize)]
pub struct TemplateDto {
    pub id:            Uuid,
    pub tenant_id:     Option<Uuid>,
    pub key:           String,
    pub version:       i32,
    pub subject_tpl:   String,
    pub body_html_tpl: String,
    pub body_text_tpl: Option<String>,
    pub active:        bool,
    pub created_at:    DateTime<Utc>,
}

impl From<EmailTemplate> for TemplateDto {
    fn from(template: EmailTemplate) -> Self {
        Self {
            id:            *template.id.as_uuid(),
            tenant_id:     template.tenant_id.map(|t| *t.as_uuid()),
            key:           template.key,
            version:       template.version,
            subject_tpl:   template.subject_tpl,
            body_html_tpl: template.body_html_tpl,
            body_text_tpl: template.body_text_tpl,
            active:        template.active,
            created_at:    template.created_at,
        }
    }
}

/// GET /email/templates
///
/// アクティブなテンプレートをキーごとの最新バージョンで一覧する。
#[tracing::instrument(skip_all)]
pub async fn list_templates(
    State(state): State<Arc<TemplateState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;

    let templates = state.template_repo.list(tenant_id.as_ref()).await?;

    let response = ApiResponse::new(
        templates
            .into_iter()
            .map(TemplateDto::from)
            .collect::<Vec<_>>(),
    );
    Ok((StatusCode::OK, Json(response)))
}

/// GET /email/templates/{id}
///
/// ## レスポンス
///
/// - `200 OK`: テンプレート詳細
/// - `404 Not Found`: テンプレートが見つからない
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_template(
    State(state): State<Arc<TemplateState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let template = state
        .template_repo
        .find_by_id(&EmailTemplateId::from_uuid(id))
        .await?
        .ok_or_else(|| MailError::NotFound {
            entity_type: "EmailTemplate",
            id:          id.to_string(),
        })?;

    Ok((StatusCode::OK, Json(ApiResponse::new(TemplateDto::from(template)))))
}

/// POST /email/templates
///
/// キーの次バージョンとしてテンプレートを作成する。
///
/// ## レスポンス
///
/// - `201 Created`: 作成されたテンプレート（バージョン採番済み）
/// - `400 Bad Request`: キー・件名が空
#[tracing::instrument(skip_all)]
pub async fn create_template(
    State(state): State<Arc<TemplateState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;

    if req.key.trim().is_empty() {
        return Err(MailError::Validation("テンプレートキーは必須です".to_string()).into());
    }
    if req.subject_tpl.trim().is_empty() {
        return Err(MailError::Validation("件名テンプレートは必須です".to_string()).into());
    }

    let template = state
        .template_repo
        .create(NewEmailTemplate {
            tenant_id,
            key: req.key,
            subject_tpl: req.subject_tpl,
            body_html_tpl: req.body_html_tpl,
            body_text_tpl: req.body_text_tpl,
        })
        .await?;

    tracing::info!(
        key = %template.key,
        version = template.version,
        "テンプレートを作成しました"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::new(TemplateDto::from(template)))))
}

/// PUT /email/templates/{id}
///
/// 指定テンプレートと同一キー・同一スコープの新バージョンを作成する。
/// 既存バージョンは変更されない。
///
/// ## レスポンス
///
/// - `200 OK`: 作成された新バージョン
/// - `404 Not Found`: 元テンプレートが見つからない
#[tracing::instrument(skip_all, fields(%id))]
pub async fn update_template(
    State(state): State<Arc<TemplateState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTemplateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = state
        .template_repo
        .find_by_id(&EmailTemplateId::from_uuid(id))
        .await?
        .ok_or_else(|| MailError::NotFound {
            entity_type: "EmailTemplate",
            id:          id.to_string(),
        })?;

    let template = state
        .template_repo
        .create(NewEmailTemplate {
            tenant_id:     existing.tenant_id,
            key:           existing.key,
            subject_tpl:   req.subject_tpl,
            body_html_tpl: req.body_html_tpl,
            body_text_tpl: req.body_text_tpl,
        })
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::new(TemplateDto::from(template)))))
}

/// DELETE /email/templates/{id}
///
/// テンプレートを非アクティブ化する（行は削除しない）。
///
/// ## レスポンス
///
/// - `204 No Content`: 非アクティブ化成功
/// - `404 Not Found`: テンプレートが見つからない
#[tracing::instrument(skip_all, fields(%id))]
pub async fn deactivate_template(
    State(state): State<Arc<TemplateState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let deactivated = state
        .template_repo
        .deactivate(&EmailTemplateId::from_uuid(id))
        .await?;

    if !deactivated {
        return Err(MailError::NotFound {
            entity_type: "EmailTemplate",
            id:          id.to_string(),
        }
        .into());
    }

    Ok(StatusCode::NO_CONTENT)
}
