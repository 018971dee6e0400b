//! # プロバイダー管理ハンドラ
//!
//! トランスポート設定（SMTP / SES / Noop）のレジストリ。
//!
//! ## エンドポイント
//!
//! - `GET /email/providers` - プロバイダー一覧
//! - `POST /email/providers` - プロバイダーの登録

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::{
        provider::{Provider, ProviderId, ProviderKind},
        sender::SenderId,
    },
};
use grantflow_infra::repository::ProviderRepository;
use grantflow_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant_from_headers;
use crate::error::ApiError;

/// プロバイダー管理 API の共有状態
pub struct ProviderState {
    pub provider_repo: Arc<dyn ProviderRepository>,
}

/// プロバイダー登録リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateProviderRequest {
    /// 管理用の表示名（例: "本番 SES"）
    pub name:              String,
    pub kind:              ProviderKind,
    /// 種別固有の設定（SMTP ホスト・ポート等）
    #[serde(default)]
    pub config:            serde_json::Value,
    pub default_sender_id: Option<Uuid>,
    #[serde(default)]
    pub is_default:        bool,
}

/// プロバイダーのレスポンス表現
///
/// `config` には資格情報が含まれうるためレスポンスには出さない。
#[derive(Debug, Serialize)]
pub struct ProviderDto {
    pub id:                Uuid,
    pub tenant_id:         Option<Uuid>,
    pub name:              String,
    pub kind:              String,
    pub default_sender_id: Option<Uuid>,
    pub is_default:        bool,
    pub active:            bool,
    pub created_at:        DateTime<Utc>,
}

impl From<Provider> for ProviderDto {
    fn from(provider: Provider) -> Self {
        Self {
            id:                *provider.id.as_uuid(),
            tenant_id:         provider.tenant_id.map(|t| *t.as_uuid()),
            name:              provider.name,
            kind:              provider.kind.to_string(),
            default_sender_id: provider.default_sender_id.map(|s| *s.as_uuid()),
            is_default:        provider.is_default,
            active:            provider.active,
            created_at:        provider.created_at,
        }
    }
}

/// GET /email/providers
#[tracing::instrument(skip_all)]
pub async fn list_providers(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;

    let providers = state.provider_repo.list(tenant_id.as_ref()).await?;

    let response = ApiResponse::new(
        providers
            .into_iter()
            .map(ProviderDto::from)
            .collect::<Vec<_>>(),
    );
    Ok((StatusCode::OK, Json(response)))
}

/// POST /email/providers
///
/// ## レスポンス
///
/// - `201 Created`: 登録されたプロバイダー（アクティブ状態）
/// - `400 Bad Request`: 名前が空
#[tracing::instrument(skip_all)]
pub async fn create_provider(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    Json(req): Json<CreateProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;

    if req.name.trim().is_empty() {
        return Err(MailError::Validation("プロバイダー名は必須です".to_string()).into());
    }

    let provider = Provider {
        id: ProviderId::new(),
        tenant_id,
        name: req.name,
        kind: req.kind,
        config: req.config,
        default_sender_id: req.default_sender_id.map(SenderId::from_uuid),
        is_default: req.is_default,
        active: true,
        created_at: Utc::now(),
    };
    state.provider_repo.insert(&provider).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(ProviderDto::from(provider)))))
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::Request, routing::get};
    use grantflow_infra::mock::MockProviderRepository;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    fn create_test_app() -> Router {
        let state = Arc::new(ProviderState {
            provider_repo: Arc::new(MockProviderRepository::new()),
        });
        Router::new()
            .route("/email/providers", get(list_providers).post(create_provider))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_post_プロバイダー登録が201を返しconfigを漏らさない() {
        // Given
        let sut = create_test_app();

        let request = Request::builder()
            .method(axum::http::Method::POST)
            .uri("/email/providers")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "name": "社内 SMTP リレー",
                    "kind": "smtp",
                    "config": {"host": "smtp.internal", "port": 587},
                    "is_default": true
                })
                .to_string(),
            ))
            .unwrap();

        // When
        let response = sut.oneshot(request).await.unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let created: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(created["data"]["kind"], json!("smtp"));
        assert_eq!(created["data"]["active"], json!(true));
        assert!(created["data"].get("config").is_none());
    }

    #[tokio::test]
    async fn test_post_未知の種別は422を返す() {
        // Given
        let sut = create_test_app();

        let request = Request::builder()
            .method(axum::http::Method::POST)
            .uri("/email/providers")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "name": "不明",
                    "kind": "carrier_pigeon"
                })
                .to_string(),
            ))
            .unwrap();

        // When
        let response = sut.oneshot(request).await.unwrap();

        // Then: serde の enum デシリアライズ失敗は axum が 422 を返す
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
