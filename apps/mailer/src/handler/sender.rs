//! # 送信者管理ハンドラ
//!
//! 検証済み From アドレスのレジストリ。
//!
//! ## エンドポイント
//!
//! - `GET /email/senders` - 送信者一覧
//! - `POST /email/senders` - 送信者の登録

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grantflow_domain::mail::{
    message::EmailAddress,
    sender::{Sender, SenderId},
};
use grantflow_infra::repository::SenderRepository;
use grantflow_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant_from_headers;
use crate::error::ApiError;

/// 送信者管理 API の共有状態
pub struct SenderState {
    pub sender_repo: Arc<dyn SenderRepository>,
}

/// 送信者登録リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateSenderRequest {
    /// 管理用の表示名
    pub name:         String,
    pub from_address: String,
    pub from_name:    Option<String>,
    #[serde(default)]
    pub is_default:   bool,
    /// 検証済みフラグ（検証フロー自体は運用側の手順）
    #[serde(default)]
    pub verified:     bool,
}

/// 送信者のレスポンス表現
#[derive(Debug, Serialize)]
pub struct SenderDto {
    pub id:           Uuid,
    pub tenant_id:    Option<Uuid>,
    pub name:         String,
    pub from_address: String,
    pub from_name:    Option<String>,
    pub is_default:   bool,
    pub verified:     bool,
    pub created_at:   DateTime<Utc>,
}

impl From<Sender> for SenderDto {
    fn from(sender: Sender) -> Self {
        Self {
            id:           *sender.id.as_uuid(),
            tenant_id:    sender.tenant_id.map(|t| *t.as_uuid()),
            name:         sender.name,
            from_address: sender.from_address.as_str().to_string(),
            from_name:    sender.from_name,
            is_default:   sender.is_default,
            verified:     sender.verified,
            created_at:   sender.created_at,
        }
    }
}

/// GET /email/senders
#[tracing::instrument(skip_all)]
pub async fn list_senders(
    State(state): State<Arc<SenderState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;

    let senders = state.sender_repo.list(tenant_id.as_ref()).await?;

    let response = ApiResponse::new(
        senders
            .into_iter()
            .map(SenderDto::from)
            .collect::<Vec<_>>(),
    );
    Ok((StatusCode::OK, Json(response)))
}

/// POST /email/senders
///
/// ## レスポンス
///
/// - `201 Created`: 登録された送信者
/// - `400 Bad Request`: From アドレスが不正
#[tracing::instrument(skip_all)]
pub async fn create_sender(
    State(state): State<Arc<SenderState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSenderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    let from_address = EmailAddress::new(&req.from_address)?;

    let sender = Sender {
        id: SenderId::new(),
        tenant_id,
        name: req.name,
        from_address,
        from_name: req.from_name,
        is_default: req.is_default,
        verified: req.verified,
        created_at: Utc::now(),
    };
    state.sender_repo.insert(&sender).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(SenderDto::from(sender)))))
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::Request, routing::get};
    use grantflow_infra::mock::MockSenderRepository;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    fn create_test_app() -> Router {
        let state = Arc::new(SenderState {
            sender_repo: Arc::new(MockSenderRepository::new()),
        });
        Router::new()
            .route("/email/senders", get(list_senders).post(create_sender))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_post_送信者登録が201を返す() {
        // Given
        let sut = create_test_app();

        let request = Request::builder()
            .method(axum::http::Method::POST)
            .uri("/email/senders")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "name": "助成金事務局",
                    "from_address": "Grants@Example.com",
                    "from_name": "事務局",
                    "is_default": true,
                    "verified": true
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
        // アドレスは正規化（小文字化）されて保存される
        assert_eq!(created["data"]["from_address"], json!("grants@example.com"));
    }

    #[tokio::test]
    async fn test_post_不正なfromアドレスは400を返す() {
        // Given
        let sut = create_test_app();

        let request = Request::builder()
            .method(axum::http::Method::POST)
            .uri("/email/senders")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "name": "不正",
                    "from_address": "not-an-address"
                })
                .to_string(),
            ))
            .unwrap();

        // When
        let response = sut.oneshot(request).await.unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
