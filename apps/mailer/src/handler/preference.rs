//! # 通知設定ハンドラ
//!
//! ユーザー × メール種別ごとのオプトイン / アウトとケイデンス設定。
//!
//! ## エンドポイント
//!
//! - `GET /email/preferences/{user_id}` - ユーザーの全設定一覧
//! - `GET /email/preferences/{user_id}/{email_type}` - 個別設定
//! - `PUT /email/preferences/{user_id}/{email_type}` - 設定の upsert

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::preference::{DigestFrequency, EmailType, Preference},
    user::UserId,
};
use grantflow_infra::repository::PreferenceRepository;
use grantflow_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// 通知設定 API の共有状態
pub struct PreferenceState {
    pub preference_repo: Arc<dyn PreferenceRepository>,
}

/// 設定 upsert リクエスト
#[derive(Debug, Deserialize)]
pub struct UpsertPreferenceRequest {
    pub enabled:   bool,
    pub frequency: DigestFrequency,
    /// ダイジェストの希望送信時刻（"09:00" 等）
    pub send_time: Option<String>,
    pub timezone:  Option<String>,
}

/// 通知設定のレスポンス表現
#[derive(Debug, Serialize)]
pub struct PreferenceDto {
    pub user_id:    Uuid,
    pub email_type: String,
    pub enabled:    bool,
    pub frequency:  String,
    pub send_time:  Option<String>,
    pub timezone:   Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<Preference> for PreferenceDto {
    fn from(preference: Preference) -> Self {
        Self {
            user_id:    *preference.user_id.as_uuid(),
            email_type: preference.email_type.as_str().to_string(),
            enabled:    preference.enabled,
            frequency:  preference.frequency.to_string(),
            send_time:  preference.send_time,
            timezone:   preference.timezone,
            updated_at: preference.updated_at,
        }
    }
}

/// GET /email/preferences/{user_id}
#[tracing::instrument(skip_all, fields(%user_id))]
pub async fn list_preferences(
    State(state): State<Arc<PreferenceState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let preferences = state
        .preference_repo
        .list_for_user(&UserId::from_uuid(user_id))
        .await?;

    let response = ApiResponse::new(
        preferences
            .into_iter()
            .map(PreferenceDto::from)
            .collect::<Vec<_>>(),
    );
    Ok((StatusCode::OK, Json(response)))
}

/// GET /email/preferences/{user_id}/{email_type}
///
/// ## レスポンス
///
/// - `200 OK`: 設定
/// - `404 Not Found`: 設定が存在しない
#[tracing::instrument(skip_all, fields(%user_id, %email_type))]
pub async fn get_preference(
    State(state): State<Arc<PreferenceState>>,
    Path((user_id, email_type)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let preference = state
        .preference_repo
        .find(&UserId::from_uuid(user_id), &EmailType::new(&email_type))
        .await?
        .ok_or_else(|| MailError::NotFound {
            entity_type: "Preference",
            id:          format!("{user_id}/{email_type}"),
        })?;

    Ok((StatusCode::OK, Json(ApiResponse::new(PreferenceDto::from(preference)))))
}

/// PUT /email/preferences/{user_id}/{email_type}
///
/// 設定が無ければ作成、あれば置き換える。
///
/// ## レスポンス
///
/// - `200 OK`: upsert 後の設定
#[tracing::instrument(skip_all, fields(%user_id, %email_type))]
pub async fn upsert_preference(
    State(state): State<Arc<PreferenceState>>,
    Path((user_id, email_type)): Path<(Uuid, String)>,
    Json(req): Json<UpsertPreferenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let preference = Preference {
        user_id:    UserId::from_uuid(user_id),
        email_type: EmailType::new(&email_type),
        enabled:    req.enabled,
        frequency:  req.frequency,
        send_time:  req.send_time,
        timezone:   req.timezone,
        updated_at: Utc::now(),
    };
    state.preference_repo.upsert(&preference).await?;

    Ok((StatusCode::OK, Json(ApiResponse::new(PreferenceDto::from(preference)))))
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::Request, routing::get};
    use grantflow_infra::mock::MockPreferenceRepository;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    fn create_test_app() -> Router {
        let state = Arc::new(PreferenceState {
            preference_repo: Arc::new(MockPreferenceRepository::new()),
        });
        Router::new()
            .route("/email/preferences/{user_id}", get(list_preferences))
            .route(
                "/email/preferences/{user_id}/{email_type}",
                get(get_preference).put(upsert_preference),
            )
            .with_state(state)
    }

    fn put_preference(user_id: Uuid, email_type: &str, frequency: &str) -> Request<Body> {
        Request::builder()
            .method(axum::http::Method::PUT)
            .uri(format!("/email/preferences/{user_id}/{email_type}"))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "enabled": true,
                    "frequency": frequency,
                    "send_time": "09:00",
                    "timezone": "Asia/Tokyo"
                })
                .to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_設定のupsertが200を返す() {
        // Given
        let sut = create_test_app();
        let user_id = Uuid::new_v4();

        // When
        let response = sut
            .oneshot(put_preference(user_id, "forum_reply", "daily"))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let updated: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(updated["data"]["frequency"], json!("daily"));
        assert_eq!(updated["data"]["enabled"], json!(true));
    }

    #[tokio::test]
    async fn test_get_未設定の種別は404を返す() {
        // Given
        let sut = create_test_app();

        // When
        let request = Request::builder()
            .method(axum::http::Method::GET)
            .uri(format!(
                "/email/preferences/{}/forum_reply",
                Uuid::new_v4()
            ))
            .body(Body::empty())
            .unwrap();
        let response = sut.oneshot(request).await.unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_一覧はユーザーの設定のみ返す() {
        // Given
        let sut = create_test_app();
        let user_id = Uuid::new_v4();
        sut.clone()
            .oneshot(put_preference(user_id, "forum_reply", "weekly"))
            .await
            .unwrap();
        sut.clone()
            .oneshot(put_preference(Uuid::new_v4(), "grant_status_changed", "daily"))
            .await
            .unwrap();

        // When
        let request = Request::builder()
            .method(axum::http::Method::GET)
            .uri(format!("/email/preferences/{user_id}"))
            .body(Body::empty())
            .unwrap();
        let response = sut.oneshot(request).await.unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
        assert_eq!(listed["data"][0]["email_type"], json!("forum_reply"));
    }
}
