//! # 配信イベントハンドラ
//!
//! プロバイダーのコールバック（SES 通知や SMTP バウンス処理基盤からの
//! 転送）を受け付け、配信レコードへ反映する。
//!
//! ## エンドポイント
//!
//! - `POST /email/events` - 配信イベントの記録

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use grantflow_domain::mail::delivery::DeliveryStatus;
use grantflow_shared::ApiResponse;
use serde::Deserialize;

use super::outbox::DeliveryDto;
use crate::{error::ApiError, usecase::DeliveryEventService};

/// 配信イベント API の共有状態
pub struct EventState {
    pub events: Arc<DeliveryEventService>,
}

/// 配信イベントリクエスト
#[derive(Debug, Deserialize)]
pub struct DeliveryEventRequest {
    /// トランスポート送信時に発行されたメッセージ ID
    pub message_id:  String,
    pub status:      DeliveryStatus,
    /// バウンス理由等
    pub reason:      Option<String>,
    /// プロバイダーの生ペイロード
    pub payload:     Option<serde_json::Value>,
    /// イベント発生時刻（省略時は受信時刻）
    pub occurred_at: Option<DateTime<Utc>>,
}

/// POST /email/events
///
/// ## レスポンス
///
/// - `200 OK`: 更新後の配信レコード
/// - `400 Bad Request`: 終端状態のレコードへのイベント
/// - `404 Not Found`: メッセージ ID に対応するレコードが無い
#[tracing::instrument(skip_all)]
pub async fn record_delivery_event(
    State(state): State<Arc<EventState>>,
    Json(req): Json<DeliveryEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let occurred_at = req.occurred_at.unwrap_or_else(Utc::now);

    let record = state
        .events
        .record(&req.message_id, req.status, req.reason, req.payload, occurred_at)
        .await?;

    Ok((StatusCode::OK, Json(ApiResponse::new(DeliveryDto::from(record)))))
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::Request, routing::post};
    use grantflow_domain::mail::{
        delivery::{DeliveryId, DeliveryRecord},
        message::EmailAddress,
        outbox::OutboxItemId,
    };
    use grantflow_infra::mock::{MockDeliveryRepository, MockSuppressionRepository};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    fn create_test_app() -> (Router, MockDeliveryRepository, MockSuppressionRepository) {
        let deliveries = MockDeliveryRepository::new();
        let suppressions = MockSuppressionRepository::new();
        let state = Arc::new(EventState {
            events: Arc::new(DeliveryEventService::new(
                Arc::new(deliveries.clone()),
                Arc::new(suppressions.clone()),
            )),
        });
        let app = Router::new()
            .route("/email/events", post(record_delivery_event))
            .with_state(state);
        (app, deliveries, suppressions)
    }

    fn sent_record(message_id: &str) -> DeliveryRecord {
        DeliveryRecord {
            id:            DeliveryId::new(),
            outbox_id:     OutboxItemId::new(),
            tenant_id:     None,
            provider_id:   None,
            message_id:    Some(message_id.to_string()),
            recipient:     EmailAddress::new("user@example.com").unwrap(),
            status:        DeliveryStatus::Sent,
            error_reason:  None,
            provider_data: json!({}),
            queued_at:     Utc::now(),
            sent_at:       Some(Utc::now()),
            delivered_at:  None,
            opened_at:     None,
            clicked_at:    None,
            failed_at:     None,
        }
    }

    fn post_event(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(axum::http::Method::POST)
            .uri("/email/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_到達イベントが200を返す() {
        // Given
        let (sut, deliveries, _) = create_test_app();
        deliveries.add_record(sent_record("msg-1"));

        // When
        let response = sut
            .oneshot(post_event(json!({
                "message_id": "msg-1",
                "status": "delivered"
            })))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let updated: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(updated["data"]["status"], json!("delivered"));
    }

    #[tokio::test]
    async fn test_post_バウンスイベントで自動サプレッション登録される() {
        // Given
        let (sut, deliveries, suppressions) = create_test_app();
        deliveries.add_record(sent_record("msg-1"));

        // When
        let response = sut
            .oneshot(post_event(json!({
                "message_id": "msg-1",
                "status": "bounced",
                "reason": "mailbox does not exist"
            })))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(suppressions.suppressions().len(), 1);
    }

    #[tokio::test]
    async fn test_post_未知のメッセージidは404を返す() {
        // Given
        let (sut, _, _) = create_test_app();

        // When
        let response = sut
            .oneshot(post_event(json!({
                "message_id": "unknown",
                "status": "delivered"
            })))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
