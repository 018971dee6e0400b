//! メール配信パイプライン統合テスト
//!
//! HTTP API とディスパッチエンジンを横断して、エンキュー → 配信 →
//! イベント反映のデータ整合性を検証する。
//!
//! ## ハンドラ単体テストとの違い
//!
//! - ハンドラ単体: 個別エンドポイントのステータスコードを検証
//! - 本テスト: 複数操作を横断したレスポンスデータの整合性を検証
//!
//! ## テストケース
//!
//! - テンプレート作成 → 送信でレンダリング済みの件名がキューに入る
//! - 送信 → ディスパッチ → Outbox / 配信レコードの照会が一貫する
//! - バウンスイベント → 自動サプレッション → 以降の送信が拒否される
//! - 手動サプレッションの解除後は再び送信できる

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    routing::{get, post},
};
use chrono::Utc;
use grantflow_domain::mail::{
    provider::{Provider, ProviderId, ProviderKind},
    sender::{Sender, SenderId},
};
use grantflow_infra::mock::{
    MockDeliveryRepository,
    MockOutboxRepository,
    MockProviderRepository,
    MockSenderRepository,
    MockSuppressionRepository,
    MockTemplateRepository,
    MockTransport,
    MockTransportResolver,
};
use grantflow_mailer::{
    config::WorkerConfig,
    handler::{
        EventState,
        OutboxState,
        SendState,
        SuppressionState,
        TemplateState,
        create_suppression,
        create_template,
        delete_suppression,
        get_outbox_item,
        list_deliveries,
        list_outbox,
        record_delivery_event,
        send_email,
    },
    usecase::{DeliveryEventService, DispatchEngine, EnqueueService},
};
use serde_json::{Value as JsonValue, json};
use tower::ServiceExt;

// --- テストヘルパー ---

/// テスト対象のアプリケーションとディスパッチエンジン一式
struct TestEnv {
    app:       Router,
    engine:    DispatchEngine,
    transport: Arc<MockTransport>,
}

/// テスト用 Mailer アプリケーションを構築する
///
/// グローバルのデフォルトプロバイダー（Noop）と検証済みデフォルト
/// 送信者を種データとして投入する。
fn create_test_env() -> TestEnv {
    let outbox = MockOutboxRepository::new();
    let deliveries = MockDeliveryRepository::new();
    let templates = MockTemplateRepository::new();
    let suppressions = MockSuppressionRepository::new();
    let senders = MockSenderRepository::new();
    let providers = MockProviderRepository::new();
    let transport = Arc::new(MockTransport::new());

    let sender_id = SenderId::new();
    senders.add_sender(Sender {
        id:           sender_id,
        tenant_id:    None,
        name:         "通知用".to_string(),
        from_address: grantflow_domain::mail::message::EmailAddress::new("grants@example.com")
            .unwrap(),
        from_name:    Some("助成金ポータル".to_string()),
        is_default:   true,
        verified:     true,
        created_at:   Utc::now(),
    });
    providers.add_provider(Provider {
        id:                ProviderId::new(),
        tenant_id:         None,
        name:              "テスト経路".to_string(),
        kind:              ProviderKind::Noop,
        config:            json!({}),
        default_sender_id: Some(sender_id),
        is_default:        true,
        active:            true,
        created_at:        Utc::now(),
    });

    let enqueue = Arc::new(EnqueueService::new(
        Arc::new(outbox.clone()),
        Arc::new(templates.clone()),
        Arc::new(suppressions.clone()),
    ));
    let events = Arc::new(DeliveryEventService::new(
        Arc::new(deliveries.clone()),
        Arc::new(suppressions.clone()),
    ));
    let engine = DispatchEngine::new(
        Arc::new(outbox.clone()),
        Arc::new(deliveries.clone()),
        Arc::new(suppressions.clone()),
        Arc::new(senders),
        Arc::new(providers),
        Arc::new(MockTransportResolver::new(transport.clone())),
        WorkerConfig::default(),
    );

    let app = Router::new()
        .route("/email/send", post(send_email))
        .with_state(Arc::new(SendState { enqueue }))
        .route("/email/templates", post(create_template))
        .with_state(Arc::new(TemplateState {
            template_repo: Arc::new(templates),
        }))
        .route(
            "/email/suppressions",
            post(create_suppression).delete(delete_suppression),
        )
        .with_state(Arc::new(SuppressionState {
            suppression_repo: Arc::new(suppressions),
        }))
        .route("/email/outbox", get(list_outbox))
        .route("/email/outbox/{id}", get(get_outbox_item))
        .route("/email/outbox/{id}/deliveries", get(list_deliveries))
        .with_state(Arc::new(OutboxState {
            outbox_repo:   Arc::new(outbox),
            delivery_repo: Arc::new(deliveries),
        }))
        .route("/email/events", post(record_delivery_event))
        .with_state(Arc::new(EventState { events }));

    TestEnv {
        app,
        engine,
        transport,
    }
}

/// JSON ボディ付き POST リクエストを構築する
fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// レスポンスボディを JSON として解析する
async fn parse_body(response: axum::http::Response<Body>) -> JsonValue {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// 送信 API でエンキューし、レスポンスの data を返すヘルパー
async fn send_via_api(app: &Router, body: JsonValue) -> JsonValue {
    let response = app
        .clone()
        .oneshot(post_json("/email/send", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = parse_body(response).await;
    json["data"].clone()
}

/// Outbox アイテムの配信レコード一覧を取得するヘルパー
async fn deliveries_via_api(app: &Router, outbox_id: &str) -> Vec<JsonValue> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/email/outbox/{outbox_id}/deliveries"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = parse_body(response).await;
    json["data"].as_array().unwrap().clone()
}

// --- テストケース ---

#[tokio::test]
async fn test_テンプレート経由の送信はレンダリング済みでキューに入る() {
    // Given: テンプレートを作成
    let env = create_test_env();
    let create_response = env
        .app
        .clone()
        .oneshot(post_json(
            "/email/templates",
            json!({
                "key": "grant_awarded",
                "subject_tpl": "{{ grant_name }} 採択のお知らせ",
                "body_html_tpl": "<p>{{ grant_name }} に採択されました。</p>",
                "body_text_tpl": "{{ grant_name }} に採択されました。"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::CREATED);

    // When: テンプレートキーで送信
    let item = send_via_api(
        &env.app,
        json!({
            "template_key": "grant_awarded",
            "template_data": { "grant_name": "若手研究助成" },
            "to": ["researcher@example.com"]
        }),
    )
    .await;

    // Then: 件名がレンダリング済みで PENDING に入っている
    assert_eq!(item["subject"], "若手研究助成 採択のお知らせ");
    assert_eq!(item["status"], "pending");

    let list_request = Request::builder()
        .method(Method::GET)
        .uri("/email/outbox")
        .body(Body::empty())
        .unwrap();
    let list_response = env.app.oneshot(list_request).await.unwrap();
    let listed = parse_body(list_response).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert_eq!(listed["data"][0]["id"], item["id"]);
}

#[tokio::test]
async fn test_送信からディスパッチを経て配信レコードが照会できる() {
    // Given: 直接指定でエンキュー
    let env = create_test_env();
    let item = send_via_api(
        &env.app,
        json!({
            "subject": "審査結果のお知らせ",
            "body_text": "審査が完了しました。",
            "to": ["applicant@example.com"],
            "cc": ["advisor@example.com"]
        }),
    )
    .await;
    let item_id = item["id"].as_str().unwrap();

    // When: ディスパッチを 1 バッチ実行
    let summary = env.engine.run_batch(Utc::now()).await.unwrap();
    assert_eq!(summary.sent, 1);

    // Then: Outbox は SENT、宛先ごとの配信レコードが照会できる
    let get_request = Request::builder()
        .method(Method::GET)
        .uri(format!("/email/outbox/{item_id}"))
        .body(Body::empty())
        .unwrap();
    let get_response = env.app.clone().oneshot(get_request).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);
    let got = parse_body(get_response).await;
    assert_eq!(got["data"]["status"], "sent");

    let records = deliveries_via_api(&env.app, item_id).await;
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record["status"], "sent");
        assert!(record["message_id"].as_str().is_some());
    }

    // 実際にトランスポートへ 2 通渡っている
    assert_eq!(env.transport.sent().len(), 2);
}

#[tokio::test]
async fn test_バウンスイベント後の同一宛先への送信は拒否される() {
    // Given: 送信 → ディスパッチ済みの配信レコード
    let env = create_test_env();
    let item = send_via_api(
        &env.app,
        json!({
            "subject": "件名",
            "body_text": "本文",
            "to": ["gone@example.com"]
        }),
    )
    .await;
    env.engine.run_batch(Utc::now()).await.unwrap();

    let records = deliveries_via_api(&env.app, item["id"].as_str().unwrap()).await;
    let message_id = records[0]["message_id"].as_str().unwrap().to_string();

    // When: バウンスイベントを記録
    let event_response = env
        .app
        .clone()
        .oneshot(post_json(
            "/email/events",
            json!({
                "message_id": message_id,
                "status": "bounced",
                "reason": "mailbox does not exist"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(event_response.status(), StatusCode::OK);

    // Then: 自動サプレッションにより以降の送信は 422
    let retry_response = env
        .app
        .oneshot(post_json(
            "/email/send",
            json!({
                "subject": "再送",
                "body_text": "本文",
                "to": ["gone@example.com"]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(retry_response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_手動サプレッションの解除後は再び送信できる() {
    // Given: 手動でサプレッション登録
    let env = create_test_env();
    let create_response = env
        .app
        .clone()
        .oneshot(post_json(
            "/email/suppressions",
            json!({
                "email": "paused@example.com",
                "reason": "manual",
                "detail": "本人依頼"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::CREATED);

    // 登録中の送信は拒否される
    let blocked_response = env
        .app
        .clone()
        .oneshot(post_json(
            "/email/send",
            json!({
                "subject": "件名",
                "body_text": "本文",
                "to": ["paused@example.com"]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(blocked_response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // When: サプレッションを解除
    let delete_request = Request::builder()
        .method(Method::DELETE)
        .uri("/email/suppressions?email=paused@example.com")
        .body(Body::empty())
        .unwrap();
    let delete_response = env.app.clone().oneshot(delete_request).await.unwrap();
    assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);

    // Then: 再び送信できる
    let item = send_via_api(
        &env.app,
        json!({
            "subject": "件名",
            "body_text": "本文",
            "to": ["paused@example.com"]
        }),
    )
    .await;
    assert_eq!(item["status"], "pending");
}
