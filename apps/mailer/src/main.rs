//! # Mailer サーバー
//!
//! トランザクショナルメール配信パイプラインのエントリーポイント。
//!
//! ## 役割
//!
//! HTTP API とバックグラウンドワーカーを 1 プロセスで実行する:
//!
//! - **HTTP API**: 送信受付、テンプレート / 送信者 / プロバイダー管理、
//!   サプレッション管理、通知設定、Outbox の観測
//! - **ディスパッチワーカー**: PENDING アイテムのクレームと送信
//! - **ダイジェストワーカー**: 蓄積された通知の定期便化
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `MAILER_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `MAILER_PORT` | **Yes** | ポート番号 |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `DISPATCH_BATCH_SIZE` | No | 1 バッチのクレーム上限（デフォルト: 50） |
//! | `DISPATCH_INTERVAL_SECS` | No | ディスパッチ間隔（デフォルト: 10） |
//! | `DIGEST_INTERVAL_SECS` | No | ダイジェスト確認間隔（デフォルト: 60） |
//! | `DISPATCH_MAX_ATTEMPTS` | No | 試行上限（デフォルト: 5） |
//! | `TRANSPORT_TIMEOUT_SECS` | No | 送信タイムアウト（デフォルト: 30） |
//! | `STUCK_CLAIM_AFTER_MINUTES` | No | クレーム回復までの分数（デフォルト: 10） |
//!
//! ## 起動方法
//!
//! ```bash
//! MAILER_PORT=3002 DATABASE_URL=postgres://... cargo run -p grantflow-mailer
//! ```

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use grantflow_infra::{
    db,
    repository::{
        PostgresDeliveryRepository,
        PostgresDigestRepository,
        PostgresOutboxRepository,
        PostgresPreferenceRepository,
        PostgresProviderRepository,
        PostgresSenderRepository,
        PostgresSuppressionRepository,
        PostgresTemplateRepository,
    },
    transport::TransportRegistry,
};
use grantflow_mailer::{
    config::MailerConfig,
    handler::{
        EventState,
        OutboxState,
        PreferenceState,
        ProviderState,
        SendState,
        SenderState,
        SuppressionState,
        TemplateState,
        create_provider,
        create_sender,
        create_suppression,
        create_template,
        deactivate_template,
        delete_suppression,
        get_outbox_item,
        get_preference,
        get_template,
        health_check,
        list_deliveries,
        list_outbox,
        list_preferences,
        list_providers,
        list_senders,
        list_suppressions,
        list_templates,
        record_delivery_event,
        send_email,
        update_template,
        upsert_preference,
    },
    usecase::{DeliveryEventService, DigestScheduler, DispatchEngine, EnqueueService},
    worker,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mailer サーバーのエントリーポイント
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    // トレーシング初期化
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,grantflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 設定読み込み
    let config = MailerConfig::from_env().expect("設定の読み込みに失敗しました");

    tracing::info!(
        "Mailer サーバーを起動します: {}:{}",
        config.host,
        config.port
    );

    // データベース接続プールを作成
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("データベース接続に失敗しました");
    db::run_migrations(&pool)
        .await
        .expect("マイグレーションの適用に失敗しました");
    tracing::info!("データベースに接続しました");

    // SES クライアント（資格情報は環境から解決される）
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let ses_client = aws_sdk_sesv2::Client::new(&aws_config);
    let transports = Arc::new(TransportRegistry::new(Some(ses_client)));

    // リポジトリ
    let outbox_repo = Arc::new(PostgresOutboxRepository::new(pool.clone()));
    let delivery_repo = Arc::new(PostgresDeliveryRepository::new(pool.clone()));
    let template_repo = Arc::new(PostgresTemplateRepository::new(pool.clone()));
    let sender_repo = Arc::new(PostgresSenderRepository::new(pool.clone()));
    let provider_repo = Arc::new(PostgresProviderRepository::new(pool.clone()));
    let suppression_repo = Arc::new(PostgresSuppressionRepository::new(pool.clone()));
    let preference_repo = Arc::new(PostgresPreferenceRepository::new(pool.clone()));
    let digest_repo = Arc::new(PostgresDigestRepository::new(pool.clone()));

    // ユースケース
    let enqueue = Arc::new(EnqueueService::new(
        outbox_repo.clone(),
        template_repo.clone(),
        suppression_repo.clone(),
    ));
    let dispatch_engine = Arc::new(DispatchEngine::new(
        outbox_repo.clone(),
        delivery_repo.clone(),
        suppression_repo.clone(),
        sender_repo.clone(),
        provider_repo.clone(),
        transports,
        config.worker.clone(),
    ));
    let digest_scheduler = Arc::new(DigestScheduler::new(digest_repo.clone(), enqueue.clone()));
    let events = Arc::new(DeliveryEventService::new(
        delivery_repo.clone(),
        suppression_repo.clone(),
    ));

    // ハンドラの共有状態
    let send_state = Arc::new(SendState {
        enqueue: enqueue.clone(),
    });
    let template_state = Arc::new(TemplateState { template_repo });
    let sender_state = Arc::new(SenderState { sender_repo });
    let provider_state = Arc::new(ProviderState { provider_repo });
    let suppression_state = Arc::new(SuppressionState { suppression_repo });
    let preference_state = Arc::new(PreferenceState { preference_repo });
    let outbox_state = Arc::new(OutboxState {
        outbox_repo,
        delivery_repo,
    });
    let event_state = Arc::new(EventState { events });

    // バックグラウンドワーカー起動
    tokio::spawn(worker::run_dispatch_loop(
        dispatch_engine,
        config.worker.dispatch_interval,
    ));
    tokio::spawn(worker::run_digest_loop(
        digest_scheduler,
        config.worker.digest_interval,
    ));

    // ルーター構築
    let app = Router::new()
        .route("/health", get(health_check))
        // 送信受付 API
        .route("/email/send", post(send_email))
        .with_state(send_state)
        // テンプレート API
        .route("/email/templates", get(list_templates).post(create_template))
        .route(
            "/email/templates/{id}",
            get(get_template)
                .put(update_template)
                .delete(deactivate_template),
        )
        .with_state(template_state)
        // 送信者 API
        .route("/email/senders", get(list_senders).post(create_sender))
        .with_state(sender_state)
        // プロバイダー API
        .route("/email/providers", get(list_providers).post(create_provider))
        .with_state(provider_state)
        // サプレッション API
        .route(
            "/email/suppressions",
            get(list_suppressions)
                .post(create_suppression)
                .delete(delete_suppression),
        )
        .with_state(suppression_state)
        // 通知設定 API
        .route("/email/preferences/{user_id}", get(list_preferences))
        .route(
            "/email/preferences/{user_id}/{email_type}",
            get(get_preference).put(upsert_preference),
        )
        .with_state(preference_state)
        // Outbox 観測 API
        .route("/email/outbox", get(list_outbox))
        .route("/email/outbox/{id}", get(get_outbox_item))
        .route("/email/outbox/{id}/deliveries", get(list_deliveries))
        .with_state(outbox_state)
        // 配信イベント API
        .route("/email/events", post(record_delivery_event))
        .with_state(event_state)
        .layer(TraceLayer::new_for_http());

    // サーバー起動
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("アドレスのパースに失敗しました");

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Mailer サーバーが起動しました: {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
