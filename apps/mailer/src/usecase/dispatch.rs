//! # ディスパッチエンジン
//!
//! クレーム済み Outbox アイテムを宛先単位の配信へファンアウトする
//! バッチジョブ。複数プロセスでの並行実行を前提とする。
//!
//! ## 設計方針
//!
//! - **アイテム単位の失敗分離**: 1 アイテムの失敗はバッチ内の他アイテムの
//!   処理を妨げない
//! - **致命的エラーとリトライ可能エラーの区別**: プロバイダー / 送信者の
//!   設定不備は即 FAILED（リトライしても直らない）。トランスポート失敗は
//!   試行上限まで指数バックオフ付きで再キュー
//! - **宛先単位の冪等性**: 再ディスパッチ時、送信が確定済みの宛先
//!   （QUEUED 以外のレコードを持つ）はスキップされ二重送信しない。
//!   QUEUED のまま残った宛先のみ再送信する
//! - **サプレッションの宛先単位適用**: ブロックされた宛先は SUPPRESSED
//!   レコードになるだけで、アイテム全体は失敗しない

use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    TransportError,
    mail::{
        delivery::{DeliveryId, DeliveryRecord, DeliveryStatus},
        message::{EmailAddress, OutgoingEmail},
        outbox::{OutboxItem, retry_backoff},
        provider::Provider,
        sender::Sender,
        suppression::Suppression,
    },
};
use grantflow_infra::{
    InfraError,
    repository::{
        DeliveryRepository,
        OutboxRepository,
        ProviderRepository,
        SenderRepository,
        SuppressionRepository,
    },
    transport::{Transport, TransportResolver},
};

use crate::config::WorkerConfig;

/// バッチ実行の集計結果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// スタック回復で PENDING に戻したアイテム数
    pub recovered: u64,
    /// クレームしたアイテム数
    pub claimed:   usize,
    /// SENT で完了したアイテム数
    pub sent:      usize,
    /// バックオフ付きで再キューしたアイテム数
    pub requeued:  usize,
    /// 恒久 FAILED となったアイテム数
    pub failed:    usize,
}

/// ディスパッチエンジン
pub struct DispatchEngine {
    outbox_repo:      Arc<dyn OutboxRepository>,
    delivery_repo:    Arc<dyn DeliveryRepository>,
    suppression_repo: Arc<dyn SuppressionRepository>,
    sender_repo:      Arc<dyn SenderRepository>,
    provider_repo:    Arc<dyn ProviderRepository>,
    transports:       Arc<dyn TransportResolver>,
    config:           WorkerConfig,
}

/// アイテム 1 件の処理結果
enum ItemOutcome {
    Sent,
    Requeued,
    Failed,
}

/// 解決済みの送信経路（プロバイダー・送信者・トランスポート）
type Route = (Provider, Sender, Arc<dyn Transport>);

impl DispatchEngine {
    pub fn new(
        outbox_repo: Arc<dyn OutboxRepository>,
        delivery_repo: Arc<dyn DeliveryRepository>,
        suppression_repo: Arc<dyn SuppressionRepository>,
        sender_repo: Arc<dyn SenderRepository>,
        provider_repo: Arc<dyn ProviderRepository>,
        transports: Arc<dyn TransportResolver>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            outbox_repo,
            delivery_repo,
            suppression_repo,
            sender_repo,
            provider_repo,
            transports,
            config,
        }
    }

    /// 1 バッチ分のディスパッチを実行する
    ///
    /// スタック回復 → アトミッククレーム → アイテムごとの処理。
    /// アイテム処理の失敗は記録して続行する。
    #[tracing::instrument(skip_all)]
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<DispatchSummary, InfraError> {
        let mut summary = DispatchSummary::default();

        // クラッシュしたワーカーのクレームを回復する
        let cutoff = now - self.config.stuck_claim_after;
        summary.recovered = self.outbox_repo.recover_stuck(cutoff).await?;
        if summary.recovered > 0 {
            tracing::warn!(
                recovered = summary.recovered,
                "生存期限切れの PROCESSING アイテムを PENDING に回復しました"
            );
        }

        let items = self
            .outbox_repo
            .claim_batch(self.config.batch_size, now)
            .await?;
        summary.claimed = items.len();

        for item in items {
            let outbox_id = item.id;
            match self.process_item(item, now).await {
                Ok(ItemOutcome::Sent) => summary.sent += 1,
                Ok(ItemOutcome::Requeued) => summary.requeued += 1,
                Ok(ItemOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    // 失敗分離: 永続層エラーでも残りのアイテムは処理する。
                    // PROCESSING のまま残った行はスタック回復が拾う
                    tracing::error!(
                        outbox_id = %outbox_id,
                        error = %e,
                        "アイテム処理中にインフラエラーが発生"
                    );
                }
            }
        }

        Ok(summary)
    }

    /// クレーム済みアイテム 1 件を処理する
    async fn process_item(
        &self,
        item: OutboxItem,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, InfraError> {
        // プロバイダー / 送信者 / トランスポートの解決。
        // いずれの失敗も設定エラーとして即 FAILED（リトライ対象外）
        let (provider, sender, transport) = match self.resolve_route(&item).await? {
            Ok(route) => route,
            Err(config_error) => {
                tracing::warn!(
                    outbox_id = %item.id,
                    error = %config_error,
                    "設定解決に失敗したためアイテムを FAILED にします"
                );
                self.outbox_repo
                    .mark_failed(&item.id, item.attempts, &config_error.to_string(), now)
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
        };

        // to ∪ cc ∪ bcc の重複排除済み宛先へファンアウト
        let mut transport_errors: Vec<String> = Vec::new();
        for recipient in item.recipients() {
            let record = match self
                .delivery_repo
                .find_by_outbox_and_recipient(&item.id, &recipient)
                .await?
            {
                // 確定済みの宛先は再送信しない（冪等性）
                Some(existing) if existing.status != DeliveryStatus::Queued => continue,
                Some(existing) => existing,
                None => {
                    if let Some(suppression) = self
                        .suppression_repo
                        .find_effective(item.tenant_id.as_ref(), &recipient, now)
                        .await?
                    {
                        let record = suppressed_record(&item, &recipient, &suppression, now);
                        self.delivery_repo.insert(&record).await?;
                        continue;
                    }

                    let record = queued_record(&item, &recipient, &provider, now);
                    self.delivery_repo.insert(&record).await?;
                    record
                }
            };

            if let Err(e) = self
                .send_to_recipient(record, &sender, &item, &transport, now)
                .await?
            {
                transport_errors.push(e.to_string());
            }
        }

        self.finalize_item(&item, transport_errors, now).await
    }

    /// プロバイダー・送信者・トランスポートを解決する
    ///
    /// 明示指定 → プロバイダーのデフォルト送信者 → テナント / グローバルの
    /// デフォルトの順。外側の `Result` はインフラエラー、内側は設定エラー。
    async fn resolve_route(
        &self,
        item: &OutboxItem,
    ) -> Result<Result<Route, MailError>, InfraError> {
        let provider = match &item.provider_id {
            Some(id) => match self.provider_repo.find_by_id(id).await? {
                Some(p) if p.active => Some(p),
                _ => None,
            },
            None => self.provider_repo.find_default(item.tenant_id.as_ref()).await?,
        };
        let Some(provider) = provider else {
            return Ok(Err(MailError::ProviderConfiguration(
                "使用可能なプロバイダーが存在しません".to_string(),
            )));
        };

        let sender = match &item.sender_id {
            Some(id) => self.sender_repo.find_by_id(id).await?,
            None => match &provider.default_sender_id {
                Some(id) => self.sender_repo.find_by_id(id).await?,
                None => self.sender_repo.find_default(item.tenant_id.as_ref()).await?,
            },
        };
        let Some(sender) = sender else {
            return Ok(Err(MailError::ProviderConfiguration(
                "使用可能な送信者が存在しません".to_string(),
            )));
        };

        match self.transports.resolve(&provider) {
            Ok(transport) => Ok(Ok((provider, sender, transport))),
            Err(e) => Ok(Err(e)),
        }
    }

    /// 宛先 1 件へ送信し、結果を配信レコードに反映する
    ///
    /// 外側の `Result` はインフラエラー、内側はトランスポート失敗。
    async fn send_to_recipient(
        &self,
        mut record: DeliveryRecord,
        sender: &Sender,
        item: &OutboxItem,
        transport: &Arc<dyn Transport>,
        now: DateTime<Utc>,
    ) -> Result<Result<(), TransportError>, InfraError> {
        let email = OutgoingEmail {
            from:      sender.from_address.clone(),
            from_name: sender.from_name.clone(),
            to:        record.recipient.clone(),
            subject:   item.subject.clone(),
            body_html: item.body_html.clone(),
            body_text: item.body_text.clone(),
        };

        let result = match tokio::time::timeout(
            self.config.transport_timeout,
            transport.send(&email),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::new(format!(
                "送信がタイムアウトしました（{:?}）",
                self.config.transport_timeout
            ))),
        };

        match result {
            Ok(receipt) => {
                record.message_id = Some(receipt.message_id);
                record
                    .apply_event(
                        DeliveryStatus::Sent,
                        None,
                        Some(receipt.provider_response),
                        now,
                    )
                    .map_err(|e| InfraError::unexpected(e.to_string()))?;
                self.delivery_repo.update(&record).await?;
                Ok(Ok(()))
            }
            Err(e) => {
                // リトライに備えてレコードは QUEUED のまま残し、
                // エラー理由のみ記録する
                record.error_reason = Some(e.to_string());
                self.delivery_repo.update(&record).await?;
                Ok(Err(e))
            }
        }
    }

    /// アイテムの終端化: 全宛先成功 → SENT、トランスポート失敗 →
    /// 上限未満は再キュー、上限到達は恒久 FAILED
    async fn finalize_item(
        &self,
        item: &OutboxItem,
        transport_errors: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, InfraError> {
        if transport_errors.is_empty() {
            self.outbox_repo.mark_sent(&item.id, now).await?;
            return Ok(ItemOutcome::Sent);
        }

        let attempts = item.attempts + 1;
        let error = transport_errors.join("; ");

        if attempts < self.config.max_attempts {
            let next_attempt_at = now + retry_backoff(attempts);
            self.outbox_repo
                .requeue_with_backoff(&item.id, attempts, &error, next_attempt_at)
                .await?;
            tracing::info!(
                outbox_id = %item.id,
                attempts,
                next_attempt_at = %next_attempt_at,
                "トランスポート失敗のため再キューしました"
            );
            return Ok(ItemOutcome::Requeued);
        }

        // 試行上限到達: QUEUED のまま残った宛先を FAILED に確定する
        for mut record in self.delivery_repo.list_by_outbox(&item.id).await? {
            if record.status == DeliveryStatus::Queued {
                record
                    .apply_event(
                        DeliveryStatus::Failed,
                        record.error_reason.clone(),
                        None,
                        now,
                    )
                    .map_err(|e| InfraError::unexpected(e.to_string()))?;
                self.delivery_repo.update(&record).await?;
            }
        }
        self.outbox_repo
            .mark_failed(&item.id, attempts, &error, now)
            .await?;
        tracing::warn!(
            outbox_id = %item.id,
            attempts,
            "試行上限到達のためアイテムを恒久 FAILED にしました"
        );
        Ok(ItemOutcome::Failed)
    }
}

fn queued_record(
    item: &OutboxItem,
    recipient: &EmailAddress,
    provider: &Provider,
    now: DateTime<Utc>,
) -> DeliveryRecord {
    DeliveryRecord {
        id:            DeliveryId::new(),
        outbox_id:     item.id,
        tenant_id:     item.tenant_id,
        provider_id:   Some(provider.id),
        message_id:    None,
        recipient:     recipient.clone(),
        status:        DeliveryStatus::Queued,
        error_reason:  None,
        provider_data: serde_json::json!({}),
        queued_at:     now,
        sent_at:       None,
        delivered_at:  None,
        opened_at:     None,
        clicked_at:    None,
        failed_at:     None,
    }
}

fn suppressed_record(
    item: &OutboxItem,
    recipient: &EmailAddress,
    suppression: &Suppression,
    now: DateTime<Utc>,
) -> DeliveryRecord {
    DeliveryRecord {
        id:            DeliveryId::new(),
        outbox_id:     item.id,
        tenant_id:     item.tenant_id,
        provider_id:   None,
        message_id:    None,
        recipient:     recipient.clone(),
        status:        DeliveryStatus::Suppressed,
        error_reason:  Some(format!("サプレッション登録済み: {}", suppression.reason)),
        provider_data: serde_json::json!({}),
        queued_at:     now,
        sent_at:       None,
        delivered_at:  None,
        opened_at:     None,
        clicked_at:    None,
        failed_at:     None,
    }
}
