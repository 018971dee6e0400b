//! # テスト用モックリポジトリ
//!
//! ユースケーステストで使用するインメモリモックリポジトリと
//! モックトランスポート。`test-utils` feature を有効にすることで、
//! 他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! grantflow-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    TransportError,
    mail::{
        delivery::DeliveryRecord,
        digest::{Digest, DigestId},
        message::{EmailAddress, OutgoingEmail, TransportReceipt},
        outbox::{OutboxItem, OutboxItemId, OutboxStatus},
        preference::{EmailType, Preference},
        provider::{Provider, ProviderId},
        sender::{Sender, SenderId},
        suppression::Suppression,
        template::{EmailTemplate, EmailTemplateId},
    },
    tenant::TenantId,
    user::UserId,
};
use serde_json::json;

use crate::{
    error::InfraError,
    repository::{
        DeliveryRepository,
        DigestKey,
        DigestRepository,
        NewEmailTemplate,
        OutboxRepository,
        PreferenceRepository,
        ProviderRepository,
        SenderRepository,
        SuppressionRepository,
        TemplateRepository,
    },
    transport::{Transport, TransportResolver},
};

fn tenant_matches(row: Option<&TenantId>, query: Option<&TenantId>) -> bool {
    match (row, query) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

// ===== MockOutboxRepository =====

#[derive(Clone, Default)]
pub struct MockOutboxRepository {
    items: Arc<Mutex<Vec<OutboxItem>>>,
}

impl MockOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, item: OutboxItem) {
        self.items.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<OutboxItem> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboxRepository for MockOutboxRepository {
    async fn insert(&self, item: &OutboxItem) -> Result<(), InfraError> {
        self.items.lock().unwrap().push(item.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, InfraError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|i| &i.id == id)
            .cloned())
    }

    async fn list_recent(
        &self,
        tenant_id: Option<&TenantId>,
        limit: i64,
    ) -> Result<Vec<OutboxItem>, InfraError> {
        let mut items: Vec<OutboxItem> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| tenant_id.is_none() || i.tenant_id.as_ref() == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn claim_batch(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxItem>, InfraError> {
        let mut items = self.items.lock().unwrap();

        let mut due: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.status == OutboxStatus::Pending && i.scheduled_for <= now)
            .map(|(idx, _)| idx)
            .collect();
        due.sort_by_key(|&idx| (items[idx].priority.rank(), items[idx].created_at));
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for idx in due {
            items[idx].status = OutboxStatus::Processing;
            items[idx].claimed_at = Some(now);
            claimed.push(items[idx].clone());
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, id: &OutboxItemId, now: DateTime<Utc>) -> Result<(), InfraError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|i| &i.id == id && i.status == OutboxStatus::Processing)
            .ok_or_else(|| InfraError::unexpected(format!("PROCESSING でない: {id}")))?;
        item.status = OutboxStatus::Sent;
        item.processed_at = Some(now);
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &OutboxItemId,
        attempts: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|i| &i.id == id && i.status == OutboxStatus::Processing)
            .ok_or_else(|| InfraError::unexpected(format!("PROCESSING でない: {id}")))?;
        item.status = OutboxStatus::Failed;
        item.attempts = attempts;
        item.last_error = Some(error.to_string());
        item.processed_at = Some(now);
        Ok(())
    }

    async fn requeue_with_backoff(
        &self,
        id: &OutboxItemId,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|i| &i.id == id && i.status == OutboxStatus::Processing)
            .ok_or_else(|| InfraError::unexpected(format!("PROCESSING でない: {id}")))?;
        item.status = OutboxStatus::Pending;
        item.attempts = attempts;
        item.last_error = Some(error.to_string());
        item.scheduled_for = next_attempt_at;
        item.claimed_at = None;
        Ok(())
    }

    async fn recover_stuck(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError> {
        let mut items = self.items.lock().unwrap();
        let mut recovered = 0;
        for item in items.iter_mut() {
            if item.status == OutboxStatus::Processing
                && item.claimed_at.is_some_and(|at| at < cutoff)
            {
                item.status = OutboxStatus::Pending;
                item.claimed_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

// ===== MockDeliveryRepository =====

#[derive(Clone, Default)]
pub struct MockDeliveryRepository {
    records: Arc<Mutex<Vec<DeliveryRecord>>>,
}

impl MockDeliveryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, record: DeliveryRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn records(&self) -> Vec<DeliveryRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryRepository for MockDeliveryRepository {
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), InfraError> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.outbox_id == record.outbox_id && r.recipient == record.recipient)
        {
            return Err(InfraError::unexpected(
                "(outbox_id, recipient) の一意性違反".to_string(),
            ));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &DeliveryRecord) -> Result<(), InfraError> {
        let mut records = self.records.lock().unwrap();
        let existing = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| InfraError::unexpected(format!("レコードなし: {}", record.id)))?;
        *existing = record.clone();
        Ok(())
    }

    async fn find_by_outbox_and_recipient(
        &self,
        outbox_id: &OutboxItemId,
        recipient: &EmailAddress,
    ) -> Result<Option<DeliveryRecord>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.outbox_id == outbox_id && &r.recipient == recipient)
            .cloned())
    }

    async fn list_by_outbox(
        &self,
        outbox_id: &OutboxItemId,
    ) -> Result<Vec<DeliveryRecord>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.outbox_id == outbox_id)
            .cloned()
            .collect())
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeliveryRecord>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.message_id.as_deref() == Some(message_id))
            .cloned())
    }
}

// ===== MockSuppressionRepository =====

#[derive(Clone, Default)]
pub struct MockSuppressionRepository {
    suppressions: Arc<Mutex<Vec<Suppression>>>,
}

impl MockSuppressionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_suppression(&self, suppression: Suppression) {
        self.suppressions.lock().unwrap().push(suppression);
    }

    pub fn suppressions(&self) -> Vec<Suppression> {
        self.suppressions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SuppressionRepository for MockSuppressionRepository {
    async fn upsert_active(&self, suppression: &Suppression) -> Result<(), InfraError> {
        let mut suppressions = self.suppressions.lock().unwrap();
        for existing in suppressions.iter_mut() {
            if existing.email == suppression.email
                && tenant_matches(
                    existing.tenant_id.as_ref(),
                    suppression.tenant_id.as_ref(),
                )
            {
                existing.active = false;
            }
        }
        suppressions.push(suppression.clone());
        Ok(())
    }

    async fn deactivate(
        &self,
        tenant_id: Option<&TenantId>,
        email: &EmailAddress,
    ) -> Result<bool, InfraError> {
        let mut suppressions = self.suppressions.lock().unwrap();
        let mut deactivated = false;
        for existing in suppressions.iter_mut() {
            if existing.active
                && &existing.email == email
                && tenant_matches(existing.tenant_id.as_ref(), tenant_id)
            {
                existing.active = false;
                deactivated = true;
            }
        }
        Ok(deactivated)
    }

    async fn find_effective(
        &self,
        tenant_id: Option<&TenantId>,
        email: &EmailAddress,
        now: DateTime<Utc>,
    ) -> Result<Option<Suppression>, InfraError> {
        let suppressions = self.suppressions.lock().unwrap();
        let mut candidates: Vec<&Suppression> = suppressions
            .iter()
            .filter(|s| {
                &s.email == email
                    && s.is_effective(now)
                    && (s.tenant_id.is_none() || s.tenant_id.as_ref() == tenant_id)
            })
            .collect();
        // テナント固有を優先
        candidates.sort_by_key(|s| s.tenant_id.is_none());
        Ok(candidates.first().map(|s| (*s).clone()))
    }

    async fn list(
        &self,
        tenant_id: Option<&TenantId>,
        limit: i64,
    ) -> Result<Vec<Suppression>, InfraError> {
        let mut result: Vec<Suppression> = self
            .suppressions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| tenant_id.is_none() || s.tenant_id.is_none() || s.tenant_id.as_ref() == tenant_id)
            .cloned()
            .collect();
        result.truncate(limit as usize);
        Ok(result)
    }
}

// ===== MockTemplateRepository =====

#[derive(Clone, Default)]
pub struct MockTemplateRepository {
    templates: Arc<Mutex<Vec<EmailTemplate>>>,
}

impl MockTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&self, template: EmailTemplate) {
        self.templates.lock().unwrap().push(template);
    }
}

#[async_trait]
impl TemplateRepository for MockTemplateRepository {
    async fn create(&self, new: NewEmailTemplate) -> Result<EmailTemplate, InfraError> {
        let mut templates = self.templates.lock().unwrap();
        let version = templates
            .iter()
            .filter(|t| t.key == new.key && tenant_matches(t.tenant_id.as_ref(), new.tenant_id.as_ref()))
            .map(|t| t.version)
            .max()
            .unwrap_or(0)
            + 1;

        let template = EmailTemplate {
            id: EmailTemplateId::new(),
            tenant_id: new.tenant_id,
            key: new.key,
            version,
            subject_tpl: new.subject_tpl,
            body_html_tpl: new.body_html_tpl,
            body_text_tpl: new.body_text_tpl,
            active: true,
            created_at: Utc::now(),
        };
        templates.push(template.clone());
        Ok(template)
    }

    async fn find_by_id(&self, id: &EmailTemplateId) -> Result<Option<EmailTemplate>, InfraError> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| &t.id == id)
            .cloned())
    }

    async fn resolve(
        &self,
        tenant_id: Option<&TenantId>,
        key: &str,
    ) -> Result<Option<EmailTemplate>, InfraError> {
        let templates = self.templates.lock().unwrap();

        let best = |scope: Option<&TenantId>| {
            templates
                .iter()
                .filter(|t| t.key == key && t.active && tenant_matches(t.tenant_id.as_ref(), scope))
                .max_by_key(|t| t.version)
                .cloned()
        };

        if tenant_id.is_some() {
            if let Some(found) = best(tenant_id) {
                return Ok(Some(found));
            }
        }
        Ok(best(None))
    }

    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<EmailTemplate>, InfraError> {
        let templates = self.templates.lock().unwrap();
        let mut latest: Vec<EmailTemplate> = Vec::new();
        for template in templates.iter().filter(|t| {
            t.active && (tenant_id.is_none() || t.tenant_id.is_none() || t.tenant_id.as_ref() == tenant_id)
        }) {
            match latest.iter_mut().find(|l| {
                l.key == template.key
                    && tenant_matches(l.tenant_id.as_ref(), template.tenant_id.as_ref())
            }) {
                Some(existing) if existing.version < template.version => {
                    *existing = template.clone();
                }
                Some(_) => {}
                None => latest.push(template.clone()),
            }
        }
        Ok(latest)
    }

    async fn deactivate(&self, id: &EmailTemplateId) -> Result<bool, InfraError> {
        let mut templates = self.templates.lock().unwrap();
        match templates.iter_mut().find(|t| &t.id == id) {
            Some(template) => {
                template.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ===== MockSenderRepository =====

#[derive(Clone, Default)]
pub struct MockSenderRepository {
    senders: Arc<Mutex<Vec<Sender>>>,
}

impl MockSenderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sender(&self, sender: Sender) {
        self.senders.lock().unwrap().push(sender);
    }
}

#[async_trait]
impl SenderRepository for MockSenderRepository {
    async fn insert(&self, sender: &Sender) -> Result<(), InfraError> {
        self.senders.lock().unwrap().push(sender.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &SenderId) -> Result<Option<Sender>, InfraError> {
        Ok(self
            .senders
            .lock()
            .unwrap()
            .iter()
            .find(|s| &s.id == id)
            .cloned())
    }

    async fn find_default(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<Option<Sender>, InfraError> {
        let senders = self.senders.lock().unwrap();
        let mut candidates: Vec<&Sender> = senders
            .iter()
            .filter(|s| {
                s.is_default
                    && s.verified
                    && (s.tenant_id.is_none() || s.tenant_id.as_ref() == tenant_id)
            })
            .collect();
        candidates.sort_by_key(|s| s.tenant_id.is_none());
        Ok(candidates.first().map(|s| (*s).clone()))
    }

    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Sender>, InfraError> {
        Ok(self
            .senders
            .lock()
            .unwrap()
            .iter()
            .filter(|s| tenant_id.is_none() || s.tenant_id.is_none() || s.tenant_id.as_ref() == tenant_id)
            .cloned()
            .collect())
    }
}

// ===== MockProviderRepository =====

#[derive(Clone, Default)]
pub struct MockProviderRepository {
    providers: Arc<Mutex<Vec<Provider>>>,
}

impl MockProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&self, provider: Provider) {
        self.providers.lock().unwrap().push(provider);
    }
}

#[async_trait]
impl ProviderRepository for MockProviderRepository {
    async fn insert(&self, provider: &Provider) -> Result<(), InfraError> {
        self.providers.lock().unwrap().push(provider.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ProviderId) -> Result<Option<Provider>, InfraError> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|p| &p.id == id)
            .cloned())
    }

    async fn find_default(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<Option<Provider>, InfraError> {
        let providers = self.providers.lock().unwrap();
        let mut candidates: Vec<&Provider> = providers
            .iter()
            .filter(|p| {
                p.is_default
                    && p.active
                    && (p.tenant_id.is_none() || p.tenant_id.as_ref() == tenant_id)
            })
            .collect();
        candidates.sort_by_key(|p| p.tenant_id.is_none());
        Ok(candidates.first().map(|p| (*p).clone()))
    }

    async fn list(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Provider>, InfraError> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| tenant_id.is_none() || p.tenant_id.is_none() || p.tenant_id.as_ref() == tenant_id)
            .cloned()
            .collect())
    }
}

// ===== MockPreferenceRepository =====

#[derive(Clone, Default)]
pub struct MockPreferenceRepository {
    preferences: Arc<Mutex<Vec<Preference>>>,
}

impl MockPreferenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_preference(&self, preference: Preference) {
        self.preferences.lock().unwrap().push(preference);
    }
}

#[async_trait]
impl PreferenceRepository for MockPreferenceRepository {
    async fn upsert(&self, preference: &Preference) -> Result<(), InfraError> {
        let mut preferences = self.preferences.lock().unwrap();
        match preferences
            .iter_mut()
            .find(|p| p.user_id == preference.user_id && p.email_type == preference.email_type)
        {
            Some(existing) => *existing = preference.clone(),
            None => preferences.push(preference.clone()),
        }
        Ok(())
    }

    async fn find(
        &self,
        user_id: &UserId,
        email_type: &EmailType,
    ) -> Result<Option<Preference>, InfraError> {
        Ok(self
            .preferences
            .lock()
            .unwrap()
            .iter()
            .find(|p| &p.user_id == user_id && &p.email_type == email_type)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Preference>, InfraError> {
        Ok(self
            .preferences
            .lock()
            .unwrap()
            .iter()
            .filter(|p| &p.user_id == user_id)
            .cloned()
            .collect())
    }
}

// ===== MockDigestRepository =====

#[derive(Clone, Default)]
pub struct MockDigestRepository {
    digests: Arc<Mutex<Vec<Digest>>>,
}

impl MockDigestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_digest(&self, digest: Digest) {
        self.digests.lock().unwrap().push(digest);
    }

    pub fn digests(&self) -> Vec<Digest> {
        self.digests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DigestRepository for MockDigestRepository {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Digest>, InfraError> {
        Ok(self
            .digests
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.is_due(now))
            .cloned()
            .collect())
    }

    async fn append_item(
        &self,
        key: &DigestKey,
        recipient: &EmailAddress,
        item: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let Some(initial_next_run) = key.frequency.next_run_after(now) else {
            return Err(InfraError::invalid_input(
                "immediate ケイデンスはダイジェスト蓄積の対象外です".to_string(),
            ));
        };

        let mut digests = self.digests.lock().unwrap();
        match digests.iter_mut().find(|d| {
            d.user_id == key.user_id
                && d.email_type == key.email_type
                && d.frequency == key.frequency
                && tenant_matches(d.tenant_id.as_ref(), key.tenant_id.as_ref())
        }) {
            Some(digest) => {
                digest.items.push(item);
                digest.recipient = recipient.clone();
            }
            None => digests.push(Digest {
                id:          DigestId::new(),
                tenant_id:   key.tenant_id.clone(),
                user_id:     key.user_id,
                email_type:  key.email_type.clone(),
                frequency:   key.frequency,
                recipient:   recipient.clone(),
                items:       vec![item],
                last_run_at: None,
                next_run_at: initial_next_run,
            }),
        }
        Ok(())
    }

    async fn complete_run(
        &self,
        id: &DigestId,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut digests = self.digests.lock().unwrap();
        let digest = digests
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| InfraError::unexpected(format!("ダイジェストなし: {id}")))?;
        digest.items.clear();
        digest.last_run_at = Some(last_run_at);
        digest.next_run_at = next_run_at;
        Ok(())
    }
}

// ===== MockTransport =====

/// 送信内容を記録するモックトランスポート
///
/// `fail_for` に登録した宛先への送信は `TransportError` を返す。
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    sent:     Arc<Mutex<Vec<OutgoingEmail>>>,
    fail_for: Arc<Mutex<HashSet<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定宛先への送信を失敗させる
    pub fn fail_for(&self, address: &EmailAddress) {
        self.fail_for
            .lock()
            .unwrap()
            .insert(address.as_str().to_string());
    }

    /// 登録済みの失敗宛先をすべて解除する
    pub fn clear_failures(&self) {
        self.fail_for.lock().unwrap().clear();
    }

    /// 送信されたメッセージを取得する
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<TransportReceipt, TransportError> {
        if self.fail_for.lock().unwrap().contains(email.to.as_str()) {
            return Err(TransportError(format!("モック送信失敗: {}", email.to)));
        }

        self.sent.lock().unwrap().push(email.clone());
        Ok(TransportReceipt {
            message_id:        format!("mock-{}", uuid::Uuid::new_v4()),
            provider_response: json!({ "mock": true }),
        })
    }
}

// ===== MockTransportResolver =====

/// 常に同一のトランスポートを返すモックリゾルバー
#[derive(Clone)]
pub struct MockTransportResolver {
    transport: Arc<MockTransport>,
}

impl MockTransportResolver {
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self { transport }
    }
}

impl TransportResolver for MockTransportResolver {
    fn resolve(&self, _provider: &Provider) -> Result<Arc<dyn Transport>, MailError> {
        Ok(self.transport.clone())
    }
}
