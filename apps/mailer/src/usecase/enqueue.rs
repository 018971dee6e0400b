//! # エンキュー
//!
//! 送信意図の受け付け。バリデーション → テンプレート解決 +
//! レンダリング → サプレッションチェック → Outbox 行の作成を行う。
//!
//! ## 設計方針
//!
//! - **同期的な失敗**: テンプレート未発見・レンダリング失敗・主要宛先の
//!   サプレッションはエンキュー自体を失敗させ、Outbox 行を作らない。
//!   死んだアイテムを静かに積むより、呼び出し元に即座に返す
//! - **cc / bcc は落とさない**: サプレッションチェックは主要宛先（to）
//!   のみ。cc / bcc のブロックはディスパッチ時の宛先単位チェックで
//!   SUPPRESSED レコードとして記録される

use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::{
        message::EmailAddress,
        outbox::{OutboxItem, OutboxItemId, OutboxStatus, Priority},
        provider::ProviderId,
        sender::SenderId,
    },
    tenant::TenantId,
};
use grantflow_infra::repository::{OutboxRepository, SuppressionRepository, TemplateRepository};

use super::render::render_template;
use crate::error::ApiError;

/// エンキューリクエスト
///
/// `template_key` を指定した場合は件名・本文がレンダリングで確定する。
/// 指定しない場合は `subject` と本文（html / text の少なくとも一方）が
/// 必須となる。
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub tenant_id:     Option<TenantId>,
    pub template_key:  Option<String>,
    pub template_data: serde_json::Value,
    pub subject:       Option<String>,
    pub body_html:     Option<String>,
    pub body_text:     Option<String>,
    pub to:            Vec<String>,
    pub cc:            Vec<String>,
    pub bcc:           Vec<String>,
    pub sender_id:     Option<SenderId>,
    pub provider_id:   Option<ProviderId>,
    pub priority:      Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub metadata:      serde_json::Value,
}

/// エンキューサービス
///
/// HTTP ハンドラとダイジェストスケジューラーの両方から使用される
/// 唯一の Outbox 投入経路。
pub struct EnqueueService {
    outbox_repo:      Arc<dyn OutboxRepository>,
    template_repo:    Arc<dyn TemplateRepository>,
    suppression_repo: Arc<dyn SuppressionRepository>,
}

impl EnqueueService {
    pub fn new(
        outbox_repo: Arc<dyn OutboxRepository>,
        template_repo: Arc<dyn TemplateRepository>,
        suppression_repo: Arc<dyn SuppressionRepository>,
    ) -> Self {
        Self {
            outbox_repo,
            template_repo,
            suppression_repo,
        }
    }

    /// 送信意図を受け付けて PENDING の Outbox アイテムを作成する
    #[tracing::instrument(skip_all)]
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<OutboxItem, ApiError> {
        let now = Utc::now();

        if request.to.is_empty() {
            return Err(MailError::Validation("宛先（to）は必須です".to_string()).into());
        }

        let to = parse_addresses(&request.to)?;
        let cc = parse_addresses(&request.cc)?;
        let bcc = parse_addresses(&request.bcc)?;

        // テンプレート経路と直接指定経路で件名・本文を確定する
        let (template_id, subject, body_html, body_text) = match &request.template_key {
            Some(key) => {
                let template = self
                    .template_repo
                    .resolve(request.tenant_id.as_ref(), key)
                    .await?
                    .ok_or_else(|| MailError::TemplateNotFound(key.clone()))?;

                let rendered = render_template(&template, &request.template_data)?;
                (
                    Some(template.id),
                    rendered.subject,
                    Some(rendered.body_html),
                    rendered.body_text,
                )
            }
            None => {
                let Some(subject) = request.subject.clone() else {
                    return Err(MailError::Validation(
                        "テンプレート未指定の場合、件名は必須です".to_string(),
                    )
                    .into());
                };
                if request.body_html.is_none() && request.body_text.is_none() {
                    return Err(MailError::Validation(
                        "テンプレート未指定の場合、本文（html / text）は必須です".to_string(),
                    )
                    .into());
                }
                (
                    None,
                    subject,
                    request.body_html.clone(),
                    request.body_text.clone(),
                )
            }
        };

        // 主要宛先のサプレッションチェック（cc / bcc はディスパッチ時）
        for recipient in &to {
            if let Some(suppression) = self
                .suppression_repo
                .find_effective(request.tenant_id.as_ref(), recipient, now)
                .await?
            {
                tracing::info!(
                    email = %recipient,
                    reason = %suppression.reason,
                    "主要宛先がサプレッション登録済みのためエンキューを拒否"
                );
                return Err(MailError::SuppressedRecipient {
                    email: recipient.as_str().to_string(),
                }
                .into());
            }
        }

        let item = OutboxItem {
            id: OutboxItemId::new(),
            tenant_id: request.tenant_id,
            template_id,
            sender_id: request.sender_id,
            provider_id: request.provider_id,
            to,
            cc,
            bcc,
            subject,
            body_html,
            body_text,
            metadata: request.metadata,
            priority: request.priority,
            scheduled_for: request.scheduled_for.unwrap_or(now),
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            claimed_at: None,
            processed_at: None,
        };

        self.outbox_repo.insert(&item).await?;

        tracing::info!(
            outbox_id = %item.id,
            recipients = item.recipients().len(),
            priority = %item.priority,
            "送信意図をエンキューしました"
        );

        Ok(item)
    }
}

fn parse_addresses(values: &[String]) -> Result<Vec<EmailAddress>, MailError> {
    values.iter().map(EmailAddress::new).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use grantflow_domain::mail::suppression::{Suppression, SuppressionId, SuppressionReason};
    use grantflow_infra::mock::{
        MockOutboxRepository,
        MockSuppressionRepository,
        MockTemplateRepository,
    };
    use grantflow_infra::repository::NewEmailTemplate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    struct Fixture {
        outbox:       MockOutboxRepository,
        templates:    MockTemplateRepository,
        suppressions: MockSuppressionRepository,
        service:      EnqueueService,
    }

    fn make_fixture() -> Fixture {
        let outbox = MockOutboxRepository::new();
        let templates = MockTemplateRepository::new();
        let suppressions = MockSuppressionRepository::new();
        let service = EnqueueService::new(
            Arc::new(outbox.clone()),
            Arc::new(templates.clone()),
            Arc::new(suppressions.clone()),
        );
        Fixture {
            outbox,
            templates,
            suppressions,
            service,
        }
    }

    fn direct_request(to: Vec<&str>) -> EnqueueRequest {
        EnqueueRequest {
            tenant_id:     None,
            template_key:  None,
            template_data: serde_json::Value::Null,
            subject:       Some("件名".to_string()),
            body_html:     Some("<p>本文</p>".to_string()),
            body_text:     None,
            to:            to.into_iter().map(str::to_string).collect(),
            cc:            vec![],
            bcc:           vec![],
            sender_id:     None,
            provider_id:   None,
            priority:      Priority::Normal,
            scheduled_for: None,
            metadata:      json!({}),
        }
    }

    #[tokio::test]
    async fn 直接指定でpendingのアイテムが作成される() {
        let fixture = make_fixture();

        let item = fixture
            .service
            .enqueue(direct_request(vec!["a@example.com"]))
            .await
            .unwrap();

        assert_eq!(item.status, OutboxStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(fixture.outbox.items().len(), 1);
    }

    #[tokio::test]
    async fn 宛先なしはバリデーションエラー() {
        let fixture = make_fixture();
        let result = fixture.service.enqueue(direct_request(vec![])).await;

        assert!(matches!(
            result,
            Err(ApiError::Mail(MailError::Validation(_)))
        ));
        assert!(fixture.outbox.items().is_empty());
    }

    #[tokio::test]
    async fn 件名も本文もテンプレートもない場合はエラー() {
        let fixture = make_fixture();
        let mut request = direct_request(vec!["a@example.com"]);
        request.subject = None;

        let result = fixture.service.enqueue(request).await;
        assert!(matches!(
            result,
            Err(ApiError::Mail(MailError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn テンプレート経路で件名と本文がレンダリングされる() {
        let fixture = make_fixture();
        fixture
            .templates
            .create(NewEmailTemplate {
                tenant_id:     None,
                key:           "welcome".to_string(),
                subject_tpl:   "ようこそ {{ name }} さん".to_string(),
                body_html_tpl: "<p>{{ name }} さん、登録完了です</p>".to_string(),
                body_text_tpl: None,
            })
            .await
            .unwrap();

        let mut request = direct_request(vec!["a@example.com"]);
        request.template_key = Some("welcome".to_string());
        request.template_data = json!({ "name": "田中" });
        request.subject = None;
        request.body_html = None;

        let item = fixture.service.enqueue(request).await.unwrap();

        assert_eq!(item.subject, "ようこそ 田中 さん");
        assert!(item.body_html.as_deref().unwrap().contains("田中"));
        assert!(item.template_id.is_some());
    }

    #[tokio::test]
    async fn 存在しないテンプレートキーは404エラーで行を作らない() {
        let fixture = make_fixture();
        let mut request = direct_request(vec!["a@example.com"]);
        request.template_key = Some("missing".to_string());

        let result = fixture.service.enqueue(request).await;

        assert!(matches!(
            result,
            Err(ApiError::Mail(MailError::TemplateNotFound(_)))
        ));
        assert!(fixture.outbox.items().is_empty());
    }

    #[tokio::test]
    async fn レンダリング失敗時は行を作らない() {
        let fixture = make_fixture();
        fixture
            .templates
            .create(NewEmailTemplate {
                tenant_id:     None,
                key:           "broken".to_string(),
                subject_tpl:   "{{ undefined_var }}".to_string(),
                body_html_tpl: "<p>本文</p>".to_string(),
                body_text_tpl: None,
            })
            .await
            .unwrap();

        let mut request = direct_request(vec!["a@example.com"]);
        request.template_key = Some("broken".to_string());
        request.template_data = json!({});

        let result = fixture.service.enqueue(request).await;

        assert!(matches!(
            result,
            Err(ApiError::Mail(MailError::TemplateRender(_)))
        ));
        assert!(fixture.outbox.items().is_empty());
    }

    #[tokio::test]
    async fn サプレッション済みの主要宛先は拒否され行を作らない() {
        let fixture = make_fixture();
        fixture.suppressions.add_suppression(Suppression {
            id:         SuppressionId::new(),
            tenant_id:  None,
            email:      EmailAddress::new("blocked@example.com").unwrap(),
            reason:     SuppressionReason::Bounce,
            detail:     None,
            active:     true,
            expires_at: None,
            created_at: Utc::now(),
        });

        let result = fixture
            .service
            .enqueue(direct_request(vec!["blocked@example.com"]))
            .await;

        assert!(matches!(
            result,
            Err(ApiError::Mail(MailError::SuppressedRecipient { .. }))
        ));
        assert!(fixture.outbox.items().is_empty());
    }

    #[tokio::test]
    async fn 期限切れサプレッションはブロックしない() {
        let fixture = make_fixture();
        fixture.suppressions.add_suppression(Suppression {
            id:         SuppressionId::new(),
            tenant_id:  None,
            email:      EmailAddress::new("was-blocked@example.com").unwrap(),
            reason:     SuppressionReason::Manual,
            detail:     None,
            active:     true,
            expires_at: Some(Utc::now() - Duration::days(1)),
            created_at: Utc::now() - Duration::days(30),
        });

        let item = fixture
            .service
            .enqueue(direct_request(vec!["was-blocked@example.com"]))
            .await
            .unwrap();

        assert_eq!(item.status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn サプレッション済みのccは拒否されない() {
        let fixture = make_fixture();
        fixture.suppressions.add_suppression(Suppression {
            id:         SuppressionId::new(),
            tenant_id:  None,
            email:      EmailAddress::new("blocked@example.com").unwrap(),
            reason:     SuppressionReason::Unsubscribe,
            detail:     None,
            active:     true,
            expires_at: None,
            created_at: Utc::now(),
        });

        let mut request = direct_request(vec!["a@example.com"]);
        request.cc = vec!["blocked@example.com".to_string()];

        // cc のブロックはディスパッチ時に SUPPRESSED レコードとなる
        let item = fixture.service.enqueue(request).await.unwrap();
        assert_eq!(item.status, OutboxStatus::Pending);
    }
}
