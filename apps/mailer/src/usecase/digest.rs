//! # ダイジェストスケジューラー
//!
//! 期限到来したダイジェスト行を 1 通のメールにまとめて Outbox へ
//! エンキューするバッチジョブ。
//!
//! ## 設計方針
//!
//! - **空でもスケジュールは進む**: 蓄積項目が無いダイジェストはメールを
//!   生成せず、次回実行時刻だけを進める
//! - **サプレッションで止めない**: 宛先がブロックされていてもスケジュール
//!   は進める。項目を溜め続けても配信できないため捨てる
//! - **通常のエンキュー経路を通る**: ダイジェストメールも
//!   `EnqueueService` 経由で Outbox に入り、ディスパッチ・観測の対象となる

use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantflow_domain::{
    MailError,
    mail::{digest::Digest, outbox::Priority},
};
use grantflow_infra::{InfraError, repository::DigestRepository};

use super::enqueue::{EnqueueRequest, EnqueueService};
use crate::error::ApiError;

/// ダイジェスト実行の集計結果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DigestRunSummary {
    /// 期限到来したダイジェスト数
    pub due:        usize,
    /// メールをエンキューした数
    pub enqueued:   usize,
    /// 蓄積項目なしでスケジュールのみ進めた数
    pub empty:      usize,
    /// 宛先サプレッションで破棄した数
    pub suppressed: usize,
}

/// ダイジェストスケジューラー
pub struct DigestScheduler {
    digest_repo: Arc<dyn DigestRepository>,
    enqueue:     Arc<EnqueueService>,
}

impl DigestScheduler {
    pub fn new(digest_repo: Arc<dyn DigestRepository>, enqueue: Arc<EnqueueService>) -> Self {
        Self {
            digest_repo,
            enqueue,
        }
    }

    /// 期限到来したダイジェストを処理する
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<DigestRunSummary, InfraError> {
        let due = self.digest_repo.find_due(now).await?;
        let mut summary = DigestRunSummary {
            due: due.len(),
            ..DigestRunSummary::default()
        };

        for digest in due {
            let Some(next_run_at) = digest.frequency.next_run_after(now) else {
                // immediate 行は永続層が作らない前提。データ異常として記録
                tracing::error!(
                    digest_id = %digest.id,
                    "immediate ケイデンスのダイジェスト行を検出しました"
                );
                continue;
            };

            if digest.items.is_empty() {
                summary.empty += 1;
            } else {
                match self.enqueue_digest_mail(&digest).await {
                    Ok(()) => summary.enqueued += 1,
                    Err(ApiError::Mail(MailError::SuppressedRecipient { email })) => {
                        // 配信できない宛先の項目を溜め続けても意味がないため
                        // 破棄してスケジュールを進める
                        tracing::warn!(
                            digest_id = %digest.id,
                            email = %email,
                            "ダイジェスト宛先がサプレッション登録済みのため破棄"
                        );
                        summary.suppressed += 1;
                    }
                    Err(e) => {
                        // 項目を保持したまま次回実行で再試行する
                        tracing::error!(
                            digest_id = %digest.id,
                            error = %e,
                            "ダイジェストのエンキューに失敗"
                        );
                        continue;
                    }
                }
            }

            self.digest_repo
                .complete_run(&digest.id, now, next_run_at)
                .await?;
        }

        Ok(summary)
    }

    async fn enqueue_digest_mail(&self, digest: &Digest) -> Result<(), ApiError> {
        let (body_html, body_text) = compose_bodies(&digest.items);
        let request = EnqueueRequest {
            tenant_id:     digest.tenant_id,
            template_key:  None,
            template_data: serde_json::Value::Null,
            subject:       Some(format!(
                "{} ダイジェスト（{} 件）",
                digest.email_type,
                digest.items.len()
            )),
            body_html:     Some(body_html),
            body_text:     Some(body_text),
            to:            vec![digest.recipient.as_str().to_string()],
            cc:            vec![],
            bcc:           vec![],
            sender_id:     None,
            provider_id:   None,
            priority:      Priority::Low,
            scheduled_for: None,
            metadata:      serde_json::json!({
                "digest_id":  digest.id.to_string(),
                "email_type": digest.email_type.as_str(),
                "item_count": digest.items.len(),
            }),
        };

        self.enqueue.enqueue(request).await?;
        Ok(())
    }
}

/// 蓄積項目から HTML / テキスト本文を組み立てる
///
/// 項目は不透明な JSON だが、`subject` / `body` キーを持つ場合は
/// それを見出し・本文として使用する。
fn compose_bodies(items: &[serde_json::Value]) -> (String, String) {
    let mut html = String::from("<ul>\n");
    let mut text = String::new();

    for item in items {
        let subject = item
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or("（無題）");
        let body = item.get("body").and_then(|v| v.as_str());

        html.push_str("<li><strong>");
        html.push_str(&html_escape(subject));
        html.push_str("</strong>");
        if let Some(body) = body {
            html.push_str("<br>");
            html.push_str(&html_escape(body));
        }
        html.push_str("</li>\n");

        text.push_str("- ");
        text.push_str(subject);
        if let Some(body) = body {
            text.push_str("\n  ");
            text.push_str(body);
        }
        text.push('\n');
    }

    html.push_str("</ul>");
    (html, text)
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use grantflow_domain::{
        mail::{
            digest::DigestId,
            message::EmailAddress,
            outbox::OutboxStatus,
            preference::{DigestFrequency, EmailType},
            suppression::{Suppression, SuppressionId, SuppressionReason},
        },
        user::UserId,
    };
    use grantflow_infra::mock::{
        MockDigestRepository,
        MockOutboxRepository,
        MockSuppressionRepository,
        MockTemplateRepository,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    struct Fixture {
        digests:      MockDigestRepository,
        outbox:       MockOutboxRepository,
        suppressions: MockSuppressionRepository,
        scheduler:    DigestScheduler,
    }

    fn make_fixture() -> Fixture {
        let digests = MockDigestRepository::new();
        let outbox = MockOutboxRepository::new();
        let suppressions = MockSuppressionRepository::new();
        let enqueue = Arc::new(EnqueueService::new(
            Arc::new(outbox.clone()),
            Arc::new(MockTemplateRepository::new()),
            Arc::new(suppressions.clone()),
        ));
        let scheduler = DigestScheduler::new(Arc::new(digests.clone()), enqueue);
        Fixture {
            digests,
            outbox,
            suppressions,
            scheduler,
        }
    }

    fn due_digest(now: DateTime<Utc>, items: Vec<serde_json::Value>) -> Digest {
        Digest {
            id:          DigestId::new(),
            tenant_id:   None,
            user_id:     UserId::new(),
            email_type:  EmailType::new("forum_reply"),
            frequency:   DigestFrequency::Daily,
            recipient:   EmailAddress::new("user@example.com").unwrap(),
            items,
            last_run_at: None,
            next_run_at: now - Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn 期限到来したダイジェストは低優先度でエンキューされる() {
        let fixture = make_fixture();
        let now = Utc::now();
        fixture.digests.add_digest(due_digest(
            now,
            vec![
                json!({"subject": "新着返信 A", "body": "本文 A"}),
                json!({"subject": "新着返信 B"}),
            ],
        ));

        let summary = fixture.scheduler.run(now).await.unwrap();

        assert_eq!(summary.due, 1);
        assert_eq!(summary.enqueued, 1);

        let items = fixture.outbox.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].priority, Priority::Low);
        assert_eq!(items[0].status, OutboxStatus::Pending);
        assert_eq!(items[0].to[0].as_str(), "user@example.com");
        assert!(items[0].subject.contains("2 件"));
        assert!(items[0].body_html.as_deref().unwrap().contains("新着返信 A"));
        assert!(items[0].body_text.as_deref().unwrap().contains("本文 A"));
    }

    #[tokio::test]
    async fn 実行後はスケジュールが正確に24時間進み項目がクリアされる() {
        let fixture = make_fixture();
        let now = Utc::now();
        fixture
            .digests
            .add_digest(due_digest(now, vec![json!({"subject": "x"})]));

        fixture.scheduler.run(now).await.unwrap();

        let digest = &fixture.digests.digests()[0];
        assert!(digest.items.is_empty());
        assert_eq!(digest.last_run_at, Some(now));
        assert_eq!(digest.next_run_at, now + Duration::hours(24));
    }

    #[tokio::test]
    async fn 空のダイジェストはメールを生成せずスケジュールだけ進む() {
        let fixture = make_fixture();
        let now = Utc::now();
        fixture.digests.add_digest(due_digest(now, vec![]));

        let summary = fixture.scheduler.run(now).await.unwrap();

        assert_eq!(summary.empty, 1);
        assert!(fixture.outbox.items().is_empty());
        assert_eq!(fixture.digests.digests()[0].next_run_at, now + Duration::hours(24));
    }

    #[tokio::test]
    async fn 未到来のダイジェストは処理されない() {
        let fixture = make_fixture();
        let now = Utc::now();
        let mut digest = due_digest(now, vec![json!({"subject": "x"})]);
        digest.next_run_at = now + Duration::hours(1);
        fixture.digests.add_digest(digest);

        let summary = fixture.scheduler.run(now).await.unwrap();

        assert_eq!(summary.due, 0);
        assert!(fixture.outbox.items().is_empty());
    }

    #[tokio::test]
    async fn サプレッション済み宛先のダイジェストは破棄してスケジュールを進める() {
        let fixture = make_fixture();
        let now = Utc::now();
        fixture.suppressions.add_suppression(Suppression {
            id:         SuppressionId::new(),
            tenant_id:  None,
            email:      EmailAddress::new("user@example.com").unwrap(),
            reason:     SuppressionReason::Unsubscribe,
            detail:     None,
            active:     true,
            expires_at: None,
            created_at: now,
        });
        fixture
            .digests
            .add_digest(due_digest(now, vec![json!({"subject": "x"})]));

        let summary = fixture.scheduler.run(now).await.unwrap();

        assert_eq!(summary.suppressed, 1);
        assert!(fixture.outbox.items().is_empty());
        // 項目は破棄され、スケジュールは進む
        let digest = &fixture.digests.digests()[0];
        assert!(digest.items.is_empty());
        assert_eq!(digest.next_run_at, now + Duration::hours(24));
    }
}
