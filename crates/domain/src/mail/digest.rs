//! # ダイジェスト
//!
//! 低優先度通知を (ユーザー, メール種別, ケイデンス) ごとに蓄積し、
//! 計算されたスケジュールで 1 通のメールにまとめる。
//!
//! ## 不変条件
//!
//! - (テナント, ユーザー, メール種別, ケイデンス) ごとに 1 行
//! - 空のダイジェストもスケジュールは進む（メールは生成しない）
//!
//! ## 設計判断
//!
//! 上流の通知プロデューサーは `Preference.frequency != Immediate` の
//! (ユーザー, メール種別) に対してのみ項目を積むこと。宛先アドレスは
//! 積み込み時に行へ記録する（このコアはユーザーディレクトリを持たない）。

use chrono::{DateTime, Utc};

use crate::{
    error::MailError,
    mail::{
        message::EmailAddress,
        preference::{DigestFrequency, EmailType},
    },
    tenant::TenantId,
    user::UserId,
};

define_uuid_id! {
    /// ダイジェスト行の一意識別子
    pub struct DigestId;
}

/// ダイジェスト — 蓄積中の通知バッチ
#[derive(Debug, Clone)]
pub struct Digest {
    pub id:          DigestId,
    pub tenant_id:   Option<TenantId>,
    pub user_id:     UserId,
    pub email_type:  EmailType,
    pub frequency:   DigestFrequency,
    /// 送信先アドレス（積み込み時に上流が解決して渡す）
    pub recipient:   EmailAddress,
    /// 蓄積された通知項目（不透明な JSON。`subject` / `body` キーを推奨）
    pub items:       Vec<serde_json::Value>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
}

impl Digest {
    /// 実行後にスケジュールを進め、蓄積項目をクリアする
    ///
    /// `last_run_at = now`、`next_run_at = now + ケイデンス間隔`。
    /// 空のダイジェストでも呼び出され、スケジュールだけが進む。
    pub fn advance_schedule(&mut self, now: DateTime<Utc>) -> Result<(), MailError> {
        let next = self.frequency.next_run_after(now).ok_or_else(|| {
            MailError::Validation(
                "immediate ケイデンスはダイジェストスケジュール対象外です".to_string(),
            )
        })?;
        self.last_run_at = Some(now);
        self.next_run_at = next;
        self.items.clear();
        Ok(())
    }

    /// 指定時刻において実行期限が到来しているか
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at <= now
    }
}
