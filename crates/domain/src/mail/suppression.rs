//! # サプレッション
//!
//! 送信禁止アドレスの登録。テナントスコープまたはグローバルに、
//! 理由・カテゴリ・有効期限付きで管理する。
//!
//! ## 不変条件
//!
//! - (テナント, アドレス) ごとに有効な登録は最大 1 件
//! - グローバル登録（テナント = `None`)はテナント固有の登録に
//!   加えて全テナントに適用される

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{mail::message::EmailAddress, tenant::TenantId};

define_uuid_id! {
    /// サプレッション登録の一意識別子
    pub struct SuppressionId;
}

/// サプレッション登録の理由カテゴリ
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// ハードバウンス（配信イベントからの自動登録）
    Bounce,
    /// 迷惑メール報告（配信イベントからの自動登録）
    SpamComplaint,
    /// 受信者による配信停止
    Unsubscribe,
    /// 管理者による手動登録
    Manual,
}

/// サプレッション登録
#[derive(Debug, Clone)]
pub struct Suppression {
    pub id:         SuppressionId,
    /// 適用スコープ（`None` = 全テナント）
    pub tenant_id:  Option<TenantId>,
    pub email:      EmailAddress,
    pub reason:     SuppressionReason,
    /// 自由記述の補足（バウンスメッセージ等）
    pub detail:     Option<String>,
    pub active:     bool,
    /// 有効期限（`None` = 無期限）
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Suppression {
    /// 指定時刻において送信をブロックするかどうか
    ///
    /// 非アクティブ化済み、または有効期限切れの登録はブロックしない。
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn make_suppression(active: bool, expires_at: Option<DateTime<Utc>>) -> Suppression {
        Suppression {
            id: SuppressionId::new(),
            tenant_id: None,
            email: EmailAddress::new("blocked@example.com").unwrap(),
            reason: SuppressionReason::Bounce,
            detail: None,
            active,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn アクティブで無期限なら有効() {
        let now = Utc::now();
        assert!(make_suppression(true, None).is_effective(now));
    }

    #[test]
    fn 非アクティブ化された登録は無効() {
        let now = Utc::now();
        assert!(!make_suppression(false, None).is_effective(now));
    }

    #[test]
    fn 期限切れの登録は無効() {
        let now = Utc::now();
        assert!(!make_suppression(true, Some(now - Duration::hours(1))).is_effective(now));
        assert!(make_suppression(true, Some(now + Duration::hours(1))).is_effective(now));
    }

    #[test]
    fn 理由カテゴリの文字列変換はsnake_case() {
        assert_eq!(SuppressionReason::SpamComplaint.to_string(), "spam_complaint");
        assert_eq!(
            "bounce".parse::<SuppressionReason>().unwrap(),
            SuppressionReason::Bounce
        );
    }
}
