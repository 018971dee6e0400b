//! # 送信者
//!
//! 名前付きの "From" アイデンティティ。テナントスコープまたは
//! グローバルで、検証済みフラグとデフォルトフラグを持つ。
//!
//! ## 解決規則（ディスパッチ時）
//!
//! 1. OutboxItem の明示指定
//! 2. プロバイダーのデフォルト送信者
//! 3. テナントのアクティブなデフォルト（グローバルへフォールバック）
//! 4. いずれも無ければ ProviderConfiguration エラー（致命的）

use chrono::{DateTime, Utc};

use crate::{mail::message::EmailAddress, tenant::TenantId};

define_uuid_id! {
    /// 送信者の一意識別子
    pub struct SenderId;
}

/// 送信者（From アイデンティティ）
#[derive(Debug, Clone)]
pub struct Sender {
    pub id:           SenderId,
    /// 所属テナント（`None` = グローバル）
    pub tenant_id:    Option<TenantId>,
    /// 管理用の表示名（例: "通知用"）
    pub name:         String,
    pub from_address: EmailAddress,
    /// メールの From 表示名
    pub from_name:    Option<String>,
    /// テナント内デフォルトとして解決対象になるか
    pub is_default:   bool,
    /// ドメイン検証済みか（未検証の送信者は解決対象外）
    pub verified:     bool,
    pub created_at:   DateTime<Utc>,
}
