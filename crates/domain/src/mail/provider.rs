//! # プロバイダー
//!
//! 名前付きのトランスポート設定。種別（SMTP / SES / Noop）と
//! 種別固有の不透明な JSON 設定を持つ。
//!
//! ## 設計判断
//!
//! トランスポートの実装選択は種別文字列の分岐ではなく、
//! インフラ層のレジストリ（`TransportResolver`）による
//! ケイパビリティ型インターフェースで行う。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{mail::sender::SenderId, tenant::TenantId};

define_uuid_id! {
    /// プロバイダーの一意識別子
    pub struct ProviderId;
}

/// プロバイダーの種別（トランスポートファミリー）
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
pub enum ProviderKind {
    /// SMTP リレー（lettre）
    Smtp,
    /// Amazon SES v2 API
    Ses,
    /// 送信せずログのみ（開発・テスト用）
    Noop,
}

/// プロバイダー（トランスポート設定）
#[derive(Debug, Clone)]
pub struct Provider {
    pub id:                ProviderId,
    /// 所属テナント（`None` = グローバル）
    pub tenant_id:         Option<TenantId>,
    /// 管理用の表示名（例: "本番 SES"）
    pub name:              String,
    pub kind:              ProviderKind,
    /// 種別固有の設定（SMTP ホスト・ポート等）。コアは解釈しない
    pub config:            serde_json::Value,
    /// このプロバイダー経由の送信に使うデフォルト送信者
    pub default_sender_id: Option<SenderId>,
    /// テナント内デフォルトとして解決対象になるか
    pub is_default:        bool,
    pub active:            bool,
    pub created_at:        DateTime<Utc>,
}
