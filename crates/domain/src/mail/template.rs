//! # メールテンプレート
//!
//! (テナント, キー) ごとにバージョン管理されるメールテンプレート。
//!
//! ## 解決規則
//!
//! 1. (テナント, キー) に一致する最高バージョンのアクティブな行
//! 2. 無ければ (グローバル, キー) の最高バージョン
//!
//! 送信済み OutboxItem から参照されたテンプレートは不変とし、
//! 編集は常に新バージョンの行として作成する。

use chrono::{DateTime, Utc};

use crate::tenant::TenantId;

define_uuid_id! {
    /// テンプレートの一意識別子（バージョンごとに別 ID）
    pub struct EmailTemplateId;
}

/// メールテンプレート
///
/// 件名・HTML 本文・テキスト本文のロジックレステンプレートを持つ。
/// プレースホルダーの構文はレンダラー側（tera）の契約に従う。
#[derive(Debug, Clone)]
pub struct EmailTemplate {
    pub id:            EmailTemplateId,
    /// 所属テナント（`None` = グローバル共通テンプレート）
    pub tenant_id:     Option<TenantId>,
    /// 論理キー（例: "grant_approved"）。バージョン間で共有される
    pub key:           String,
    pub version:       i32,
    pub subject_tpl:   String,
    pub body_html_tpl: String,
    /// テキスト本文テンプレート（省略可）
    pub body_text_tpl: Option<String>,
    pub active:        bool,
    pub created_at:    DateTime<Utc>,
}
