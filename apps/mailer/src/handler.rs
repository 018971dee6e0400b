//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、ロジックはユースケース層・ドメイン層に委譲
//! - テナントコンテキストは `x-tenant-id` ヘッダーから取得する
//!   （認証自体は上流のゲートウェイが担当）

pub mod event;
pub mod health;
pub mod outbox;
pub mod preference;
pub mod provider;
pub mod send;
pub mod sender;
pub mod suppression;
pub mod template;

pub use event::{EventState, record_delivery_event};
pub use health::health_check;
pub use outbox::{OutboxState, get_outbox_item, list_deliveries, list_outbox};
pub use preference::{
    PreferenceState,
    get_preference,
    list_preferences,
    upsert_preference,
};
pub use provider::{ProviderState, create_provider, list_providers};
pub use send::{SendState, send_email};
pub use sender::{SenderState, create_sender, list_senders};
pub use suppression::{
    SuppressionState,
    create_suppression,
    delete_suppression,
    list_suppressions,
};
pub use template::{
    TemplateState,
    create_template,
    deactivate_template,
    get_template,
    list_templates,
    update_template,
};

use axum::http::HeaderMap;
use grantflow_domain::tenant::TenantId;
use uuid::Uuid;

use crate::error::ApiError;

/// `x-tenant-id` ヘッダーからテナントコンテキストを取得する
///
/// ヘッダーなし = グローバルコンテキスト。UUID として不正な値は 400。
pub(crate) fn tenant_from_headers(headers: &HeaderMap) -> Result<Option<TenantId>, ApiError> {
    let Some(value) = headers.get("x-tenant-id") else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("x-tenant-id ヘッダーが不正です".to_string()))?;
    let uuid = Uuid::parse_str(raw).map_err(|_| {
        ApiError::BadRequest(format!("x-tenant-id は UUID である必要があります: {raw}"))
    })?;
    Ok(Some(TenantId::from_uuid(uuid)))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn ヘッダーなしはグローバルコンテキスト() {
        let headers = HeaderMap::new();
        assert_eq!(tenant_from_headers(&headers).unwrap(), None);
    }

    #[test]
    fn 有効なuuidはテナントidとして解釈される() {
        let uuid = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", HeaderValue::from_str(&uuid.to_string()).unwrap());

        let tenant = tenant_from_headers(&headers).unwrap();
        assert_eq!(tenant, Some(TenantId::from_uuid(uuid)));
    }

    #[test]
    fn 不正なuuidは400エラー() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", HeaderValue::from_static("not-a-uuid"));

        assert!(matches!(
            tenant_from_headers(&headers),
            Err(ApiError::BadRequest(_))
        ));
    }
}
