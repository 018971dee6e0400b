//! # テナント
//!
//! マルチテナント構成におけるテナント（助成団体・組織）の識別子。
//!
//! ## 設計判断
//!
//! メール配信設定（テンプレート・送信者・プロバイダー・サプレッション）は
//! テナントスコープまたはグローバル（`Option<TenantId>` の `None`）を持つ。
//! 解決時はテナント固有の設定がグローバル設定をシャドウする。

define_uuid_id! {
    /// テナント（組織）の一意識別子
    ///
    /// メール配信パイプラインの各設定行はこの ID でスコープされる。
    /// `None`（NULL テナント）は全テナント共通のグローバル設定を表す。
    pub struct TenantId;
}
