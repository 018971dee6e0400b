//! # API レスポンスエンベロープ
//!
//! 公開 API の統一レスポンス形式 `{ "success": true, "data": T }` を提供する。

use serde::{Deserialize, Serialize};

/// 公開 API の統一レスポンス型
///
/// すべての公開 API エンドポイントは `{ "success": true, "data": T }`
/// 形式でレスポンスを返す。エラー時は [`crate::ErrorResponse`] が
/// `success: false` を返すため、クライアントは `success` だけで
/// 分岐できる。
///
/// ## 使用例
///
/// ```
/// use grantflow_shared::ApiResponse;
///
/// let response = ApiResponse::new("hello");
/// assert_eq!(response.data, "hello");
/// assert!(response.success);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data:    T,
}

impl<T> ApiResponse<T> {
    /// 新しい `ApiResponse` を作成する
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
