//! # エラーレスポンス（RFC 9457 Problem Details）
//!
//! 全エンドポイント共通のエラーレスポンス構造体を提供する。
//!
//! ## 設計
//!
//! - `ErrorResponse` は純粋なデータ構造（`Serialize` / `Deserialize` のみ）
//! - axum の `IntoResponse` 変換はアプリ側の責務（shared に axum 依存を入れない）
//! - よく使うエラー種別は便利コンストラクタで提供し、URI のハードコードを排除
//! - `success: false` を常に含め、クライアントが `success` だけで分岐できるようにする

use serde::{Deserialize, Serialize};

/// error_type URI のベースパス
const ERROR_TYPE_BASE: &str = "https://grantflow.example.com/errors";

/// エラーレスポンス（RFC 9457 Problem Details）
///
/// `type` フィールドは URI で問題の種類を識別する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success:    bool,
    #[serde(rename = "type")]
    pub error_type: String,
    pub title:      String,
    pub status:     u16,
    pub detail:     String,
}

impl ErrorResponse {
    /// 汎用コンストラクタ
    ///
    /// `error_type_suffix` はベース URI に付加される（例: `"template-not-found"`）。
    pub fn new(
        error_type_suffix: &str,
        title: impl Into<String>,
        status: u16,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_type: format!("{ERROR_TYPE_BASE}/{error_type_suffix}"),
            title: title.into(),
            status,
            detail: detail.into(),
        }
    }

    /// 400 Bad Request
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", 400, detail)
    }

    /// 400 Validation Error
    pub fn validation_error(detail: impl Into<String>) -> Self {
        Self::new("validation-error", "Validation Error", 400, detail)
    }

    /// 404 Not Found
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", 404, detail)
    }

    /// 422 Unprocessable Entity
    pub fn unprocessable_entity(detail: impl Into<String>) -> Self {
        Self::new(
            "unprocessable-entity",
            "Unprocessable Entity",
            422,
            detail,
        )
    }

    /// 500 Internal Server Error
    pub fn internal_server_error(detail: impl Into<String>) -> Self {
        Self::new(
            "internal-server-error",
            "Internal Server Error",
            500,
            detail,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_便利コンストラクタがステータスとuriを設定する() {
        let response = ErrorResponse::not_found("テンプレートが見つかりません");

        assert_eq!(response.status, 404);
        assert_eq!(
            response.error_type,
            "https://grantflow.example.com/errors/not-found"
        );
        assert!(!response.success);
    }

    #[test]
    fn test_serializeでtypeフィールドにリネームされる() {
        let response = ErrorResponse::bad_request("不正なリクエスト");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(
            json["type"],
            "https://grantflow.example.com/errors/bad-request"
        );
        assert_eq!(json["success"], false);
        assert_eq!(json["status"], 400);
    }
}
