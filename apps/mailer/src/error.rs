//! # メーラー API エラー定義
//!
//! ドメイン / インフラのエラーを HTTP レスポンスへ変換する。
//!
//! ## ステータスマッピング
//!
//! | エラー | ステータス |
//! |--------|-----------|
//! | `Validation` / `TemplateRender` | 400 |
//! | `SuppressedRecipient` | 422 |
//! | `NotFound` / `TemplateNotFound` | 404 |
//! | その他（インフラ・トランスポート） | 500 |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use grantflow_domain::MailError;
use grantflow_infra::InfraError;
use grantflow_shared::ErrorResponse;
use thiserror::Error;

/// メーラー API で発生するエラー
#[derive(Debug, Error)]
pub enum ApiError {
    /// 配信パイプラインのドメインエラー
    #[error(transparent)]
    Mail(#[from] MailError),

    /// 永続層のエラー
    #[error("インフラエラー: {0}")]
    Infra(#[from] InfraError),

    /// 不正なリクエスト（パス・ヘッダーのパース失敗等）
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Mail(MailError::Validation(msg)) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::validation_error(msg.clone()),
            ),
            ApiError::Mail(MailError::TemplateRender(msg)) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(
                    "template-render",
                    "Template Render Error",
                    400,
                    msg.clone(),
                ),
            ),
            ApiError::Mail(MailError::SuppressedRecipient { email }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::new(
                    "suppressed-recipient",
                    "Suppressed Recipient",
                    422,
                    format!("宛先はサプレッション登録されています: {email}"),
                ),
            ),
            ApiError::Mail(MailError::TemplateNotFound(key)) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::not_found(format!("テンプレートが見つかりません: {key}")),
            ),
            ApiError::Mail(err @ MailError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, ErrorResponse::not_found(err.to_string()))
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::bad_request(msg.clone()))
            }
            ApiError::Mail(err) => {
                // ProviderConfiguration / Transport はディスパッチ時に記録される
                // 前提だが、同期経路に漏れた場合は 500 として扱う
                tracing::error!(error = %err, "配信パイプラインエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::internal_server_error("内部エラーが発生しました"),
                )
            }
            ApiError::Infra(err) => {
                tracing::error!(error = %err, "インフラエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::internal_server_error("内部エラーが発生しました"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use grantflow_domain::TransportError;
    use pretty_assertions::assert_eq;

    use super::*;

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn バリデーションエラーは400() {
        assert_eq!(
            status_of(ApiError::Mail(MailError::Validation("宛先なし".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::Mail(MailError::TemplateRender("欠落".into()))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn サプレッション済み宛先は422() {
        assert_eq!(
            status_of(ApiError::Mail(MailError::SuppressedRecipient {
                email: "a@example.com".into(),
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn 未発見系は404() {
        assert_eq!(
            status_of(ApiError::Mail(MailError::TemplateNotFound("welcome".into()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Mail(MailError::NotFound {
                entity_type: "Sender",
                id:          "x".into(),
            })),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn トランスポートエラーは500() {
        assert_eq!(
            status_of(ApiError::Mail(MailError::Transport(TransportError::new(
                "接続失敗"
            )))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
