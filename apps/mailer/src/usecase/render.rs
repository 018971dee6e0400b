//! # テンプレートレンダリング
//!
//! tera テンプレートエンジンで件名・HTML 本文・テキスト本文を
//! レンダリングする。
//!
//! ## 設計方針
//!
//! - **純粋関数**: (テンプレート, データ) のみから出力が決まる。
//!   DB アクセス・副作用なし
//! - **ロジックレス**: 変数展開と条件分岐のみを想定。未定義変数の参照は
//!   `MailError::TemplateRender` として同期的に失敗し、Outbox 行は
//!   作成されない

use grantflow_domain::{MailError, mail::template::EmailTemplate};
use tera::{Context, Tera};

/// レンダリング済みの件名・本文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject:   String,
    pub body_html: String,
    pub body_text: Option<String>,
}

/// テンプレートとデータから件名・本文をレンダリングする
pub fn render_template(
    template: &EmailTemplate,
    data: &serde_json::Value,
) -> Result<RenderedEmail, MailError> {
    let context = match data {
        serde_json::Value::Null => Context::new(),
        serde_json::Value::Object(_) => Context::from_value(data.clone())
            .map_err(|e| MailError::TemplateRender(e.to_string()))?,
        other => {
            return Err(MailError::Validation(format!(
                "テンプレートデータは JSON オブジェクトである必要があります: {other}"
            )));
        }
    };

    let subject = render_one(&template.subject_tpl, &context, false)?;
    let body_html = render_one(&template.body_html_tpl, &context, true)?;
    let body_text = template
        .body_text_tpl
        .as_deref()
        .map(|tpl| render_one(tpl, &context, false))
        .transpose()?;

    Ok(RenderedEmail {
        subject,
        body_html,
        body_text,
    })
}

fn render_one(template: &str, context: &Context, autoescape: bool) -> Result<String, MailError> {
    Tera::one_off(template, context, autoescape)
        .map_err(|e| MailError::TemplateRender(flatten_tera_error(&e)))
}

/// tera のエラーは原因がネストするため、根本原因まで連結する
fn flatten_tera_error(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
