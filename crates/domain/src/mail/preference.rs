//! # 通知設定
//!
//! ユーザー × メール種別ごとのオプトイン / アウトとケイデンス設定。
//!
//! ## 不変条件
//!
//! - (ユーザー, メール種別) ごとに 1 行
//! - `Immediate` 以外のケイデンスを持つ通知のみがダイジェストに
//!   蓄積される（即時通知は通常のエンキュー経路を通る）

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::user::UserId;

/// メール種別（例: "grant_status_changed", "forum_reply"）
///
/// ビジネス層が定義する自由形式のキー。コアは識別子として扱うのみで
/// 意味を解釈しない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct EmailType(String);

impl EmailType {
    /// メール種別キーを作成する
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 配信ケイデンス
///
/// `Immediate` は即時配信、それ以外はダイジェストスケジューラーに
/// 蓄積されて定期便として送信される。
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
pub enum DigestFrequency {
    Immediate,
    Daily,
    Weekly,
    Monthly,
}

impl DigestFrequency {
    /// 前回実行時刻から次回実行時刻を計算する
    ///
    /// Daily = +24 時間、Weekly = +7 日、Monthly = +1 ヶ月（暦月）。
    /// `Immediate` はダイジェスト対象外のため `None` を返す。
    pub fn next_run_after(self, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Immediate => None,
            Self::Daily => Some(last_run + Duration::days(1)),
            Self::Weekly => Some(last_run + Duration::days(7)),
            Self::Monthly => Some(
                last_run
                    .checked_add_months(Months::new(1))
                    .unwrap_or(last_run + Duration::days(31)),
            ),
        }
    }

    /// ダイジェスト蓄積の対象となるケイデンスかどうか
    pub fn is_batched(self) -> bool {
        !matches!(self, Self::Immediate)
    }
}

/// ユーザーの通知設定
#[derive(Debug, Clone)]
pub struct Preference {
    pub user_id:    UserId,
    pub email_type: EmailType,
    /// このメール種別の受信を有効にするか
    pub enabled:    bool,
    pub frequency:  DigestFrequency,
    /// ダイジェストの希望送信時刻（"09:00" 等、タイムゾーン込みで解釈）
    pub send_time:  Option<String>,
    pub timezone:   Option<String>,
    pub updated_at: DateTime<Utc>,
}
