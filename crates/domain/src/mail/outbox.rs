//! # Outbox
//!
//! 論理メール 1 通分の送信意図を表す Outbox 行と、その状態機械。
//!
//! ## 設計方針
//!
//! - **状態遷移の単調性**: PENDING → PROCESSING → {SENT, FAILED}。
//!   PROCESSING → PENDING への巻き戻しはリトライ再キューと
//!   スタック回復（クレームの生存期限切れ）の 2 経路のみ
//! - **リトライ**: トランスポート失敗時は指数バックオフ付きで PENDING に
//!   戻し、試行上限到達で恒久 FAILED とする
//! - **ドメイン層での遷移検証**: 不正遷移は `MailError::Validation` として
//!   検出する。永続層（`WHERE status = ...` 付き UPDATE）と二重に守る

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    error::MailError,
    mail::{
        message::EmailAddress,
        provider::ProviderId,
        sender::SenderId,
        template::EmailTemplateId,
    },
    tenant::TenantId,
};

define_uuid_id! {
    /// Outbox アイテムの一意識別子
    pub struct OutboxItemId;
}

/// Outbox アイテムの状態
///
/// `email_outbox.status` カラムに snake_case 文字列で格納される。
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
pub enum OutboxStatus {
    /// ディスパッチ待ち（`scheduled_for` 到達後にクレーム可能）
    Pending,
    /// ワーカーがクレーム済み・処理中
    Processing,
    /// 全宛先が送信またはサプレッションで完了
    Sent,
    /// 致命的エラーまたは試行上限到達
    Failed,
}

impl OutboxStatus {
    /// 終端状態（SENT / FAILED）かどうか
    ///
    /// 終端状態のアイテムは再ディスパッチされない。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// 送信優先度
///
/// クレーム時の取り出し順序に影響する。ダイジェスト化対象の
/// 低優先度通知は `Low` でエンキューされる。
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
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// クレーム時の並び替え用ランク（小さいほど先に処理）
    pub fn rank(self) -> i16 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// リトライ時のバックオフ遅延を計算する
///
/// 試行回数 n に対して 2^n 分（1 回目の失敗後 2 分、2 回目 4 分 …）。
/// 指数の爆発を防ぐため 6 回分（64 分)で頭打ちにする。
pub fn retry_backoff(attempts: i32) -> Duration {
    let exp = attempts.clamp(1, 6) as u32;
    Duration::minutes(2_i64.pow(exp))
}

/// Outbox アイテム — 論理メール 1 通分の送信意図
///
/// エンキュー操作で作成され、以後の変更はディスパッチエンジンのみが行う。
/// 明示的な管理パージを除き削除されない。
#[derive(Debug, Clone)]
pub struct OutboxItem {
    pub id:            OutboxItemId,
    /// 所属テナント（`None` = グローバル）
    pub tenant_id:     Option<TenantId>,
    /// レンダリング元テンプレート（直接本文指定の場合は `None`）
    pub template_id:   Option<EmailTemplateId>,
    /// 明示指定された送信者（`None` ならディスパッチ時に解決）
    pub sender_id:     Option<SenderId>,
    /// 明示指定されたプロバイダー（`None` ならディスパッチ時に解決）
    pub provider_id:   Option<ProviderId>,
    pub to:            Vec<EmailAddress>,
    pub cc:            Vec<EmailAddress>,
    pub bcc:           Vec<EmailAddress>,
    pub subject:       String,
    pub body_html:     Option<String>,
    pub body_text:     Option<String>,
    /// 呼び出し元が付与する不透明なメタデータ
    pub metadata:      serde_json::Value,
    pub priority:      Priority,
    /// この時刻以降にクレーム可能（バックオフの not-before を兼ねる）
    pub scheduled_for: DateTime<Utc>,
    pub status:        OutboxStatus,
    pub attempts:      i32,
    pub last_error:    Option<String>,
    pub created_at:    DateTime<Utc>,
    /// クレーム時刻（スタック回復の生存判定に使用）
    pub claimed_at:    Option<DateTime<Utc>>,
    pub processed_at:  Option<DateTime<Utc>>,
}

impl OutboxItem {
    /// to / cc / bcc の和集合を重複排除して返す
    ///
    /// ファンアウトの単位。同一アドレスが複数リストに現れても
    /// DeliveryRecord は 1 件のみ作成される。
    pub fn recipients(&self) -> Vec<EmailAddress> {
        let mut seen = Vec::new();
        for addr in self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter()) {
            if !seen.contains(addr) {
                seen.push(addr.clone());
            }
        }
        seen
    }

    /// PENDING → PROCESSING（クレーム）
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<(), MailError> {
        if self.status != OutboxStatus::Pending {
            return Err(MailError::Validation(format!(
                "PENDING 以外のアイテムはクレームできません: {}",
                self.status
            )));
        }
        self.status = OutboxStatus::Processing;
        self.claimed_at = Some(now);
        Ok(())
    }

    /// PROCESSING → SENT（全宛先が送信またはサプレッションで完了）
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), MailError> {
        if self.status != OutboxStatus::Processing {
            return Err(MailError::Validation(format!(
                "PROCESSING 以外のアイテムは完了できません: {}",
                self.status
            )));
        }
        self.status = OutboxStatus::Sent;
        self.processed_at = Some(now);
        Ok(())
    }

    /// PROCESSING → FAILED（致命的エラーまたは試行上限到達）
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), MailError> {
        if self.status != OutboxStatus::Processing {
            return Err(MailError::Validation(format!(
                "PROCESSING 以外のアイテムは失敗にできません: {}",
                self.status
            )));
        }
        self.status = OutboxStatus::Failed;
        self.last_error = Some(error.into());
        self.processed_at = Some(now);
        Ok(())
    }

    /// PROCESSING → PENDING（トランスポート失敗のリトライ再キュー）
    ///
    /// 試行回数を加算し、指数バックオフ分だけ `scheduled_for` を
    /// 先送りする。上限判定は呼び出し側（ディスパッチエンジン）が行う。
    pub fn requeue_for_retry(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), MailError> {
        if self.status != OutboxStatus::Processing {
            return Err(MailError::Validation(format!(
                "PROCESSING 以外のアイテムは再キューできません: {}",
                self.status
            )));
        }
        self.attempts += 1;
        self.status = OutboxStatus::Pending;
        self.last_error = Some(error.into());
        self.scheduled_for = now + retry_backoff(self.attempts);
        self.claimed_at = None;
        Ok(())
    }
}
