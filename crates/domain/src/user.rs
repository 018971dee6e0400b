//! # ユーザー
//!
//! 通知設定・ダイジェストの対象となる受信ユーザーの識別子。
//! ユーザー本体（認証・プロフィール）はこのコアのスコープ外で、
//! 識別子のみを受け渡す。

define_uuid_id! {
    /// 受信ユーザーの一意識別子
    pub struct UserId;
}
