//! # ユースケース層
//!
//! メーラーのアプリケーションロジック。HTTP ハンドラとバックグラウンド
//! ワーカーの両方から使用される。

pub mod digest;
pub mod dispatch;
pub mod enqueue;
pub mod events;
pub mod render;

pub use digest::{DigestRunSummary, DigestScheduler};
pub use dispatch::{DispatchEngine, DispatchSummary};
pub use enqueue::{EnqueueRequest, EnqueueService};
pub use events::DeliveryEventService;
pub use render::{RenderedEmail, render_template};
