//! タスクモジュール
//!
//! 各タスクの実装を分離して管理します。

pub mod housekeeping;
pub mod led;
pub mod line_sync;

// タスク関数を再エクスポート
pub use housekeeping::housekeeping_task;
pub use led::led_task;
pub use line_sync::line_sync_task;
