//! タスクモジュール
//!
//! 各タスクの実装を分離して管理します。

pub mod command;
pub mod led;
pub mod limiter;
pub mod panel;
pub mod sense;
pub mod status;

// タスク関数を再エクスポート
pub use command::command_task;
pub use led::led_task;
pub use limiter::limiter_task;
pub use panel::panel_task;
pub use sense::sense_task;
pub use status::status_task;
