//! Configuration module
//!
//! このモジュールはPWM/ADC/電流センサーのハードウェア設定、
//! および運転設定の永続化機能を提供します。

pub mod params;
pub mod storage;

// params.rsから主要な定数を再エクスポート
pub use params::*;

// storage.rsから構造体を再エクスポート
pub use storage::{ConfigStore, DeviceConfig};
