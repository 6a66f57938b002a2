//! PWM周期同期ADCサンプリングと波形制御
//!
//! RP2040のPWMスライスで矩形波（シングル/プッシュプル）を出力し、
//! その周期境界に同期してADCの1周期分のサンプルを取得します。
//! ハードウェアはトレイトの向こう側にあり、ホストでテストできます。
#![cfg_attr(not(test), no_std)]

// マクロを後続モジュールで使うため最初に宣言する
mod fmt;

pub mod capture;
pub mod command;
pub mod config;
pub mod current_monitor;
pub mod display;
pub mod eeprom;
pub mod error;
pub mod machine;
pub mod panel;
pub mod pwm_driver;
pub mod sense;
pub mod waveform;

#[cfg(test)]
mod mock;

pub use error::{Error, Result};
