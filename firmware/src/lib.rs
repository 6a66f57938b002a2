//! RP2040ファームウェア共通部
//!
//! `pico-machine` のハードウェアトレイトをRP2040のレジスタで実装し、
//! 2つのバイナリ（machine / smps）が使うタスクと共有状態をまとめます。
#![no_std]

// マクロを後続モジュールで使うため最初に宣言する
mod fmt;

pub mod config;
pub mod hardware;
pub mod panic;
pub mod state;
pub mod tasks;
