//! 電流リミッター監視タスク
//!
//! ハードウェア電流リミッターが出力を絞った時（GPIO3の立ち上がり）を記録します。
//! ブザーでの通知は `status_task` が行います。

use embassy_rp::gpio::Input;

use crate::fmt::*;
use crate::state::CURRENT;

#[embassy_executor::task]
pub async fn limiter_task(mut input: Input<'static>) {
    info!("Limiter task started");
    loop {
        input.wait_for_rising_edge().await;
        CURRENT.note_limit();
        trace!("Current limiter engaged");
    }
}
