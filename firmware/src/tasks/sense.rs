//! センス信号タスク
//!
//! センス入力の立ち下がりエッジを周期境界として `SENSE` に渡します。
//! キャプチャ中もエッジを処理できるよう、割り込みエグゼキュータで動かします。

use embassy_rp::gpio::Input;
use embassy_time::Instant;
use pico_machine::sense::MEASURE_EDGES;

use crate::fmt::*;
use crate::state::SENSE;

#[embassy_executor::task]
pub async fn sense_task(mut sense: Input<'static>) {
    info!("Sense task started");
    SENSE.enable(true);

    let mut edges = 0usize;
    loop {
        sense.wait_for_falling_edge().await;
        SENSE.on_edge(Instant::now().as_micros());

        // 測定が揃った時に一度だけ報告
        if edges < MEASURE_EDGES {
            edges += 1;
            if edges == MEASURE_EDGES {
                match SENSE.wave_hz() {
                    Some(hz) => info!("Sense wave: {} Hz", hz),
                    None => warn!("Sense wave frequency unknown"),
                }
            }
        }
    }
}
