//! LED制御タスク
//!
//! 動作確認用にLEDを点滅させます。

use embassy_rp::gpio::Output;
use embassy_time::{Duration, Timer};

use crate::config::machine::HEARTBEAT_MS;
use crate::fmt::*;
use crate::state::MACHINE_PWM;

/// LED制御タスク
///
/// 500msごとに反転し、PWM出力中は点灯したままにします。
#[embassy_executor::task]
pub async fn led_task(mut led: Output<'static>) {
    info!("LED task started");

    loop {
        if MACHINE_PWM.is_running() {
            led.set_high();
        } else {
            led.toggle();
        }
        Timer::after(Duration::from_millis(HEARTBEAT_MS)).await;
    }
}
