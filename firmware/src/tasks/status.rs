//! 状態表示タスク
//!
//! LEDを点滅させ、アラーム中はブザーを断続的に鳴らします。
//! ハードウェアリミッターが動作した周期も1回鳴らします。
//! 表示器を持たないので、パネル状態はログに出します。

use embassy_rp::gpio::Output;
use embassy_time::{Duration, Ticker};

use crate::config::smps::STATUS_PERIOD_MS;
use crate::fmt::*;
use crate::hardware::Buzzer;
use crate::state::{CURRENT, PANEL_STATUS, SMPS_PWM};

/// 状態表示タスク
#[embassy_executor::task]
pub async fn status_task(mut led: Output<'static>, mut buzzer: Buzzer) {
    info!("Status task started");

    // 半周期ごとに点灯/消灯
    let mut ticker = Ticker::every(Duration::from_millis(STATUS_PERIOD_MS / 2));
    let mut phase = false;

    loop {
        ticker.next().await;
        phase = !phase;

        led.set_level(phase.into());
        let limited = phase && CURRENT.take_limit_occurred();
        if limited {
            warn!("Current limiter engaged");
        }
        buzzer.set(phase && (CURRENT.is_alarmed() || limited));

        if !phase {
            continue;
        }
        if let Some(mut status) = *PANEL_STATUS.lock().await {
            status.amps = CURRENT.amps();
            status.alarm = CURRENT.is_alarmed();
            status.running = SMPS_PWM.is_running();
            debug!(
                "{:?}: {} Hz, duty {}, limit {} A, {} A, running={}, alarm={}",
                status.mode,
                status.config.pwm_hz,
                status.config.pwm_duty,
                status.config.amp_limit,
                status.amps,
                status.running,
                status.alarm
            );
        }
    }
}
