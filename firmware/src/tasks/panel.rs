//! 設定パネルタスク
//!
//! 4つのボタン（ON/UP/DOWN/MODE、押すとLow）で出力のON/OFFと
//! 周波数・デューティ比・電流制限を操作します。
//! UP/DOWNを離した時に設定をEEPROMへ保存します。

use embassy_futures::select::{select4, Either4};
use embassy_rp::gpio::Input;
use embassy_rp::i2c::{Blocking, I2c};
use embassy_rp::peripherals::I2C1;
use embassy_time::{Delay, Duration, Timer};
use pico_machine::eeprom::Eeprom24;
use pico_machine::panel::{Button, PanelEvent, SettingsPanel};

use crate::config::smps::{DEBOUNCE_MS, RELAY_DELAY_MS};
use crate::fmt::*;
use crate::hardware::RpSlices;
use crate::state::{with_relays, PANEL_STATUS};

/// 設定保存先
pub type BoardEeprom = Eeprom24<I2c<'static, I2C1, Blocking>, Delay>;

/// パネルのボタン入力
pub struct Buttons {
    pub on: Input<'static>,
    pub up: Input<'static>,
    pub down: Input<'static>,
    pub mode: Input<'static>,
}

impl Buttons {
    fn input(&mut self, button: Button) -> &mut Input<'static> {
        match button {
            Button::On => &mut self.on,
            Button::Up => &mut self.up,
            Button::Down => &mut self.down,
            Button::Mode => &mut self.mode,
        }
    }

    /// いずれかのボタンが押されるまで待つ
    async fn wait_press(&mut self) -> Button {
        match select4(
            self.on.wait_for_falling_edge(),
            self.up.wait_for_falling_edge(),
            self.down.wait_for_falling_edge(),
            self.mode.wait_for_falling_edge(),
        )
        .await
        {
            Either4::First(_) => Button::On,
            Either4::Second(_) => Button::Up,
            Either4::Third(_) => Button::Down,
            Either4::Fourth(_) => Button::Mode,
        }
    }
}

/// 設定パネルタスク
#[embassy_executor::task]
pub async fn panel_task(
    mut buttons: Buttons,
    mut panel: SettingsPanel<'static, 'static, RpSlices>,
    mut eeprom: BoardEeprom,
) {
    info!("Panel task started");
    *PANEL_STATUS.lock().await = Some(panel.status());

    loop {
        let button = buttons.wait_press().await;
        Timer::after(Duration::from_millis(DEBOUNCE_MS)).await;
        if buttons.input(button).is_high() {
            // チャタリング
            continue;
        }

        match panel.press(button) {
            Ok(PanelEvent::OutputOn) => {
                with_relays(|r| r.close_first());
                Timer::after(Duration::from_millis(RELAY_DELAY_MS)).await;
                // 待っている間にアラームで止まっていたら閉じない
                if panel.status().running {
                    with_relays(|r| r.close_second());
                }
            }
            Ok(PanelEvent::OutputOff) => with_relays(|r| r.open()),
            Ok(_) => {}
            Err(e) => warn!("Panel {:?} rejected: {}", button, e.message()),
        }
        *PANEL_STATUS.lock().await = Some(panel.status());

        buttons.input(button).wait_for_high().await;
        Timer::after(Duration::from_millis(DEBOUNCE_MS)).await;

        match panel.release(button, &mut eeprom) {
            Ok(true) => info!("Settings saved"),
            Ok(false) => {}
            Err(_) => warn!("Failed to save settings"),
        }
    }
}
