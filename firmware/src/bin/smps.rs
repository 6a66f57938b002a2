#![no_std]
#![no_main]

#[path = "../fmt.rs"]
mod fmt;

// パニックハンドラは pico_machine_firmware::panic（出力を止めてから停止）
#[cfg(feature = "defmt-rtt")]
use defmt_rtt as _;

use embassy_executor::Spawner;
use embassy_rp::adc::{self, Adc, Channel};
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::i2c::{self, I2c};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::multicore::{spawn_core1, Stack};
use embassy_rp::pwm::{self, Pwm};
use embassy_time::{Delay, Duration, Timer};
use pico_machine::config::storage::load_or_default;
use pico_machine::current_monitor::{CurrentMonitor, CurrentSensor};
use pico_machine::eeprom::Eeprom24;
use pico_machine::panel::SettingsPanel;
use pico_machine_firmware::config::smps::{BUZZER_HZ, CORE1_STACK_SIZE, I2C_FREQUENCY};
use pico_machine_firmware::hardware::{self, Buzzer, Relays};
use pico_machine_firmware::state::{with_relays, CURRENT, RELAYS, SMPS_PWM};
use pico_machine_firmware::tasks::panel::Buttons;
use pico_machine_firmware::config::smps::LIMITER_GPIO;
use pico_machine_firmware::tasks::{limiter_task, panel_task, status_task};
use static_cell::StaticCell;

use fmt::*;

static CORE1_STACK: StaticCell<Stack<CORE1_STACK_SIZE>> = StaticCell::new();

/// PWMラップ割り込み（保留中の波形変更を適用）
#[interrupt]
fn PWM_IRQ_WRAP() {
    hardware::take_wrap_irqs();
    SMPS_PWM.on_period_end();
}

/// Core1: 電流を監視し、制限を超えたら出力を遮断する
fn current_monitor(mut adc: Adc<'static, adc::Blocking>, mut channel: Channel<'static>, sensor: CurrentSensor) -> ! {
    let fallback = sensor.zero_reading();
    let sampler = move || match adc.blocking_read(&mut channel) {
        // 12ビットを8ビットに
        Ok(raw) => (raw >> 4) as u8,
        Err(_) => fallback,
    };
    let alarm = |_amps: f32| {
        with_relays(|r| r.open());
        SMPS_PWM.stop();
    };

    let mut monitor = CurrentMonitor::new(sampler, alarm, sensor, &CURRENT);
    // 起動直後は出力OFFなので無負荷のゼロ点を学習できる。
    // 失敗時は既定のゼロ点で監視を続け、パネルは出力ONを拒否する
    if let Err(e) = monitor.calibrate_zero() {
        error!("Calibration failed: {}, output locked", e.message());
    }
    monitor.run()
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    info!("═══════════════════════════════════════════");
    info!("    SMPS controller v{}", env!("CARGO_PKG_VERSION"));
    info!("    single-slice PWM • current limit • RP2040");
    info!("═══════════════════════════════════════════");

    SMPS_PWM.init();
    interrupt::PWM_IRQ_WRAP.set_priority(Priority::P1);
    unsafe { interrupt::PWM_IRQ_WRAP.enable() };

    // リレー（GPIO18, GPIO19）は起動時OFF
    let relays = Relays::new(Output::new(p.PIN_18, Level::Low), Output::new(p.PIN_19, Level::Low));
    RELAYS.lock(|cell| *cell.borrow_mut() = Some(relays));

    // EEPROM（I2C1: GPIO10=SDA, GPIO11=SCL）から設定を読み込み
    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = I2C_FREQUENCY;
    let i2c = I2c::new_blocking(p.I2C1, p.PIN_11, p.PIN_10, i2c_config);
    let mut eeprom = Eeprom24::new(i2c, Delay);
    info!("Loading configuration from EEPROM...");
    let device_config = load_or_default(&mut eeprom);

    let sensor = CurrentSensor::default();
    let panel = SettingsPanel::new(&SMPS_PWM, &CURRENT, device_config, sensor.max_amps());
    info!("Current limit: {} A", CURRENT.limit());

    // 電流センサー（GPIO26）はCore1で常時サンプリング
    let adc = Adc::new_blocking(p.ADC, adc::Config::default());
    let channel = Channel::new_pin(p.PIN_26, Pull::None);
    spawn_core1(p.CORE1, CORE1_STACK.init(Stack::new()), move || {
        current_monitor(adc, channel, sensor)
    });

    // ボタン（押すとLow）: ON=GPIO12, DOWN=GPIO13, MODE=GPIO16, UP=GPIO17
    let buttons = Buttons {
        on: Input::new(p.PIN_12, Pull::Up),
        down: Input::new(p.PIN_13, Pull::Up),
        mode: Input::new(p.PIN_16, Pull::Up),
        up: Input::new(p.PIN_17, Pull::Up),
    };
    spawner.spawn(panel_task(buttons, panel, eeprom).unwrap());

    // ハードウェア電流リミッターの動作出力（GPIO3）
    let limiter = Input::new(p.PIN_3, Pull::Down);
    spawner.spawn(limiter_task(limiter).unwrap());
    info!("Limiter input on GPIO{}", LIMITER_GPIO);

    // LED（GPIO25）とブザー（GPIO14 = PWMスライス7 A）
    let led = Output::new(p.PIN_25, Level::Low);
    let buzzer = Buzzer::new(Pwm::new_output_a(p.PWM_SLICE7, p.PIN_14, pwm::Config::default()), BUZZER_HZ);
    spawner.spawn(status_task(led, buzzer).unwrap());

    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}
