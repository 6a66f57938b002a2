#![no_std]
#![no_main]

#[path = "../fmt.rs"]
mod fmt;

// パニックハンドラは pico_machine_firmware::panic（出力を止めてから停止）
#[cfg(feature = "defmt-rtt")]
use defmt_rtt as _;

#[cfg(feature = "sense")]
use embassy_executor::InterruptExecutor;
use embassy_executor::Spawner;
use embassy_rp::adc::{self, Adc, Channel};
use embassy_rp::gpio::{Level, Output, Pull};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::uart::{self, BufferedUart};
use embassy_rp::{bind_interrupts, peripherals};
use embassy_time::{Duration, Timer};
use pico_machine::machine::{Machine, PROGRAM_NAME};
use pico_machine::pwm_driver::PeriodListener;
use pico_machine_firmware::config;
use pico_machine_firmware::hardware;
use pico_machine_firmware::state::{ADC_CAPTURE, CLOCK, MACHINE_PWM, SEQUENCER};
use pico_machine_firmware::tasks::{command_task, led_task};
use static_cell::StaticCell;

use fmt::*;

bind_interrupts!(struct Irqs {
    UART0_IRQ => uart::BufferedInterruptHandler<peripherals::UART0>;
});

static TX_BUF: StaticCell<[u8; config::uart::TX_BUFFER_SIZE]> = StaticCell::new();
static RX_BUF: StaticCell<[u8; config::uart::RX_BUFFER_SIZE]> = StaticCell::new();

/// PWMラップ割り込み（周期境界）
#[interrupt]
fn PWM_IRQ_WRAP() {
    hardware::take_wrap_irqs();
    MACHINE_PWM.on_period_end();
}

/// センスタスク用の割り込みエグゼキュータ
///
/// キャプチャ中のコマンドタスクはスレッドモードで待ち続けるので、
/// エッジ処理はそれより優先度の高いここで動かす。
#[cfg(feature = "sense")]
static SENSE_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[cfg(feature = "sense")]
#[interrupt]
unsafe fn SWI_IRQ_0() {
    SENSE_EXECUTOR.on_interrupt()
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    info!("═══════════════════════════════════════════");
    info!("    {} v{}", PROGRAM_NAME, env!("CARGO_PKG_VERSION"));
    info!("    PWM-synchronized ADC capture • RP2040");
    info!("═══════════════════════════════════════════");

    // PWM出力をLowに固定してから割り込みを有効化
    MACHINE_PWM.init();
    interrupt::PWM_IRQ_WRAP.set_priority(Priority::P1);
    unsafe { interrupt::PWM_IRQ_WRAP.enable() };

    // ADC（GPIO26-28をアナログ入力に）とキャプチャ用DMA
    let _adc = Adc::new_blocking(p.ADC, adc::Config::default());
    let _inputs = [
        Channel::new_pin(p.PIN_26, Pull::None),
        Channel::new_pin(p.PIN_27, Pull::None),
        Channel::new_pin(p.PIN_28, Pull::None),
    ];
    let _capture_dma = p.DMA_CH0;
    ADC_CAPTURE.init();

    // センス信号を使う場合はラップ割り込みでなくエッジで境界を作る。
    // SENSEをリスナーにしてSTOPでのキャプチャ中断を受け取る
    #[cfg(feature = "sense")]
    let listener: Option<&'static (dyn PeriodListener + Sync)> = {
        let sense = embassy_rp::gpio::Input::new(p.PIN_4, Pull::None);
        interrupt::SWI_IRQ_0.set_priority(config::machine::SENSE_PRIORITY);
        let sense_spawner = SENSE_EXECUTOR.start(interrupt::SWI_IRQ_0);
        sense_spawner.spawn(pico_machine_firmware::tasks::sense_task(sense).unwrap());
        info!("Period boundaries from sense input GPIO{}", config::machine::SENSE_GPIO);
        Some(&pico_machine_firmware::state::SENSE)
    };
    #[cfg(not(feature = "sense"))]
    let listener: Option<&'static (dyn PeriodListener + Sync)> =
        Some(&pico_machine_firmware::state::CAPTURE_HOOK);

    let machine = Machine::new(&MACHINE_PWM, &SEQUENCER, &ADC_CAPTURE, &CLOCK, listener);

    // UART0: GPIO16=TX, GPIO17=RX
    let mut uart_config = uart::Config::default();
    uart_config.baudrate = config::uart::BAUD_RATE;
    let uart = BufferedUart::new(
        p.UART0,
        p.PIN_16,
        p.PIN_17,
        Irqs,
        TX_BUF.init([0; config::uart::TX_BUFFER_SIZE]),
        RX_BUF.init([0; config::uart::RX_BUFFER_SIZE]),
        uart_config,
    );
    spawner.spawn(command_task(uart, machine).unwrap());
    info!("Command interface on UART0 @ {} bps", config::uart::BAUD_RATE);

    let led = Output::new(p.PIN_25, Level::Low);
    spawner.spawn(led_task(led).unwrap());

    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}
