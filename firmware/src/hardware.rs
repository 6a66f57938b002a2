//! RP2040ハードウェア実装
//!
//! ライブラリ側のハードウェアトレイトをPACの直接レジスタ操作で実装します。
//!
//! ## 資源の割り当て
//! - PWMスライスnの出力: GPIO 2n (A), GPIO 2n+1 (B)
//! - ADCキャプチャ: DMAチャネル0（ADC FIFOのDREQで1バイトずつ転送）
//! - 時計: embassy-timeの1MHzタイムベース

use core::sync::atomic::{compiler_fence, AtomicU32, Ordering};

use embassy_rp::gpio::Output;
use embassy_rp::pac;
use embassy_rp::pac::dma::vals::{DataSize, TreqSel};
use embassy_rp::pwm::{self, Pwm};
use embassy_time::{Duration, Instant};
use pico_machine::capture::{AdcChannel, AdcFrontEnd, Clock};
use pico_machine::config::params::SYS_CLOCK_HZ;
use pico_machine::pwm_driver::PwmSlices;
use pico_machine::waveform::PwmTiming;

use crate::fmt::*;

/// IO_BANK0のファンクション番号
const FUNCSEL_PWM: u8 = 4;
const FUNCSEL_SIO: u8 = 5;

/// ユーザーGPIO数（GPIO0-29）
const GPIO_COUNT: usize = 30;

/// キャプチャに使うDMAチャネル
const CAPTURE_DMA_CH: usize = 0;

/// PWMスライスのレジスタ操作
#[derive(Debug, Clone, Copy, Default)]
pub struct RpSlices;

impl RpSlices {
    /// スライスのA/B出力ピン
    const fn pins(slice: u8) -> [usize; 2] {
        let a = slice as usize * 2;
        [a, a + 1]
    }

    fn set_function(slice: u8, funcsel: u8) {
        for pin in Self::pins(slice) {
            pac::IO_BANK0.gpio(pin).ctrl().write(|w| w.set_funcsel(funcsel));
        }
    }

    fn write_timing(slice: u8, timing: &PwmTiming) {
        let ch = pac::PWM.ch(slice as usize);
        // 整数部0は256分周
        ch.div().write(|w| {
            w.set_int(timing.divider as u8);
            w.set_frac(0);
        });
        ch.top().write(|w| w.set_top(timing.top));
        ch.cc().write(|w| {
            w.set_a(timing.match_high);
            w.set_b(timing.match_low);
        });
    }
}

impl PwmSlices for RpSlices {
    fn configure(&mut self, slice: u8, timing: &PwmTiming, dual_slope: bool) {
        let ch = pac::PWM.ch(slice as usize);
        ch.csr().write(|w| {
            w.set_en(false);
            w.set_ph_correct(dual_slope);
            w.set_a_inv(false);
            w.set_b_inv(true);
        });
        Self::write_timing(slice, timing);
        Self::set_function(slice, FUNCSEL_PWM);
    }

    fn retime(&mut self, slice: u8, timing: &PwmTiming) {
        Self::write_timing(slice, timing);
    }

    fn set_counter(&mut self, slice: u8, value: u16) {
        pac::PWM.ch(slice as usize).ctr().write(|w| w.set_ctr(value));
    }

    fn counter(&self, slice: u8) -> u16 {
        pac::PWM.ch(slice as usize).ctr().read().ctr()
    }

    fn enable(&mut self, mask: u32) {
        // ENレジスタのエイリアスで複数スライスを同時に起動
        pac::PWM.en().write_set(|w| w.0 = mask);
    }

    fn disable(&mut self, mask: u32) {
        pac::PWM.en().write_clear(|w| w.0 = mask);
    }

    fn set_wrap_irq(&mut self, slice: u8, enabled: bool) {
        let bit = 1u32 << slice;
        pac::PWM.intr().write(|w| w.0 = bit);
        if enabled {
            pac::PWM.inte().write_set(|w| w.0 = bit);
        } else {
            pac::PWM.inte().write_clear(|w| w.0 = bit);
        }
    }

    fn park_low(&mut self, slice: u8) {
        for pin in Self::pins(slice) {
            let bit = 1u32 << pin;
            pac::SIO.gpio_out(0).value_clr().write_value(bit);
            pac::SIO.gpio_oe(0).value_set().write_value(bit);
        }
        Self::set_function(slice, FUNCSEL_SIO);
    }
}

/// 全PWMスライスを止め、PWM機能のピンと `pins` をLowに固定
///
/// ロックを取らずにレジスタだけを操作するのでパニックハンドラから呼べる。
pub fn force_outputs_low(pins: &[usize]) {
    pac::PWM.en().write(|w| w.0 = 0);

    for pin in 0..GPIO_COUNT {
        if pac::IO_BANK0.gpio(pin).ctrl().read().funcsel() != FUNCSEL_PWM {
            continue;
        }
        let bit = 1u32 << pin;
        pac::SIO.gpio_out(0).value_clr().write_value(bit);
        pac::SIO.gpio_oe(0).value_set().write_value(bit);
        pac::IO_BANK0.gpio(pin).ctrl().write(|w| w.set_funcsel(FUNCSEL_SIO));
    }
    for &pin in pins {
        pac::SIO.gpio_out(0).value_clr().write_value(1u32 << pin);
    }
}

/// 保留中のラップ割り込みを読み出してクリア
///
/// `PWM_IRQ_WRAP` ハンドラの先頭で呼ぶ
pub fn take_wrap_irqs() -> u32 {
    let pending = pac::PWM.ints().read().0;
    pac::PWM.intr().write(|w| w.0 = pending);
    pending
}

/// ADCフリーランとDMAによる波形キャプチャ
///
/// ADCは `embassy_rp::adc::Adc` で有効化されていること（リセット解除と
/// キャリブレーション待ちはembassy側で行う）。
pub struct RpAdcCapture {
    base: AtomicU32,
    len: AtomicU32,
}

impl RpAdcCapture {
    pub const fn new() -> Self {
        Self {
            base: AtomicU32::new(0),
            len: AtomicU32::new(0),
        }
    }

    /// FIFOを8ビット・DREQ有効にし、最高速（500ksps）のフリーランに設定
    pub fn init(&self) {
        pac::ADC.fcs().write(|w| {
            w.set_en(true);
            w.set_dreq_en(true);
            w.set_thresh(1);
            w.set_err(false);
            w.set_shift(true);
        });
        pac::ADC.div().write(|w| {
            w.set_int(0);
            w.set_frac(0);
        });
        self.drain();
        info!("ADC capture ready (DMA ch{})", CAPTURE_DMA_CH);
    }

    fn abort_dma(&self) {
        pac::DMA.chan_abort().write(|w| w.set_chan_abort(1 << CAPTURE_DMA_CH));
        while pac::DMA.ch(CAPTURE_DMA_CH).ctrl_trig().read().busy() {}
    }
}

impl Default for RpAdcCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcFrontEnd for RpAdcCapture {
    fn select_channel(&self, channel: AdcChannel) {
        pac::ADC.cs().modify(|w| w.set_ainsel(channel.index()));
    }

    fn arm_transfer(&self, buffer: &mut [u8]) {
        self.abort_dma();

        let base = buffer.as_mut_ptr() as u32;
        self.base.store(base, Ordering::Relaxed);
        self.len.store(buffer.len() as u32, Ordering::Relaxed);

        let ch = pac::DMA.ch(CAPTURE_DMA_CH);
        ch.read_addr().write_value(pac::ADC.fifo().as_ptr() as u32);
        ch.write_addr().write_value(base);
        ch.trans_count().write_value(buffer.len() as u32);
        compiler_fence(Ordering::SeqCst);
        ch.ctrl_trig().write(|w| {
            w.set_treq_sel(TreqSel::ADC);
            w.set_data_size(DataSize::SIZE_BYTE);
            w.set_incr_read(false);
            w.set_incr_write(true);
            w.set_chain_to(CAPTURE_DMA_CH as u8);
            w.set_irq_quiet(true);
            w.set_en(true);
        });
    }

    fn run(&self, enabled: bool) {
        pac::ADC.cs().modify(|w| w.set_start_many(enabled));
    }

    fn write_cursor(&self) -> usize {
        let base = self.base.load(Ordering::Relaxed);
        let written = pac::DMA.ch(CAPTURE_DMA_CH).write_addr().read().wrapping_sub(base);
        written.min(self.len.load(Ordering::Relaxed)) as usize
    }

    fn drain(&self) {
        while !pac::ADC.fcs().read().empty() {
            let _ = pac::ADC.fifo().read();
        }
    }

    fn release(&self) {
        self.run(false);
        self.abort_dma();
        compiler_fence(Ordering::SeqCst);
        self.len.store(0, Ordering::Relaxed);
    }
}

/// embassy-timeの時計
#[derive(Debug, Clone, Copy, Default)]
pub struct RpClock;

impl Clock for RpClock {
    fn now_us(&self) -> u64 {
        Instant::now().as_micros()
    }

    fn delay_us(&self, us: u64) {
        embassy_time::block_for(Duration::from_micros(us));
    }

    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// 出力リレー（2段階でONにする）
pub struct Relays {
    first: Output<'static>,
    second: Output<'static>,
}

impl Relays {
    pub fn new(first: Output<'static>, second: Output<'static>) -> Self {
        let mut relays = Self { first, second };
        relays.open();
        relays
    }

    pub fn close_first(&mut self) {
        self.first.set_high();
    }

    pub fn close_second(&mut self) {
        self.second.set_high();
    }

    /// 両方OFF
    pub fn open(&mut self) {
        self.second.set_low();
        self.first.set_low();
    }
}

/// 警告ブザー（PWMの50%矩形波）
pub struct Buzzer {
    pwm: Pwm<'static>,
    config: pwm::Config,
    on: bool,
}

impl Buzzer {
    /// # Arguments
    /// * `pwm` - Aチャネルにブザーを接続したスライス
    /// * `frequency_hz` - 鳴らす周波数
    pub fn new(pwm: Pwm<'static>, frequency_hz: u32) -> Self {
        let mut config = pwm::Config::default();
        let top = (SYS_CLOCK_HZ / frequency_hz).clamp(2, 0x1_0000) - 1;
        config.top = top as u16;
        config.compare_a = (top / 2) as u16;
        config.enable = false;

        let mut buzzer = Self { pwm, config, on: true };
        buzzer.set(false);
        buzzer
    }

    pub fn set(&mut self, on: bool) {
        if self.on == on {
            return;
        }
        self.on = on;
        self.config.enable = on;
        self.pwm.set_config(&self.config);
    }
}
