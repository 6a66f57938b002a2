//! PWMドライバー
//!
//! 1つ（シングル）または2つ（プッシュプル）のPWMスライスを同期して駆動します。
//! 割り込みハンドラとメインループ、Core1のアラームから同じインスタンスを
//! 共有できるよう、状態はクリティカルセクションで保護しています。
//!
//! ## 動作
//! - 起動: 全スライスを設定してから1回のマスク書き込みで同時にイネーブル
//! - プッシュプル: 右側スライスのカウンタを `top` だけずらして起動（逆位相）
//! - 波形変更: 新しい値を保留し、次のラップ割り込みで適用
//! - 停止: 出力をLowに固定（フローティングにしない）、何度呼んでも安全

use core::cell::RefCell;

use critical_section::Mutex;

use crate::error::{Error, Result};
use crate::fmt::*;
use crate::waveform::{PwmTiming, WaveformConfig};

/// PWMスライス数（RP2040）
pub const SLICE_COUNT: u8 = 8;

/// 周期境界（ラップ）通知の受け取り先
pub trait PeriodListener {
    /// 周期境界ごとに割り込みコンテキストから呼ばれる。短時間で戻ること。
    fn on_period_end(&self);

    /// PWM停止時に呼ばれる
    fn on_stop(&self) {}

    /// ラップ割り込みで境界を受け取るか（外部信号で境界を作る場合はfalse）
    fn wrap_driven(&self) -> bool {
        true
    }
}

/// PWMスライスのハードウェア操作
pub trait PwmSlices {
    /// スライスにタイミングを書き込み出力ピンをPWMに切り替える（起動はしない）
    ///
    /// Aチャネルは非反転、Bチャネルは反転出力にする。
    fn configure(&mut self, slice: u8, timing: &PwmTiming, dual_slope: bool);

    /// 動作中のスライスの分周比・TOP・コンペア値を書き換える
    fn retime(&mut self, slice: u8, timing: &PwmTiming);

    fn set_counter(&mut self, slice: u8, value: u16);

    fn counter(&self, slice: u8) -> u16;

    /// マスクで指定したスライスを同時にイネーブル
    fn enable(&mut self, mask: u32);

    fn disable(&mut self, mask: u32);

    fn set_wrap_irq(&mut self, slice: u8, enabled: bool);

    /// 出力ピンをGPIOに戻してLow固定にする
    fn park_low(&mut self, slice: u8);
}

/// スライス構成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmLayout {
    /// 1スライス（A=ハイサイド, B=反転ローサイド）
    Single { slice: u8 },
    /// 2スライスのプッシュプル（左側がラップ割り込みを出す）
    PushPull { left: u8, right: u8 },
}

impl PwmLayout {
    /// ラップ割り込みを出すスライス
    pub const fn lead(&self) -> u8 {
        match *self {
            PwmLayout::Single { slice } => slice,
            PwmLayout::PushPull { left, .. } => left,
        }
    }

    const fn follower(&self) -> Option<u8> {
        match *self {
            PwmLayout::Single { .. } => None,
            PwmLayout::PushPull { right, .. } => Some(right),
        }
    }

    /// 構成に含まれる全スライスのマスク
    pub const fn mask(&self) -> u32 {
        match *self {
            PwmLayout::Single { slice } => 1 << slice,
            PwmLayout::PushPull { left, right } => (1 << left) | (1 << right),
        }
    }
}

struct Inner<'a, H> {
    hw: H,
    running: bool,
    config: WaveformConfig,
    timing: PwmTiming,
    staged: Option<PwmTiming>,
    follower: Option<u8>,
    listener: Option<&'a (dyn PeriodListener + Sync)>,
}

impl<'a, H: PwmSlices> Inner<'a, H> {
    /// 全スライスを停止してLow固定、登録済みリスナーを返す
    fn halt(&mut self, layout: PwmLayout) -> Option<&'a (dyn PeriodListener + Sync)> {
        if !self.running {
            return None;
        }

        self.hw.disable(layout.mask());
        self.hw.set_wrap_irq(layout.lead(), false);
        self.park_all(layout);

        self.running = false;
        self.staged = None;
        self.follower = None;
        self.listener.take()
    }

    fn wrap_driven(&self) -> bool {
        self.listener.is_some_and(|l| l.wrap_driven())
    }

    fn park_all(&mut self, layout: PwmLayout) {
        self.hw.park_low(layout.lead());
        if let Some(right) = layout.follower() {
            self.hw.park_low(right);
        }
    }

    /// 保留中のタイミングを適用（ラップ直後に呼ぶ）
    fn apply(&mut self, lead: u8, next: PwmTiming) {
        let previous = self.timing;
        self.hw.retime(lead, &next);

        if let Some(right) = self.follower {
            self.hw.retime(right, &next);
            // TOPの差分だけ右側をずらして位相関係を保つ
            let shifted = (i32::from(self.hw.counter(right)) + i32::from(next.top)
                - i32::from(previous.top))
            .rem_euclid(i32::from(next.top) + 1);
            self.hw.set_counter(right, shifted as u16);
        }

        self.timing = next;
    }
}

/// PWMドライバー
pub struct PwmDriver<'a, H> {
    layout: PwmLayout,
    clock_hz: u32,
    inner: Mutex<RefCell<Inner<'a, H>>>,
}

impl<'a, H: PwmSlices> PwmDriver<'a, H> {
    /// 新しいPWMドライバーを作成
    ///
    /// # 引数
    /// * `hw` - スライス操作の実装
    /// * `layout` - スライス構成（プッシュプルは異なる2スライスであること）
    /// * `clock_hz` - カウンタの入力クロック [Hz]
    pub const fn new(hw: H, layout: PwmLayout, clock_hz: u32) -> Self {
        match layout {
            PwmLayout::Single { slice } => {
                if slice >= SLICE_COUNT {
                    ::core::panic!("PWM slice out of range");
                }
            }
            PwmLayout::PushPull { left, right } => {
                if left == right {
                    ::core::panic!("push-pull layout needs two distinct slices");
                }
                if left >= SLICE_COUNT || right >= SLICE_COUNT {
                    ::core::panic!("PWM slice out of range");
                }
            }
        }

        Self {
            layout,
            clock_hz,
            inner: Mutex::new(RefCell::new(Inner {
                hw,
                running: false,
                config: WaveformConfig::new(0, 0.0),
                timing: PwmTiming::IDLE,
                staged: None,
                follower: None,
                listener: None,
            })),
        }
    }

    pub fn layout(&self) -> PwmLayout {
        self.layout
    }

    /// 起動前に出力をLowへ固定
    pub fn init(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.park_all(self.layout);
        });
    }

    /// PWMを起動
    ///
    /// 動作中の場合は一度停止してから設定し直します。パラメータが不正な場合は
    /// ハードウェアに触れずにエラーを返します。
    ///
    /// # 引数
    /// * `config` - 波形設定
    /// * `listener` - 周期境界ごとに呼ぶ処理（Noneならラップ割り込みを使わない）
    pub fn start(
        &self,
        config: WaveformConfig,
        listener: Option<&'a (dyn PeriodListener + Sync)>,
    ) -> Result<PwmTiming> {
        config.validate()?;
        let timing = PwmTiming::compute(self.clock_hz, &config);
        let lead = self.layout.lead();
        let follower = if config.one_sided {
            None
        } else {
            self.layout.follower()
        };

        let previous = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let previous = inner.halt(self.layout);

            // すべて設定してから同時に起動する
            let mut mask = 1u32 << lead;
            inner.hw.configure(lead, &timing, config.dual_slope);
            inner.hw.set_counter(lead, 0);
            if let Some(right) = follower {
                inner.hw.configure(right, &timing, config.dual_slope);
                inner.hw.set_counter(right, timing.top);
                mask |= 1 << right;
            }
            if listener.is_some_and(|l| l.wrap_driven()) {
                inner.hw.set_wrap_irq(lead, true);
            }
            inner.hw.enable(mask);

            inner.running = true;
            inner.config = config;
            inner.timing = timing;
            inner.staged = None;
            inner.follower = follower;
            inner.listener = listener;
            previous
        });

        if let Some(listener) = previous {
            listener.on_stop();
        }

        info!(
            "PWM started: {} Hz, duty {}%, top={}, div={}, dead={}",
            config.frequency_hz, config.duty_percent, timing.top, timing.divider, config.dead_time_cycles
        );
        Ok(timing)
    }

    /// 動作中のまま周波数とデューティ比を変更
    ///
    /// 新しい値は次の周期境界で適用されるため、出力が途中で乱れません。
    pub fn change_waveform(&self, frequency_hz: u32, duty_percent: f32) -> Result<PwmTiming> {
        let timing = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if !inner.running {
                return Err(Error::NotRunning);
            }

            let config = WaveformConfig {
                frequency_hz,
                duty_percent,
                ..inner.config
            };
            config.validate()?;

            let timing = PwmTiming::compute(self.clock_hz, &config);
            inner.config = config;
            inner.staged = Some(timing);
            // 適用はラップ割り込みで行う
            inner.hw.set_wrap_irq(self.layout.lead(), true);
            Ok(timing)
        })?;

        debug!(
            "PWM change staged: {} Hz, duty {}%, top={}, div={}",
            frequency_hz, duty_percent, timing.top, timing.divider
        );
        Ok(timing)
    }

    /// PWMを停止して出力をLowに固定（停止中なら何もしない）
    pub fn stop(&self) {
        let (was_running, listener) = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let was_running = inner.running;
            (was_running, inner.halt(self.layout))
        });

        if let Some(listener) = listener {
            listener.on_stop();
        }
        if was_running {
            info!("PWM stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).running)
    }

    /// 現在出力中のタイミング
    pub fn timing(&self) -> Option<PwmTiming> {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            inner.running.then_some(inner.timing)
        })
    }

    /// 最後に要求された波形設定
    pub fn config(&self) -> Option<WaveformConfig> {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            inner.running.then_some(inner.config)
        })
    }

    /// ラップ割り込みハンドラから呼ぶ
    ///
    /// 保留中の波形を適用してからリスナーに通知します。
    pub fn on_period_end(&self) {
        let listener = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if !inner.running {
                return None;
            }

            if let Some(next) = inner.staged.take() {
                let lead = self.layout.lead();
                inner.apply(lead, next);
                if !inner.wrap_driven() {
                    inner.hw.set_wrap_irq(lead, false);
                }
            }
            inner.listener.filter(|l| l.wrap_driven())
        });

        if let Some(listener) = listener {
            listener.on_period_end();
        }
    }

    /// カウンタを周期の先頭に戻す（外部信号で周期を決める場合）
    pub fn reset_counter(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if !inner.running {
                return;
            }
            let top = inner.timing.top;
            inner.hw.set_counter(self.layout.lead(), 0);
            if let Some(right) = inner.follower {
                inner.hw.set_counter(right, top);
            }
        });
    }
}
