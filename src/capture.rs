//! PWM周期同期ADCキャプチャ
//!
//! ADCをDMAで連続変換させ、PWMの周期境界ごとにDMAの書き込み位置を
//! 記録します。最初と最後の周期はサンプル数が安定しないため、
//! 複数周期を走らせてから最も長い区間を採用します。
//!
//! ## シーケンス（周期境界1回につき1ステップ）
//! ```text
//! Idle --arm--> Armed
//! Armed        --> ADC開始,           Recording(0)
//! Recording(i) --> 書き込み位置を記録, Recording(i+1) | Settling(0) | Stopping
//! Settling(k)  --> 待機,              Settling(k+1) | Stopping
//! Stopping     --> ADC停止,           Idle
//! ```

use core::cell::Cell;

use critical_section::Mutex;
use embassy_time::Duration;

use crate::config::params::adc as params;
use crate::error::{Error, Result};
use crate::fmt::*;
use crate::pwm_driver::PeriodListener;

/// スナップショットの最大数
pub const MAX_SNAPSHOTS: usize = 3;

/// ADC入力チャネル（0,1,2 → GPIO26,27,28）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcChannel(u8);

impl AdcChannel {
    pub fn new(index: u32) -> Result<Self> {
        if index < u32::from(params::CHANNEL_COUNT) {
            Ok(Self(index as u8))
        } else {
            Err(Error::InvalidParameter("channel"))
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// 対応するGPIO番号
    pub fn gpio(self) -> u8 {
        params::FIRST_ADC_GPIO + self.0
    }
}

/// ADCとDMAによるストリーミング変換
///
/// 周期境界の割り込みとメインループの両方から呼ばれるため `&self` で操作します。
pub trait AdcFrontEnd {
    fn select_channel(&self, channel: AdcChannel);

    /// 変換結果を `buffer` の先頭から書き込む転送を準備する
    ///
    /// 転送はバッファ長に達するか `release` で止まる。
    /// 呼び出し側は `release` するまでバッファを使わないこと。
    fn arm_transfer(&self, buffer: &mut [u8]);

    /// 連続変換の開始/停止
    fn run(&self, enabled: bool);

    /// 現在の書き込み位置（バッファ先頭からのバイト数）
    fn write_cursor(&self) -> usize;

    /// FIFOに残った読まれていないサンプルを捨てる
    fn drain(&self);

    /// 転送を止めてDMAチャネルを解放する
    fn release(&self);
}

/// 待ち合わせ用の時刻源
pub trait Clock {
    fn now_us(&self) -> u64;

    fn delay_us(&self, us: u64);

    /// ビジーウェイト1回分
    fn relax(&self) {}
}

/// キャプチャ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureState {
    Idle,
    Armed,
    Recording(u8),
    Settling(u8),
    Stopping,
}

/// シーケンサー設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerConfig {
    /// 記録するスナップショット数（1-3）
    pub snapshots: u8,
    /// 最後のスナップショット後に待つ周期数
    pub settle_periods: u8,
    /// 周期境界が来ない場合のタイムアウト
    pub deadline: Duration,
    /// タイムアウト後に自前で境界を進める間隔
    pub synthetic_period: Duration,
}

impl SequencerConfig {
    pub const fn default() -> Self {
        Self {
            snapshots: params::DEFAULT_SNAPSHOTS,
            settle_periods: params::DEFAULT_SETTLE_PERIODS,
            deadline: Duration::from_millis(params::DEADLINE_MS),
            synthetic_period: Duration::from_micros(params::SYNTHETIC_PERIOD_US),
        }
    }

    /// Idleに戻るまでに必要な周期境界の数
    pub const fn boundaries(&self) -> usize {
        2 + self.snapshots as usize + self.settle_periods as usize
    }
}

#[derive(Clone, Copy)]
struct Progress {
    state: CaptureState,
    snapshots: [usize; MAX_SNAPSHOTS],
    recorded: usize,
}

impl Progress {
    const IDLE: Self = Self {
        state: CaptureState::Idle,
        snapshots: [0; MAX_SNAPSHOTS],
        recorded: 0,
    };
}

/// キャプチャシーケンサー
pub struct CaptureSequencer {
    config: SequencerConfig,
    progress: Mutex<Cell<Progress>>,
}

impl CaptureSequencer {
    pub const fn new(config: SequencerConfig) -> Self {
        let mut config = config;
        if config.snapshots == 0 {
            config.snapshots = 1;
        } else if config.snapshots as usize > MAX_SNAPSHOTS {
            config.snapshots = MAX_SNAPSHOTS as u8;
        }

        Self {
            config,
            progress: Mutex::new(Cell::new(Progress::IDLE)),
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        critical_section::with(|cs| self.progress.borrow(cs).get().state)
    }

    /// 記録済みのスナップショット
    pub fn snapshots(&self) -> ([usize; MAX_SNAPSHOTS], usize) {
        critical_section::with(|cs| {
            let progress = self.progress.borrow(cs).get();
            (progress.snapshots, progress.recorded)
        })
    }

    /// 次の周期境界からキャプチャを始める
    pub fn arm(&self) -> Result<()> {
        critical_section::with(|cs| {
            let cell = self.progress.borrow(cs);
            if cell.get().state != CaptureState::Idle {
                return Err(Error::Busy);
            }
            cell.set(Progress {
                state: CaptureState::Armed,
                ..Progress::IDLE
            });
            Ok(())
        })
    }

    /// 周期境界で1ステップ進める
    pub fn on_period_end<A: AdcFrontEnd + ?Sized>(&self, adc: &A) {
        critical_section::with(|cs| {
            let cell = self.progress.borrow(cs);
            let mut progress = cell.get();
            let next = self.advance(&mut progress, adc);
            progress.state = next;
            cell.set(progress);
        });
    }

    fn advance<A: AdcFrontEnd + ?Sized>(&self, progress: &mut Progress, adc: &A) -> CaptureState {
        match progress.state {
            CaptureState::Idle => CaptureState::Idle,
            CaptureState::Armed => {
                adc.run(true);
                CaptureState::Recording(0)
            }
            CaptureState::Recording(i) => {
                progress.snapshots[usize::from(i)] = adc.write_cursor();
                progress.recorded = usize::from(i) + 1;
                if i + 1 < self.config.snapshots {
                    CaptureState::Recording(i + 1)
                } else if self.config.settle_periods > 0 {
                    CaptureState::Settling(0)
                } else {
                    CaptureState::Stopping
                }
            }
            CaptureState::Settling(k) => {
                if k + 1 < self.config.settle_periods {
                    CaptureState::Settling(k + 1)
                } else {
                    CaptureState::Stopping
                }
            }
            CaptureState::Stopping => {
                adc.run(false);
                CaptureState::Idle
            }
        }
    }

    /// キャプチャを中断してIdleに戻す（記録済みのスナップショットは残す）
    pub fn abort<A: AdcFrontEnd + ?Sized>(&self, adc: &A) {
        let aborted = critical_section::with(|cs| {
            let cell = self.progress.borrow(cs);
            let mut progress = cell.get();
            if progress.state == CaptureState::Idle {
                return false;
            }
            adc.run(false);
            progress.state = CaptureState::Idle;
            cell.set(progress);
            true
        });

        if aborted {
            warn!("Capture aborted");
        }
    }

    /// 1周期分のサンプルを取得
    ///
    /// シーケンサーがIdleに戻るまでビジーウェイトし、記録した区間のうち
    /// 最も長いものをバッファ先頭へ移動してそのサンプル数を返します。
    /// 周期境界が `deadline` 以内に来ない場合は `synthetic_period` ごとに
    /// 自前で境界を進めるため、呼び出し側が止まり続けることはありません。
    ///
    /// # 引数
    /// * `adc` - ADCフロントエンド
    /// * `clock` - 時刻源
    /// * `channel` - ADCチャネル
    /// * `buffer` - キャプチャバッファ
    pub fn measure_period<A, C>(
        &self,
        adc: &A,
        clock: &C,
        channel: AdcChannel,
        buffer: &mut [u8],
    ) -> Result<usize>
    where
        A: AdcFrontEnd + ?Sized,
        C: Clock + ?Sized,
    {
        if self.state() != CaptureState::Idle {
            return Err(Error::Busy);
        }

        adc.select_channel(channel);
        adc.arm_transfer(buffer);
        if let Err(e) = self.arm() {
            adc.release();
            return Err(e);
        }

        let deadline_us = self.config.deadline.as_micros();
        let synthetic_us = self.config.synthetic_period.as_micros();
        let started = clock.now_us();
        let mut synthetic = false;

        while self.state() != CaptureState::Idle {
            if clock.now_us().wrapping_sub(started) > deadline_us {
                if !synthetic {
                    warn!("No PWM period boundary within {} us, advancing capture", deadline_us);
                    synthetic = true;
                }
                clock.delay_us(synthetic_us);
                self.on_period_end(adc);
            } else {
                clock.relax();
            }
        }

        adc.drain();
        adc.release();

        let (snapshots, recorded) = self.snapshots();
        let (start, len) = best_interval(&snapshots[..recorded]);
        let end = (start + len).min(buffer.len());
        let len = end.saturating_sub(start);
        if start > 0 && len > 0 {
            buffer.copy_within(start..end, 0);
        }

        trace!("Capture on channel {}: {} samples from offset {}", channel.index(), len, start);
        Ok(len)
    }
}

/// 記録位置の列から最も長い区間 `(開始位置, 長さ)` を選ぶ
///
/// 区間は `[0, s0)`, `[s0, s1)`, `[s1, s2)`。同じ長さなら先の区間を優先。
pub fn best_interval(snapshots: &[usize]) -> (usize, usize) {
    let mut best = (0, 0);
    let mut previous = 0;
    for &snapshot in snapshots {
        let len = snapshot.saturating_sub(previous);
        if len > best.1 {
            best = (previous, len);
        }
        previous = snapshot;
    }
    best
}

/// PWMのラップ割り込みをシーケンサーへつなぐ
pub struct CaptureHook<'a, A: ?Sized> {
    sequencer: &'a CaptureSequencer,
    adc: &'a A,
}

impl<'a, A: AdcFrontEnd + ?Sized> CaptureHook<'a, A> {
    pub const fn new(sequencer: &'a CaptureSequencer, adc: &'a A) -> Self {
        Self { sequencer, adc }
    }
}

impl<'a, A: AdcFrontEnd + ?Sized> PeriodListener for CaptureHook<'a, A> {
    fn on_period_end(&self) {
        self.sequencer.on_period_end(self.adc);
    }

    fn on_stop(&self) {
        self.sequencer.abort(self.adc);
    }
}
