//! PWMタイミング計算
//!
//! 目標周波数から16ビットカウンタのTOP値とクロック分周比を求め、
//! デューティ比からコンペア値を計算します。ハードウェアには触れません。
//!
//! ## カウンタの約束事
//! - カウンタは 0..=top を数えるので1周期は top+1 クロック
//! - 両エッジ（位相補正）モードでは上昇と下降で1周期に2回TOPに達する
//! - Aチャネルはそのまま、Bチャネルは反転出力（ハイサイド/ローサイド）

use crate::config::params::MAX_DEAD_TIME_CYCLES;
use crate::error::{Error, Result};

/// TOP値の上限（16ビットカウンタ）
pub const MAX_TOP: u16 = 0xFFFF;

/// 分周比の上限（8.4固定小数点の整数部、0は256扱い）
pub const MAX_DIVIDER: u16 = 256;

/// TOP値と分周比の組
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TopDivider {
    pub top: u16,
    pub divider: u16,
}

/// 目標周波数に対するTOP値と分周比を選択
///
/// 分周比を1から順に試し、TOPが16ビットに収まる最小の分周比を選びます
/// （分解能が最大になる）。256でも収まらない場合は最低周波数
/// `(0xFFFF, 256)` に張り付きます。
///
/// # Arguments
/// * `clock_hz` - カウンタの入力クロック [Hz]
/// * `periods_per_second` - 目標周波数 [Hz]（0は最低周波数扱い）
/// * `dual_slope` - 両エッジカウントモード
pub fn choose_top_and_divider(
    clock_hz: u32,
    periods_per_second: u32,
    dual_slope: bool,
) -> TopDivider {
    let slopes = if dual_slope { 2 } else { 1 };
    let tops_per_second = u64::from(periods_per_second) * slopes;

    if tops_per_second > 0 {
        for divider in 1..=MAX_DIVIDER {
            // RP2040データシートに従い1クロック引く
            let top = (u64::from(clock_hz) / (u64::from(divider) * tops_per_second)).saturating_sub(1);
            if top <= u64::from(MAX_TOP) {
                return TopDivider {
                    top: top as u16,
                    divider,
                };
            }
        }
    }

    TopDivider {
        top: MAX_TOP,
        divider: MAX_DIVIDER,
    }
}

/// デューティ比に対するコンペア値
///
/// 反転出力用の値は非反転値の補数 `top - level` です。
pub fn compute_match_level(top: u16, duty_percent: f32, inverted: bool) -> u16 {
    let duty = duty_percent.clamp(0.0, 100.0);
    let level = (f32::from(top) * duty / 100.0) as u16;
    if inverted {
        top - level.min(top)
    } else {
        level
    }
}

/// ハイサイドのコンペア値をデッドタイム分だけ早める（負にはならない）
pub fn apply_dead_time(level: u16, dead_time_cycles: u16) -> u16 {
    level.saturating_sub(dead_time_cycles)
}

/// 波形設定
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WaveformConfig {
    /// 周波数 [Hz]
    pub frequency_hz: u32,
    /// デューティ比 [%]（0-100）
    pub duty_percent: f32,
    /// 両エッジカウントモード
    pub dual_slope: bool,
    /// デッドタイム [クロック]
    pub dead_time_cycles: u16,
    /// 1スライスのみ駆動（プッシュプルの右側を使わない）
    pub one_sided: bool,
}

impl WaveformConfig {
    pub const fn new(frequency_hz: u32, duty_percent: f32) -> Self {
        Self {
            frequency_hz,
            duty_percent,
            dual_slope: false,
            dead_time_cycles: 0,
            one_sided: false,
        }
    }

    pub const fn with_dual_slope(mut self, dual_slope: bool) -> Self {
        self.dual_slope = dual_slope;
        self
    }

    pub const fn with_dead_time(mut self, dead_time_cycles: u16) -> Self {
        self.dead_time_cycles = dead_time_cycles;
        self
    }

    pub const fn with_one_sided(mut self, one_sided: bool) -> Self {
        self.one_sided = one_sided;
        self
    }

    /// パラメータ範囲を検証
    pub fn validate(&self) -> Result<()> {
        if self.frequency_hz == 0 {
            return Err(Error::InvalidParameter("hz"));
        }
        // NaNもここで弾かれる
        if !(0.0..=100.0).contains(&self.duty_percent) {
            return Err(Error::InvalidParameter("duty"));
        }
        if self.dead_time_cycles > MAX_DEAD_TIME_CYCLES {
            return Err(Error::InvalidParameter("dead time"));
        }
        Ok(())
    }
}

/// スライスに書き込むタイミング値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmTiming {
    /// TOP値（周期 = top+1 クロック）
    pub top: u16,
    /// 分周比（1-256）
    pub divider: u16,
    /// Aチャネル（ハイサイド）のコンペア値、デッドタイム適用済み
    pub match_high: u16,
    /// Bチャネル（反転ローサイド）のコンペア値
    pub match_low: u16,
}

impl PwmTiming {
    /// 停止状態の値
    pub const IDLE: Self = Self {
        top: MAX_TOP,
        divider: 1,
        match_high: 0,
        match_low: 0,
    };

    /// 波形設定からタイミングを計算
    pub fn compute(clock_hz: u32, config: &WaveformConfig) -> Self {
        let TopDivider { top, divider } =
            choose_top_and_divider(clock_hz, config.frequency_hz, config.dual_slope);
        let match_low = compute_match_level(top, config.duty_percent, false);
        let match_high = apply_dead_time(match_low, config.dead_time_cycles);

        Self {
            top,
            divider,
            match_high,
            match_low,
        }
    }

    /// 実際の出力周波数 [Hz]
    pub fn frequency_hz(&self, clock_hz: u32, dual_slope: bool) -> f32 {
        let slopes = if dual_slope { 2.0 } else { 1.0 };
        clock_hz as f32 / (f32::from(self.divider) * (f32::from(self.top) + 1.0) * slopes)
    }
}
