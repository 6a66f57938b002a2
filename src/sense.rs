//! センス信号による周期境界
//!
//! LCタンクの電流が一周して止まる瞬間（センス信号の立ち下がり）を
//! 周期境界として扱います。N回のエッジごとにPWMカウンタを先頭に戻し、
//! キャプチャシーケンサーへ境界を通知します。
//!
//! 有効化直後の数エッジの間隔から発振周波数も測ります。

use core::cell::RefCell;

use critical_section::Mutex;

use crate::fmt::*;
use crate::pwm_driver::{PeriodListener, PwmDriver, PwmSlices};

/// 周波数測定に使うエッジ数
pub const MEASURE_EDGES: usize = 10;

/// 1周期あたりのエッジ数（デフォルト値）
pub const DEFAULT_EDGES_PER_PERIOD: u8 = 2;

struct State {
    enabled: bool,
    edges: u8,
    measures: [u64; MEASURE_EDGES],
    measured: usize,
}

/// センス信号のエッジを周期境界に変換する
///
/// PWM起動時にリスナーとして渡すと、ラップ割り込みを使わずに
/// 停止通知だけを `listener` へ中継します。
pub struct SenseTrigger<'a, 'p, H> {
    pwm: &'a PwmDriver<'p, H>,
    listener: &'a (dyn PeriodListener + Sync),
    edges_per_period: u8,
    state: Mutex<RefCell<State>>,
}

impl<'a, 'p, H: PwmSlices> SenseTrigger<'a, 'p, H> {
    /// # 引数
    /// * `pwm` - カウンタを同期させるPWMドライバー
    /// * `listener` - 境界の通知先
    /// * `edges_per_period` - 境界1回あたりのエッジ数（0は1扱い）
    pub const fn new(
        pwm: &'a PwmDriver<'p, H>,
        listener: &'a (dyn PeriodListener + Sync),
        edges_per_period: u8,
    ) -> Self {
        Self {
            pwm,
            listener,
            edges_per_period: if edges_per_period == 0 { 1 } else { edges_per_period },
            state: Mutex::new(RefCell::new(State {
                enabled: false,
                edges: 0,
                measures: [0; MEASURE_EDGES],
                measured: 0,
            })),
        }
    }

    pub fn edges_per_period(&self) -> u8 {
        self.edges_per_period
    }

    /// エッジの受け付けを開始/停止（開始時に周波数測定をやり直す）
    pub fn enable(&self, enabled: bool) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
            state.edges = 0;
            if enabled {
                state.measured = 0;
            }
        });
        debug!("Sense trigger enabled: {}", enabled);
    }

    pub fn is_enabled(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).enabled)
    }

    /// 立ち下がりエッジ割り込みから呼ぶ
    ///
    /// # Returns
    /// 周期境界を通知した場合true
    pub fn on_edge(&self, now_us: u64) -> bool {
        let boundary = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if !state.enabled {
                return false;
            }

            if state.measured < MEASURE_EDGES {
                let i = state.measured;
                state.measures[i] = now_us;
                state.measured += 1;
            }

            state.edges += 1;
            if state.edges >= self.edges_per_period {
                state.edges = 0;
                true
            } else {
                false
            }
        });

        if boundary {
            self.pwm.reset_counter();
            self.listener.on_period_end();
        }
        boundary
    }

    /// 測定したエッジ間隔のうち最長のものから求めた周波数 [Hz]
    pub fn wave_hz(&self) -> Option<u32> {
        let (measures, measured) = critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            (state.measures, state.measured)
        });
        if measured < 2 {
            return None;
        }

        let longest = measures[..measured]
            .windows(2)
            .map(|pair| pair[1].wrapping_sub(pair[0]))
            .max()
            .unwrap_or(0);
        if longest == 0 {
            return None;
        }
        Some((1_000_000 / longest) as u32)
    }
}

impl<H: PwmSlices> PeriodListener for SenseTrigger<'_, '_, H> {
    /// 境界はエッジから作るのでラップでは何もしない
    fn on_period_end(&self) {}

    fn on_stop(&self) {
        self.listener.on_stop();
    }

    fn wrap_driven(&self) -> bool {
        false
    }
}
