//! 4ボタン設定パネル
//!
//! MODEで調整対象（周波数 → デューティ比 → 電流制限）を切り替え、
//! UP/DOWNで値を増減します。ONは出力のON/OFFを切り替えます。
//! 変更はメモリ上に溜め、UP/DOWNを離した時に保存します。

use embedded_storage::Storage;

use crate::config::params::panel as params;
use crate::config::storage::{ConfigStore, DeviceConfig};
use crate::current_monitor::CurrentShared;
use crate::error::{Error, Result};
use crate::fmt::*;
use crate::pwm_driver::{PwmDriver, PwmSlices};
use crate::waveform::WaveformConfig;

/// パネルのボタン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    On,
    Up,
    Down,
    Mode,
}

/// 調整対象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Hz,
    Duty,
    Limit,
}

impl Mode {
    pub fn next(self) -> Self {
        match self {
            Mode::Hz => Mode::Duty,
            Mode::Duty => Mode::Limit,
            Mode::Limit => Mode::Hz,
        }
    }
}

/// ボタン操作の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelEvent {
    /// 出力ON（リレーを順に入れる）
    OutputOn,
    /// 出力OFF（リレーを切る）
    OutputOff,
    /// 設定値が変わった
    Changed,
    /// 範囲の端で変化なし
    Unchanged,
    ModeChanged,
}

/// 表示用の状態
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PanelStatus {
    pub mode: Mode,
    pub config: DeviceConfig,
    pub running: bool,
    pub alarm: bool,
    pub amps: f32,
}

/// 設定パネル
pub struct SettingsPanel<'a, 'p, H> {
    pwm: &'a PwmDriver<'p, H>,
    current: &'a CurrentShared,
    store: ConfigStore,
    mode: Mode,
    max_amps: f32,
}

impl<'a, 'p, H: PwmSlices> SettingsPanel<'a, 'p, H> {
    /// # 引数
    /// * `config` - 起動時に読み込んだ設定
    /// * `max_amps` - 電流制限の上限（センサー定格）
    pub fn new(pwm: &'a PwmDriver<'p, H>, current: &'a CurrentShared, config: DeviceConfig, max_amps: f32) -> Self {
        current.set_limit(config.amp_limit);
        Self {
            pwm,
            current,
            store: ConfigStore::new(config),
            mode: Mode::Hz,
            max_amps,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &DeviceConfig {
        self.store.config()
    }

    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    pub fn status(&self) -> PanelStatus {
        PanelStatus {
            mode: self.mode,
            config: *self.store.config(),
            running: self.pwm.is_running(),
            alarm: self.current.is_alarmed(),
            amps: self.current.amps(),
        }
    }

    /// ボタンが押された
    pub fn press(&mut self, button: Button) -> Result<PanelEvent> {
        match button {
            Button::On => self.toggle_output(),
            Button::Up => self.adjust(1.0),
            Button::Down => self.adjust(-1.0),
            Button::Mode => {
                self.mode = self.mode.next();
                debug!("Panel mode: {:?}", self.mode);
                Ok(PanelEvent::ModeChanged)
            }
        }
    }

    /// ボタンが離された（UP/DOWNなら未保存の変更を書き込む）
    ///
    /// # Returns
    /// 書き込みを行った場合true
    pub fn release<S: Storage>(&mut self, button: Button, storage: &mut S) -> Result<bool> {
        match button {
            Button::Up | Button::Down => self.store.flush(storage),
            _ => Ok(false),
        }
    }

    fn waveform(config: &DeviceConfig) -> WaveformConfig {
        WaveformConfig::new(config.pwm_hz, config.duty_percent()).with_one_sided(true)
    }

    fn toggle_output(&mut self) -> Result<PanelEvent> {
        // アラームで止まった後のONはOFF扱い（ラッチ解除）
        if self.pwm.is_running() || self.current.is_alarmed() {
            self.pwm.stop();
            self.current.acknowledge();
            info!("Output off");
            return Ok(PanelEvent::OutputOff);
        }
        if self.current.has_sensor_fault() {
            warn!("Output blocked: current sensor fault");
            return Err(Error::SensorFault);
        }

        self.pwm.start(Self::waveform(self.store.config()), None)?;
        info!("Output on");
        Ok(PanelEvent::OutputOn)
    }

    fn adjust(&mut self, direction: f32) -> Result<PanelEvent> {
        let before = *self.store.config();
        let max_amps = self.max_amps;
        let mode = self.mode;

        self.store.update(|c| match mode {
            Mode::Hz => {
                c.pwm_hz = if direction > 0.0 {
                    c.pwm_hz.saturating_add(params::HZ_STEP).min(params::HZ_MAX)
                } else {
                    c.pwm_hz.saturating_sub(params::HZ_STEP).max(params::HZ_MIN)
                };
            }
            Mode::Duty => {
                // 0.01刻みに丸めて誤差の蓄積を防ぐ
                let duty = c.pwm_duty + direction * params::DUTY_STEP;
                c.pwm_duty = (libm::roundf(duty * 100.0) / 100.0).clamp(0.0, 1.0);
            }
            Mode::Limit => {
                c.amp_limit = (c.amp_limit + direction * params::AMP_STEP).clamp(0.0, max_amps);
            }
        });

        let after = *self.store.config();
        if after == before {
            return Ok(PanelEvent::Unchanged);
        }

        if after.amp_limit != before.amp_limit {
            self.current.set_limit(after.amp_limit);
        }
        if self.pwm.is_running() && (after.pwm_hz != before.pwm_hz || after.pwm_duty != before.pwm_duty) {
            self.pwm.change_waveform(after.pwm_hz, after.duty_percent())?;
        }

        debug!(
            "Panel: {} Hz, duty {}, limit {} A",
            after.pwm_hz, after.pwm_duty, after.amp_limit
        );
        Ok(PanelEvent::Changed)
    }
}
