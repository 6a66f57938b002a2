//! 運転設定の永続化
//!
//! バイト単位の外部ストレージ（24C02 EEPROM等）に設定を保存します。
//! 読み込み失敗・マジックナンバー不一致時はデフォルト設定で動作を継続します。

use embedded_storage::{ReadStorage, Storage};

use super::params;
use crate::error::{Error, Result};
use crate::fmt::*;

/// 設定データのマジックナンバー
pub const CONFIG_MAGIC: u16 = 0xB000;

/// 保存先アドレス
pub const CONFIG_ADDRESS: u32 = 0;

/// シリアライズ後のサイズ [byte]
pub const CONFIG_SIZE: usize = 14;

/// 永続化される運転設定
///
/// リトルエンディアンで `magic(u16) | pwm_hz(u32) | pwm_duty(f32) | amp_limit(f32)` の順に格納
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// マジックナンバー（データ識別用）
    pub magic: u16,

    /// PWM周波数 [Hz]
    pub pwm_hz: u32,

    /// デューティ比（0.0-1.0）
    pub pwm_duty: f32,

    /// 電流制限 [A]
    pub amp_limit: f32,
}

impl DeviceConfig {
    /// デフォルト設定を生成（params.rsの値を使用）
    pub const fn default() -> Self {
        Self {
            magic: CONFIG_MAGIC,
            pwm_hz: params::DEFAULT_PWM_HZ,
            pwm_duty: params::DEFAULT_PWM_DUTY,
            amp_limit: params::DEFAULT_AMP_LIMIT,
        }
    }

    /// デューティ比をパーセントで取得
    pub fn duty_percent(&self) -> f32 {
        self.pwm_duty * 100.0
    }

    /// バイト列にシリアライズ
    pub fn to_bytes(&self) -> [u8; CONFIG_SIZE] {
        let mut bytes = [0u8; CONFIG_SIZE];
        bytes[0..2].copy_from_slice(&self.magic.to_le_bytes());
        bytes[2..6].copy_from_slice(&self.pwm_hz.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.pwm_duty.to_le_bytes());
        bytes[10..14].copy_from_slice(&self.amp_limit.to_le_bytes());
        bytes
    }

    /// バイト列から復元（長さ不足の場合はNone）
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < CONFIG_SIZE {
            return None;
        }

        Some(Self {
            magic: u16::from_le_bytes([bytes[0], bytes[1]]),
            pwm_hz: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            pwm_duty: f32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            amp_limit: f32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
        })
    }

    /// マジックナンバーと値の範囲を検証
    pub fn is_valid(&self) -> bool {
        self.magic == CONFIG_MAGIC
            && self.pwm_hz > 0
            && (0.0..=1.0).contains(&self.pwm_duty)
            && self.amp_limit.is_finite()
            && self.amp_limit >= 0.0
    }
}

/// ストレージから設定を読み込む
///
/// # Returns
/// * `Ok(DeviceConfig)` - 読み込み成功
/// * `Err(Error::Storage)` - 読み込み失敗、容量不足、マジックナンバー不一致
pub fn read_config<S: ReadStorage>(storage: &mut S) -> Result<DeviceConfig> {
    if storage.capacity() < CONFIG_ADDRESS as usize + CONFIG_SIZE {
        return Err(Error::Storage);
    }

    let mut buffer = [0u8; CONFIG_SIZE];
    storage
        .read(CONFIG_ADDRESS, &mut buffer)
        .map_err(|_| Error::Storage)?;

    let config = DeviceConfig::from_bytes(&buffer).ok_or(Error::Storage)?;
    if !config.is_valid() {
        warn!("Config header validation failed: magic=0x{:X}", config.magic);
        return Err(Error::Storage);
    }

    Ok(config)
}

/// ストレージに設定を書き込む
pub fn write_config<S: Storage>(storage: &mut S, config: &DeviceConfig) -> Result<()> {
    storage
        .write(CONFIG_ADDRESS, &config.to_bytes())
        .map_err(|_| Error::Storage)
}

/// 設定を読み込み、失敗時はデフォルト設定を返す
pub fn load_or_default<S: ReadStorage>(storage: &mut S) -> DeviceConfig {
    match read_config(storage) {
        Ok(config) => {
            info!(
                "Config loaded: {} Hz, duty {}, limit {} A",
                config.pwm_hz, config.pwm_duty, config.amp_limit
            );
            config
        }
        Err(_) => {
            warn!("Failed to load config, using defaults");
            DeviceConfig::default()
        }
    }
}

/// メモリ上の設定と未保存フラグ
///
/// ボタン操作のたびに書き込むとEEPROMが消耗するため、
/// 変更はメモリ上に溜めて確定イベント（ボタンを離した時）でまとめて書き込みます。
pub struct ConfigStore {
    config: DeviceConfig,
    dirty: bool,
}

impl ConfigStore {
    pub const fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            dirty: false,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// 設定を変更（値が変わった場合のみ未保存にする）
    pub fn update(&mut self, f: impl FnOnce(&mut DeviceConfig)) {
        let before = self.config;
        f(&mut self.config);
        if self.config != before {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 未保存の変更を書き込む
    ///
    /// # Returns
    /// * `Ok(true)` - 書き込みを行った
    /// * `Ok(false)` - 変更なし
    pub fn flush<S: Storage>(&mut self, storage: &mut S) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        write_config(storage, &self.config)?;
        self.dirty = false;
        debug!("Config saved");
        Ok(true)
    }
}
