//! 電流監視
//!
//! 電流センサーのADC値を2段の移動平均でAC成分を除去し、
//! 電流制限を超えたらアラームを発生させます。Core1で常時ループします。
//!
//! Core0と共有する値はすべて1ワードのアトミック変数です
//! （Cortex-M0+にはCAS命令がないため load/store のみ使用）。

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::params::sensor as params;
use crate::error::{Error, Result};
use crate::fmt::*;

/// 2段ボックスカー平均
///
/// N個の生サンプルの平均を1段目の値とし、1段目の値N個の平均を出力します。
/// 出力はN×Nサンプルごと（N=100, 600ksps で約60Hz）。
pub struct TwoStageAverage<const N: usize> {
    raw: [u8; N],
    raw_len: usize,
    averages: [u8; N],
    averages_len: usize,
}

impl<const N: usize> TwoStageAverage<N> {
    /// 両段を初期値で埋めて作成
    pub const fn new(initial: u8) -> Self {
        Self {
            raw: [initial; N],
            raw_len: 0,
            averages: [initial; N],
            averages_len: 0,
        }
    }

    /// 生サンプルを1つ追加し、2段目が一巡したら平均値を返す
    pub fn push(&mut self, sample: u8) -> Option<u8> {
        self.raw[self.raw_len] = sample;
        self.raw_len += 1;
        if self.raw_len < N {
            return None;
        }
        self.raw_len = 0;

        self.averages[self.averages_len] = average(&self.raw);
        self.averages_len += 1;
        if self.averages_len < N {
            return None;
        }
        self.averages_len = 0;

        Some(self.latest())
    }

    /// 2段目の現在の平均値
    pub fn latest(&self) -> u8 {
        average(&self.averages)
    }

    /// 全値を指定値で埋め直す
    pub fn reset(&mut self, value: u8) {
        *self = Self::new(value);
    }
}

fn average(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let sum: u32 = values.iter().map(|&v| u32::from(v)).sum();
    (sum / values.len() as u32) as u8
}

/// 電流センサーの読み値→電流変換
///
/// ゼロ点を中心に折り返した区分線形変換です。
/// ゼロ点より小さい読み値は負の電流になります。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentSensor {
    zero_reading: u8,
    max_reading: u8,
    max_amps: f32,
}

impl CurrentSensor {
    /// # Panics
    /// ゼロ点が定格読み値以上の場合（変換が定義できない）
    pub const fn new(zero_reading: u8, max_reading: u8, max_amps: f32) -> Self {
        if zero_reading >= max_reading {
            ::core::panic!("current sensor zero reading must be below max reading");
        }
        Self {
            zero_reading,
            max_reading,
            max_amps,
        }
    }

    pub const fn default() -> Self {
        Self::new(params::ZERO_READING, params::MAX_READING, params::MAX_AMPS)
    }

    /// キャリブレーションしたゼロ点で作り直す
    ///
    /// # Panics
    /// `accepts_zero` がfalseの読み値
    pub fn with_zero(self, zero_reading: u8) -> Self {
        Self::new(zero_reading, self.max_reading, self.max_amps)
    }

    pub fn zero_reading(&self) -> u8 {
        self.zero_reading
    }

    /// ゼロ点として使える読み値か
    pub fn accepts_zero(&self, zero_reading: u8) -> bool {
        zero_reading < self.max_reading
    }

    pub fn max_amps(&self) -> f32 {
        self.max_amps
    }

    /// 読み値を電流 [A] に変換（定格でクランプ）
    pub fn to_amps(&self, reading: u8) -> f32 {
        let zero = u16::from(self.zero_reading);
        let reading = u16::from(reading);
        let (delta, reversed) = if reading < zero {
            (zero - reading, true)
        } else {
            (reading - zero, false)
        };

        let span = u16::from(self.max_reading) - zero;
        let rate = f32::from(delta.min(span)) / f32::from(span);
        let amps = rate * self.max_amps;
        if reversed {
            -amps
        } else {
            amps
        }
    }
}

/// Core0とCore1で共有する電流監視の状態
pub struct CurrentShared {
    limit_bits: AtomicU32,
    amps_bits: AtomicU32,
    reading: AtomicU8,
    over_limit: AtomicBool,
    alarm: AtomicBool,
    sensor_fault: AtomicBool,
    limit_occurred: AtomicBool,
    trip_count: AtomicU32,
}

impl CurrentShared {
    pub const fn new(limit_amps: f32) -> Self {
        Self {
            limit_bits: AtomicU32::new(limit_amps.to_bits()),
            amps_bits: AtomicU32::new(0),
            reading: AtomicU8::new(params::ZERO_READING),
            over_limit: AtomicBool::new(false),
            alarm: AtomicBool::new(false),
            sensor_fault: AtomicBool::new(false),
            limit_occurred: AtomicBool::new(false),
            trip_count: AtomicU32::new(0),
        }
    }

    /// 電流制限 [A]（Core0が書き込む）
    pub fn set_limit(&self, amps: f32) {
        self.limit_bits.store(amps.to_bits(), Ordering::Relaxed);
    }

    pub fn limit(&self) -> f32 {
        f32::from_bits(self.limit_bits.load(Ordering::Relaxed))
    }

    /// 最新の電流 [A]
    pub fn amps(&self) -> f32 {
        f32::from_bits(self.amps_bits.load(Ordering::Relaxed))
    }

    /// 最新のフィルタ済み読み値
    pub fn reading(&self) -> u8 {
        self.reading.load(Ordering::Relaxed)
    }

    /// 現在制限を超えているか
    pub fn is_over_limit(&self) -> bool {
        self.over_limit.load(Ordering::Acquire)
    }

    /// アラームがラッチされているか
    pub fn is_alarmed(&self) -> bool {
        self.alarm.load(Ordering::Acquire)
    }

    /// アラームのラッチを解除（出力をOFFにした時）
    pub fn acknowledge(&self) {
        self.alarm.store(false, Ordering::Release);
    }

    /// センサー異常で出力を許可できないか（解除しない）
    pub fn has_sensor_fault(&self) -> bool {
        self.sensor_fault.load(Ordering::Acquire)
    }

    /// ハードウェア電流リミッターの動作を記録（エッジ割り込みから）
    pub fn note_limit(&self) {
        self.limit_occurred.store(true, Ordering::Release);
    }

    /// 前回の確認以降にリミッターが動作したか（読み出しでクリア）
    pub fn take_limit_occurred(&self) -> bool {
        // CASがないのでload/store。間に入った記録は次回に回る
        let occurred = self.limit_occurred.load(Ordering::Acquire);
        if occurred {
            self.limit_occurred.store(false, Ordering::Release);
        }
        occurred
    }

    pub fn trip_count(&self) -> u32 {
        self.trip_count.load(Ordering::Relaxed)
    }

    fn publish(&self, reading: u8, amps: f32) {
        self.reading.store(reading, Ordering::Relaxed);
        self.amps_bits.store(amps.to_bits(), Ordering::Relaxed);
    }

    fn record_trip(&self) {
        // 書き込みはCore1のみ
        let count = self.trip_count.load(Ordering::Relaxed);
        self.trip_count.store(count.wrapping_add(1), Ordering::Relaxed);
        self.alarm.store(true, Ordering::Release);
    }

    fn record_sensor_fault(&self) {
        self.sensor_fault.store(true, Ordering::Release);
        self.alarm.store(true, Ordering::Release);
    }
}

/// 生サンプル（8ビット）の読み出し
pub trait RawSampler {
    fn read_raw(&mut self) -> u8;
}

impl<F: FnMut() -> u8> RawSampler for F {
    fn read_raw(&mut self) -> u8 {
        self()
    }
}

/// 過電流時の遮断処理
pub trait Alarm {
    fn trip(&mut self, amps: f32);
}

impl<F: FnMut(f32)> Alarm for F {
    fn trip(&mut self, amps: f32) {
        self(amps)
    }
}

/// 電流監視ループ
pub struct CurrentMonitor<'a, S, A> {
    sampler: S,
    alarm: A,
    sensor: CurrentSensor,
    filter: TwoStageAverage<{ params::FILTER_DEPTH }>,
    shared: &'a CurrentShared,
}

impl<'a, S: RawSampler, A: Alarm> CurrentMonitor<'a, S, A> {
    pub fn new(sampler: S, alarm: A, sensor: CurrentSensor, shared: &'a CurrentShared) -> Self {
        Self {
            sampler,
            alarm,
            sensor,
            filter: TwoStageAverage::new(sensor.zero_reading()),
            shared,
        }
    }

    pub fn sensor(&self) -> &CurrentSensor {
        &self.sensor
    }

    /// 無負荷状態でゼロ点を学習（起動時に負荷がOFFである前提）
    ///
    /// 使えない読み値の場合は既定のゼロ点のまま監視を続け、
    /// センサー異常とアラームをラッチして `Error::SensorFault` を返します。
    pub fn calibrate_zero(&mut self) -> Result<u8> {
        let mut samples = [0u8; params::FILTER_DEPTH];
        for sample in samples.iter_mut() {
            *sample = self.sampler.read_raw();
        }
        let zero = average(&samples);

        if !self.sensor.accepts_zero(zero) {
            self.shared.record_sensor_fault();
            error!(
                "Current sensor zero reading {} unusable, keeping {}",
                zero,
                self.sensor.zero_reading()
            );
            self.alarm.trip(0.0);
            return Err(Error::SensorFault);
        }

        self.sensor = self.sensor.with_zero(zero);
        self.filter.reset(zero);
        self.shared.publish(zero, 0.0);
        info!("Current sensor zero reading: {}", zero);
        Ok(zero)
    }

    /// 1サンプル処理し、フィルタ出力が更新されたら電流を返す
    pub fn step(&mut self) -> Option<f32> {
        let reading = self.filter.push(self.sampler.read_raw())?;
        let amps = self.sensor.to_amps(reading);
        self.shared.publish(reading, amps);

        let over = libm::fabsf(amps) > self.shared.limit();
        let was_over = self.shared.is_over_limit();
        // 1回の超過につき1回だけ遮断する
        if over && !was_over {
            self.shared.record_trip();
            error!("OVERCURRENT detected! {} A (limit: {} A)", amps, self.shared.limit());
            self.alarm.trip(amps);
        }
        if over != was_over {
            self.shared.over_limit.store(over, Ordering::Release);
        }

        Some(amps)
    }

    /// 監視を永久に続ける（Core1のエントリから呼ぶ）
    pub fn run(&mut self) -> ! {
        info!("Current monitor started, limit {} A", self.shared.limit());
        loop {
            self.step();
        }
    }
}
