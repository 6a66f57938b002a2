//! 24C02 I2C EEPROM
//!
//! 256バイト・8バイトページのシリアルEEPROMを `embedded_storage` の
//! ストレージとして扱います。ページ境界をまたぐ書き込みは分割し、
//! 1ページごとに書き込みサイクル完了を待ちます。

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use embedded_storage::{ReadStorage, Storage};

use crate::fmt::*;

/// I2Cアドレス（A0-A2をGNDに接続）
pub const DEFAULT_ADDRESS: u8 = 0x50;

/// 容量 [byte]
pub const CAPACITY: usize = 256;

/// ページサイズ [byte]
pub const PAGE_SIZE: usize = 8;

/// 書き込みサイクル時間 [ms]
pub const WRITE_CYCLE_MS: u32 = 5;

/// EEPROM操作のエラー型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    /// I2C通信エラー
    Bus,

    /// 容量外のアドレス
    OutOfRange,
}

/// 24C02ドライバー
pub struct Eeprom24<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Eeprom24<I, D> {
    /// # Arguments
    /// * `i2c` - I2Cバス
    /// * `delay` - 書き込みサイクル待ちに使う遅延
    pub fn new(i2c: I, delay: D) -> Self {
        Self::with_address(i2c, delay, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I, delay: D, address: u8) -> Self {
        Self { i2c, delay, address }
    }

    /// バスと遅延を返す
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn check_range(offset: u32, len: usize) -> Result<(), EepromError> {
        let end = (offset as usize).checked_add(len).ok_or(EepromError::OutOfRange)?;
        if end > CAPACITY {
            return Err(EepromError::OutOfRange);
        }
        Ok(())
    }
}

impl<I: I2c, D: DelayNs> ReadStorage for Eeprom24<I, D> {
    type Error = EepromError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        Self::check_range(offset, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        // アドレスを設定してから連続読み出し（チップ内でアドレスが自動で進む）
        self.i2c.write_read(self.address, &[offset as u8], bytes).map_err(|_| {
            warn!("EEPROM read failed at {}", offset);
            EepromError::Bus
        })
    }

    fn capacity(&self) -> usize {
        CAPACITY
    }
}

impl<I: I2c, D: DelayNs> Storage for Eeprom24<I, D> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        Self::check_range(offset, bytes.len())?;

        let mut address = offset as usize;
        let mut rest = bytes;
        while !rest.is_empty() {
            // ページ内に収まる分だけ送る（超えるとページ先頭に折り返して上書きされる）
            let room = PAGE_SIZE - address % PAGE_SIZE;
            let (chunk, tail) = rest.split_at(room.min(rest.len()));

            let mut frame = [0u8; PAGE_SIZE + 1];
            frame[0] = address as u8;
            frame[1..=chunk.len()].copy_from_slice(chunk);
            self.i2c.write(self.address, &frame[..=chunk.len()]).map_err(|_| {
                warn!("EEPROM write failed at {}", address);
                EepromError::Bus
            })?;
            self.delay.delay_ms(WRITE_CYCLE_MS);

            address += chunk.len();
            rest = tail;
        }
        trace!("EEPROM wrote {} bytes at {}", bytes.len(), offset);
        Ok(())
    }
}
