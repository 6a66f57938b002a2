//! テスト用のハードウェアモック

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{self, ErrorKind, I2c, Operation};
use embedded_storage::{ReadStorage, Storage};

use crate::capture::{AdcChannel, AdcFrontEnd, Clock};
use crate::display::{Color, Display, Point, Rect};
use crate::pwm_driver::{PeriodListener, PwmSlices, SLICE_COUNT};
use crate::waveform::PwmTiming;

/// 1スライス分の記録
#[derive(Debug, Clone, Copy)]
pub struct SliceState {
    pub configured: bool,
    pub enabled: bool,
    pub dual_slope: bool,
    pub timing: PwmTiming,
    pub counter: u16,
    pub wrap_irq: bool,
    pub parked: bool,
}

impl Default for SliceState {
    fn default() -> Self {
        Self {
            configured: false,
            enabled: false,
            dual_slope: false,
            timing: PwmTiming::IDLE,
            counter: 0,
            wrap_irq: false,
            parked: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SliceLog {
    pub slices: [SliceState; SLICE_COUNT as usize],
    pub enable_writes: Vec<u32>,
    pub disable_writes: Vec<u32>,
    /// トレイトメソッドの呼び出し回数
    pub operations: usize,
}

/// PWMスライスのモック（クローンは同じ記録を共有する）
#[derive(Debug, Clone, Default)]
pub struct MockSlices {
    log: Arc<Mutex<SliceLog>>,
}

impl MockSlices {
    pub fn log(&self) -> MutexGuard<'_, SliceLog> {
        self.log.lock().unwrap()
    }

    /// カウンタが進んだ状態を作る
    pub fn set_counters(&self, counters: &[(u8, u16)]) {
        let mut log = self.log();
        for &(slice, value) in counters {
            log.slices[usize::from(slice)].counter = value;
        }
    }

    fn with_slice(&self, slice: u8, f: impl FnOnce(&mut SliceState)) {
        let mut log = self.log();
        log.operations += 1;
        f(&mut log.slices[usize::from(slice)]);
    }
}

impl PwmSlices for MockSlices {
    fn configure(&mut self, slice: u8, timing: &PwmTiming, dual_slope: bool) {
        self.with_slice(slice, |s| {
            s.configured = true;
            s.parked = false;
            s.timing = *timing;
            s.dual_slope = dual_slope;
        });
    }

    fn retime(&mut self, slice: u8, timing: &PwmTiming) {
        self.with_slice(slice, |s| s.timing = *timing);
    }

    fn set_counter(&mut self, slice: u8, value: u16) {
        self.with_slice(slice, |s| s.counter = value);
    }

    fn counter(&self, slice: u8) -> u16 {
        let mut log = self.log();
        log.operations += 1;
        log.slices[usize::from(slice)].counter
    }

    fn enable(&mut self, mask: u32) {
        let mut log = self.log();
        log.operations += 1;
        log.enable_writes.push(mask);
        for (i, s) in log.slices.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                s.enabled = true;
            }
        }
    }

    fn disable(&mut self, mask: u32) {
        let mut log = self.log();
        log.operations += 1;
        log.disable_writes.push(mask);
        for (i, s) in log.slices.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                s.enabled = false;
            }
        }
    }

    fn set_wrap_irq(&mut self, slice: u8, enabled: bool) {
        self.with_slice(slice, |s| s.wrap_irq = enabled);
    }

    fn park_low(&mut self, slice: u8) {
        self.with_slice(slice, |s| s.parked = true);
    }
}

/// 通知回数を数えるリスナー
#[derive(Debug, Default)]
pub struct RecordingListener {
    periods: AtomicUsize,
    stops: AtomicUsize,
    edge_driven: bool,
}

impl RecordingListener {
    /// ラップ割り込みを使わないリスナーにする
    pub fn edge_driven(mut self) -> Self {
        self.edge_driven = true;
        self
    }

    pub fn periods(&self) -> usize {
        self.periods.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl PeriodListener for RecordingListener {
    fn on_period_end(&self) {
        self.periods.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn wrap_driven(&self) -> bool {
        !self.edge_driven
    }
}

/// 2μsごとに1サンプル変換するADCのモック
///
/// 時刻は `advance_to` で外から与えます。変換中はサンプル値として
/// 書き込み位置（通し番号）をバッファへ書きます。
#[derive(Debug)]
pub struct MockAdc {
    running: AtomicBool,
    selected: AtomicI32,
    buffer: AtomicPtr<u8>,
    capacity: AtomicUsize,
    cursor: AtomicUsize,
    last_us: AtomicU64,
    drained: AtomicUsize,
    released: AtomicBool,
}

/// 1サンプルの変換時間 [μs]
const SAMPLE_US: u64 = 2;

impl MockAdc {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            selected: AtomicI32::new(-1),
            buffer: AtomicPtr::new(std::ptr::null_mut()),
            capacity: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            last_us: AtomicU64::new(0),
            drained: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// 時刻を進め、変換中なら経過時間分のサンプルを書き込む
    pub fn advance_to(&self, now_us: u64) {
        let last = self.last_us.load(Ordering::SeqCst);
        if now_us < last {
            return;
        }
        self.last_us.store(now_us, Ordering::SeqCst);
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let samples = now_us / SAMPLE_US - last / SAMPLE_US;
        let buffer = self.buffer.load(Ordering::SeqCst);
        let capacity = self.capacity.load(Ordering::SeqCst);
        if buffer.is_null() {
            return;
        }
        for _ in 0..samples {
            let cursor = self.cursor.load(Ordering::SeqCst);
            if cursor >= capacity {
                break;
            }
            // SAFETY: arm_transfer で渡されたバッファの範囲内、release で無効化される
            unsafe { buffer.add(cursor).write(cursor as u8) };
            self.cursor.store(cursor + 1, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn selected(&self) -> Option<u8> {
        u8::try_from(self.selected.load(Ordering::SeqCst)).ok()
    }

    pub fn drained(&self) -> usize {
        self.drained.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl AdcFrontEnd for MockAdc {
    fn select_channel(&self, channel: AdcChannel) {
        self.selected.store(i32::from(channel.index()), Ordering::SeqCst);
    }

    fn arm_transfer(&self, buffer: &mut [u8]) {
        self.capacity.store(buffer.len(), Ordering::SeqCst);
        self.buffer.store(buffer.as_mut_ptr(), Ordering::SeqCst);
        self.cursor.store(0, Ordering::SeqCst);
        self.released.store(false, Ordering::SeqCst);
    }

    fn run(&self, enabled: bool) {
        self.running.store(enabled, Ordering::SeqCst);
    }

    fn write_cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    fn drain(&self) {
        self.drained.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.buffer.store(std::ptr::null_mut(), Ordering::SeqCst);
        self.capacity.store(0, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
    }
}

enum Boundaries {
    None,
    Period(u64),
    Schedule(Vec<u64>),
}

type Callback<'a> = Box<dyn Fn(u64) + 'a>;

/// 手動で進む時刻源
///
/// `relax` 1回で `step_us` 進みます。周期境界（一定周期または時刻の列）を
/// 跨ぐたびに境界時刻でコールバックを呼び、最後に `on_tick` を呼びます。
pub struct MockClock<'a> {
    now: Cell<u64>,
    step_us: u64,
    boundaries: Boundaries,
    on_boundary: Option<Callback<'a>>,
    on_tick: RefCell<Option<Callback<'a>>>,
}

impl<'a> MockClock<'a> {
    pub fn new(step_us: u64) -> Self {
        Self {
            now: Cell::new(0),
            step_us,
            boundaries: Boundaries::None,
            on_boundary: None,
            on_tick: RefCell::new(None),
        }
    }

    /// `period_us` の倍数の時刻ごとに `f` を呼ぶ
    pub fn with_period(mut self, period_us: u64, f: impl Fn(u64) + 'a) -> Self {
        self.boundaries = Boundaries::Period(period_us);
        self.on_boundary = Some(Box::new(f));
        self
    }

    /// 指定した時刻ごとに `f` を呼ぶ
    pub fn with_schedule(mut self, times: &[u64], f: impl Fn(u64) + 'a) -> Self {
        self.boundaries = Boundaries::Schedule(times.to_vec());
        self.on_boundary = Some(Box::new(f));
        self
    }

    /// 時刻が進むたびに `f` を呼ぶ
    pub fn on_tick(&self, f: impl Fn(u64) + 'a) {
        *self.on_tick.borrow_mut() = Some(Box::new(f));
    }

    fn next_boundary(&self, after: u64) -> Option<u64> {
        match &self.boundaries {
            Boundaries::None => None,
            Boundaries::Period(period) => Some((after / period + 1) * period),
            Boundaries::Schedule(times) => times.iter().copied().find(|&t| t > after),
        }
    }

    fn advance(&self, target: u64) {
        while let Some(boundary) = self.next_boundary(self.now.get()) {
            if boundary > target {
                break;
            }
            self.now.set(boundary);
            if let Some(f) = &self.on_boundary {
                f(boundary);
            }
        }

        self.now.set(target);
        if let Some(f) = self.on_tick.borrow().as_ref() {
            f(target);
        }
    }
}

impl Clock for MockClock<'_> {
    fn now_us(&self) -> u64 {
        self.now.get()
    }

    fn delay_us(&self, us: u64) {
        self.advance(self.now.get() + us);
    }

    fn relax(&self) {
        self.advance(self.now.get() + self.step_us);
    }
}

/// メモリ上のストレージ（未書き込み領域は0xFF）
#[derive(Debug)]
pub struct MemStorage {
    pub bytes: Vec<u8>,
    pub fail_reads: bool,
    pub fail_writes: bool,
    /// 書き込み回数
    pub writes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemError;

impl MemStorage {
    /// 24C02相当（256バイト）
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0xFF; capacity],
            fail_reads: false,
            fail_writes: false,
            writes: 0,
        }
    }

    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, MemError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(MemError)?;
        if end > self.bytes.len() {
            return Err(MemError);
        }
        Ok(start..end)
    }
}

impl ReadStorage for MemStorage {
    type Error = MemError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_reads {
            return Err(MemError);
        }
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for MemStorage {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemError);
        }
        let range = self.range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

/// 24C02相当のI2Cデバイス（ページ内で書き込みアドレスが折り返す）
#[derive(Debug)]
pub struct MockEeprom {
    pub cells: [u8; 256],
    /// (先頭アドレス, データ長)
    pub writes: Vec<(u8, usize)>,
    /// trueなら全転送をNACK
    pub nack: bool,
    pointer: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nack;

impl i2c::Error for Nack {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NoAcknowledge(i2c::NoAcknowledgeSource::Address)
    }
}

impl MockEeprom {
    pub fn new() -> Self {
        Self {
            cells: [0xFF; 256],
            writes: Vec::new(),
            nack: false,
            pointer: 0,
        }
    }
}

impl i2c::ErrorType for MockEeprom {
    type Error = Nack;
}

impl I2c for MockEeprom {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        if self.nack || address != crate::eeprom::DEFAULT_ADDRESS {
            return Err(Nack);
        }
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&start, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.pointer = start;
                    let page = start & !7;
                    for (i, &b) in data.iter().enumerate() {
                        let cell = page | ((start as usize + i) as u8 & 7);
                        self.cells[cell as usize] = b;
                    }
                    if !data.is_empty() {
                        self.writes.push((start, data.len()));
                    }
                }
                Operation::Read(buf) => {
                    for b in buf.iter_mut() {
                        *b = self.cells[self.pointer as usize];
                        self.pointer = self.pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

/// 待ち時間を積算するだけの遅延
#[derive(Debug, Default)]
pub struct MockDelay {
    pub total_ms: u32,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ms += ns / 1_000_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms;
    }
}

/// 描画命令
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Rect(Rect, Color),
    Line(Point, Point, Color),
    Text(Point, String, Color),
}

/// 描画命令を記録する表示器
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub ops: Vec<DrawOp>,
    pub flushes: usize,
}

impl RecordingDisplay {
    pub fn texts(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text(_, text, _) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Display for RecordingDisplay {
    type Error = core::convert::Infallible;

    fn draw_rect(&mut self, area: Rect, color: Color) -> Result<(), Self::Error> {
        self.ops.push(DrawOp::Rect(area, color));
        Ok(())
    }

    fn draw_line(&mut self, from: Point, to: Point, color: Color) -> Result<(), Self::Error> {
        self.ops.push(DrawOp::Line(from, to, color));
        Ok(())
    }

    fn draw_text(&mut self, at: Point, text: &str, color: Color) -> Result<(), Self::Error> {
        self.ops.push(DrawOp::Text(at, text.to_owned(), color));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
}
