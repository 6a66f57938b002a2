//! グローバル共有状態管理
//!
//! 割り込み・Core1・タスク間で共有するドライバーと状態を保持します。
//! ドライバーは内部でクリティカルセクションを使うので `static` のまま共有できます。

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, ThreadModeRawMutex};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use pico_machine::capture::{CaptureHook, CaptureSequencer, SequencerConfig};
use pico_machine::config::params::{pwm, DEFAULT_AMP_LIMIT, SYS_CLOCK_HZ};
use pico_machine::current_monitor::CurrentShared;
use pico_machine::panel::PanelStatus;
use pico_machine::pwm_driver::{PwmDriver, PwmLayout};
use pico_machine::sense::{SenseTrigger, DEFAULT_EDGES_PER_PERIOD};

use crate::config;
use crate::hardware::{Relays, RpAdcCapture, RpClock, RpSlices};

// ---- machine ----

/// プッシュプルPWM（スライス0/1, GPIO0-3）
pub static MACHINE_PWM: PwmDriver<'static, RpSlices> = PwmDriver::new(
    RpSlices,
    PwmLayout::PushPull {
        left: pwm::LEFT_SLICE,
        right: pwm::RIGHT_SLICE,
    },
    SYS_CLOCK_HZ,
);

pub static SEQUENCER: CaptureSequencer = CaptureSequencer::new(SequencerConfig::default());

pub static ADC_CAPTURE: RpAdcCapture = RpAdcCapture::new();

/// ラップ割り込みからキャプチャを進める
pub static CAPTURE_HOOK: CaptureHook<'static, RpAdcCapture> = CaptureHook::new(&SEQUENCER, &ADC_CAPTURE);

/// センス信号で周期境界を作る場合の入口
pub static SENSE: SenseTrigger<'static, 'static, RpSlices> =
    SenseTrigger::new(&MACHINE_PWM, &CAPTURE_HOOK, DEFAULT_EDGES_PER_PERIOD);

pub static CLOCK: RpClock = RpClock;

// ---- smps ----

/// 出力PWM（1スライス）
pub static SMPS_PWM: PwmDriver<'static, RpSlices> = PwmDriver::new(
    RpSlices,
    PwmLayout::Single {
        slice: config::smps::PWM_SLICE,
    },
    SYS_CLOCK_HZ,
);

/// Core1の電流監視と共有する状態
pub static CURRENT: CurrentShared = CurrentShared::new(DEFAULT_AMP_LIMIT);

/// 出力リレー（Core0のパネルとCore1のアラームから操作）
pub static RELAYS: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<Relays>>> =
    BlockingMutex::new(RefCell::new(None));

/// 表示用のパネル状態（パネルタスクが更新）
pub static PANEL_STATUS: Mutex<ThreadModeRawMutex, Option<PanelStatus>> = Mutex::new(None);

/// リレーを操作（未登録なら何もしない）
pub fn with_relays(f: impl FnOnce(&mut Relays)) {
    RELAYS.lock(|cell| {
        if let Some(relays) = cell.borrow_mut().as_mut() {
            f(relays);
        }
    });
}
