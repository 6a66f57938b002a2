//! PWM/ADC/電流センサーの設定パラメータ

/// システムクロック [Hz]（RP2040 clk_sys デフォルト 125MHz）
pub const SYS_CLOCK_HZ: u32 = 125_000_000;

/// デッドタイム上限 [クロック]
pub const MAX_DEAD_TIME_CYCLES: u16 = 200;

/// PWM設定
pub mod pwm {
    /// 受け付ける最低周波数 [Hz]
    pub const MIN_FREQUENCY_HZ: u32 = 10;

    /// duty1024の最大値（1023 = 100%）
    pub const DUTY1024_MAX: u32 = 1023;

    /// 両エッジカウント（位相補正モード）をデフォルトにする
    pub const DEFAULT_DUAL_SLOPE: bool = true;

    /// デッドタイム（デフォルト値）
    pub const DEFAULT_DEAD_TIME: u16 = 0;

    /// プッシュプル左側スライス（GPIO0=A/High, GPIO1=B/Low）
    pub const LEFT_SLICE: u8 = 0;

    /// プッシュプル右側スライス（GPIO2=A/High, GPIO3=B/Low）
    pub const RIGHT_SLICE: u8 = 1;
}

/// ADCキャプチャ設定
pub mod adc {
    /// ADCチャネル0に対応するGPIO番号（0,1,2 → GPIO26,27,28）
    pub const FIRST_ADC_GPIO: u8 = 26;

    /// 使用可能なADCチャネル数
    pub const CHANNEL_COUNT: u8 = 3;

    /// 1回のバッチで返す最大サンプル数
    pub const MAX_SAMPLES: usize = 200;

    /// 記録するスナップショット数（デフォルト値）
    pub const DEFAULT_SNAPSHOTS: u8 = 3;

    /// 最後のスナップショット後に待つ周期数（デフォルト値）
    pub const DEFAULT_SETTLE_PERIODS: u8 = 1;

    /// 周期境界が来ない場合のタイムアウト [ms]
    pub const DEADLINE_MS: u64 = 10;

    /// タイムアウト後の擬似周期 [μs]（10kHz相当）
    pub const SYNTHETIC_PERIOD_US: u64 = 100;
}

/// 電流センサー設定（ホール素子, 2.5V中心, 4.5Vで定格）
pub mod sensor {
    /// 定格電流 [A]
    pub const MAX_AMPS: f32 = 40.0;

    /// 無負荷時の読み値（キャリブレーション前の初期値）
    pub const ZERO_READING: u8 = 129;

    /// 定格電流時の読み値: 128 + 128 * (4.5 - 2.5) / 2.5
    pub const MAX_READING: u8 = 230;

    /// 平均化バッファ長（1段あたり）
    pub const FILTER_DEPTH: usize = 100;
}

/// 設定パネル（ボタン操作）の刻み幅と範囲
pub mod panel {
    pub const HZ_STEP: u32 = 10;
    pub const HZ_MIN: u32 = 500;
    pub const HZ_MAX: u32 = 50_000;
    pub const DUTY_STEP: f32 = 0.01;
    pub const AMP_STEP: f32 = 1.0;
}

/// 運転設定のデフォルト値
pub const DEFAULT_PWM_HZ: u32 = 5000;
pub const DEFAULT_PWM_DUTY: f32 = 0.5;
pub const DEFAULT_AMP_LIMIT: f32 = 5.0;

/// コマンド行バッファ長（終端を含む）
pub const LINE_CAPACITY: usize = 32;
