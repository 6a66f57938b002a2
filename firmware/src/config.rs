//! ボード設定
//!
//! ピン割り当てとタスク周期など、ファームウェア側だけで使う定数です。
//! PWM/ADC/センサーの値は `pico_machine::config` にあります。

/// UART（コマンドプロトコル）
pub mod uart {
    /// ボーレート [bps]
    pub const BAUD_RATE: u32 = 115_200;

    /// 受信・送信リングバッファ長 [byte]
    pub const RX_BUFFER_SIZE: usize = 64;
    /// 応答1回分（ADCの200サンプル）が収まる長さ
    pub const TX_BUFFER_SIZE: usize = 1024;
}

/// machineバイナリ
pub mod machine {
    /// センス信号入力（GPIO4）
    pub const SENSE_GPIO: u8 = 4;

    /// センスタスクを動かす割り込みエグゼキュータの優先度
    pub const SENSE_PRIORITY: embassy_rp::interrupt::Priority = embassy_rp::interrupt::Priority::P2;

    /// LED点滅周期 [ms]
    pub const HEARTBEAT_MS: u64 = 500;
}

/// smpsバイナリ
pub mod smps {
    /// 出力PWMのスライス（GPIO0=A/High, GPIO1=B/Low）
    pub const PWM_SLICE: u8 = 0;

    /// 出力リレー（GPIO18, GPIO19）。パニック時にもLowにする
    pub const RELAY_GPIOS: [usize; 2] = [18, 19];

    /// ハードウェア電流リミッターの動作出力（GPIO3、立ち上がりで動作）
    pub const LIMITER_GPIO: u8 = 3;

    /// リレー1をONにしてからリレー2をONにするまでの待ち [ms]
    pub const RELAY_DELAY_MS: u64 = 500;

    /// ブザー周波数 [Hz]
    pub const BUZZER_HZ: u32 = 5_000;

    /// 状態表示とブザー更新の周期 [ms]
    pub const STATUS_PERIOD_MS: u64 = 500;

    /// ボタンのチャタリング待ち [ms]
    pub const DEBOUNCE_MS: u64 = 20;

    /// EEPROMのI2Cクロック [Hz]
    pub const I2C_FREQUENCY: u32 = 100_000;

    /// Core1のスタックサイズ [byte]
    pub const CORE1_STACK_SIZE: usize = 4096;
}
