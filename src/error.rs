//! エラー型
//!
//! ユーザー入力に起因する回復可能なエラーのみを表します。
//! 電力段の前提条件違反はエラーではなくpanicで停止します。

/// 共通エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// パラメータ範囲外（パラメータ名を保持）
    InvalidParameter(&'static str),

    /// PWMが既に動作中
    AlreadyRunning,

    /// PWMが停止中
    NotRunning,

    /// キャプチャ実行中
    Busy,

    /// 外部ストレージの読み書き失敗
    Storage,

    /// 電流センサーのゼロ点が使えない（未接続・オフセット異常）
    SensorFault,
}

impl Error {
    /// 応答メッセージ
    pub fn message(&self) -> &'static str {
        match self {
            Error::InvalidParameter(_) => "invalid parameter",
            Error::AlreadyRunning => "PWM is already running",
            Error::NotRunning => "PWM is not running",
            Error::Busy => "capture in progress",
            Error::Storage => "storage failure",
            Error::SensorFault => "current sensor fault",
        }
    }

    /// 問題のあるパラメータ名
    pub fn param(&self) -> Option<&'static str> {
        match self {
            Error::InvalidParameter(name) => Some(name),
            _ => None,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
