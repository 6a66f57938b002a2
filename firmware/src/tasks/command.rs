//! コマンド処理タスク
//!
//! UARTから1行ずつコマンドを受け取り、`Machine` で実行して応答を返します。

use embassy_rp::uart::BufferedUart;
use embedded_io_async::{Read, Write};
use pico_machine::machine::Machine;

use crate::fmt::*;
use crate::hardware::{RpAdcCapture, RpClock, RpSlices};

/// ボード上のコマンドディスパッチャ
pub type BoardMachine = Machine<'static, 'static, RpSlices, RpAdcCapture, RpClock>;

/// コマンド処理タスク
///
/// ADCキャプチャ中は応答まで数ms〜10msほどブロックします。
/// 周期境界は割り込み側で進むので、このタスクが止まっていても構いません。
#[embassy_executor::task]
pub async fn command_task(mut uart: BufferedUart, mut machine: BoardMachine) {
    info!("Command task started");

    let mut buf = [0u8; 32];
    loop {
        let n = match uart.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("UART read error: {:?}", e);
                continue;
            }
        };

        for &byte in &buf[..n] {
            let Some(response) = machine.feed(byte) else {
                continue;
            };
            if !response.is_ok() {
                debug!("Command rejected: {}", response.as_str());
            }
            if let Err(e) = uart.write_all(response.as_bytes()).await {
                warn!("UART write error: {:?}", e);
            }
        }
    }
}
