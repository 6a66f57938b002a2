//! パニックハンドラ
//!
//! コアが止まってもPWMスライスは動き続けるので、停止前に
//! PWMを止めて出力とリレーをLowに固定します。どちらのコアから呼ばれても同じ処理です。

use core::panic::PanicInfo;
use core::sync::atomic::{compiler_fence, Ordering};

use crate::config::smps::RELAY_GPIOS;
use crate::hardware;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    cortex_m::interrupt::disable();
    hardware::force_outputs_low(&RELAY_GPIOS);

    #[cfg(feature = "defmt")]
    defmt::error!("{}", defmt::Display2Format(info));
    #[cfg(not(feature = "defmt"))]
    let _ = info;

    loop {
        compiler_fence(Ordering::SeqCst);
    }
}
