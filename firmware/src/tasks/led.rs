//! LED制御タスク
//!
//! コンバータの状態をステータスLEDで表示します。
//! - 消灯: 停止中
//! - 点灯: 定常運転
//! - 低速点滅: ソフトスタート / 電流制限中
//! - 高速点滅: CT過電流

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};

use crate::state::LLC_STATUS;

/// LED制御タスク（LEDはアクティブLow）
#[embassy_executor::task]
pub async fn led_task(mut led: Output<'static>) {
    info!("LED task started");

    loop {
        let status = *LLC_STATUS.lock().await;
        let blink_ms = match status {
            Some(s) if s.ct_ocp => Some(100),
            Some(s) if s.soft_start || s.current_limit => Some(500),
            Some(s) if s.enabled => {
                led.set_low();
                None
            }
            _ => {
                led.set_high();
                None
            }
        };

        match blink_ms {
            Some(ms) => {
                led.toggle();
                Timer::after(Duration::from_millis(ms)).await;
            }
            None => Timer::after(Duration::from_millis(100)).await,
        }
    }
}
