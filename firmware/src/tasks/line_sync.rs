//! ライン周波数計測タスク
//!
//! 一次側から来るACゼロクロス信号の立ち上がりエッジ間隔を計測し、
//! リプル補償の帯域選択に使うライン周波数を更新します。

use core::sync::atomic::Ordering;

use embassy_stm32::exti::ExtiInput;
use embassy_time::{with_timeout, Duration, Instant};

use crate::state::LINE_FREQUENCY;

/// この時間エッジが来なければDC入力とみなす
const EDGE_TIMEOUT: Duration = Duration::from_millis(100);

/// ライン周波数計測タスク
#[embassy_executor::task]
pub async fn line_sync_task(mut zero_cross: ExtiInput<'static>) {
    info!("Line sync task started");

    let mut last_edge: Option<Instant> = None;

    loop {
        match with_timeout(EDGE_TIMEOUT, zero_cross.wait_for_rising_edge()).await {
            Ok(()) => {
                let now = Instant::now();
                if let Some(prev) = last_edge {
                    let period_us = (now - prev).as_micros().max(1);
                    // [100mHz] = 10 / T[s]
                    let frequency = (10_000_000 / period_us).min(u16::MAX as u64) as u16;
                    LINE_FREQUENCY.store(frequency, Ordering::Relaxed);
                }
                last_edge = Some(now);
            }
            Err(_) => {
                if LINE_FREQUENCY.swap(0, Ordering::Relaxed) != 0 {
                    info!("Line zero-cross lost, ripple compensation off");
                }
                last_edge = None;
            }
        }
    }
}
