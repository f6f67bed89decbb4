//! ハウスキーピングタスク
//!
//! 5kHzでコンバータの低速処理（ライン区分、リプル補償、同期起動、
//! 電流シェアのフィードフォワード補正）を実行し、ステータスを公開します。

use core::sync::atomic::Ordering;

use embassy_stm32::gpio::Input;
use embassy_time::{Duration, Ticker};
use llc_control::config::DEFAULT_HOUSEKEEPING_FREQUENCY_HZ;
use llc_control::{LineClass, LlcStatus, SlowInputs};

use crate::state::{
    Plant, CALIBRATION, CT_FAULT_CLEAR_REQUEST, LINE_FREQUENCY, LLC_STATUS, PLANT,
};

/// ログ対象のフラグが変化したか
fn flags_changed(prev: &LlcStatus, next: &LlcStatus) -> bool {
    prev.enabled != next.enabled
        || prev.soft_start != next.soft_start
        || prev.current_limit != next.current_limit
        || prev.ct_ocp != next.ct_ocp
        || prev.burst_timeout != next.burst_timeout
        || prev.sync_phase != next.sync_phase
        || prev.share_active != next.share_active
}

/// ハウスキーピングタスク
///
/// # 引数
/// * `high_line` - 一次側からの高入力ライン通知
/// * `standby` - 起動指令待ち（スタンバイ）入力
#[embassy_executor::task]
pub async fn housekeeping_task(high_line: Input<'static>, standby: Input<'static>) {
    info!("Housekeeping task started");

    let period_us = (1_000_000.0 / DEFAULT_HOUSEKEEPING_FREQUENCY_HZ) as u64;
    let mut ticker = Ticker::every(Duration::from_micros(period_us));
    let mut last: Option<LlcStatus> = None;

    loop {
        ticker.next().await;

        let calibration = CALIBRATION.lock().await.unwrap_or_default();
        let clear_request = core::mem::take(&mut *CT_FAULT_CLEAR_REQUEST.lock().await);
        let inputs = SlowInputs {
            line: if high_line.is_high() {
                LineClass::High
            } else {
                LineClass::Low
            },
            line_frequency: LINE_FREQUENCY.load(Ordering::Relaxed),
            calibration,
            standby: standby.is_high(),
        };

        // 制御割り込みを止めるのは低速処理の間だけ
        let status = cortex_m::interrupt::free(|cs| {
            PLANT
                .borrow(cs)
                .borrow_mut()
                .as_mut()
                .map(|Plant { converter, stage }| {
                    if clear_request {
                        converter.clear_ct_ocp_fault(stage);
                    }
                    converter.slow_step(&inputs, stage)
                })
        });
        let Some(status) = status else {
            continue;
        };

        if last.map_or(true, |prev| flags_changed(&prev, &status)) {
            info!(
                "LLC: en={} ss={} cl={} ocp={} burst_to={} sync={} acs={} ref={}",
                status.enabled,
                status.soft_start,
                status.current_limit,
                status.ct_ocp,
                status.burst_timeout,
                status.sync_phase,
                status.share_active,
                status.reference
            );
        }
        if status.ct_ocp_reported && !last.is_some_and(|prev| prev.ct_ocp_reported) {
            warn!("CT over-current latched, waiting for clear request");
        }
        last = Some(status);

        *LLC_STATUS.lock().await = Some(status);
    }
}
