//! TIM6ベースの高速制御割り込み
//!
//! TIM6の更新割り込み（60kHz）ごとに計測値を読み取り、
//! `LlcConverter::fast_step` を実行してTIM1へ指令を書き込みます。
//! Embassyタスクより高い優先度で動作します。

use core::sync::atomic::{AtomicU32, Ordering};
use embassy_stm32::pac;
use llc_control::config::DEFAULT_CONTROL_FREQUENCY_HZ;

use crate::hardware::TIMER_CLOCK_HZ;
use crate::sense;
use crate::state::{Plant, PLANT};

/// 実行した制御サイクル数（デバッグ用）
pub static CYCLE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// TIM6 制御周期タイマーの初期化
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_control_timer() {
    let rcc = pac::RCC;
    let tim6 = pac::TIM6;

    rcc.apb1enr1().modify(|w| w.set_tim6en(true));

    tim6.cr1().modify(|w| w.set_cen(false));
    tim6.psc().write_value(0);
    let reload = (TIMER_CLOCK_HZ as f32 / DEFAULT_CONTROL_FREQUENCY_HZ) as u32 - 1;
    tim6.arr().write_value(pac::timer::regs::ArrCore(reload));

    tim6.dier().modify(|w| w.set_uie(true));

    // 優先度はEmbassyタスクより高くする（Priority 1 = 0x10）
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM6_DACUNDER);
        let mut cp = cortex_m::Peripherals::steal();
        cp.NVIC.set_priority(pac::Interrupt::TIM6_DACUNDER, 0x10);
    }

    tim6.cnt().write_value(pac::timer::regs::CntCore(0));
    tim6.sr().write(|w| w.0 = 0);
    tim6.egr().write(|w| w.set_ug(true));
    tim6.cr1().modify(|w| {
        w.set_urs(pac::timer::vals::Urs::COUNTER_ONLY);
        w.set_cen(true);
    });
}

/// TIM6割り込みハンドラー
///
/// # Safety
/// 割り込みコンテキストで実行されるため、処理は最小限にする
#[inline(always)]
pub unsafe fn control_irq_handler() {
    let tim6 = pac::TIM6;
    if !tim6.sr().read().uif() {
        return;
    }
    tim6.sr().modify(|w| w.set_uif(false));

    let inputs = sense::read_fast_inputs();
    cortex_m::interrupt::free(|cs| {
        if let Some(Plant { converter, stage }) = PLANT.borrow(cs).borrow_mut().as_mut() {
            converter.fast_step(&inputs, stage);
        }
    });
    CYCLE_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// TIM6割り込みのRust側エントリーポイント
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM6_DACUNDER() {
    control_irq_handler();
}
