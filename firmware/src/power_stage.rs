//! LLCパワーステージ・ドライバー
//!
//! TIM1の相補PWMとDAC1を使ってコンバータの指令を出力します。
//! 一次側はCH1、同期整流はCH2で駆動し、CTピーク電流保護はTIM1の
//! ブレーク入力（BKIN）で遅延遮断されます。

use embassy_stm32::{
    pac, peripherals,
    time::Hertz,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};
use llc_control::{PowerStage, PwmCommand};

use crate::hardware::ns_to_ticks;
use crate::sense::share_bus_code;

/// LLCパワーステージ
pub struct LlcPowerStage {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    /// 直前に設定した周期 [ns]（周波数の再設定を省くため）
    period: i32,
}

impl LlcPowerStage {
    /// # 引数
    /// * `pwm` - 初期化済みのTIM1相補PWM（出力無効）
    pub fn new(pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        Self { pwm, period: 0 }
    }

    /// DAC1 CH1（PA4）を電流シェアバス駆動用に有効化
    ///
    /// # Safety
    /// PACを使用した直接的なレジスタ操作を含むため、unsafe
    pub unsafe fn init_share_dac() {
        pac::RCC.ahb2enr().modify(|w| w.set_dac1en(true));
        pac::DAC1.cr().modify(|w| w.set_en(0, true));
    }
}

impl PowerStage for LlcPowerStage {
    fn apply(&mut self, command: &PwmCommand) {
        if command.period != self.period && command.period > 0 {
            self.pwm
                .set_frequency(Hertz(1_000_000_000 / command.period as u32));
            self.period = command.period;
        }

        // Duty (Q16) → コンペア値
        let max_duty = self.pwm.get_max_duty() as u32;
        let primary = ((max_duty as u64 * command.duty.max(0) as u64) >> 16) as u32;
        self.pwm.set_duty(Channel::Ch1, primary as u16);

        // SRはターンオン遅延後に立ち上げ、ターンオフ前倒し分だけ早く切る
        let dt = &command.dead_times;
        let sr_window = ns_to_ticks(dt.sr_turn_on) + ns_to_ticks(dt.sr_turn_off);
        self.pwm
            .set_duty(Channel::Ch2, primary.saturating_sub(sr_window) as u16);

        self.pwm
            .set_dead_time(ns_to_ticks(dt.primary).min(u16::MAX as u32) as u16);
    }

    fn set_outputs_enabled(&mut self, enabled: bool) {
        if enabled {
            self.pwm.enable(Channel::Ch1);
            self.pwm.enable(Channel::Ch2);
        } else {
            self.pwm.disable(Channel::Ch1);
            self.pwm.disable(Channel::Ch2);
        }
    }

    fn clear_ct_trip(&mut self) {
        // ブレークフラグをクリアしてMOEを再設定
        let tim1 = pac::TIM1;
        tim1.sr().modify(|w| w.set_bif(false));
        tim1.bdtr().modify(|w| w.set_moe(true));
    }

    fn set_share_bus(&mut self, drive: i32) {
        pac::DAC1
            .dhr12r(0)
            .write(|w| w.set_dhr(share_bus_code(drive)));
    }
}
