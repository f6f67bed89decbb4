//! ハードウェア初期化モジュール
//!
//! クロックとPWMの初期化ロジックを集約します。

use embassy_stm32::{
    gpio::OutputType,
    peripherals,
    time::Hertz,
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
        Channel,
    },
    Config, Peri,
};

/// 起動時のスイッチング周波数（ソフトスタート開始点）
pub const INITIAL_SWITCHING_FREQUENCY: Hertz = Hertz(300_000);

/// タイマークロック [Hz]
pub const TIMER_CLOCK_HZ: u32 = 170_000_000;

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

/// TIM1の相補PWMを初期化
///
/// - CH1 (PE9/PE8): 一次側ハーフブリッジ
/// - CH2 (PE11/PE10): 同期整流（SR）ゲート
///
/// 出力は無効状態で返す。有効化はコンバータ側が行う。
pub fn init_bridge_pwm(
    tim: Peri<'static, peripherals::TIM1>,
    pe9: Peri<'static, peripherals::PE9>,
    pe8: Peri<'static, peripherals::PE8>,
    pe11: Peri<'static, peripherals::PE11>,
    pe10: Peri<'static, peripherals::PE10>,
) -> ComplementaryPwm<'static, peripherals::TIM1> {
    let mut pwm = ComplementaryPwm::new(
        tim,
        Some(PwmPin::new(pe9, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(pe8, OutputType::PushPull)),
        Some(PwmPin::new(pe11, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(pe10, OutputType::PushPull)),
        None,
        None,
        None,
        None,
        INITIAL_SWITCHING_FREQUENCY,
        CountingMode::EdgeAlignedUp,
    );
    pwm.disable(Channel::Ch1);
    pwm.disable(Channel::Ch2);
    pwm.set_duty(Channel::Ch1, 0);
    pwm.set_duty(Channel::Ch2, 0);
    pwm
}

/// ナノ秒をタイマーカウントに変換
#[inline(always)]
pub fn ns_to_ticks(ns: i32) -> u32 {
    (ns.max(0) as u64 * TIMER_CLOCK_HZ as u64 / 1_000_000_000) as u32
}
