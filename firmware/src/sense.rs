//! 高速ループ用の計測入力
//!
//! ADC1/ADC2のインジェクテッド変換（TIM1 TRGOトリガー）の結果と、
//! 保護系のデジタル入力をPACで直接読み取ります。
//!
//! ## 入力割り当て
//! - ADC1 JDR1: 出力電圧（負荷端）
//! - ADC1 JDR2: 出力電圧（内部）
//! - ADC1 JDR3: 出力電流
//! - ADC2 JDR1: 電流シェア（自機）
//! - ADC2 JDR2: 電流シェアバス
//! - PB12: 運転指令、PB13: 出力過電圧、PB14: CTピーク電流コンパレータ

use embassy_stm32::pac;
use llc_control::{FastInputs, RawSamples};

/// 出力電圧 [10mV/count]（分圧 1/20、3.3V/4096）
const VOUT_PER_COUNT: f32 = 3.3 / 4096.0 * 20.0 * 100.0;
/// 出力電流 [10mA/count]（シャント 0.2mΩ × 50倍アンプ）
const IOUT_PER_COUNT: f32 = 3.3 / 4096.0 / (0.2e-3 * 50.0) * 100.0;
/// 電流シェアバス [10mA/count]（フルスケール 160A）
const SHARE_PER_COUNT: f32 = 16_000.0 / 4096.0;

const PIN_ENABLE: usize = 12;
const PIN_OVER_VOLTAGE: usize = 13;
const PIN_CT_COMPARATOR: usize = 14;

/// ADCインジェクテッド変換の初期化
///
/// # Safety
/// PACを使用した直接的なレジスタ操作を含むため、unsafe
pub unsafe fn init_injected_adc() {
    let rcc = pac::RCC;
    rcc.ahb2enr().modify(|w| {
        w.set_adc12en(true);
        w.set_gpioben(true);
    });

    // PB12-14: 入力（プルダウン）
    let gpiob = pac::GPIOB;
    for pin in [PIN_ENABLE, PIN_OVER_VOLTAGE, PIN_CT_COMPARATOR] {
        gpiob
            .moder()
            .modify(|w| w.set_moder(pin, pac::gpio::vals::Moder::INPUT));
        gpiob
            .pupdr()
            .modify(|w| w.set_pupdr(pin, pac::gpio::vals::Pupdr::PULL_DOWN));
    }

    // ADC1: JL=2（3変換）CH1, CH2, CH3、ADC2: JL=1（2変換）CH3, CH4
    // JEXTSEL = TIM1_TRGO、立ち上がりエッジ
    pac::ADC1.jsqr().write(|w| {
        w.set_jl(2);
        w.set_jextsel(0);
        w.set_jexten(pac::adc::vals::Exten::RISING_EDGE);
        w.set_jsq(0, 1);
        w.set_jsq(1, 2);
        w.set_jsq(2, 3);
    });
    pac::ADC2.jsqr().write(|w| {
        w.set_jl(1);
        w.set_jextsel(0);
        w.set_jexten(pac::adc::vals::Exten::RISING_EDGE);
        w.set_jsq(0, 3);
        w.set_jsq(1, 4);
    });
    pac::ADC1.cr().modify(|w| w.set_jadstart(true));
    pac::ADC2.cr().modify(|w| w.set_jadstart(true));
}

#[inline(always)]
fn scale(raw: u16, per_count: f32) -> i32 {
    (raw as f32 * per_count) as i32
}

/// 最新の変換結果と保護入力を読み取る
///
/// # Safety
/// 制御割り込みからのみ呼ぶこと
#[inline(always)]
pub unsafe fn read_fast_inputs() -> FastInputs {
    let adc1 = pac::ADC1;
    let adc2 = pac::ADC2;
    let idr = pac::GPIOB.idr().read();

    FastInputs {
        samples: RawSamples {
            vout_ext: scale(adc1.jdr(0).read().jdata(), VOUT_PER_COUNT),
            vout_int: scale(adc1.jdr(1).read().jdata(), VOUT_PER_COUNT),
            iout: scale(adc1.jdr(2).read().jdata(), IOUT_PER_COUNT),
        },
        share_local: scale(adc2.jdr(0).read().jdata(), SHARE_PER_COUNT),
        share_bus: scale(adc2.jdr(1).read().jdata(), SHARE_PER_COUNT),
        enable: idr.idr(PIN_ENABLE) as u8 != 0,
        over_voltage: idr.idr(PIN_OVER_VOLTAGE) as u8 != 0,
        ct_trip: pac::TIM1.sr().read().bif(),
        ct_comparator_active: idr.idr(PIN_CT_COMPARATOR) as u8 != 0,
    }
}

/// 電流シェアバスの駆動値 [10mA] をDACコードに変換
pub fn share_bus_code(drive: i32) -> u16 {
    let code = libm::roundf(drive.max(0) as f32 / SHARE_PER_COUNT);
    (code as u32).min(4095) as u16
}
