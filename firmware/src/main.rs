#![no_std]
#![no_main]

mod fmt;

mod calibration_store;
mod control_tim;
mod hardware;
mod power_stage;
mod sense;
mod state;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use core::sync::atomic::Ordering;

use embassy_executor::Spawner;
use embassy_stm32::{
    crc::{Config as CrcConfig, Crc},
    exti::ExtiInput,
    gpio::{Input, Level, Output, Pull, Speed},
};
use embassy_time::{Duration, Timer};
use llc_control::{LlcConfig, LlcConverter};

use power_stage::LlcPowerStage;
use state::{Plant, CALIBRATION, CT_FAULT_CLEAR_REQUEST, PLANT};
use tasks::{housekeeping_task, led_task, line_sync_task};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("═══════════════════════════════════════════════");
    info!("  LLC DC-DC secondary control • STM32G431VB @ 170MHz");
    info!("═══════════════════════════════════════════════");

    // コンバータ設定（既定値は量産キャリブレーション）
    let llc_config = LlcConfig::default();
    let converter = match LlcConverter::new(&llc_config) {
        Ok(converter) => converter,
        Err(e) => {
            error!("Invalid converter configuration: {}", e);
            loop {
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    };
    info!(
        "Converter ready: light load={}, share={}, latch={}",
        llc_config.features.light_load,
        llc_config.features.current_share,
        llc_config.features.ocp_latch
    );

    // キャリブレーション読み込み（CRC-32、poly=0x04C11DB7）
    let crc_config = CrcConfig::new(
        embassy_stm32::crc::InputReverseConfig::None,
        false, // reverse_out
        embassy_stm32::crc::PolySize::Width32,
        0xFFFFFFFF, // crc_init_value
        0x04C11DB7, // crc_poly (CRC-32)
    )
    .unwrap();
    let mut crc = Crc::new(p.CRC, crc_config);
    *CALIBRATION.lock().await = Some(calibration_store::load_or_default(&mut crc));

    // ステータスLED
    let led = Output::new(p.PC13, Level::High, Speed::Low);
    spawner.spawn(led_task(led)).unwrap();

    // PWM初期化（TIM1、一次側 + SR）
    let pwm = hardware::init_bridge_pwm(p.TIM1, p.PE9, p.PE8, p.PE11, p.PE10);
    let stage = LlcPowerStage::new(pwm);

    // ADCインジェクテッド変換と電流シェアバスDAC
    unsafe {
        sense::init_injected_adc();
        LlcPowerStage::init_share_dac();
    }

    cortex_m::interrupt::free(|cs| {
        PLANT
            .borrow(cs)
            .replace(Some(Plant { converter, stage }));
    });

    // 一次側からの信号
    let high_line = Input::new(p.PC0, Pull::Down);
    let standby = Input::new(p.PC2, Pull::Down);
    spawner
        .spawn(housekeeping_task(high_line, standby))
        .unwrap();

    let zero_cross = ExtiInput::new(p.PA0, p.EXTI0, Pull::None);
    spawner.spawn(line_sync_task(zero_cross)).unwrap();

    // 高速制御ループ開始（TIM6割り込み）
    unsafe {
        control_tim::init_control_timer();
    }
    info!("Control loop started");

    // メインループ: 故障リセットボタンの監視と制御周期の確認
    let fault_reset = Input::new(p.PC3, Pull::Up);
    let mut ticks = 0u32;
    loop {
        Timer::after(Duration::from_millis(100)).await;

        if fault_reset.is_low() {
            *CT_FAULT_CLEAR_REQUEST.lock().await = true;
        }

        ticks += 1;
        if ticks == 10 {
            ticks = 0;
            let cycles = control_tim::CYCLE_COUNTER.swap(0, Ordering::Relaxed);
            debug!("Control cycles per second: {}", cycles);
        }
    }
}
