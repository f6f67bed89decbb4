//! グローバル共有状態管理
//!
//! コンバータ本体は制御割り込みとハウスキーピングタスクの両方から
//! 触るため、クリティカルセクションで保護します。タスク間だけで共有する
//! 値はembassyのMutexで保護します。

use core::cell::RefCell;
use core::sync::atomic::AtomicU16;

use cortex_m::interrupt::Mutex as IrqMutex;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::mutex::Mutex;
use llc_control::{Calibration, LlcConverter, LlcStatus};

use crate::power_stage::LlcPowerStage;

/// コンバータとその出力先
pub struct Plant {
    pub converter: LlcConverter,
    pub stage: LlcPowerStage,
}

/// 制御割り込みとハウスキーピングで共有するコンバータ本体
pub static PLANT: IrqMutex<RefCell<Option<Plant>>> = IrqMutex::new(RefCell::new(None));

/// 最新のコンバータステータス（ハウスキーピングが更新）
pub static LLC_STATUS: Mutex<ThreadModeRawMutex, Option<LlcStatus>> = Mutex::new(None);

/// キャリブレーション値（未設定時はユニティ）
pub static CALIBRATION: Mutex<ThreadModeRawMutex, Option<Calibration>> = Mutex::new(None);

/// ラッチされたCT過電流の解除要求
pub static CT_FAULT_CLEAR_REQUEST: Mutex<ThreadModeRawMutex, bool> = Mutex::new(false);

/// 入力ライン周波数 [100mHz]（ゼロクロス計測タスクが更新）
pub static LINE_FREQUENCY: AtomicU16 = AtomicU16::new(0);
