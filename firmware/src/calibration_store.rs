//! フラッシュに保存されたキャリブレーション値
//!
//! STM32G431VBの最終フラッシュページ（ページ63）に量産工程で書き込まれた
//! 計測キャリブレーションを読み込みます。ヘッダかCRCが不正な場合は
//! ユニティ（無補正）で運転します。

use embassy_stm32::crc::Crc;
use llc_control::fixed::Q12;
use llc_control::Calibration;

/// 最終ページの開始アドレス（128KB - 2KB = 0x0801F800）
pub const LAST_PAGE_START: u32 = 0x0801F800;

/// キャリブレーションデータのマジックナンバー（"CAL1"のASCII）
pub const CALIBRATION_MAGIC: u32 = 0x314C4143;

/// 現在のデータバージョン
pub const CALIBRATION_VERSION: u16 = 1;

/// 読み込み失敗の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// マジックナンバー不一致（未書き込み）
    InvalidMagic,
    /// バージョン不一致
    VersionMismatch,
    /// CRC検証エラー
    CrcMismatch,
}

/// フラッシュ上のレイアウト
///
/// ゲインはQ12の生値、オフセットは10mA単位
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StoredCalibration {
    pub magic: u32,
    pub version: u16,
    _padding: u16,
    pub vout_gain: i32,
    pub iout_gain: i32,
    pub vref_factor: i32,
    pub share_gain: i32,
    pub share_offset: i32,
    /// CRC32チェックサム（最後に配置）
    pub crc32: u32,
}

impl StoredCalibration {
    /// CRC対象のワード数（CRC32フィールドを除く）
    const CRC_WORDS: usize = core::mem::size_of::<Self>() / 4 - 1;

    /// CRC32フィールドを除くワード列
    fn words_for_crc(&self) -> [u32; Self::CRC_WORDS] {
        [
            self.magic,
            self.version as u32 | (self._padding as u32) << 16,
            self.vout_gain as u32,
            self.iout_gain as u32,
            self.vref_factor as u32,
            self.share_gain as u32,
            self.share_offset as u32,
        ]
    }

    /// CRC32チェックサムを計算
    pub fn calculate_crc(&self, crc: &mut Crc) -> u32 {
        crc.reset();
        crc.feed_words(&self.words_for_crc())
    }

    /// ヘッダとCRCを検証してキャリブレーション値に変換
    pub fn to_calibration(&self, crc: &mut Crc) -> Result<Calibration, StoreError> {
        if self.magic != CALIBRATION_MAGIC {
            return Err(StoreError::InvalidMagic);
        }
        if self.version != CALIBRATION_VERSION {
            return Err(StoreError::VersionMismatch);
        }
        if self.calculate_crc(crc) != self.crc32 {
            return Err(StoreError::CrcMismatch);
        }
        Ok(Calibration {
            vout_gain: Q12::from_raw(self.vout_gain),
            iout_gain: Q12::from_raw(self.iout_gain),
            vref_factor: Q12::from_raw(self.vref_factor),
            share_gain: Q12::from_raw(self.share_gain),
            share_offset: self.share_offset,
        })
    }
}

/// フラッシュからキャリブレーションを読み込む
pub fn read_calibration(crc: &mut Crc) -> Result<Calibration, StoreError> {
    // フラッシュはメモリマップされているので直接読む
    let stored = unsafe {
        core::ptr::read_volatile(LAST_PAGE_START as *const StoredCalibration)
    };
    stored.to_calibration(crc)
}

/// 読み込みに失敗したらユニティで運転
pub fn load_or_default(crc: &mut Crc) -> Calibration {
    match read_calibration(crc) {
        Ok(calibration) => {
            info!("Calibration loaded from flash at 0x{:08X}", LAST_PAGE_START);
            calibration
        }
        Err(e) => {
            warn!("No valid calibration ({}), using unity gains", e);
            Calibration::default()
        }
    }
}

// コンパイル時にCRCワード数とレイアウトの一致を確認
const _: () = {
    assert!(core::mem::size_of::<StoredCalibration>() % 4 == 0);
    assert!(StoredCalibration::CRC_WORDS == 7);
};
