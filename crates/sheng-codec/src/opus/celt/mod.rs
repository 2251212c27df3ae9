//! 变换 (音乐) 编码路径.
//!
//! 每帧对 N + ov 个样本做低重叠 MDCT, 瞬态帧改用 2^LM 个短块. 系数按临界频带分组,
//! 每个频带先编码对数能量 (粗量化 + 细量化), 再用 PVQ 编码归一化后的形状.
//! 比特分配只依赖码流中已编码的整数与 `tell_frac`, 编解码两端因此严格同步.
//!
//! 系数布局与采样率无关: 第 j 个系数对应 (j + 0.5) * 200 / 2^LM Hz,
//! 频带处理在 48 kHz 等效的 120 << LM 个系数上进行, 低采样率只使用前面一部分.

pub mod bands;
pub mod decoder;
pub mod encoder;
pub mod energy;
pub mod mdct;
pub mod pvq;
pub mod rate;
pub mod syntax;

pub use decoder::CeltDecoder;
pub use encoder::{CeltEncoder, FrameParams};

use super::Bandwidth;

/// 频带数
pub const NB_EBANDS: usize = 21;

/// 最大 LM (20 ms)
pub const MAX_LM: usize = 3;

/// 混合模式下变换路径的起始频带 (8 kHz)
pub const HYBRID_START_BAND: usize = 17;

/// 2.5 ms 帧 (LM = 0) 下的频带边界, 单位为系数
pub const EBAND_5MS: [usize; NB_EBANDS + 1] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40, 48, 60, 78, 100,
];

/// 48 kHz 等效下 2.5 ms 帧的系数个数
pub const SHORT_COEFFS_48K: usize = 120;

/// 频带在 LM 下的起始系数
pub const fn band_start(band: usize, lm: usize) -> usize {
    EBAND_5MS[band] << lm
}

/// 频带在 LM 下的宽度
pub const fn band_width(band: usize, lm: usize) -> usize {
    (EBAND_5MS[band + 1] - EBAND_5MS[band]) << lm
}

/// 频带在 LM = 0 下的宽度 (短块中每块的宽度)
pub const fn band_width_short(band: usize) -> usize {
    EBAND_5MS[band + 1] - EBAND_5MS[band]
}

/// 给定带宽的编码终止频带 (不含)
pub const fn end_band(bandwidth: Bandwidth) -> usize {
    match bandwidth {
        Bandwidth::Narrow => 13,
        Bandwidth::Medium => 15,
        Bandwidth::Wide => 17,
        Bandwidth::SuperWide => 19,
        Bandwidth::Full => 21,
    }
}

/// 给定采样率下的重叠长度 (2.5 ms)
pub const fn overlap(sample_rate: u32) -> usize {
    (sample_rate / 400) as usize
}

/// 给定采样率与 LM 下每帧的系数个数
pub const fn frame_coeffs(sample_rate: u32, lm: usize) -> usize {
    overlap(sample_rate) << lm
}

/// 48 kHz 等效的系数缓冲长度
pub const fn coeffs_48k(lm: usize) -> usize {
    SHORT_COEFFS_48K << lm
}

/// 帧中的短块数
pub const fn short_blocks(lm: usize, transient: bool) -> usize {
    if transient { 1 << lm } else { 1 }
}
