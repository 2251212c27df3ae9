//! 每帧比特分配记录.
//!
//! 帧的字节预算由码率与帧长决定, 混合模式下再按带宽把预算拆给语音路径与变换路径.
//! 变换路径内部的逐频带分配 (`celt::rate::Allocation`) 只依赖码流中的整数,
//! 解码端会得到同样的结果.

use super::celt::rate::Allocation;
use super::silk::{self, INACTIVE_FRAME_BITS};
use super::{Bandwidth, FrameDuration, MAX_FRAME_BYTES, Mode};

/// 单帧最少字节数
pub const MIN_FRAME_BYTES: usize = 3;

/// 语音帧为结束区间编码保留的位数
pub const VOICE_RESERVE_BITS: u32 = 8;

/// 混合模式下语音路径每声道的码率上限 (bits/s)
const HYBRID_VOICE_CAP: u32 = 24000;

/// 一帧的比特分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitAllocation {
    /// 帧 (区间编码器存储) 的字节数
    pub frame_bytes: usize,
    /// 语音路径可用的位数, 以区间编码器 `tell()` 计
    pub voice_bits: u32,
    /// 变换路径可用的位数
    pub transform_bits: u32,
    /// 变换路径逐频带的分配, 编码后填入
    pub bands: Option<Allocation>,
}

impl BitAllocation {
    /// 整帧位数
    pub fn total_bits(&self) -> u32 {
        (self.frame_bytes * 8) as u32
    }
}

/// 由码率换算的每帧字节数, 限制在 [`MIN_FRAME_BYTES`, `MAX_FRAME_BYTES`]
pub fn frame_bytes(bitrate: u32, duration: FrameDuration) -> usize {
    let bytes = u64::from(bitrate) * u64::from(duration.micros()) / 8_000_000;
    (bytes as usize).clamp(MIN_FRAME_BYTES, MAX_FRAME_BYTES)
}

/// 一帧全部按静默语音帧编码所需的最少字节数
///
/// 帧预算不低于该值, 溢出时退回的静音帧因此总能写下. 纯变换帧的静音标志
/// 在 [`MIN_FRAME_BYTES`] 内即可写下.
pub fn min_frame_bytes(mode: Mode, duration: FrameDuration, channels: usize) -> usize {
    if !mode.has_voice() {
        return MIN_FRAME_BYTES;
    }
    let voice_frames = silk::split_duration(duration.micros()).map_or(1, |(_, n)| n) as u32;
    let bits =
        VOICE_RESERVE_BITS + voice_frames * channels.clamp(1, 2) as u32 * INACTIVE_FRAME_BITS;
    // 再留一字节给区间编码器收尾
    (bits.div_ceil(8) as usize + 1).max(MIN_FRAME_BYTES)
}

/// 按模式拆分一帧的预算
pub fn split_budget(
    mode: Mode,
    bandwidth: Bandwidth,
    frame_bytes: usize,
    duration: FrameDuration,
    channels: usize,
) -> BitAllocation {
    let total = (frame_bytes * 8) as u32;
    let (voice_bits, transform_bits) = match mode {
        Mode::Voice => (total, 0),
        Mode::Music => (0, total),
        Mode::Hybrid => {
            // 超宽带给语音路径约 60%, 全带约 50%, 语音路径码率有上限
            let share = if bandwidth == Bandwidth::SuperWide {
                0.6
            } else {
                0.5
            };
            let cap = u64::from(HYBRID_VOICE_CAP)
                * channels.max(1) as u64
                * u64::from(duration.micros())
                / 1_000_000;
            let voice = ((total as f32 * share) as u64).min(cap) as u32;
            (voice, total - voice)
        }
    };
    BitAllocation {
        frame_bytes,
        voice_bits,
        transform_bits,
        bands: None,
    }
}
