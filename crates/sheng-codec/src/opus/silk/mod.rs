//! 线性预测 (语音) 路径.
//!
//! 内部采样率 8/12/16 kHz, 语音帧 10 或 20 ms, 子帧 5 ms. 每帧传输 LSF 形式的短时预测
//! 滤波器、逐子帧的量化步长, 浊音帧另有基音延迟与长时预测增益, 最后是噪声整形量化器
//! 产生的脉冲. 立体声以时域中侧两个独立声道传输.
//!
//! 40/60 ms 的数据包帧由 2/3 个连续的 20 ms 语音帧组成, 由上层逐个调用.

pub mod decoder;
pub mod encoder;
pub mod lpc;
pub mod lsf;
pub mod nsq;
pub mod pitch;
pub mod state;
pub mod syntax;
pub mod tables;

pub use decoder::VoiceDecoder;
pub use encoder::VoiceEncoder;
pub use syntax::{FrameType, VoiceFrameIndices};

/// 子帧时长 (微秒)
pub const SUBFRAME_US: u32 = 5000;

/// 单个语音帧的最大时长 (微秒)
pub const MAX_VOICE_FRAME_US: u32 = 20_000;

/// 一个编码声道的静默帧代价上限 (位): 帧类型约 3.3 位, 舒适噪声电平约 6.3 位
pub const INACTIVE_FRAME_BITS: u32 = 12;

/// 语音帧结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceLayout {
    /// 内部采样率
    pub rate: u32,
    /// 子帧数, 2 (10 ms) 或 4 (20 ms)
    pub subframes: usize,
}

impl VoiceLayout {
    pub fn new(rate: u32, subframes: usize) -> Self {
        Self { rate, subframes }
    }

    /// 由语音帧时长构造, 只接受 10 ms 与 20 ms
    pub fn for_duration(rate: u32, micros: u32) -> Option<Self> {
        match micros {
            10_000 => Some(Self::new(rate, 2)),
            20_000 => Some(Self::new(rate, 4)),
            _ => None,
        }
    }

    pub fn subframe_len(&self) -> usize {
        (self.rate as u64 * u64::from(SUBFRAME_US) / 1_000_000) as usize
    }

    pub fn frame_len(&self) -> usize {
        self.subframe_len() * self.subframes
    }

    /// 短时预测阶数
    pub fn order(&self) -> usize {
        lpc::order_for_rate(self.rate)
    }
}

/// 把一个数据包帧拆成语音帧, 返回 (语音帧时长, 个数)
pub fn split_duration(micros: u32) -> Option<(u32, usize)> {
    match micros {
        10_000 | 20_000 => Some((micros, 1)),
        40_000 => Some((20_000, 2)),
        60_000 => Some((20_000, 3)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_帧结构() {
        let l = VoiceLayout::for_duration(16000, 20_000).unwrap();
        assert_eq!(l.subframe_len(), 80);
        assert_eq!(l.frame_len(), 320);
        assert_eq!(l.order(), 16);
        let l = VoiceLayout::for_duration(12000, 10_000).unwrap();
        assert_eq!(l.frame_len(), 120);
        assert_eq!(l.order(), 10);
        assert!(VoiceLayout::for_duration(8000, 5000).is_none());
        assert_eq!(split_duration(60_000), Some((20_000, 3)));
        assert_eq!(split_duration(2500), None);
    }
}
