//! Opus 风格低延迟音频编解码器.
//!
//! 两条编码路径共用一个区间编码器:
//! - 线性预测 (语音) 路径 `silk`: 8/12/16 kHz 内部采样率, 短时 + 长时预测
//! - 变换 (音乐) 路径 `celt`: 低重叠 MDCT, 临界频带能量 + PVQ 形状
//!
//! 混合模式下语音路径负责 8 kHz 以下, 变换路径从第 17 个频带开始.
//! 模式、带宽、帧长由 `mode` 中的控制器逐帧决定, 数据包格式见 `toc` 与 `framing`.

pub mod allocation;
pub mod analysis;
pub mod celt;
pub mod coder;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod framing;
pub mod head;
pub mod laplace;
pub mod mode;
pub mod multistream;
pub mod repacketizer;
pub mod silk;
pub mod toc;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use config::{DecoderConfig, EncoderConfig};
pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;
pub use multistream::{MultistreamDecoder, MultistreamEncoder, StreamMapping};

/// 支持的采样率
pub const SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// 单帧最大字节数
pub const MAX_FRAME_BYTES: usize = 1275;

/// 单个数据包最多容纳的帧数
pub const MAX_FRAMES_PER_PACKET: usize = 48;

/// 单个数据包的最大时长 (微秒)
pub const MAX_PACKET_DURATION_US: u32 = 120_000;

/// 是否为支持的采样率
pub fn is_valid_sample_rate(rate: u32) -> bool {
    SAMPLE_RATES.contains(&rate)
}

/// 编码模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// 仅线性预测路径
    Voice,
    /// 线性预测负责低频, 变换路径负责高频
    Hybrid,
    /// 仅变换路径
    Music,
}

impl Mode {
    /// 是否包含语音路径
    pub const fn has_voice(self) -> bool {
        matches!(self, Self::Voice | Self::Hybrid)
    }

    /// 是否包含变换路径
    pub const fn has_transform(self) -> bool {
        matches!(self, Self::Hybrid | Self::Music)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Voice => "voice",
            Self::Hybrid => "hybrid",
            Self::Music => "music",
        };
        write!(f, "{s}")
    }
}

/// 音频带宽
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// 4 kHz
    Narrow,
    /// 6 kHz
    Medium,
    /// 8 kHz
    Wide,
    /// 12 kHz
    SuperWide,
    /// 20 kHz
    Full,
}

impl Bandwidth {
    /// 全部带宽, 从窄到宽
    pub const ALL: [Bandwidth; 5] = [
        Self::Narrow,
        Self::Medium,
        Self::Wide,
        Self::SuperWide,
        Self::Full,
    ];

    /// 截止频率 (Hz)
    pub const fn cutoff_hz(self) -> u32 {
        match self {
            Self::Narrow => 4000,
            Self::Medium => 6000,
            Self::Wide => 8000,
            Self::SuperWide => 12000,
            Self::Full => 20000,
        }
    }

    /// 语音路径内部采样率, 超宽带及以上按宽带处理
    pub const fn voice_rate(self) -> u32 {
        match self {
            Self::Narrow => 8000,
            Self::Medium => 12000,
            _ => 16000,
        }
    }

    /// 采样率所能表示的最大带宽
    pub const fn max_for_rate(rate: u32) -> Self {
        match rate {
            0..=8000 => Self::Narrow,
            8001..=12000 => Self::Medium,
            12001..=16000 => Self::Wide,
            16001..=24000 => Self::SuperWide,
            _ => Self::Full,
        }
    }

    /// 在带宽序列中的位置
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Narrow => "NB",
            Self::Medium => "MB",
            Self::Wide => "WB",
            Self::SuperWide => "SWB",
            Self::Full => "FB",
        };
        write!(f, "{s}")
    }
}

/// 帧长
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrameDuration {
    /// 2.5 ms
    #[serde(rename = "2.5ms")]
    Ms2_5,
    /// 5 ms
    #[serde(rename = "5ms")]
    Ms5,
    /// 10 ms
    #[serde(rename = "10ms")]
    Ms10,
    /// 20 ms
    #[serde(rename = "20ms")]
    Ms20,
    /// 40 ms
    #[serde(rename = "40ms")]
    Ms40,
    /// 60 ms
    #[serde(rename = "60ms")]
    Ms60,
}

impl FrameDuration {
    /// 全部帧长, 从短到长
    pub const ALL: [FrameDuration; 6] = [
        Self::Ms2_5,
        Self::Ms5,
        Self::Ms10,
        Self::Ms20,
        Self::Ms40,
        Self::Ms60,
    ];

    /// 时长 (微秒)
    pub const fn micros(self) -> u32 {
        match self {
            Self::Ms2_5 => 2500,
            Self::Ms5 => 5000,
            Self::Ms10 => 10_000,
            Self::Ms20 => 20_000,
            Self::Ms40 => 40_000,
            Self::Ms60 => 60_000,
        }
    }

    /// 给定采样率下每声道的采样数
    pub const fn samples(self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.micros() as u64 / 1_000_000) as usize
    }

    /// 由时长 (微秒) 查找帧长
    pub fn from_micros(micros: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.micros() == micros)
    }

    /// 由采样数查找帧长
    pub fn from_samples(sample_rate: u32, samples: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.samples(sample_rate) == samples)
    }

    /// 变换路径的短块数以 2 为底的对数, 超过 20 ms 的帧没有对应值
    pub const fn lm(self) -> Option<usize> {
        match self {
            Self::Ms2_5 => Some(0),
            Self::Ms5 => Some(1),
            Self::Ms10 => Some(2),
            Self::Ms20 => Some(3),
            Self::Ms40 | Self::Ms60 => None,
        }
    }
}

impl fmt::Display for FrameDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let us = self.micros();
        if us % 1000 == 0 {
            write!(f, "{}ms", us / 1000)
        } else {
            write!(f, "{}.{}ms", us / 1000, (us % 1000) / 100)
        }
    }
}

/// 应用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Application {
    /// 语音通话, 偏向语音路径
    Voip,
    /// 通用音频, 偏向保真度
    Audio,
    /// 最低延迟, 只使用变换路径
    LowDelay,
}

/// 信号类型提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// 自动检测
    #[default]
    Auto,
    /// 语音
    Voice,
    /// 音乐
    Music,
}

/// 目标码率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bitrate {
    /// 按采样率和声道数自动选择
    #[default]
    Auto,
    /// 每帧使用最大字节数
    Max,
    /// 指定码率 (bits/s)
    Bits(u32),
}

impl Bitrate {
    /// 换算成 bits/s
    pub fn resolve(self, sample_rate: u32, channels: usize, frame_samples: usize) -> u32 {
        match self {
            Self::Auto => {
                let frame_samples = frame_samples.max(1) as u32;
                60 * sample_rate / frame_samples + sample_rate * channels as u32
            }
            Self::Max => 1_500_000,
            Self::Bits(bits) => bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_帧长换算() {
        assert_eq!(FrameDuration::Ms2_5.samples(8000), 20);
        assert_eq!(FrameDuration::Ms20.samples(48000), 960);
        assert_eq!(FrameDuration::Ms60.samples(12000), 720);
        assert_eq!(
            FrameDuration::from_samples(16000, 160),
            Some(FrameDuration::Ms10)
        );
        assert_eq!(FrameDuration::from_samples(16000, 161), None);
        assert_eq!(FrameDuration::Ms10.lm(), Some(2));
        assert_eq!(FrameDuration::Ms40.lm(), None);
        assert_eq!(FrameDuration::Ms2_5.to_string(), "2.5ms");
    }

    #[test]
    fn test_带宽与采样率() {
        assert_eq!(Bandwidth::max_for_rate(8000), Bandwidth::Narrow);
        assert_eq!(Bandwidth::max_for_rate(24000), Bandwidth::SuperWide);
        assert_eq!(Bandwidth::max_for_rate(48000), Bandwidth::Full);
        assert_eq!(Bandwidth::SuperWide.voice_rate(), 16000);
        assert!(Bandwidth::Narrow < Bandwidth::Full);
    }

    #[test]
    fn test_自动码率() {
        // 48 kHz 立体声 20 ms: 60 * 50 + 96000
        assert_eq!(Bitrate::Auto.resolve(48000, 2, 960), 99000);
        assert_eq!(Bitrate::Bits(24000).resolve(48000, 1, 960), 24000);
    }
}
