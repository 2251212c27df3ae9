//! TOC (table of contents) 字节.
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! | config  |s| c |
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! config 0..31 同时编码模式、带宽和帧长:
//! - 0..11: 语音模式, NB/MB/WB 各 4 档 (10/20/40/60 ms)
//! - 12..15: 混合模式, SWB/FB 各 2 档 (10/20 ms)
//! - 16..31: 音乐模式, NB/WB/SWB/FB 各 4 档 (2.5/5/10/20 ms)

use sheng_core::{ShengError, ShengResult};

use super::{Bandwidth, FrameDuration, Mode};

const VOICE_DURATIONS: [FrameDuration; 4] = [
    FrameDuration::Ms10,
    FrameDuration::Ms20,
    FrameDuration::Ms40,
    FrameDuration::Ms60,
];

const MUSIC_DURATIONS: [FrameDuration; 4] = [
    FrameDuration::Ms2_5,
    FrameDuration::Ms5,
    FrameDuration::Ms10,
    FrameDuration::Ms20,
];

const MUSIC_BANDWIDTHS: [Bandwidth; 4] = [
    Bandwidth::Narrow,
    Bandwidth::Wide,
    Bandwidth::SuperWide,
    Bandwidth::Full,
];

/// 解析后的 TOC 字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Toc {
    /// 配置编号 0..31
    pub config: u8,
    /// 立体声标志
    pub stereo: bool,
    /// 帧数编码 0..3
    pub code: u8,
}

impl Toc {
    /// 从字节解析
    pub const fn parse(byte: u8) -> Self {
        Self {
            config: byte >> 3,
            stereo: byte & 0x04 != 0,
            code: byte & 0x03,
        }
    }

    /// 由模式、带宽、帧长构造, 组合不存在时返回配置错误
    pub fn new(
        mode: Mode,
        bandwidth: Bandwidth,
        duration: FrameDuration,
        stereo: bool,
    ) -> ShengResult<Self> {
        let invalid = || {
            ShengError::InvalidConfig(format!(
                "不存在 {mode} 模式 {bandwidth} {duration} 的 TOC 配置"
            ))
        };
        let config = match mode {
            Mode::Voice => {
                let bw = match bandwidth {
                    Bandwidth::Narrow => 0,
                    Bandwidth::Medium => 1,
                    Bandwidth::Wide => 2,
                    _ => return Err(invalid()),
                };
                let d = VOICE_DURATIONS
                    .iter()
                    .position(|&d| d == duration)
                    .ok_or_else(invalid)?;
                bw * 4 + d
            }
            Mode::Hybrid => {
                let bw = match bandwidth {
                    Bandwidth::SuperWide => 0,
                    Bandwidth::Full => 1,
                    _ => return Err(invalid()),
                };
                let d = match duration {
                    FrameDuration::Ms10 => 0,
                    FrameDuration::Ms20 => 1,
                    _ => return Err(invalid()),
                };
                12 + bw * 2 + d
            }
            Mode::Music => {
                let bw = MUSIC_BANDWIDTHS
                    .iter()
                    .position(|&b| b == bandwidth)
                    .ok_or_else(invalid)?;
                let d = MUSIC_DURATIONS
                    .iter()
                    .position(|&d| d == duration)
                    .ok_or_else(invalid)?;
                16 + bw * 4 + d
            }
        };
        Ok(Self {
            config: config as u8,
            stereo,
            code: 0,
        })
    }

    /// 替换帧数编码
    pub const fn with_code(self, code: u8) -> Self {
        Self {
            config: self.config,
            stereo: self.stereo,
            code: code & 0x03,
        }
    }

    /// 编码为字节
    pub const fn to_byte(self) -> u8 {
        (self.config << 3) | ((self.stereo as u8) << 2) | (self.code & 0x03)
    }

    /// 编码模式
    pub const fn mode(self) -> Mode {
        match self.config {
            0..=11 => Mode::Voice,
            12..=15 => Mode::Hybrid,
            _ => Mode::Music,
        }
    }

    /// 音频带宽
    pub const fn bandwidth(self) -> Bandwidth {
        match self.config {
            0..=3 => Bandwidth::Narrow,
            4..=7 => Bandwidth::Medium,
            8..=11 => Bandwidth::Wide,
            12 | 13 => Bandwidth::SuperWide,
            14 | 15 => Bandwidth::Full,
            c => MUSIC_BANDWIDTHS[((c - 16) / 4) as usize],
        }
    }

    /// 每帧时长
    pub const fn frame_duration(self) -> FrameDuration {
        match self.config {
            0..=11 => VOICE_DURATIONS[(self.config % 4) as usize],
            12..=15 => {
                if self.config % 2 == 0 {
                    FrameDuration::Ms10
                } else {
                    FrameDuration::Ms20
                }
            }
            c => MUSIC_DURATIONS[(c % 4) as usize],
        }
    }

    /// 给定采样率下每帧每声道的采样数
    pub const fn samples_per_frame(self, sample_rate: u32) -> usize {
        self.frame_duration().samples(sample_rate)
    }

    /// 编码声道数
    pub const fn channels(self) -> usize {
        if self.stereo { 2 } else { 1 }
    }
}
