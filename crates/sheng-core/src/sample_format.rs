//! 音频采样格式定义.

use std::fmt;

/// 音频采样格式
///
/// 编解码核心内部使用 32 位浮点, 对外同时支持 16 位整数.
/// 交错排列: 所有声道的采样点交替排列, 如 LRLRLR...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 未指定
    None,
    /// 有符号 16 位整数, 交错
    S16,
    /// 32 位浮点, 交错, 满幅为 ±1.0
    F32,
}

impl SampleFormat {
    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::S16 => "s16",
            Self::F32 => "flt",
        };
        write!(f, "{name}")
    }
}
