//! 音频声道布局.
//!
//! 1 到 8 声道的默认布局按 Vorbis 声道顺序排列扬声器, 与多流映射族 1 的
//! 交错顺序一致. 超出 8 声道或映射族 255 的布局只记录声道数.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// 扬声器位置掩码
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u32 {
        const FRONT_LEFT    = 1 << 0;
        const FRONT_RIGHT   = 1 << 1;
        const FRONT_CENTER  = 1 << 2;
        const LOW_FREQUENCY = 1 << 3;
        const BACK_LEFT     = 1 << 4;
        const BACK_RIGHT    = 1 << 5;
        const BACK_CENTER   = 1 << 8;
        const SIDE_LEFT     = 1 << 9;
        const SIDE_RIGHT    = 1 << 10;
    }
}

const FL: ChannelMask = ChannelMask::FRONT_LEFT;
const FR: ChannelMask = ChannelMask::FRONT_RIGHT;
const FC: ChannelMask = ChannelMask::FRONT_CENTER;
const LFE: ChannelMask = ChannelMask::LOW_FREQUENCY;
const BL: ChannelMask = ChannelMask::BACK_LEFT;
const BR: ChannelMask = ChannelMask::BACK_RIGHT;
const BC: ChannelMask = ChannelMask::BACK_CENTER;
const SL: ChannelMask = ChannelMask::SIDE_LEFT;
const SR: ChannelMask = ChannelMask::SIDE_RIGHT;

/// Vorbis 顺序下第 n 个布局 (n+1 声道) 的扬声器排列
const VORBIS_ORDER: [&[ChannelMask]; 8] = [
    &[FC],
    &[FL, FR],
    &[FL, FC, FR],
    &[FL, FR, BL, BR],
    &[FL, FC, FR, BL, BR],
    &[FL, FC, FR, BL, BR, LFE],
    &[FL, FC, FR, SL, SR, BC, LFE],
    &[FL, FC, FR, SL, SR, BL, BR, LFE],
];

/// 声道布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    pub channels: u32,
    /// 扬声器位置, 非标准布局为空
    pub mask: ChannelMask,
}

impl ChannelLayout {
    pub const MONO: Self = Self {
        channels: 1,
        mask: FC,
    };

    pub const STEREO: Self = Self {
        channels: 2,
        mask: FL.union(FR),
    };

    /// 按声道数取默认布局
    pub fn from_channels(channels: u32) -> Self {
        let mask = Self::order_for(channels)
            .map(|order| order.iter().fold(ChannelMask::empty(), |m, s| m | *s))
            .unwrap_or(ChannelMask::empty());
        Self { channels, mask }
    }

    fn order_for(channels: u32) -> Option<&'static [ChannelMask]> {
        let idx = (channels as usize).checked_sub(1)?;
        VORBIS_ORDER.get(idx).copied()
    }

    /// 交错数据中各声道对应的扬声器, 非标准布局返回 None
    pub fn speakers(&self) -> Option<&'static [ChannelMask]> {
        Self::order_for(self.channels).filter(|_| self.is_positional())
    }

    /// 低频效果声道在交错数据中的下标
    pub fn lfe_index(&self) -> Option<usize> {
        self.speakers()?.iter().position(|s| *s == LFE)
    }

    /// 是否为带位置信息的标准布局
    pub fn is_positional(&self) -> bool {
        self.mask.bits().count_ones() == self.channels
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.channels, self.lfe_index()) {
            (1, _) => write!(f, "mono"),
            (2, _) => write!(f, "stereo"),
            (n, Some(_)) => write!(f, "{}.1", n - 1),
            (n, None) => write!(f, "{n}ch"),
        }
    }
}
