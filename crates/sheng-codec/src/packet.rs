//! 压缩数据包 (Packet).
//!
//! 表示一个完整的 Opus 风格数据包 (TOC 字节 + 若干帧 + 可选填充),
//! 或者一次丢包事件.

use bytes::Bytes;

/// 未知时间戳
pub const NOPTS_VALUE: i64 = i64::MIN;

/// 压缩数据包
#[derive(Debug, Clone)]
pub struct Packet {
    /// 压缩数据
    pub data: Bytes,
    /// 显示时间戳 (以采样为单位)
    pub pts: i64,
    /// 数据包时长 (以采样为单位)
    pub duration: i64,
    /// 所属流的索引
    pub stream_index: usize,
    /// 传输中丢失, 解码器需要做丢包隐藏
    pub lost: bool,
}

impl Packet {
    /// 创建空数据包
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            pts: NOPTS_VALUE,
            duration: 0,
            stream_index: 0,
            lost: false,
        }
    }

    /// 从数据创建数据包
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::empty()
        }
    }

    /// 表示一次丢包的数据包
    pub fn lost() -> Self {
        Self {
            lost: true,
            ..Self::empty()
        }
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空包 (flush packet)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && !self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_丢包与空包区分() {
        assert!(Packet::empty().is_empty());
        let lost = Packet::lost();
        assert!(lost.lost);
        assert!(!lost.is_empty());
        let pkt = Packet::from_data(vec![0x78u8, 1, 2]);
        assert_eq!(pkt.size(), 3);
        assert_eq!(pkt.pts, NOPTS_VALUE);
    }
}
