//! 数据包重组.
//!
//! 把多个 TOC 配置相同的数据包中的帧合并为一个数据包, 或取出其中一段帧重新打包.
//! 另提供把数据包填充到指定长度与去除填充的辅助函数.

use sheng_core::{ShengError, ShengResult};

use super::framing::{PacketOptions, build_packet, parse_packet};
use super::toc::Toc;
use super::{MAX_FRAMES_PER_PACKET, MAX_PACKET_DURATION_US};

/// 帧收集器
#[derive(Debug, Clone, Default)]
pub struct Repacketizer {
    toc: Option<Toc>,
    frames: Vec<Vec<u8>>,
}

impl Repacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空已收集的帧
    pub fn reset(&mut self) {
        self.toc = None;
        self.frames.clear();
    }

    /// 已收集的帧数
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// 已收集的总时长 (微秒)
    pub fn duration_us(&self) -> u32 {
        self.toc
            .map_or(0, |t| t.frame_duration().micros() * self.frames.len() as u32)
    }

    /// 追加一个数据包的全部帧
    ///
    /// TOC 配置或声道标志与已收集的帧不同, 或合并后超过 48 帧 / 120 ms 时返回错误,
    /// 此时已收集的内容不变.
    pub fn cat(&mut self, packet: &[u8]) -> ShengResult<()> {
        let parsed = parse_packet(packet)?;
        let mismatch = self
            .toc
            .filter(|t| t.config != parsed.toc.config || t.stereo != parsed.toc.stereo);
        if let Some(toc) = mismatch {
            return Err(ShengError::InvalidArgument(format!(
                "TOC 配置不一致: {} / {}, 立体声 {} / {}",
                toc.config, parsed.toc.config, toc.stereo, parsed.toc.stereo
            )));
        }
        let count = self.frames.len() + parsed.frames.len();
        let total_us = parsed.toc.frame_duration().micros() * count as u32;
        if count > MAX_FRAMES_PER_PACKET || total_us > MAX_PACKET_DURATION_US {
            return Err(ShengError::InvalidArgument(format!(
                "合并后 {count} 帧共 {total_us} us, 超出单个数据包上限"
            )));
        }
        self.toc = Some(parsed.toc);
        self.frames.extend(parsed.frames.iter().map(|f| f.to_vec()));
        Ok(())
    }

    /// 把第 `begin..end` 帧打包为一个数据包
    pub fn out_range(
        &self,
        begin: usize,
        end: usize,
        options: PacketOptions,
    ) -> ShengResult<Vec<u8>> {
        let toc = self
            .toc
            .ok_or_else(|| ShengError::InvalidArgument("尚未收集任何帧".into()))?;
        if begin >= end || end > self.frames.len() {
            return Err(ShengError::InvalidArgument(format!(
                "帧范围 {begin}..{end} 无效, 共 {} 帧",
                self.frames.len()
            )));
        }
        let frames: Vec<&[u8]> = self.frames[begin..end].iter().map(Vec::as_slice).collect();
        build_packet(toc, &frames, options)
    }

    /// 把全部帧打包为一个数据包
    pub fn out(&self) -> ShengResult<Vec<u8>> {
        self.out_range(0, self.frames.len(), PacketOptions::default())
    }
}

/// 把数据包填充到 `new_len` 字节
pub fn pad(packet: &[u8], new_len: usize) -> ShengResult<Vec<u8>> {
    if new_len < packet.len() {
        return Err(ShengError::InvalidArgument(format!(
            "目标长度 {new_len} 小于数据包长度 {}",
            packet.len()
        )));
    }
    if new_len == packet.len() {
        return Ok(packet.to_vec());
    }
    let parsed = parse_packet(packet)?;
    build_packet(
        parsed.toc,
        &parsed.frames,
        PacketOptions {
            pad_to: Some(new_len),
            ..PacketOptions::default()
        },
    )
}

/// 去除填充, 以最紧凑的帧数编码重新打包
pub fn unpad(packet: &[u8]) -> ShengResult<Vec<u8>> {
    let parsed = parse_packet(packet)?;
    build_packet(parsed.toc, &parsed.frames, PacketOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opus::{Bandwidth, FrameDuration, Mode};

    fn toc(dur: FrameDuration) -> Toc {
        Toc::new(Mode::Music, Bandwidth::Full, dur, false).unwrap()
    }

    fn packet(dur: FrameDuration, frames: &[&[u8]]) -> Vec<u8> {
        build_packet(toc(dur), frames, PacketOptions::default()).unwrap()
    }

    #[test]
    fn test_合并与拆分() {
        let mut rp = Repacketizer::new();
        rp.cat(&packet(FrameDuration::Ms20, &[&[1, 2, 3]])).unwrap();
        rp.cat(&packet(FrameDuration::Ms20, &[&[4, 5], &[6, 7, 8, 9]])).unwrap();
        assert_eq!(rp.frame_count(), 3);
        assert_eq!(rp.duration_us(), 60_000);

        let merged = rp.out().unwrap();
        let parsed = parse_packet(&merged).unwrap();
        assert_eq!(parsed.toc.code, 3);
        assert_eq!(
            parsed.frames,
            vec![&[1u8, 2, 3][..], &[4, 5], &[6, 7, 8, 9]]
        );

        let middle = rp.out_range(1, 2, PacketOptions::default()).unwrap();
        let parsed = parse_packet(&middle).unwrap();
        assert_eq!(parsed.toc.code, 0);
        assert_eq!(parsed.frames, vec![&[4u8, 5][..]]);
        assert!(rp.out_range(2, 2, PacketOptions::default()).is_err());
        assert!(rp.out_range(0, 4, PacketOptions::default()).is_err());
    }

    #[test]
    fn test_配置不一致或超时长被拒绝() {
        let mut rp = Repacketizer::new();
        rp.cat(&packet(FrameDuration::Ms20, &[&[1]])).unwrap();
        assert!(rp.cat(&packet(FrameDuration::Ms10, &[&[1]])).is_err());
        for _ in 0..5 {
            rp.cat(&packet(FrameDuration::Ms20, &[&[1]])).unwrap();
        }
        // 已有 120 ms
        assert!(rp.cat(&packet(FrameDuration::Ms20, &[&[1]])).is_err());
        assert_eq!(rp.frame_count(), 6);
        rp.reset();
        assert_eq!(rp.frame_count(), 0);
        assert!(rp.out().is_err());
    }

    #[test]
    fn test_填充与去填充() {
        let original = packet(FrameDuration::Ms20, &[&[9; 10]]);
        assert_eq!(original.len(), 11);
        for target in [11, 12, 13, 40, 300, 600] {
            let padded = pad(&original, target).unwrap();
            assert_eq!(padded.len(), target, "目标 {target}");
            let parsed = parse_packet(&padded).unwrap();
            assert_eq!(parsed.frames, vec![&[9u8; 10][..]]);
            assert_eq!(unpad(&padded).unwrap(), original);
        }
        assert!(pad(&original, 5).is_err());
    }
}
