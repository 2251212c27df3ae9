//! 数据包帧打包与解析.
//!
//! 帧数编码 (TOC 低 2 位):
//! - 0: 一帧
//! - 1: 两帧, 长度相等
//! - 2: 两帧, 第一帧长度显式给出
//! - 3: 任意帧数, 后跟帧数字节 `v p M(6)`, 可选填充长度链与长度表
//!
//! 帧长度使用 1 或 2 字节编码: 小于 252 时直接存放, 否则
//! `len = b0 + 4 * b1` (b0 ∈ 252..=255). 自定界变体 (多流数据包内部使用)
//! 额外给出最后一帧的长度, 使多个数据包可以首尾相接.

use sheng_core::bitreader::BitReader;
use sheng_core::bitwriter::BitWriter;
use sheng_core::{ShengError, ShengResult};

use super::toc::Toc;
use super::{MAX_FRAME_BYTES, MAX_FRAMES_PER_PACKET, MAX_PACKET_DURATION_US};

fn malformed(msg: impl Into<String>) -> ShengError {
    ShengError::MalformedPacket(msg.into())
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket<'a> {
    /// TOC 字节
    pub toc: Toc,
    /// 各帧数据
    pub frames: Vec<&'a [u8]>,
    /// 填充字节数
    pub padding: usize,
    /// 帧数编码 3 时是否为可变长度
    pub vbr: bool,
    /// 数据包在输入中占用的字节数
    pub packet_len: usize,
}

impl ParsedPacket<'_> {
    /// 数据包总时长 (微秒)
    pub fn duration_us(&self) -> u32 {
        self.toc.frame_duration().micros() * self.frames.len() as u32
    }

    /// 给定采样率下每声道的总采样数
    pub fn samples(&self, sample_rate: u32) -> usize {
        self.toc.samples_per_frame(sample_rate) * self.frames.len()
    }
}

fn read_byte(br: &mut BitReader<'_>, what: &str) -> ShengResult<usize> {
    br.read_bits(8)
        .map(|v| v as usize)
        .map_err(|_| malformed(format!("读取{what}时数据不足")))
}

/// 读取 1 或 2 字节的帧长度
fn read_length(br: &mut BitReader<'_>) -> ShengResult<usize> {
    let b0 = read_byte(br, "帧长度")?;
    if b0 < 252 {
        return Ok(b0);
    }
    let b1 = read_byte(br, "帧长度第二字节")?;
    Ok(b0 + 4 * b1)
}

/// 写入 1 或 2 字节的帧长度
fn write_length(bw: &mut BitWriter, len: usize) -> ShengResult<()> {
    if len < 252 {
        bw.write_bits(len as u32, 8)
    } else {
        let b0 = 252 + (len & 3);
        bw.write_bits(b0 as u32, 8)?;
        bw.write_bits(((len - b0) >> 2) as u32, 8)
    }
}

fn length_size(len: usize) -> usize {
    if len < 252 { 1 } else { 2 }
}

/// 解析标准数据包, 整个切片即为数据包
pub fn parse_packet(data: &[u8]) -> ShengResult<ParsedPacket<'_>> {
    parse_inner(data, false)
}

/// 解析自定界数据包, 返回结果中的 `packet_len` 为实际占用字节数
pub fn parse_self_delimited(data: &[u8]) -> ShengResult<ParsedPacket<'_>> {
    parse_inner(data, true)
}

fn parse_inner(data: &[u8], self_delimited: bool) -> ShengResult<ParsedPacket<'_>> {
    if data.is_empty() {
        return Err(malformed("数据包为空"));
    }
    let mut br = BitReader::new(data);
    let toc = Toc::parse(read_byte(&mut br, "TOC")? as u8);
    let frame_us = toc.frame_duration().micros();

    let mut padding = 0usize;
    let mut vbr = false;
    // 先确定帧数与已知的帧长度, 未知长度 (最后一帧) 记为 None
    let mut lengths: Vec<Option<usize>> = match toc.code {
        0 => vec![None],
        1 => vec![None, None],
        2 => {
            let l1 = read_length(&mut br)?;
            vec![Some(l1), None]
        }
        _ => {
            let fc = read_byte(&mut br, "帧数字节")?;
            vbr = fc & 0x80 != 0;
            let has_padding = fc & 0x40 != 0;
            let count = fc & 0x3F;
            if count == 0 {
                return Err(malformed("帧数为 0"));
            }
            if count as u32 * frame_us > MAX_PACKET_DURATION_US {
                return Err(malformed(format!(
                    "{count} 帧共 {} us, 超过 120 ms",
                    count as u32 * frame_us
                )));
            }
            if has_padding {
                loop {
                    let p = read_byte(&mut br, "填充长度")?;
                    if p == 255 {
                        padding += 254;
                    } else {
                        padding += p;
                        break;
                    }
                }
            }
            let mut lengths = vec![None; count];
            if vbr {
                for len in lengths.iter_mut().take(count - 1) {
                    *len = Some(read_length(&mut br)?);
                }
            }
            lengths
        }
    };
    let count = lengths.len();

    if self_delimited {
        // 自定界: 补齐最后一个未知长度; 长度相等的编码只给一次
        let len = read_length(&mut br)?;
        match toc.code {
            1 => lengths = vec![Some(len); 2],
            3 if !vbr => lengths = vec![Some(len); count],
            _ => lengths[count - 1] = Some(len),
        }
    }

    let header = br.byte_position();
    let available = (data.len() - header)
        .checked_sub(padding)
        .ok_or_else(|| malformed(format!("填充 {padding} 字节超出数据包长度")))?;

    let known: usize = lengths.iter().flatten().sum();
    if known > available {
        return Err(malformed(format!(
            "声明的帧长度之和 {known} 超出剩余 {available} 字节"
        )));
    }
    let unknown = lengths.iter().filter(|l| l.is_none()).count();
    if unknown > 0 {
        let rest = available - known;
        if rest % unknown != 0 {
            return Err(malformed(format!(
                "剩余 {rest} 字节无法均分给 {unknown} 帧"
            )));
        }
        let each = rest / unknown;
        for len in lengths.iter_mut().filter(|l| l.is_none()) {
            *len = Some(each);
        }
    }

    let mut frames = Vec::with_capacity(count);
    let mut pos = header;
    for len in lengths.into_iter().flatten() {
        if len > MAX_FRAME_BYTES {
            return Err(malformed(format!("帧长度 {len} 超过 {MAX_FRAME_BYTES}")));
        }
        frames.push(&data[pos..pos + len]);
        pos += len;
    }
    let packet_len = pos + padding;
    Ok(ParsedPacket {
        toc,
        frames,
        padding,
        vbr,
        packet_len,
    })
}

/// 打包选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketOptions {
    /// 使用自定界格式
    pub self_delimited: bool,
    /// 填充到指定总字节数
    pub pad_to: Option<usize>,
    /// 即使帧数允许也使用帧数编码 3
    pub force_code3: bool,
}

/// 由 TOC 配置与各帧数据构造数据包
///
/// `toc` 的帧数编码会被忽略, 按帧数和长度自动选择.
pub fn build_packet(toc: Toc, frames: &[&[u8]], options: PacketOptions) -> ShengResult<Vec<u8>> {
    let count = frames.len();
    if count == 0 || count > MAX_FRAMES_PER_PACKET {
        return Err(ShengError::InvalidArgument(format!(
            "帧数 {count} 不在 1..=48 范围内"
        )));
    }
    let longest = frames.iter().map(|f| f.len()).max().unwrap_or(0);
    if longest > MAX_FRAME_BYTES {
        return Err(ShengError::InvalidArgument(format!(
            "帧长度 {longest} 超过 {MAX_FRAME_BYTES}"
        )));
    }
    let total_us = toc.frame_duration().micros() * count as u32;
    if total_us > MAX_PACKET_DURATION_US {
        return Err(ShengError::InvalidArgument(format!(
            "数据包时长 {total_us} us 超过 120 ms"
        )));
    }

    let cbr = frames.windows(2).all(|w| w[0].len() == w[1].len());
    let payload: usize = frames.iter().map(|f| f.len()).sum();
    let natural_code = match count {
        1 => 0,
        2 if cbr => 1,
        2 => 2,
        _ => 3,
    };
    let code = if options.force_code3 { 3 } else { natural_code };
    let minimal = header_size(code, frames, cbr, options.self_delimited) + payload;

    let (code, pad_amount) = match options.pad_to {
        Some(target) if target < minimal => {
            return Err(ShengError::InvalidArgument(format!(
                "目标长度 {target} 小于最小长度 {minimal}"
            )));
        }
        Some(target) if target > minimal => {
            let base = header_size(3, frames, cbr, options.self_delimited) + payload;
            (3, target - base)
        }
        _ => (code, 0),
    };

    let mut bw = BitWriter::new();
    bw.write_bits(u32::from(toc.with_code(code).to_byte()), 8)?;
    match code {
        0 => {}
        1 => {}
        2 => write_length(&mut bw, frames[0].len())?,
        _ => {
            let vbr = !cbr;
            let fc = ((vbr as u32) << 7) | (((pad_amount > 0) as u32) << 6) | count as u32;
            bw.write_bits(fc, 8)?;
            if pad_amount > 0 {
                let nb_255s = (pad_amount - 1) / 255;
                for _ in 0..nb_255s {
                    bw.write_bits(255, 8)?;
                }
                bw.write_bits((pad_amount - 255 * nb_255s - 1) as u32, 8)?;
            }
            if vbr {
                for f in &frames[..count - 1] {
                    write_length(&mut bw, f.len())?;
                }
            }
        }
    }
    if options.self_delimited {
        let last = frames[count - 1].len();
        match code {
            0 | 2 => write_length(&mut bw, last)?,
            1 => write_length(&mut bw, frames[0].len())?,
            _ => write_length(&mut bw, last)?,
        }
    }
    let mut out = bw.finish();
    for f in frames {
        out.extend_from_slice(f);
    }
    if pad_amount > 0 {
        let nb_255s = (pad_amount - 1) / 255;
        let padding = pad_amount - nb_255s - 1;
        out.resize(out.len() + padding, 0);
    }
    Ok(out)
}

/// 不含帧数据与填充的头部大小 (填充长度链除外)
fn header_size(code: u8, frames: &[&[u8]], cbr: bool, self_delimited: bool) -> usize {
    let count = frames.len();
    let last = frames[count - 1].len();
    let mut size = 1;
    match code {
        0 | 1 => {}
        2 => size += length_size(frames[0].len()),
        _ => {
            size += 1;
            if !cbr {
                size += frames[..count - 1]
                    .iter()
                    .map(|f| length_size(f.len()))
                    .sum::<usize>();
            }
        }
    }
    if self_delimited {
        size += length_size(last);
    }
    size
}

/// 数据包中的帧数
pub fn packet_frame_count(data: &[u8]) -> ShengResult<usize> {
    let first = *data.first().ok_or_else(|| malformed("数据包为空"))?;
    match first & 0x03 {
        0 => Ok(1),
        1 | 2 => Ok(2),
        _ => data
            .get(1)
            .map(|fc| usize::from(fc & 0x3F))
            .ok_or_else(|| malformed("缺少帧数字节")),
    }
}

/// 数据包在给定采样率下每声道的采样数
pub fn packet_samples(data: &[u8], sample_rate: u32) -> ShengResult<usize> {
    let count = packet_frame_count(data)?;
    let toc = Toc::parse(data[0]);
    let samples = toc.samples_per_frame(sample_rate) * count;
    if samples as u64 * 25 > u64::from(sample_rate) * 3 {
        return Err(malformed(format!("数据包时长超过 120 ms ({count} 帧)")));
    }
    Ok(samples)
}

/// 数据包带宽
pub fn packet_bandwidth(data: &[u8]) -> ShengResult<super::Bandwidth> {
    data.first()
        .map(|&b| Toc::parse(b).bandwidth())
        .ok_or_else(|| malformed("数据包为空"))
}

/// 数据包声道数
pub fn packet_channels(data: &[u8]) -> ShengResult<usize> {
    data.first()
        .map(|&b| Toc::parse(b).channels())
        .ok_or_else(|| malformed("数据包为空"))
}

/// 数据包编码模式
pub fn packet_mode(data: &[u8]) -> ShengResult<super::Mode> {
    data.first()
        .map(|&b| Toc::parse(b).mode())
        .ok_or_else(|| malformed("数据包为空"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opus::{Bandwidth, FrameDuration, Mode};

    fn music_toc() -> Toc {
        Toc::new(Mode::Music, Bandwidth::Full, FrameDuration::Ms10, false).unwrap()
    }

    #[test]
    fn test_各帧数编码自动选择() {
        let toc = music_toc();
        let a: &[u8] = &[1u8; 10];
        let b: &[u8] = &[2u8; 7];
        let p0 = build_packet(toc, &[a], PacketOptions::default()).unwrap();
        assert_eq!(p0[0] & 3, 0);
        assert_eq!(p0.len(), 11);

        let p1 = build_packet(toc, &[a, a], PacketOptions::default()).unwrap();
        assert_eq!(p1[0] & 3, 1);
        let parsed = parse_packet(&p1).unwrap();
        assert_eq!(parsed.frames, vec![a, a]);

        let p2 = build_packet(toc, &[a, b], PacketOptions::default()).unwrap();
        assert_eq!(p2[0] & 3, 2);
        let parsed = parse_packet(&p2).unwrap();
        assert_eq!(parsed.frames, vec![a, b]);
    }

    #[test]
    fn test_编码3可变长度精确恢复() {
        let toc = music_toc();
        let frames: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8; 3 + i * 100]).collect();
        let refs: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();
        let pkt = build_packet(toc, &refs, PacketOptions::default()).unwrap();
        assert_eq!(pkt[0] & 3, 3);
        let parsed = parse_packet(&pkt).unwrap();
        assert!(parsed.vbr);
        assert_eq!(parsed.frames.len(), 5);
        for (got, want) in parsed.frames.iter().zip(&frames) {
            assert_eq!(*got, want.as_slice());
        }
        assert_eq!(parsed.duration_us(), 50_000);
    }

    #[test]
    fn test_声明长度超出缓冲区() {
        // 编码 3, VBR, 3 帧, 声明长度 10 + 10, 实际只有 12 字节
        let mut pkt = vec![music_toc().with_code(3).to_byte(), 0x80 | 3, 10, 10];
        pkt.extend_from_slice(&[0u8; 12]);
        assert!(matches!(
            parse_packet(&pkt),
            Err(ShengError::MalformedPacket(_))
        ));
        // 编码 2 声明长度超出
        let pkt = vec![music_toc().with_code(2).to_byte(), 200, 1, 2, 3];
        assert!(matches!(
            parse_packet(&pkt),
            Err(ShengError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_帧数编码与长度不一致() {
        // 编码 1 奇数负载
        let pkt = vec![music_toc().with_code(1).to_byte(), 1, 2, 3];
        assert!(parse_packet(&pkt).is_err());
        // 编码 3 帧数为 0
        let pkt = vec![music_toc().with_code(3).to_byte(), 0];
        assert!(parse_packet(&pkt).is_err());
        // 编码 3 CBR 不能均分
        let pkt = vec![music_toc().with_code(3).to_byte(), 3, 1, 2, 3, 4];
        assert!(parse_packet(&pkt).is_err());
        // 20 ms x 7 超过 120 ms
        let toc20 = Toc::new(Mode::Music, Bandwidth::Full, FrameDuration::Ms20, false).unwrap();
        let pkt = vec![toc20.with_code(3).to_byte(), 7];
        assert!(parse_packet(&pkt).is_err());
        assert!(parse_packet(&[]).is_err());
    }

    #[test]
    fn test_超长帧被拒绝() {
        let mut pkt = vec![music_toc().to_byte()];
        pkt.extend_from_slice(&vec![0u8; 1276]);
        assert!(parse_packet(&pkt).is_err());
    }

    #[test]
    fn test_两字节长度编码() {
        let toc = music_toc();
        let a = vec![7u8; 700];
        let b = vec![9u8; 5];
        let pkt = build_packet(toc, &[&a[..], &b[..]], PacketOptions::default()).unwrap();
        // 700 = 252 + 0 + 4 * 112
        assert_eq!(&pkt[1..3], &[252, 112]);
        let parsed = parse_packet(&pkt).unwrap();
        assert_eq!(parsed.frames[0].len(), 700);
        assert_eq!(parsed.frames[1].len(), 5);
    }

    #[test]
    fn test_填充到目标长度() {
        let toc = music_toc();
        let a: &[u8] = &[3u8; 20];
        for target in [22usize, 23, 300, 600, 1000] {
            let pkt = build_packet(
                toc,
                &[a],
                PacketOptions {
                    pad_to: Some(target),
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(pkt.len(), target);
            let parsed = parse_packet(&pkt).unwrap();
            assert_eq!(parsed.frames, vec![a]);
            assert_eq!(parsed.packet_len, target);
        }
        assert!(
            build_packet(
                toc,
                &[a],
                PacketOptions {
                    pad_to: Some(10),
                    ..Default::default()
                }
            )
            .is_err()
        );
    }

    #[test]
    fn test_自定界数据包首尾相接() {
        let toc = music_toc();
        let a: &[u8] = &[1u8; 30];
        let b: &[u8] = &[2u8; 31];
        let opts = PacketOptions {
            self_delimited: true,
            ..Default::default()
        };
        let mut stream = build_packet(toc, &[a, b], opts).unwrap();
        let first_len = stream.len();
        stream.extend(build_packet(toc, &[b, b, b], opts).unwrap());
        stream.extend(build_packet(toc, &[a], PacketOptions::default()).unwrap());

        let p1 = parse_self_delimited(&stream).unwrap();
        assert_eq!(p1.packet_len, first_len);
        assert_eq!(p1.frames, vec![a, b]);
        let rest = &stream[p1.packet_len..];
        let p2 = parse_self_delimited(rest).unwrap();
        assert_eq!(p2.frames.len(), 3);
        let p3 = parse_packet(&rest[p2.packet_len..]).unwrap();
        assert_eq!(p3.frames, vec![a]);
    }

    #[test]
    fn test_数据包检查函数() {
        let toc = Toc::new(Mode::Voice, Bandwidth::Wide, FrameDuration::Ms20, true).unwrap();
        let frame: &[u8] = &[1, 2, 3];
        let frames = vec![frame; 3];
        let pkt = build_packet(toc, &frames, PacketOptions::default()).unwrap();
        assert_eq!(packet_frame_count(&pkt).unwrap(), 3);
        assert_eq!(packet_samples(&pkt, 16000).unwrap(), 960);
        assert_eq!(packet_bandwidth(&pkt).unwrap(), Bandwidth::Wide);
        assert_eq!(packet_channels(&pkt).unwrap(), 2);
        assert_eq!(packet_mode(&pkt).unwrap(), Mode::Voice);
    }
}
