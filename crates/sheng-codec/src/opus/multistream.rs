//! 多流封装与声道映射.
//!
//! 多声道音频拆成若干单声道/双声道流分别编码, 流的数据包首尾相接组成一个多流数据包:
//! 除最后一个流外都使用自定界格式. 编码声道 `0..2*coupled` 属于双声道流
//! (每流两个), 其余编码声道各自是一个单声道流.
//!
//! 映射表 `mapping[输出声道] = 编码声道`, 255 表示该声道静音.

use sheng_core::{ShengError, ShengResult};

use super::config::{DecoderConfig, EncoderConfig};
use super::decoder::OpusDecoder;
use super::encoder::OpusEncoder;
use super::framing::{PacketOptions, build_packet, parse_packet, parse_self_delimited};
use super::Bitrate;

/// 映射表中表示静音声道的值
pub const SILENT_CHANNEL: u8 = 255;

/// Vorbis 声道顺序下 1..=8 声道的 (流数, 双声道流数, 映射)
const VORBIS_LAYOUTS: [(u8, u8, &[u8]); 8] = [
    (1, 0, &[0]),
    (1, 1, &[0, 1]),
    (2, 1, &[0, 2, 1]),
    (2, 2, &[0, 1, 2, 3]),
    (3, 2, &[0, 4, 1, 2, 3]),
    (4, 2, &[0, 4, 1, 2, 3, 5]),
    (5, 2, &[0, 4, 1, 2, 3, 5, 6]),
    (5, 3, &[0, 6, 1, 2, 3, 4, 5, 7]),
];

fn invalid(msg: impl Into<String>) -> ShengError {
    ShengError::InvalidMapping(msg.into())
}

/// 声道映射表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMapping {
    /// 映射族: 0 单/双声道, 1 Vorbis 环绕声, 2 Ambisonics, 255 独立单声道流
    pub family: u8,
    /// 流数
    pub streams: u8,
    /// 其中双声道流的个数
    pub coupled_streams: u8,
    /// 每个输出声道对应的编码声道
    pub mapping: Vec<u8>,
}

impl StreamMapping {
    /// 以显式参数创建并校验
    pub fn new(
        family: u8,
        streams: u8,
        coupled_streams: u8,
        mapping: Vec<u8>,
    ) -> ShengResult<Self> {
        let m = Self {
            family,
            streams,
            coupled_streams,
            mapping,
        };
        m.validate()?;
        Ok(m)
    }

    /// 按映射族的默认布局创建
    pub fn for_family(family: u8, channels: usize) -> ShengResult<Self> {
        if channels == 0 || channels > 255 {
            return Err(invalid(format!("声道数 {channels} 不在 1..=255 范围内")));
        }
        match family {
            0 => match channels {
                1 => Self::new(0, 1, 0, vec![0]),
                2 => Self::new(0, 1, 1, vec![0, 1]),
                _ => Err(invalid(format!("映射族 0 只支持 1 或 2 声道, 实际 {channels}"))),
            },
            1 => {
                let (streams, coupled, mapping) =
                    VORBIS_LAYOUTS.get(channels - 1).ok_or_else(|| {
                        invalid(format!("映射族 1 只支持 1..=8 声道, 实际 {channels}"))
                    })?;
                Self::new(1, *streams, *coupled, mapping.to_vec())
            }
            2 => {
                // (阶数 + 1)^2 个 ACN 声道, 可选附加一对非叙事立体声
                let side = (channels as f64).sqrt().floor() as usize;
                let acn = side * side;
                let extra = channels - acn;
                if extra != 0 && extra != 2 {
                    return Err(invalid(format!("{channels} 声道不是有效的 Ambisonics 布局")));
                }
                let coupled = u8::from(extra == 2);
                let streams = acn as u8 + coupled;
                let mut mapping: Vec<u8> =
                    (0..acn).map(|i| (i + 2 * coupled as usize) as u8).collect();
                mapping.extend((0..extra).map(|i| i as u8));
                Self::new(2, streams, coupled, mapping)
            }
            255 => {
                let mapping = (0..channels).map(|i| i as u8).collect();
                Self::new(255, channels as u8, 0, mapping)
            }
            _ => Err(invalid(format!("未知映射族 {family}"))),
        }
    }

    /// 校验映射表
    pub fn validate(&self) -> ShengResult<()> {
        if self.mapping.is_empty() {
            return Err(invalid("声道数为 0"));
        }
        if self.streams == 0 {
            return Err(invalid("流数为 0"));
        }
        if self.coupled_streams > self.streams {
            return Err(invalid(format!(
                "双声道流数 {} 大于流数 {}",
                self.coupled_streams, self.streams
            )));
        }
        let coded = self.coded_channels();
        if coded > 255 {
            return Err(invalid(format!("编码声道数 {coded} 超过 255")));
        }
        if let Some((ch, &m)) = self
            .mapping
            .iter()
            .enumerate()
            .find(|&(_, &m)| m != SILENT_CHANNEL && usize::from(m) >= coded)
        {
            return Err(invalid(format!(
                "声道 {ch} 映射到编码声道 {m}, 超出 0..{coded}"
            )));
        }
        Ok(())
    }

    /// 输出声道数
    pub fn channels(&self) -> usize {
        self.mapping.len()
    }

    /// 编码声道数
    pub fn coded_channels(&self) -> usize {
        usize::from(self.streams) + usize::from(self.coupled_streams)
    }

    /// 第 `stream` 个流的声道数
    pub fn stream_channels(&self, stream: usize) -> usize {
        if stream < usize::from(self.coupled_streams) {
            2
        } else {
            1
        }
    }

    /// 编码声道所在的 (流, 流内位置)
    pub fn locate(&self, coded: usize) -> (usize, usize) {
        let coupled = usize::from(self.coupled_streams);
        if coded < 2 * coupled {
            (coded / 2, coded % 2)
        } else {
            (coded - coupled, 0)
        }
    }
}

/// 多流编码会话
#[derive(Debug)]
pub struct MultistreamEncoder {
    mapping: StreamMapping,
    encoders: Vec<OpusEncoder>,
    frame_samples: usize,
}

impl MultistreamEncoder {
    /// 以 `template` 为每个流的配置模板创建, 模板的声道数被忽略
    ///
    /// 模板码率为固定值时按声道数比例分给各流.
    pub fn new(template: EncoderConfig, mapping: StreamMapping) -> ShengResult<Self> {
        mapping.validate()?;
        let coded = mapping.coded_channels() as u64;
        let encoders = (0..usize::from(mapping.streams))
            .map(|s| {
                let mut cfg = template.clone();
                let sc = mapping.stream_channels(s);
                cfg.channels = sc as u8;
                if let Bitrate::Bits(total) = template.bitrate {
                    let share = (u64::from(total) * sc as u64 / coded) as u32;
                    cfg.bitrate = Bitrate::Bits(share.max(500));
                }
                OpusEncoder::new(cfg)
            })
            .collect::<ShengResult<Vec<_>>>()?;
        log::debug!(
            "创建多流编码器: {} 声道, {} 流 ({} 双声道), 映射族 {}",
            mapping.channels(),
            mapping.streams,
            mapping.coupled_streams,
            mapping.family
        );
        Ok(Self {
            frame_samples: template.frame_samples(),
            mapping,
            encoders,
        })
    }

    pub fn mapping(&self) -> &StreamMapping {
        &self.mapping
    }

    /// 每帧每声道的采样数
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// 各流的编码会话
    pub fn streams(&self) -> &[OpusEncoder] {
        &self.encoders
    }

    pub fn reset(&mut self) {
        for e in &mut self.encoders {
            e.reset();
        }
    }

    /// 编码一帧交错 PCM, 声道数为映射表的输出声道数
    pub fn encode(&mut self, pcm: &[f32]) -> ShengResult<Vec<u8>> {
        let channels = self.mapping.channels();
        if pcm.len() != self.frame_samples * channels {
            return Err(ShengError::InvalidArgument(format!(
                "PCM 长度 {} 与帧长 {} x {} 声道不符",
                pcm.len(),
                self.frame_samples,
                channels
            )));
        }
        // 每个编码声道取映射到它的第一个输入声道
        let mut sources = vec![None; self.mapping.coded_channels()];
        for (input, &coded) in self.mapping.mapping.iter().enumerate() {
            if coded != SILENT_CHANNEL && sources[usize::from(coded)].is_none() {
                sources[usize::from(coded)] = Some(input);
            }
        }

        let last = self.encoders.len() - 1;
        let mut out = Vec::new();
        for (s, enc) in self.encoders.iter_mut().enumerate() {
            let sc = self.mapping.stream_channels(s);
            let mut stream_pcm = vec![0.0f32; self.frame_samples * sc];
            for pos in 0..sc {
                let coded = if sc == 2 {
                    2 * s + pos
                } else {
                    s + usize::from(self.mapping.coupled_streams)
                };
                if let Some(input) = sources[coded] {
                    for n in 0..self.frame_samples {
                        stream_pcm[n * sc + pos] = pcm[n * channels + input];
                    }
                }
            }
            let packet = enc.encode(&stream_pcm)?;
            if s == last {
                out.extend_from_slice(&packet);
            } else {
                let parsed = parse_packet(&packet)?;
                out.extend(build_packet(
                    parsed.toc,
                    &parsed.frames,
                    PacketOptions {
                        self_delimited: true,
                        ..PacketOptions::default()
                    },
                )?);
            }
        }
        log::trace!("多流数据包 {} 字节, {} 流", out.len(), self.encoders.len());
        Ok(out)
    }
}

/// 多流解码会话
#[derive(Debug)]
pub struct MultistreamDecoder {
    mapping: StreamMapping,
    decoders: Vec<OpusDecoder>,
    last_packet_samples: usize,
}

impl MultistreamDecoder {
    /// 以 `template` 的采样率与增益为每个流创建解码器
    pub fn new(template: DecoderConfig, mapping: StreamMapping) -> ShengResult<Self> {
        mapping.validate()?;
        let decoders = (0..usize::from(mapping.streams))
            .map(|s| {
                let mut cfg = template.clone();
                cfg.channels = mapping.stream_channels(s) as u8;
                OpusDecoder::new(cfg)
            })
            .collect::<ShengResult<Vec<_>>>()?;
        Ok(Self {
            mapping,
            decoders,
            last_packet_samples: 0,
        })
    }

    pub fn mapping(&self) -> &StreamMapping {
        &self.mapping
    }

    /// 最近一个数据包每声道的采样数
    pub fn last_packet_duration(&self) -> usize {
        self.last_packet_samples
    }

    /// 各流最近一帧的区间解码器状态
    pub fn final_ranges(&self) -> Vec<u32> {
        self.decoders.iter().map(OpusDecoder::final_range).collect()
    }

    pub fn reset(&mut self) -> ShengResult<()> {
        for d in &mut self.decoders {
            d.reset()?;
        }
        self.last_packet_samples = 0;
        Ok(())
    }

    /// 解码一个多流数据包, `None` 或空数据时所有流做丢包补偿
    pub fn decode(&mut self, packet: Option<&[u8]>) -> ShengResult<Vec<f32>> {
        let substreams: Vec<Option<Vec<u8>>> = match packet.filter(|p| !p.is_empty()) {
            Some(data) => self.split(data)?.into_iter().map(Some).collect(),
            None => vec![None; self.decoders.len()],
        };

        // 全部流解码成功后才替换状态
        let mut decoders = self.decoders.clone();
        let mut outputs = Vec::with_capacity(decoders.len());
        for (dec, sub) in decoders.iter_mut().zip(&substreams) {
            outputs.push(dec.decode(sub.as_deref())?);
        }
        let samples = outputs[0].len() / self.mapping.stream_channels(0);
        for (s, o) in outputs.iter().enumerate() {
            if o.len() != samples * self.mapping.stream_channels(s) {
                return Err(ShengError::MalformedPacket(format!(
                    "流 {s} 的时长与流 0 不一致"
                )));
            }
        }
        self.decoders = decoders;
        self.last_packet_samples = samples;

        let channels = self.mapping.channels();
        let mut out = vec![0.0f32; samples * channels];
        for (ch, &coded) in self.mapping.mapping.iter().enumerate() {
            if coded == SILENT_CHANNEL {
                continue;
            }
            let (s, pos) = self.mapping.locate(usize::from(coded));
            let sc = self.mapping.stream_channels(s);
            for n in 0..samples {
                out[n * channels + ch] = outputs[s][n * sc + pos];
            }
        }
        Ok(out)
    }

    /// 拆分多流数据包, 每个子流重新打包为标准数据包
    fn split(&self, data: &[u8]) -> ShengResult<Vec<Vec<u8>>> {
        let count = self.decoders.len();
        let mut offset = 0;
        let mut packets = Vec::with_capacity(count);
        for s in 0..count {
            let rest = &data[offset..];
            if rest.is_empty() {
                return Err(ShengError::MalformedPacket(format!("流 {s} 缺少数据")));
            }
            if s + 1 == count {
                packets.push(rest.to_vec());
            } else {
                let parsed = parse_self_delimited(rest)?;
                packets.push(build_packet(parsed.toc, &parsed.frames, PacketOptions::default())?);
                offset += parsed.packet_len;
            }
        }
        Ok(packets)
    }
}
