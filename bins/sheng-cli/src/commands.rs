//! 子命令实现.

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use sheng::codec::opus::framing::{ParsedPacket, parse_packet, parse_self_delimited};
use sheng::codec::opus::head::{GRANULE_RATE, OpusHead};
use sheng::codec::opus::{
    Application, Bitrate, DecoderConfig, EncoderConfig, FrameDuration, MultistreamDecoder,
    MultistreamEncoder, StreamMapping,
};
use sheng::config::SessionConfig;
use sheng::stream::{PacketReader, PacketWriter, StreamPacket};

use crate::pcm::{PcmFormat, read_pcm, snr_db, write_pcm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApplicationArg {
    Voip,
    Audio,
    LowDelay,
}

impl From<ApplicationArg> for Application {
    fn from(value: ApplicationArg) -> Self {
        match value {
            ApplicationArg::Voip => Application::Voip,
            ApplicationArg::Audio => Application::Audio,
            ApplicationArg::LowDelay => Application::LowDelay,
        }
    }
}

/// 编码参数, 未给出的项取会话配置文件或默认值
#[derive(Args, Debug)]
pub struct EncodeOptions {
    /// 会话配置文件 (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 输入采样率 (Hz)
    #[arg(long)]
    pub rate: Option<u32>,

    /// 输入声道数, 超过 2 时使用环绕声映射
    #[arg(long)]
    pub channels: Option<usize>,

    /// 目标码率: auto, max 或 bits/s
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// 帧长 (毫秒): 2.5, 5, 10, 20, 40, 60
    #[arg(long)]
    pub frame_ms: Option<f32>,

    /// 应用类型
    #[arg(long, value_enum)]
    pub application: Option<ApplicationArg>,

    /// 复杂度 0-10
    #[arg(long)]
    pub complexity: Option<u8>,

    /// 固定码率
    #[arg(long)]
    pub cbr: bool,

    /// 输入 PCM 格式
    #[arg(long, value_enum, default_value = "s16le")]
    pub format: PcmFormat,
}

impl EncodeOptions {
    /// 合并配置文件与命令行参数, 返回 (编码配置, 总声道数)
    fn resolve(&self) -> Result<(EncoderConfig, usize)> {
        let mut cfg = match &self.config {
            Some(path) => SessionConfig::load(path)?.encoder,
            None => EncoderConfig::default(),
        };
        let channels = self.channels.unwrap_or(usize::from(cfg.channels));
        if let Some(rate) = self.rate {
            cfg.sample_rate = rate;
        }
        if let Some(bitrate) = &self.bitrate {
            cfg.bitrate = parse_bitrate(bitrate)?;
        }
        if let Some(ms) = self.frame_ms {
            let micros = (ms * 1000.0).round() as u32;
            cfg.frame_duration = FrameDuration::from_micros(micros)
                .with_context(|| format!("不支持的帧长 {ms} ms"))?;
        }
        if let Some(app) = self.application {
            cfg.application = app.into();
        }
        if let Some(c) = self.complexity {
            cfg.complexity = c;
        }
        if self.cbr {
            cfg.vbr = false;
        }
        // 单流配置只用于校验, 实际声道数由映射决定
        cfg.channels = channels.min(2) as u8;
        cfg.validate().context("编码配置无效")?;
        Ok((cfg, channels))
    }
}

/// 解析码率参数
pub fn parse_bitrate(value: &str) -> Result<Bitrate> {
    match value {
        "auto" => Ok(Bitrate::Auto),
        "max" => Ok(Bitrate::Max),
        _ => {
            let bits: u32 = value
                .trim_end_matches("bps")
                .parse()
                .with_context(|| format!("无法解析码率 '{value}'"))?;
            Ok(Bitrate::Bits(bits))
        }
    }
}

fn mapping_for(channels: usize) -> Result<StreamMapping> {
    let family = if channels <= 2 { 0 } else { 1 };
    Ok(StreamMapping::for_family(family, channels)?)
}

/// 编码过程的统计
#[derive(Debug, Default)]
struct EncodeStats {
    packets: usize,
    bytes: usize,
    modes: BTreeMap<String, usize>,
}

impl EncodeStats {
    fn record(&mut self, packet: &[u8], streams: u8) {
        self.packets += 1;
        self.bytes += packet.len();
        if let Ok(parsed) = parse_first_stream(packet, streams) {
            *self.modes.entry(parsed.toc.mode().to_string()).or_default() += 1;
        }
    }

    fn report(&self, seconds: f64) {
        let kbps = self.bytes as f64 * 8.0 / seconds.max(1e-9) / 1000.0;
        println!("数据包: {}, 平均码率 {:.1} kb/s", self.packets, kbps);
        for (mode, count) in &self.modes {
            println!("  {mode}: {count} 帧");
        }
    }
}

fn parse_first_stream(packet: &[u8], streams: u8) -> Result<ParsedPacket<'_>> {
    let parsed = if streams > 1 {
        parse_self_delimited(packet)?
    } else {
        parse_packet(packet)?
    };
    Ok(parsed)
}

/// 按帧编码整段 PCM, 末尾不足一帧时补零
fn encode_all(
    enc: &mut MultistreamEncoder,
    pcm: &[f32],
    channels: usize,
    mut sink: impl FnMut(usize, Vec<u8>) -> Result<()>,
) -> Result<()> {
    let frame_len = enc.frame_samples() * channels;
    for (index, chunk) in pcm.chunks(frame_len).enumerate() {
        let packet = if chunk.len() == frame_len {
            enc.encode(chunk)?
        } else {
            let mut padded = chunk.to_vec();
            padded.resize(frame_len, 0.0);
            enc.encode(&padded)?
        };
        sink(index, packet)?;
    }
    Ok(())
}

/// 第 `index` 个数据包是否按丢包处理
fn is_dropped(index: usize, loss_every: Option<usize>) -> bool {
    loss_every.is_some_and(|n| n > 0 && (index + 1) % n == 0)
}

pub fn encode(
    input: &Path,
    output: &Path,
    options: &EncodeOptions,
    loss_every: Option<usize>,
) -> Result<()> {
    let (cfg, channels) = options.resolve()?;
    let pcm = read_pcm(input, options.format)?;
    if pcm.len() % channels != 0 {
        bail!("PCM 采样数 {} 不是声道数 {} 的整数倍", pcm.len(), channels);
    }
    let mapping = mapping_for(channels)?;
    let mut enc = MultistreamEncoder::new(cfg.clone(), mapping.clone())?;
    let lookahead = enc.streams().first().map_or(0, |e| e.lookahead());
    let head = OpusHead::new(
        mapping.clone(),
        cfg.sample_rate,
        OpusHead::pre_skip_for(lookahead, cfg.sample_rate),
    );
    info!(
        "编码 {} -> {}: {} Hz, {} 声道, 码率 {:?}, 帧长 {}",
        input.display(),
        output.display(),
        cfg.sample_rate,
        channels,
        cfg.bitrate,
        cfg.frame_duration
    );

    let file = File::create(output)
        .with_context(|| format!("创建输出文件失败, path={}", output.display()))?;
    let mut writer = PacketWriter::new(BufWriter::new(file), &head)?;
    let mut stats = EncodeStats::default();
    encode_all(&mut enc, &pcm, channels, |index, packet| {
        stats.record(&packet, mapping.streams);
        if is_dropped(index, loss_every) {
            debug!("模拟丢包: 第 {index} 个数据包");
            writer.write_packet(None)
        } else {
            writer.write_packet(Some(&packet))
        }
    })?;
    writer.finish()?;

    stats.report(pcm.len() as f64 / channels as f64 / f64::from(cfg.sample_rate));
    Ok(())
}

pub fn decode(input: &Path, output: &Path, rate: u32, format: PcmFormat) -> Result<()> {
    let file = File::open(input)
        .with_context(|| format!("打开输入文件失败, path={}", input.display()))?;
    let mut reader = PacketReader::new(BufReader::new(file))?;
    let head = reader.head().clone();
    let mut cfg = DecoderConfig::new(rate, 1);
    cfg.gain_q8 = head.output_gain;
    let mut dec = MultistreamDecoder::new(cfg, head.mapping.clone())?;
    let channels = head.channels();
    let mut skip =
        (u64::from(head.pre_skip) * u64::from(rate) / u64::from(GRANULE_RATE)) as usize * channels;
    info!(
        "解码 {} -> {}: {} Hz, {} 声道, 预跳过 {} 采样",
        input.display(),
        output.display(),
        rate,
        channels,
        skip / channels.max(1)
    );

    let mut out = Vec::new();
    let (mut packets, mut lost) = (0usize, 0usize);
    while let Some(item) = reader.next_packet()? {
        let pcm = match item {
            StreamPacket::Data(data) => match dec.decode(Some(&data)) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!("第 {packets} 个数据包解码失败, 按丢包处理: {e}");
                    lost += 1;
                    dec.decode(None)?
                }
            },
            StreamPacket::Lost => {
                lost += 1;
                dec.decode(None)?
            }
        };
        packets += 1;
        let drop = skip.min(pcm.len());
        skip -= drop;
        out.extend_from_slice(&pcm[drop..]);
    }
    write_pcm(output, &out, format)?;
    println!(
        "数据包: {packets}, 丢失 {lost}, 输出 {} 采样/声道",
        out.len() / channels.max(1)
    );
    Ok(())
}

pub fn roundtrip(input: &Path, options: &EncodeOptions, loss_every: Option<usize>) -> Result<()> {
    let (cfg, channels) = options.resolve()?;
    let pcm = read_pcm(input, options.format)?;
    let mapping = mapping_for(channels)?;
    let mut enc = MultistreamEncoder::new(cfg.clone(), mapping.clone())?;
    let mut dec = MultistreamDecoder::new(DecoderConfig::new(cfg.sample_rate, 1), mapping.clone())?;
    let delay = enc.streams().first().map_or(0, |e| e.lookahead()) * channels;

    let mut stats = EncodeStats::default();
    let mut decoded = Vec::with_capacity(pcm.len() + delay);
    encode_all(&mut enc, &pcm, channels, |index, packet| {
        stats.record(&packet, mapping.streams);
        let input = (!is_dropped(index, loss_every)).then_some(packet.as_slice());
        decoded.extend(dec.decode(input)?);
        Ok(())
    })?;

    let aligned = decoded.get(delay..).unwrap_or_default();
    stats.report(pcm.len() as f64 / channels as f64 / f64::from(cfg.sample_rate));
    println!("信噪比: {:.2} dB", snr_db(&pcm, aligned));
    Ok(())
}

pub fn inspect(input: &Path, json: bool) -> Result<()> {
    let file = File::open(input)
        .with_context(|| format!("打开输入文件失败, path={}", input.display()))?;
    let mut reader = PacketReader::new(BufReader::new(file))?;
    let head = reader.head().clone();
    if !json {
        println!(
            "声道 {}, 流 {} (双声道 {}), 映射族 {}, 预跳过 {}, 原始采样率 {} Hz",
            head.channels(),
            head.mapping.streams,
            head.mapping.coupled_streams,
            head.mapping.family,
            head.pre_skip,
            head.input_sample_rate
        );
    }

    let mut index = 0usize;
    while let Some(item) = reader.next_packet()? {
        let line = match item {
            StreamPacket::Lost => serde_json::json!({ "index": index, "lost": true }),
            StreamPacket::Data(data) => match parse_first_stream(&data, head.mapping.streams) {
                Ok(p) => serde_json::json!({
                    "index": index,
                    "bytes": data.len(),
                    "mode": p.toc.mode().to_string(),
                    "bandwidth": p.toc.bandwidth().to_string(),
                    "frame": p.toc.frame_duration().to_string(),
                    "frames": p.frames.len(),
                    "stereo": p.toc.stereo,
                    "padding": p.padding,
                }),
                Err(e) => serde_json::json!({
                    "index": index,
                    "bytes": data.len(),
                    "error": format!("{e:#}"),
                }),
            },
        };
        if json {
            println!("{line}");
        } else {
            print_line(&line);
        }
        index += 1;
    }
    Ok(())
}

fn print_line(line: &serde_json::Value) {
    let get = |key: &str| line.get(key).map(ToString::to_string).unwrap_or_default();
    if line.get("lost").is_some() {
        println!("#{:<5} 丢失", get("index"));
    } else if let Some(err) = line.get("error") {
        println!("#{:<5} {:>5} B  错误: {}", get("index"), get("bytes"), err);
    } else {
        let stereo = if line.get("stereo") == Some(&serde_json::Value::Bool(true)) {
            " 立体声"
        } else {
            ""
        };
        println!(
            "#{:<5} {:>5} B  {} {} {} x {}{}",
            get("index"),
            get("bytes"),
            get("mode").trim_matches('"'),
            get("bandwidth").trim_matches('"'),
            get("frame").trim_matches('"'),
            get("frames"),
            stereo
        );
    }
}
