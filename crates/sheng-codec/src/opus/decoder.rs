//! 解码会话.
//!
//! 一个数据包先完整解析帧结构, 再在内部状态的副本上逐帧解码, 全部成功后才提交,
//! 损坏的数据包因此不会改变解码历史. 丢包 (或长度为 0 的帧) 按最近一次解码的模式补偿,
//! 补偿输出的能量不超过最近一个正常帧.
//!
//! 模式切换时的处理:
//! - 进入音乐模式且上一帧含语音路径: 用语音路径的延续估计补齐变换路径的重叠尾部
//! - 离开变换路径: 把尚未叠加的尾部加到本帧开头
//! - 从音乐模式进入语音路径: 语音路径从零历史开始, 在重叠长度内按上升窗淡入

use sheng_core::{RangeDecoder, ShengError, ShengResult};
use sheng_resample::{Resampler, f32_to_s16};

use super::celt::mdct::folded_tail;
use super::celt::{self, CeltDecoder, HYBRID_START_BAND};
use super::config::DecoderConfig;
use super::framing::parse_packet;
use super::silk::{self, VoiceDecoder, VoiceLayout};
use super::toc::Toc;
use super::{FrameDuration, Mode};

/// 解码端升采样器的群延迟 (微秒)
pub const DECODER_RESAMPLE_DELAY_US: u32 = 1500;

/// 尚未解码任何数据包时丢包补偿的帧长
const DEFAULT_CONCEAL: FrameDuration = FrameDuration::Ms20;

/// 最近一帧的结构, 供丢包补偿沿用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastFrame {
    mode: Mode,
    duration: FrameDuration,
    /// 语音路径的帧结构 (仅含语音路径时)
    voice: Option<VoiceLayout>,
}

/// 解码状态. 解码在副本上进行, 成功后整体替换.
/// 变换与滤波器系数在副本间共享, 复制的只有历史缓冲
#[derive(Debug, Clone)]
struct DecoderCore {
    sample_rate: u32,
    channels: usize,
    voice: VoiceDecoder,
    celt: CeltDecoder,
    /// 每输出声道的升采样器, 输入为当前语音路径采样率
    up: Vec<Resampler>,
    last: Option<LastFrame>,
    final_range: u32,
    /// 最近一个正常解码帧的均方能量
    last_energy: f32,
}

impl DecoderCore {
    fn new(sample_rate: u32, channels: usize) -> ShengResult<Self> {
        let voice_rate = 16000.min(sample_rate.max(8000));
        Ok(Self {
            sample_rate,
            channels,
            voice: VoiceDecoder::new(voice_rate),
            celt: CeltDecoder::new(sample_rate, channels),
            up: make_resamplers(voice_rate, sample_rate, channels)?,
            last: None,
            final_range: 0,
            last_energy: 0.0,
        })
    }

    fn prev_mode(&self) -> Option<Mode> {
        self.last.map(|l| l.mode)
    }

    fn ensure_voice_rate(&mut self, rate: u32) -> ShengResult<()> {
        if self.up.first().map(Resampler::in_rate) != Some(rate) {
            self.up = make_resamplers(rate, self.sample_rate, self.channels)?;
        }
        Ok(())
    }

    /// 解码一帧, 返回每输出声道 `duration` 长的样本
    fn decode_frame(&mut self, toc: Toc, data: &[u8]) -> ShengResult<Vec<Vec<f32>>> {
        let mode = toc.mode();
        let duration = toc.frame_duration();
        let n = duration.samples(self.sample_rate);
        let prev = self.prev_mode();
        let voice_fresh = mode.has_voice() && prev.is_some_and(|p| !p.has_voice());
        if voice_fresh {
            self.voice.reset();
            for r in &mut self.up {
                r.reset();
            }
        }
        if mode == Mode::Music && prev.is_some_and(Mode::has_voice) {
            let estimate = self.voice_continuation();
            let folded: Vec<Vec<f32>> = estimate
                .iter()
                .map(|e| folded_tail(self.celt.window(), e))
                .collect();
            self.celt.add_to_tail(&folded);
        }

        let mut dec = RangeDecoder::new(data);
        let mut out = vec![vec![0.0f32; n]; self.channels];
        let mut voice_layout = None;
        if mode.has_voice() {
            let rate = if mode == Mode::Hybrid {
                16000
            } else {
                toc.bandwidth().voice_rate()
            };
            let (voice_us, count) = silk::split_duration(duration.micros())
                .ok_or_else(|| ShengError::CorruptStream(format!("语音路径不支持 {duration} 帧")))?;
            let layout = VoiceLayout::for_duration(rate, voice_us)
                .ok_or_else(|| ShengError::CorruptStream(format!("语音帧长 {voice_us} us 无效")))?;
            self.ensure_voice_rate(rate)?;
            let mut voice = vec![Vec::with_capacity(layout.frame_len() * count); toc.channels()];
            for _ in 0..count {
                let part = self.voice.decode_frame(&mut dec, layout, toc.channels())?;
                for (v, p) in voice.iter_mut().zip(part) {
                    v.extend(p);
                }
            }
            let mut up = self.upsample(&voice);
            if voice_fresh {
                let window = self.celt.window();
                for ch in &mut up {
                    for (v, w) in ch.iter_mut().zip(window) {
                        *v *= w * w;
                    }
                }
            }
            add_into(&mut out, &up, 0);
            voice_layout = Some(layout);
        }

        if mode.has_transform() {
            let lm = duration
                .lm()
                .ok_or_else(|| ShengError::CorruptStream(format!("变换路径不支持 {duration} 帧")))?;
            let start = if mode == Mode::Hybrid {
                HYBRID_START_BAND
            } else {
                0
            };
            let end = celt::end_band(toc.bandwidth());
            let (pcm, _) = self
                .celt
                .decode_frame(&mut dec, lm, (start, end), toc.channels())?;
            add_into(&mut out, &pcm, 0);
        } else if prev.is_some_and(Mode::has_transform) {
            let tail = self.celt.take_tail();
            add_into(&mut out, &tail, 0);
        }

        self.final_range = dec.final_range();
        self.last = Some(LastFrame {
            mode,
            duration,
            voice: voice_layout,
        });
        self.last_energy = mean_square(&out);
        Ok(out)
    }

    /// 丢包补偿一帧
    fn conceal_frame(&mut self, duration: FrameDuration) -> Vec<Vec<f32>> {
        let n = duration.samples(self.sample_rate);
        let mut out = vec![vec![0.0f32; n]; self.channels];
        let Some(last) = self.last else {
            return out;
        };
        if let Some(layout) = last.voice {
            let voice_len = layout.frame_len() * self.sample_rate as usize / layout.rate as usize;
            let count = n / voice_len.max(1);
            let mut voice: Vec<Vec<f32>> = Vec::new();
            for _ in 0..count.max(1) {
                let part = self.voice.conceal(layout);
                if voice.len() != part.len() {
                    voice = vec![Vec::new(); part.len()];
                }
                for (v, p) in voice.iter_mut().zip(part) {
                    v.extend(p);
                }
            }
            let up = self.upsample(&voice);
            add_into(&mut out, &up, 0);
        }
        if last.mode.has_transform() {
            let lm = duration.lm().or(last.duration.lm()).unwrap_or(celt::MAX_LM);
            let block = celt::frame_coeffs(self.sample_rate, lm);
            for b in 0..n.div_ceil(block) {
                let pcm = self.celt.conceal(lm);
                add_into(&mut out, &pcm, b * block);
            }
        }

        // 补偿输出不超过最近一个正常帧的能量
        let energy = mean_square(&out);
        if energy > self.last_energy && energy > 0.0 {
            let scale = (self.last_energy / energy).sqrt();
            for ch in &mut out {
                for v in ch.iter_mut() {
                    *v *= scale;
                }
            }
        }
        log::debug!(
            "丢包补偿 {} 帧 ({}), 连续 {} 帧",
            last.mode,
            duration,
            self.voice.lost_frames()
        );
        out
    }

    /// 语音路径输出转换到输出声道数后升采样
    fn upsample(&mut self, voice: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let mapped = map_channels(voice, self.channels);
        self.up
            .iter_mut()
            .zip(&mapped)
            .map(|(r, ch)| r.process(ch))
            .collect()
    }

    /// 升采样器中尚未输出的语音信号, 长度为一个重叠
    fn voice_continuation(&self) -> Vec<Vec<f32>> {
        let ov = self.celt.overlap();
        self.up
            .iter()
            .map(|r| {
                let mut r = r.clone();
                let pending = ov * r.in_rate() as usize / self.sample_rate as usize;
                let mut out = r.process(&vec![0.0; pending]);
                out.resize(ov, 0.0);
                out
            })
            .collect()
    }
}

/// 解码会话
#[derive(Debug, Clone)]
pub struct OpusDecoder {
    config: DecoderConfig,
    core: DecoderCore,
    gain: f32,
    last_packet_samples: usize,
    /// 最近一个数据包的帧长与帧数
    last_packet: Option<(FrameDuration, usize)>,
}

impl OpusDecoder {
    pub fn new(config: DecoderConfig) -> ShengResult<Self> {
        config.validate()?;
        let core = DecoderCore::new(config.sample_rate, usize::from(config.channels))?;
        log::debug!(
            "创建解码器: {} Hz {} 声道, 增益 {} (Q8 dB)",
            config.sample_rate,
            config.channels,
            config.gain_q8
        );
        Ok(Self {
            gain: config.linear_gain(),
            config,
            core,
            last_packet_samples: 0,
            last_packet: None,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn channels(&self) -> usize {
        usize::from(self.config.channels)
    }

    /// 最近一个数据包 (或补偿) 每声道的采样数
    pub fn last_packet_duration(&self) -> usize {
        self.last_packet_samples
    }

    /// 最近一帧结束时区间解码器的状态
    pub fn final_range(&self) -> u32 {
        self.core.final_range
    }

    /// 输出增益, Q8 dB
    pub fn gain(&self) -> i16 {
        self.config.gain_q8
    }

    pub fn set_gain(&mut self, gain_q8: i16) {
        self.config.gain_q8 = gain_q8;
        self.gain = self.config.linear_gain();
    }

    /// 清空全部历史
    pub fn reset(&mut self) -> ShengResult<()> {
        self.core = DecoderCore::new(self.config.sample_rate, self.channels())?;
        self.last_packet_samples = 0;
        self.last_packet = None;
        Ok(())
    }

    /// 解码一个数据包, `None` 或空数据表示丢包. 返回交错 F32 PCM
    pub fn decode(&mut self, packet: Option<&[u8]>) -> ShengResult<Vec<f32>> {
        let planar = match packet.filter(|p| !p.is_empty()) {
            Some(data) => self.decode_packet(data)?,
            None => self.conceal(),
        };
        let samples = planar.first().map_or(0, Vec::len);
        self.last_packet_samples = samples;
        let channels = self.channels();
        let mut out = Vec::with_capacity(samples * channels);
        for i in 0..samples {
            for ch in &planar {
                out.push(ch[i] * self.gain);
            }
        }
        Ok(out)
    }

    /// 解码为交错 S16 PCM
    pub fn decode_i16(&mut self, packet: Option<&[u8]>) -> ShengResult<Vec<i16>> {
        Ok(f32_to_s16(&self.decode(packet)?))
    }

    fn decode_packet(&mut self, data: &[u8]) -> ShengResult<Vec<Vec<f32>>> {
        let parsed = parse_packet(data)?;
        let duration = parsed.toc.frame_duration();
        let mut core = self.core.clone();
        let capacity = parsed.samples(self.config.sample_rate);
        let mut planar = vec![Vec::with_capacity(capacity); self.channels()];
        for frame in &parsed.frames {
            let pcm = if frame.is_empty() {
                core.conceal_frame(duration)
            } else {
                core.decode_frame(parsed.toc, frame)?
            };
            for (o, p) in planar.iter_mut().zip(pcm) {
                o.extend(p);
            }
        }
        log::trace!(
            "解码数据包: {} 字节, {} {} {} x {} 帧",
            data.len(),
            parsed.toc.mode(),
            parsed.toc.bandwidth(),
            duration,
            parsed.frames.len()
        );
        self.core = core;
        self.last_packet = Some((duration, parsed.frames.len()));
        Ok(planar)
    }

    fn conceal(&mut self) -> Vec<Vec<f32>> {
        let (duration, count) = self.last_packet.unwrap_or((DEFAULT_CONCEAL, 1));
        let mut planar = vec![Vec::new(); self.channels()];
        for _ in 0..count {
            for (o, p) in planar.iter_mut().zip(self.core.conceal_frame(duration)) {
                o.extend(p);
            }
        }
        planar
    }
}

fn make_resamplers(in_rate: u32, out_rate: u32, channels: usize) -> ShengResult<Vec<Resampler>> {
    (0..channels)
        .map(|_| Resampler::new(in_rate, out_rate, DECODER_RESAMPLE_DELAY_US))
        .collect()
}

/// 编码声道数到输出声道数: 双声道转单声道取平均, 单声道转双声道复制
fn map_channels(input: &[Vec<f32>], channels: usize) -> Vec<Vec<f32>> {
    match (input.len(), channels) {
        (2, 1) => {
            let mid = input[0].iter().zip(&input[1]).map(|(l, r)| 0.5 * (l + r));
            vec![mid.collect()]
        }
        (1, 2) => vec![input[0].clone(), input[0].clone()],
        _ => input.to_vec(),
    }
}

fn add_into(out: &mut [Vec<f32>], src: &[Vec<f32>], offset: usize) {
    for (o, s) in out.iter_mut().zip(src) {
        for (d, v) in o.iter_mut().skip(offset).zip(s) {
            *d += v;
        }
    }
}

fn mean_square(planar: &[Vec<f32>]) -> f32 {
    let count: usize = planar.iter().map(Vec::len).sum();
    if count == 0 {
        return 0.0;
    }
    planar.iter().flatten().map(|v| v * v).sum::<f32>() / count as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opus::config::EncoderConfig;
    use crate::opus::encoder::OpusEncoder;
    use crate::opus::{Application, Bitrate};

    fn tone(rate: u32, freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn snr(reference: &[f32], decoded: &[f32]) -> f64 {
        let (mut s, mut e) = (0.0f64, 0.0f64);
        for (a, b) in reference.iter().zip(decoded) {
            s += f64::from(*a).powi(2);
            e += f64::from(a - b).powi(2);
        }
        10.0 * (s / e.max(1e-20)).log10()
    }

    fn session(rate: u32, mode: Mode, bits: u32) -> (OpusEncoder, OpusDecoder) {
        let mut cfg = EncoderConfig::new(rate, 1, Application::Audio);
        cfg.force_mode = Some(mode);
        cfg.bitrate = Bitrate::Bits(bits);
        (
            OpusEncoder::new(cfg).unwrap(),
            OpusDecoder::new(DecoderConfig::new(rate, 1)).unwrap(),
        )
    }

    /// 编解码整段信号, 返回解码输出
    fn run(enc: &mut OpusEncoder, dec: &mut OpusDecoder, input: &[f32]) -> Vec<f32> {
        let frame = enc.frame_samples();
        let mut out = Vec::new();
        for chunk in input.chunks_exact(frame) {
            let packet = enc.encode(chunk).unwrap();
            out.extend(dec.decode(Some(&packet)).unwrap());
            assert_eq!(dec.final_range(), enc.final_range());
        }
        out
    }

    #[test]
    fn test_音乐模式往返() {
        let (mut enc, mut dec) = session(48000, Mode::Music, 64000);
        let input = tone(48000, 440.0, 960 * 12);
        let out = run(&mut enc, &mut dec, &input);
        let d = enc.lookahead();
        let s = snr(&input[960..960 * 11], &out[960 + d..960 * 11 + d]);
        assert!(s > 10.0, "SNR {s:.1} dB");
    }

    #[test]
    fn test_语音模式往返() {
        let (mut enc, mut dec) = session(16000, Mode::Voice, 24000);
        let input = tone(16000, 220.0, 320 * 20);
        let out = run(&mut enc, &mut dec, &input);
        let d = enc.lookahead();
        let s = snr(&input[320 * 4..320 * 19], &out[320 * 4 + d..320 * 19 + d]);
        assert!(s > 5.0, "SNR {s:.1} dB");
    }

    #[test]
    fn test_混合模式往返() {
        let (mut enc, mut dec) = session(48000, Mode::Hybrid, 48000);
        let input = tone(48000, 300.0, 960 * 12);
        let out = run(&mut enc, &mut dec, &input);
        let d = enc.lookahead();
        let s = snr(&input[960 * 3..960 * 11], &out[960 * 3 + d..960 * 11 + d]);
        assert!(s > 4.0, "SNR {s:.1} dB");
    }

    #[test]
    fn test_丢包补偿能量不超过上一帧() {
        let (mut enc, mut dec) = session(48000, Mode::Music, 48000);
        let input = tone(48000, 1000.0, 960 * 6);
        let mut last = Vec::new();
        for chunk in input.chunks_exact(960) {
            let packet = enc.encode(chunk).unwrap();
            last = dec.decode(Some(&packet)).unwrap();
        }
        let energy = |x: &[f32]| x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
        let reference = energy(&last);
        for _ in 0..5 {
            let out = dec.decode(None).unwrap();
            assert_eq!(out.len(), 960);
            assert!(energy(&out) <= reference * 1.0001);
        }
        assert_eq!(dec.last_packet_duration(), 960);
    }

    #[test]
    fn test_损坏数据包不改变状态() {
        let (mut enc, mut dec) = session(48000, Mode::Music, 64000);
        let input = tone(48000, 440.0, 960 * 4);
        let packets: Vec<Vec<u8>> = input
            .chunks_exact(960)
            .map(|c| enc.encode(c).unwrap())
            .collect();
        dec.decode(Some(&packets[0])).unwrap();
        let range = dec.final_range();
        // 声明的长度超出数据
        let bad = [packets[1][0] | 0x02, 200, 1, 2];
        assert!(matches!(dec.decode(Some(&bad)), Err(ShengError::MalformedPacket(_))));
        assert_eq!(dec.final_range(), range);

        let mut twin = OpusDecoder::new(DecoderConfig::new(48000, 1)).unwrap();
        twin.decode(Some(&packets[0])).unwrap();
        for p in &packets[1..] {
            assert_eq!(dec.decode(Some(p)).unwrap(), twin.decode(Some(p)).unwrap());
        }
    }

    #[test]
    fn test_首个数据包前丢包输出静音() {
        let mut dec = OpusDecoder::new(DecoderConfig::new(16000, 2)).unwrap();
        let out = dec.decode(None).unwrap();
        assert_eq!(out.len(), 320 * 2);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_单声道码流双声道输出() {
        let (mut enc, _) = session(24000, Mode::Music, 32000);
        let mut dec = OpusDecoder::new(DecoderConfig::new(24000, 2)).unwrap();
        let input = tone(24000, 600.0, 480 * 3);
        for chunk in input.chunks_exact(480) {
            let packet = enc.encode(chunk).unwrap();
            let out = dec.decode(Some(&packet)).unwrap();
            assert_eq!(out.len(), 960);
            for pair in out.chunks_exact(2) {
                assert_eq!(pair[0], pair[1]);
            }
        }
        let pcm = dec.decode_i16(None).unwrap();
        assert_eq!(pcm.len(), 960);
    }

    #[test]
    fn test_模式切换后继续同步() {
        let mut cfg = EncoderConfig::new(48000, 1, Application::Audio);
        cfg.bitrate = Bitrate::Bits(32000);
        let mut enc = OpusEncoder::new(cfg).unwrap();
        let mut dec = OpusDecoder::new(DecoderConfig::new(48000, 1)).unwrap();
        let input = tone(48000, 350.0, 960 * 12);
        let modes = [
            Mode::Music,
            Mode::Music,
            Mode::Hybrid,
            Mode::Hybrid,
            Mode::Music,
            Mode::Music,
        ];
        for (k, chunk) in input.chunks_exact(960).enumerate() {
            enc.set_force_mode(Some(modes[k % modes.len()])).unwrap();
            let packet = enc.encode(chunk).unwrap();
            let out = dec.decode(Some(&packet)).unwrap();
            assert_eq!(dec.final_range(), enc.final_range(), "第 {k} 帧");
            assert!(out.iter().all(|v| v.is_finite() && v.abs() < 2.0));
        }
    }
}
