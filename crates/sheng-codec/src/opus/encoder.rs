//! 编码会话.
//!
//! 每次调用编码一帧交错 PCM, 返回一个完整的数据包. 控制器先决定模式、带宽与预算,
//! 然后按模式调用语音路径 (降采样到 8/12/16 kHz) 与变换路径, 两者共用每帧一个区间编码器.
//! 超过 20 ms 的音乐与混合帧拆成多个 20 ms 帧放入同一个数据包, 语音帧则由 2 或 3 个
//! 20 ms 语音帧组成.
//!
//! 语音路径的降采样延迟 (1 ms) 与解码端升采样延迟 (1.5 ms) 之和等于变换路径的重叠长度
//! (2.5 ms), 两条路径的输出因此在时间上对齐.

use sheng_core::{RangeEncoder, ShengError, ShengResult};
use sheng_resample::{Resampler, s16_to_f32};

use super::allocation::{
    BitAllocation, VOICE_RESERVE_BITS, frame_bytes, min_frame_bytes, split_budget,
};
use super::analysis::SignalAnalyzer;
use super::celt::{self, CeltEncoder, FrameParams, HYBRID_START_BAND};
use super::config::EncoderConfig;
use super::framing::{PacketOptions, build_packet};
use super::mode::{ModeController, ModeDecision, ModeInputs};
use super::silk::{self, VoiceEncoder};
use super::toc::Toc;
use super::{Application, Bandwidth, Bitrate, FrameDuration, Mode, Signal};

/// 编码端降采样器的群延迟 (微秒)
pub const ENCODER_RESAMPLE_DELAY_US: u32 = 1000;

/// 可变码率下瞬态帧的预算倍数
const VBR_TRANSIENT_BOOST: f32 = 1.2;

/// 可变码率下静音帧的预算倍数
const VBR_SILENCE_SCALE: f32 = 0.5;

/// 变换路径静音帧收缩后的最少字节数, 保证解码端仍会读取静音标志
const SILENT_FRAME_BYTES: usize = 3;

/// 一个数据包内的帧结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketLayout {
    /// 每帧时长
    frame: FrameDuration,
    count: usize,
}

fn packet_layout(mode: Mode, duration: FrameDuration) -> PacketLayout {
    if mode != Mode::Voice && duration > FrameDuration::Ms20 {
        PacketLayout {
            frame: FrameDuration::Ms20,
            count: (duration.micros() / FrameDuration::Ms20.micros()) as usize,
        }
    } else {
        PacketLayout {
            frame: duration,
            count: 1,
        }
    }
}

/// 编码会话
#[derive(Debug)]
pub struct OpusEncoder {
    config: EncoderConfig,
    analyzer: SignalAnalyzer,
    controller: ModeController,
    voice: VoiceEncoder,
    celt: CeltEncoder,
    /// 每声道降采样器, 输出当前语音路径采样率
    down: Vec<Resampler>,
    prev_mode: Option<Mode>,
    final_range: u32,
    last_decision: Option<ModeDecision>,
}

impl OpusEncoder {
    /// 按配置创建编码会话
    pub fn new(config: EncoderConfig) -> ShengResult<Self> {
        config.validate()?;
        let channels = usize::from(config.channels);
        let voice_rate = Bandwidth::max_for_rate(config.sample_rate)
            .min(config.max_bandwidth)
            .voice_rate()
            .min(config.sample_rate.max(8000));
        let mut voice = VoiceEncoder::new(voice_rate, channels);
        voice.set_complexity(config.complexity);
        let down = make_resamplers(config.sample_rate, voice_rate, channels)?;
        log::debug!(
            "创建编码器: {} Hz {} 声道, 应用 {:?}, 帧长 {}, 码率 {:?}",
            config.sample_rate,
            channels,
            config.application,
            config.frame_duration,
            config.bitrate
        );
        Ok(Self {
            controller: ModeController::new(config.application),
            analyzer: SignalAnalyzer::new(),
            voice,
            celt: CeltEncoder::new(config.sample_rate),
            down,
            prev_mode: None,
            final_range: 0,
            last_decision: None,
            config,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn channels(&self) -> usize {
        usize::from(self.config.channels)
    }

    /// 每帧每声道的采样数
    pub fn frame_samples(&self) -> usize {
        self.config.frame_samples()
    }

    /// 编码延迟 (会话采样率下的样本数), 解码输出比输入晚这么多样本
    pub fn lookahead(&self) -> usize {
        celt::overlap(self.config.sample_rate)
    }

    /// 最近一帧结束时区间编码器的状态, 与解码端对比可验证码流同步
    pub fn final_range(&self) -> u32 {
        self.final_range
    }

    /// 最近一个数据包的模式决策
    pub fn last_decision(&self) -> Option<&ModeDecision> {
        self.last_decision.as_ref()
    }

    /// 清空全部历史, 配置不变
    pub fn reset(&mut self) {
        self.analyzer.reset();
        self.controller.reset(self.config.application);
        self.voice.reset();
        self.celt.reset();
        for r in &mut self.down {
            r.reset();
        }
        self.prev_mode = None;
        self.final_range = 0;
        self.last_decision = None;
    }

    pub fn set_bitrate(&mut self, bitrate: Bitrate) -> ShengResult<()> {
        self.update_config(|c| c.bitrate = bitrate)
    }

    pub fn set_complexity(&mut self, complexity: u8) -> ShengResult<()> {
        self.update_config(|c| c.complexity = complexity)?;
        self.voice.set_complexity(complexity);
        Ok(())
    }

    pub fn set_vbr(&mut self, vbr: bool) {
        self.config.vbr = vbr;
    }

    pub fn set_signal(&mut self, signal: Signal) {
        self.config.signal = signal;
    }

    pub fn set_max_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.config.max_bandwidth = bandwidth;
    }

    pub fn set_application(&mut self, application: Application) -> ShengResult<()> {
        self.update_config(|c| c.application = application)
    }

    pub fn set_force_mode(&mut self, mode: Option<Mode>) -> ShengResult<()> {
        self.update_config(|c| c.force_mode = mode)
    }

    /// 修改配置, 校验失败时保持原配置
    fn update_config(&mut self, change: impl FnOnce(&mut EncoderConfig)) -> ShengResult<()> {
        let mut next = self.config.clone();
        change(&mut next);
        next.validate()?;
        self.config = next;
        Ok(())
    }

    /// 编码一帧交错 F32 PCM
    pub fn encode(&mut self, pcm: &[f32]) -> ShengResult<Vec<u8>> {
        let bitrate = self.config.bitrate;
        self.encode_with_bitrate(pcm, bitrate)
    }

    /// 编码一帧交错 S16 PCM
    pub fn encode_i16(&mut self, pcm: &[i16]) -> ShengResult<Vec<u8>> {
        self.encode(&s16_to_f32(pcm))
    }

    /// 以指定码率编码一帧, 不改变会话配置
    pub fn encode_with_bitrate(&mut self, pcm: &[f32], bitrate: Bitrate) -> ShengResult<Vec<u8>> {
        let channels = self.channels();
        let samples = self.frame_samples();
        if pcm.len() != samples * channels {
            return Err(ShengError::InvalidArgument(format!(
                "PCM 长度 {} 与帧长 {} x {} 声道不符",
                pcm.len(),
                samples,
                channels
            )));
        }
        if let Bitrate::Bits(bits) = bitrate {
            if !(500..=512_000).contains(&bits) {
                return Err(ShengError::InvalidConfig(format!(
                    "码率 {bits} bits/s 超出 500-512000 范围"
                )));
            }
        }
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|c| pcm.iter().skip(c).step_by(channels).copied().collect())
            .collect();

        let stats = self.analyzer.analyze(pcm, channels);
        let duration = self.config.frame_duration;
        let bits = bitrate.resolve(self.config.sample_rate, channels, samples);
        let vbr_bits = if self.config.vbr {
            let scale = if stats.is_silent() {
                VBR_SILENCE_SCALE
            } else if stats.transient {
                VBR_TRANSIENT_BOOST
            } else {
                1.0
            };
            (bits as f32 * scale) as u32
        } else {
            bits
        };
        let inputs = ModeInputs {
            bitrate: bits,
            channels,
            sample_rate: self.config.sample_rate,
            application: self.config.application,
            signal: self.config.signal,
            frame_duration: duration,
            max_bandwidth: self.config.max_bandwidth,
            force_mode: self.config.force_mode,
            frame_bytes: frame_bytes(vbr_bits, duration),
        };
        let mut decision = self.controller.decide(&inputs, &stats);
        let layout = packet_layout(decision.mode, duration);

        // 降采样器每帧都要运行, 保证语音路径的输入连续
        let voice_rate = if decision.mode == Mode::Hybrid {
            16000
        } else {
            decision.bandwidth.voice_rate()
        };
        self.set_voice_rate(voice_rate)?;
        let voice_pcm: Vec<Vec<f32>> = self
            .down
            .iter_mut()
            .zip(&planar)
            .map(|(r, ch)| r.process(ch))
            .collect();

        let stereo = channels == 2;
        let toc = Toc::new(decision.mode, decision.bandwidth, layout.frame, stereo)?;
        let floor = min_frame_bytes(decision.mode, layout.frame, channels);
        let allocation = if layout.count > 1 || decision.allocation.frame_bytes < floor {
            let per_frame = if layout.count > 1 {
                frame_bytes(vbr_bits, layout.frame)
            } else {
                decision.allocation.frame_bytes
            };
            split_budget(
                decision.mode,
                decision.bandwidth,
                per_frame.max(floor),
                layout.frame,
                channels,
            )
        } else {
            decision.allocation.clone()
        };
        let frame_len = layout.frame.samples(self.config.sample_rate);
        let voice_len = layout.frame.samples(voice_rate);
        let mut frames = Vec::with_capacity(layout.count);
        let mut bands = None;
        for f in 0..layout.count {
            let pcm: Vec<&[f32]> = planar
                .iter()
                .map(|c| &c[f * frame_len..(f + 1) * frame_len])
                .collect();
            let voice: Vec<&[f32]> = voice_pcm
                .iter()
                .map(|c| &c[f * voice_len..(f + 1) * voice_len])
                .collect();
            let (data, frame_bands) =
                self.encode_frame(&decision, layout.frame, &allocation, &pcm, &voice)?;
            bands = frame_bands.or(bands);
            frames.push(data);
        }

        let refs: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
        let packet = build_packet(toc, &refs, PacketOptions::default())?;
        log::trace!(
            "数据包: {} 帧 x {}, {} 字节, 模式 {} {}",
            layout.count,
            layout.frame,
            packet.len(),
            decision.mode,
            decision.bandwidth
        );
        decision.allocation = BitAllocation {
            bands,
            ..allocation
        };
        self.last_decision = Some(decision);
        Ok(packet)
    }

    fn set_voice_rate(&mut self, rate: u32) -> ShengResult<()> {
        if self.voice.rate() != rate {
            self.voice.set_rate(rate);
            self.down = make_resamplers(self.config.sample_rate, rate, self.channels())?;
        }
        Ok(())
    }

    /// 编码一帧, 溢出时退回静音帧
    fn encode_frame(
        &mut self,
        decision: &ModeDecision,
        duration: FrameDuration,
        allocation: &BitAllocation,
        pcm: &[&[f32]],
        voice_pcm: &[&[f32]],
    ) -> ShengResult<(Vec<u8>, Option<celt::rate::Allocation>)> {
        let mode = decision.mode;
        if mode.has_voice() && self.prev_mode.is_some_and(|p| !p.has_voice()) {
            // 语音路径从音乐模式切回时两端都从零历史开始
            self.voice.reset();
        }
        let snapshot = (self.voice.clone(), self.celt.clone());
        let mut enc = RangeEncoder::new(allocation.frame_bytes);
        let coded = self.code_paths(&mut enc, decision, duration, allocation, pcm, voice_pcm);
        let outcome = match coded {
            Ok(outcome) if !enc.has_overflowed() => outcome,
            Err(e) if !matches!(e, ShengError::Overflow(_)) => return Err(e),
            _ => {
                log::warn!("{} 帧编码溢出, 改为静音帧", mode);
                (self.voice, self.celt) = snapshot;
                enc = RangeEncoder::new(allocation.frame_bytes);
                let silence: Vec<Vec<f32>> = pcm.iter().map(|c| vec![0.0; c.len()]).collect();
                let voice_silence: Vec<Vec<f32>> =
                    voice_pcm.iter().map(|c| vec![0.0; c.len()]).collect();
                let silence: Vec<&[f32]> = silence.iter().map(Vec::as_slice).collect();
                let voice_silence: Vec<&[f32]> = voice_silence.iter().map(Vec::as_slice).collect();
                self.code_paths(
                    &mut enc,
                    decision,
                    duration,
                    allocation,
                    &silence,
                    &voice_silence,
                )?
            }
        };
        self.prev_mode = Some(mode);

        if self.config.vbr {
            let used = (enc.tell() as usize).div_ceil(8);
            let size = match (&outcome, mode) {
                (_, Mode::Voice) => Some(used.max(1)),
                (Some(info), Mode::Music) if info.silent => Some(used.max(SILENT_FRAME_BYTES)),
                _ => None,
            };
            if let Some(size) = size.filter(|&s| s < enc.storage()) {
                enc.shrink(size);
            }
        }
        self.final_range = enc.final_range();
        let bands = outcome.map(|info| info.allocation);
        Ok((enc.finish()?, bands))
    }

    /// 按模式依次调用语音路径与变换路径
    fn code_paths(
        &mut self,
        enc: &mut RangeEncoder,
        decision: &ModeDecision,
        duration: FrameDuration,
        allocation: &BitAllocation,
        pcm: &[&[f32]],
        voice_pcm: &[&[f32]],
    ) -> ShengResult<Option<celt::encoder::FrameInfo>> {
        let mode = decision.mode;
        if mode.has_voice() {
            let (voice_us, count) = silk::split_duration(duration.micros()).ok_or_else(|| {
                ShengError::Internal(format!("语音路径不支持 {duration} 帧"))
            })?;
            let total = allocation.total_bits().saturating_sub(VOICE_RESERVE_BITS);
            let voice_bits = if mode == Mode::Voice {
                total
            } else {
                allocation.voice_bits
            };
            let len = voice_pcm.first().map_or(0, |c| c.len()) / count;
            for k in 0..count {
                let part: Vec<&[f32]> = voice_pcm
                    .iter()
                    .map(|c| &c[k * len..(k + 1) * len])
                    .collect();
                let budget = (u64::from(voice_bits) * (k as u64 + 1) / count as u64) as u32;
                debug_assert_eq!(
                    silk::VoiceLayout::for_duration(self.voice.rate(), voice_us)
                        .map(|l| l.frame_len()),
                    Some(len)
                );
                self.voice.encode_frame(enc, &part, budget)?;
            }
        }
        if !mode.has_transform() {
            self.celt.push_history(pcm);
            return Ok(None);
        }
        let lm = duration
            .lm()
            .ok_or_else(|| ShengError::Internal(format!("变换路径不支持 {duration} 帧")))?;
        let params = FrameParams {
            lm,
            start: if mode == Mode::Hybrid {
                HYBRID_START_BAND
            } else {
                0
            },
            end: celt::end_band(decision.bandwidth),
        };
        self.celt.encode_frame(enc, pcm, params).map(Some)
    }
}

fn make_resamplers(in_rate: u32, out_rate: u32, channels: usize) -> ShengResult<Vec<Resampler>> {
    (0..channels)
        .map(|_| Resampler::new(in_rate, out_rate, ENCODER_RESAMPLE_DELAY_US))
        .collect()
}
