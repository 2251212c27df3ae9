//! 语音路径编码器.

use sheng_core::{RangeEncoder, ShengError, ShengResult};

use super::{INACTIVE_FRAME_BITS, VoiceLayout};
use super::lpc::{self, asymmetric_window};
use super::lsf;
use super::nsq::{NoiseShaper, quantize_subframe, shaping_filter};
use super::pitch;
use super::state::VoiceState;
use super::syntax::{FrameType, PitchIndices, VoiceFrameIndices, best_pulse_level, code_frame};
use super::tables::{GAIN_DELTA_MAX, GAIN_LEVELS, ltp_gain_index, step_index};
use crate::opus::coder::SymbolCoder;

/// 低于该均方根的帧按静默帧编码
const INACTIVE_RMS: f32 = 3e-4;

/// 归一化基音相关度超过该值判为浊音
const VOICED_THRESHOLD: f32 = 0.5;

/// 分析用的带宽扩展
const ANALYSIS_CHIRP: f32 = 0.99;

/// 噪声整形强度
const SHAPING_GAMMA: f32 = 0.85;

/// 速率环在估计值两侧搜索的范围 (步长索引)
const OFFSET_SPAN: i32 = 12;

/// 侧声道活跃时分得的比特比例
const SIDE_SHARE: f32 = 0.3;

/// 一帧编码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrameInfo {
    /// 每个编码声道 (中, 侧) 的帧类型
    pub frame_types: Vec<FrameType>,
}

#[derive(Debug, Clone)]
struct ChannelEncoder {
    state: VoiceState,
    shaper: NoiseShaper,
    /// 最近 20 ms 的输入
    history: Vec<f32>,
}

impl ChannelEncoder {
    fn new(rate: u32) -> Self {
        Self {
            state: VoiceState::new(lpc::order_for_rate(rate)),
            shaper: NoiseShaper::new(),
            history: vec![0.0; history_len(rate)],
        }
    }
}

fn history_len(rate: u32) -> usize {
    (rate / 50) as usize
}

fn rms(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
}

/// 一次速率环尝试的结果
struct Trial {
    indices: VoiceFrameIndices,
    coder: RangeEncoder,
    shaper: NoiseShaper,
}

/// 语音路径编码器
#[derive(Debug, Clone)]
pub struct VoiceEncoder {
    rate: u32,
    complexity: u8,
    channels: Vec<ChannelEncoder>,
}

impl VoiceEncoder {
    /// 创建编码器, `channels` 为 1 或 2
    pub fn new(rate: u32, channels: usize) -> Self {
        Self {
            rate,
            complexity: 9,
            channels: (0..channels.clamp(1, 2))
                .map(|_| ChannelEncoder::new(rate))
                .collect(),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn set_complexity(&mut self, complexity: u8) {
        self.complexity = complexity.min(10);
    }

    /// 切换内部采样率, 采样率改变时清空全部状态
    pub fn set_rate(&mut self, rate: u32) {
        if rate != self.rate {
            log::debug!("语音路径内部采样率 {} -> {} Hz", self.rate, rate);
            *self = Self {
                complexity: self.complexity,
                ..Self::new(rate, self.channels.len())
            };
        }
    }

    pub fn reset(&mut self) {
        let rate = self.rate;
        for ch in &mut self.channels {
            *ch = ChannelEncoder::new(rate);
        }
    }

    /// 编码一个语音帧, `pcm` 为内部采样率下每声道一帧样本.
    /// 编码结束时 `enc.tell()` 不超过 `budget_bits`
    pub fn encode_frame(
        &mut self,
        enc: &mut RangeEncoder,
        pcm: &[&[f32]],
        budget_bits: u32,
    ) -> ShengResult<VoiceFrameInfo> {
        let len = pcm.first().map_or(0, |c| c.len());
        let sub = VoiceLayout::new(self.rate, 1).subframe_len();
        let layout = VoiceLayout::new(self.rate, len / sub.max(1));
        if layout.subframes != 2 && layout.subframes != 4 || layout.frame_len() != len {
            return Err(ShengError::InvalidArgument(format!(
                "语音帧长度 {len} 不是 10 ms 或 20 ms"
            )));
        }

        let coded: Vec<Vec<f32>> = if self.channels.len() == 2 {
            let (l, r) = (pcm[0], pcm.get(1).copied().unwrap_or(pcm[0]));
            let mid = l.iter().zip(r).map(|(a, b)| 0.5 * (a + b)).collect();
            let side = l.iter().zip(r).map(|(a, b)| 0.5 * (a - b)).collect();
            vec![mid, side]
        } else {
            vec![pcm[0].to_vec()]
        };

        let complexity = self.complexity;
        let mut types = Vec::with_capacity(coded.len());
        if coded.len() == 2 {
            let side_active = rms(&coded[1]) > 0.02 * rms(&coded[0]) + INACTIVE_RMS;
            let start = enc.tell();
            let available = budget_bits.saturating_sub(start);
            let mid_budget = if side_active {
                start + ((available as f32) * (1.0 - SIDE_SHARE)) as u32
            } else {
                budget_bits.saturating_sub(INACTIVE_FRAME_BITS)
            };
            let (mid_ch, side_ch) = self.channels.split_at_mut(1);
            types.push(encode_channel(
                &mut mid_ch[0],
                enc,
                layout,
                &coded[0],
                mid_budget,
                complexity,
                false,
            )?);
            types.push(encode_channel(
                &mut side_ch[0],
                enc,
                layout,
                &coded[1],
                budget_bits,
                complexity,
                !side_active,
            )?);
        } else {
            types.push(encode_channel(
                &mut self.channels[0],
                enc,
                layout,
                &coded[0],
                budget_bits,
                complexity,
                false,
            )?);
        }
        log::trace!(
            "语音帧: {} Hz {} 子帧 类型 {:?} 用 {} / {} 位",
            self.rate,
            layout.subframes,
            types,
            enc.tell(),
            budget_bits
        );
        Ok(VoiceFrameInfo { frame_types: types })
    }
}

fn encode_channel(
    ch: &mut ChannelEncoder,
    enc: &mut RangeEncoder,
    layout: VoiceLayout,
    frame: &[f32],
    budget_bits: u32,
    complexity: u8,
    force_inactive: bool,
) -> ShengResult<FrameType> {
    let hist = ch.history.len();
    let mut buffer = Vec::with_capacity(hist + frame.len());
    buffer.extend_from_slice(&ch.history);
    buffer.extend_from_slice(frame);
    ch.history.copy_from_slice(&buffer[buffer.len() - hist..]);

    let level = rms(frame);
    if force_inactive || level < INACTIVE_RMS {
        return encode_inactive(ch, enc, layout, level);
    }

    // 短时预测分析: 窗覆盖 5 ms 历史与整帧
    let sub = layout.subframe_len();
    let win_start = hist - sub;
    let window = asymmetric_window(buffer.len() - win_start, sub, sub / 2);
    let windowed: Vec<f32> = buffer[win_start..]
        .iter()
        .zip(&window)
        .map(|(x, w)| x * w)
        .collect();
    let order = layout.order();
    let a = lpc::analyze(&windowed, order, layout.rate, ANALYSIS_CHIRP);
    let target_lsf = lsf::lpc_to_lsf(&a)
        .map(|w| lsf::lsf_to_q15(&w))
        .unwrap_or_else(|| ch.state.prev_lsf().to_vec());
    let lsf_res = lsf::quantize(&target_lsf, ch.state.prev_lsf());

    let interpolate = layout.subframes == 4 && ch.state.has_history() && {
        let plain = ch.state.filters(layout, &lsf_res, false);
        let interp = ch.state.filters(layout, &lsf_res, true);
        let half = &buffer[hist..hist + 2 * sub];
        let before = &buffer[..hist];
        let e_plain = energy(&lpc::residual(half, before, &plain.lpc));
        let e_interp = energy(&lpc::residual(half, before, &interp.first_half));
        e_interp < e_plain
    };
    let filters = ch.state.filters(layout, &lsf_res, interpolate);

    // 基音分析在量化滤波器的残差上进行
    let residual = lpc::residual(&buffer, &[], &filters.lpc);
    let pitch = pitch::search(&residual, hist, frame.len(), layout.rate)
        .filter(|p| p.correlation > VOICED_THRESHOLD)
        .map(|p| {
            let deltas = pitch::subframe_deltas(
                &residual,
                hist,
                sub,
                layout.subframes,
                p.lag_q2,
                layout.rate,
            );
            let ltp_gains = deltas
                .iter()
                .enumerate()
                .map(|(s, &d)| {
                    let lag = pitch::subframe_lag(p.lag_q2, d, layout.rate);
                    ltp_gain_index(pitch::ltp_gain(&residual, hist + s * sub, sub, lag))
                })
                .collect();
            PitchIndices {
                lag_q2: p.lag_q2,
                deltas,
                ltp_gains,
            }
        });
    let frame_type = if pitch.is_some() {
        FrameType::Voiced
    } else {
        FrameType::Unvoiced
    };

    // 每子帧残差电平作为步长基准
    let base: Vec<i32> = (0..layout.subframes)
        .map(|s| step_index(rms(&residual[hist + s * sub..hist + (s + 1) * sub]).max(1e-6)))
        .collect();
    let shaping = if complexity >= 2 {
        shaping_filter(&a, SHAPING_GAMMA)
    } else {
        Vec::new()
    };

    let start = enc.tell();
    let side_info = 8 * order as u32 + 40;
    let pulse_bits = budget_bits.saturating_sub(start + side_info) as f32;
    let bits_per_sample = pulse_bits / frame.len() as f32;
    let guess = (4.0 * (2.1 - bits_per_sample)).round() as i32;

    let template = VoiceFrameIndices {
        frame_type,
        gains: Vec::new(),
        lsf: lsf_res,
        interpolate,
        pitch,
        pulse_level: 0,
        pulses: Vec::new(),
    };
    let attempt = |offset: i32| -> ShengResult<Option<Trial>> {
        let mut idx = template.clone();
        idx.gains = coded_gains(&base, offset);
        let mut syn = ch.state.syn.clone();
        let mut shaper = ch.shaper.clone();
        let mut pulses = Vec::with_capacity(frame.len());
        for s in 0..layout.subframes {
            let params = VoiceState::subframe_params(layout, &idx, &filters, s);
            pulses.extend(quantize_subframe(
                &mut syn,
                &mut shaper,
                &params,
                &shaping,
                &frame[s * sub..(s + 1) * sub],
            ));
        }
        idx.pulse_level = best_pulse_level(&pulses);
        idx.pulses = pulses;
        let mut coder = enc.clone();
        code_frame(&mut SymbolCoder::Encoder(&mut coder), layout, &mut idx)?;
        let fits = !coder.has_overflowed() && coder.tell() <= budget_bits;
        Ok(fits.then_some(Trial {
            indices: idx,
            coder,
            shaper,
        }))
    };

    let iterations = 2 + usize::from(complexity) / 2;
    let (mut lo, mut hi) = (guess - OFFSET_SPAN, guess + OFFSET_SPAN);
    let mut best = None;
    for _ in 0..iterations {
        if lo > hi {
            break;
        }
        let mid = (lo + hi).div_euclid(2);
        match attempt(mid)? {
            Some(trial) => {
                best = Some(trial);
                hi = mid - 1;
            }
            None => lo = mid + 1,
        }
    }
    if best.is_none() {
        best = attempt(GAIN_LEVELS as i32)?;
    }
    let Some(trial) = best else {
        log::trace!("语音帧预算不足, 按静默帧编码");
        return encode_inactive(ch, enc, layout, level);
    };

    *enc = trial.coder;
    ch.shaper = trial.shaper;
    ch.state.reconstruct(layout, &trial.indices);
    Ok(trial.indices.frame_type)
}

fn encode_inactive(
    ch: &mut ChannelEncoder,
    enc: &mut RangeEncoder,
    layout: VoiceLayout,
    level: f32,
) -> ShengResult<FrameType> {
    let mut idx = VoiceFrameIndices::inactive(step_index(level) as u32);
    code_frame(&mut SymbolCoder::Encoder(enc), layout, &mut idx)?;
    ch.state.reconstruct(layout, &idx);
    ch.shaper.reset();
    Ok(FrameType::Inactive)
}

/// 与码流语法相同的增益限幅
fn coded_gains(base: &[i32], offset: i32) -> Vec<u32> {
    let max = GAIN_LEVELS as i32 - 1;
    let mut out = Vec::with_capacity(base.len());
    let mut prev = 0;
    for (s, &b) in base.iter().enumerate() {
        let want = (b + offset).clamp(0, max);
        let g = if s == 0 {
            want
        } else {
            (prev + (want - prev).clamp(-GAIN_DELTA_MAX, GAIN_DELTA_MAX)).clamp(0, max)
        };
        out.push(g as u32);
        prev = g;
    }
    out
}

fn energy(x: &[f32]) -> f32 {
    x.iter().map(|v| v * v).sum()
}
