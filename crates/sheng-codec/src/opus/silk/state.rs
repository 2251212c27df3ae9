//! 语音声道的重建状态, 编码端与解码端各持有一份.

use super::VoiceLayout;
use super::lpc::bandwidth_expand;
use super::lsf;
use super::nsq::{SubframeParams, Synthesis};
use super::pitch::subframe_lag;
use super::syntax::{FrameType, VoiceFrameIndices};
use super::tables::{LTP_GAINS, gain_step};
use crate::opus::celt::pvq::lcg_rand;

/// 丢包补偿每帧的幅度衰减
pub const PLC_DECAY: f32 = 0.8;

/// 舒适噪声与丢包补偿使用的带宽扩展
const NOISE_CHIRP: f32 = 0.9;

/// 连续补偿多帧时的合成滤波带宽扩展
const PLC_CHIRP: f32 = 0.98;

/// 上一帧的概要, 供丢包补偿使用
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    pub frame_type: FrameType,
    pub lag_q2: u32,
    pub ltp_gain: f32,
    /// 激励均方根
    pub excitation_rms: f32,
}

impl Default for FrameSummary {
    fn default() -> Self {
        Self {
            frame_type: FrameType::Inactive,
            lag_q2: 0,
            ltp_gain: 0.0,
            excitation_rms: 0.0,
        }
    }
}

/// 一帧解出的滤波器
#[derive(Debug, Clone)]
pub struct FrameFilters {
    /// 量化后的 LSF (Q15)
    pub lsf: Vec<i32>,
    /// 后半帧 (或整个 10 ms 帧) 的预测系数
    pub lpc: Vec<f32>,
    /// 前半帧的预测系数
    pub first_half: Vec<f32>,
}

/// 单声道语音重建状态
#[derive(Debug, Clone)]
pub struct VoiceState {
    order: usize,
    prev_lsf: Vec<i32>,
    has_prev: bool,
    lpc: Vec<f32>,
    pub(crate) syn: Synthesis,
    seed: u32,
    last: FrameSummary,
    lost: u32,
}

impl VoiceState {
    pub fn new(order: usize) -> Self {
        Self {
            order,
            prev_lsf: lsf::default_lsf(order),
            has_prev: false,
            lpc: vec![0.0; order],
            syn: Synthesis::new(),
            seed: 0,
            last: FrameSummary::default(),
            lost: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.order);
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// 上一帧的量化 LSF, 没有历史时为均匀分布
    pub fn prev_lsf(&self) -> &[i32] {
        &self.prev_lsf
    }

    pub fn has_history(&self) -> bool {
        self.has_prev
    }

    pub fn last_frame(&self) -> FrameSummary {
        self.last
    }

    /// 连续丢失的帧数
    pub fn lost_frames(&self) -> u32 {
        self.lost
    }

    /// 由 LSF 残差得到本帧滤波器
    pub fn filters(
        &self,
        layout: VoiceLayout,
        residuals: &[i32],
        interpolate: bool,
    ) -> FrameFilters {
        let q = lsf::dequantize(residuals, &self.prev_lsf);
        let lpc = lsf::lsf_q15_to_lpc(&q);
        let first_half = if layout.subframes == 4 && interpolate && self.has_prev {
            lsf::lsf_q15_to_lpc(&lsf::interpolate(&self.prev_lsf, &q))
        } else {
            lpc.clone()
        };
        FrameFilters {
            lsf: q,
            lpc,
            first_half,
        }
    }

    /// 第 `s` 个子帧的合成参数
    pub fn subframe_params<'a>(
        layout: VoiceLayout,
        idx: &VoiceFrameIndices,
        filters: &'a FrameFilters,
        s: usize,
    ) -> SubframeParams<'a> {
        let lpc = if layout.subframes == 4 && s < 2 {
            &filters.first_half
        } else {
            &filters.lpc
        };
        let (lag_q2, ltp_gain) = match &idx.pitch {
            Some(p) => {
                let delta = p.deltas.get(s).copied().unwrap_or(0);
                let gain = p.ltp_gains.get(s).copied().unwrap_or(0);
                (
                    subframe_lag(p.lag_q2, delta, layout.rate),
                    LTP_GAINS[gain.min(LTP_GAINS.len() - 1)],
                )
            }
            None => (0, 0.0),
        };
        SubframeParams {
            lpc,
            step: gain_step(idx.gains.get(s).copied().unwrap_or(0)),
            lag_q2,
            ltp_gain,
        }
    }

    /// 按码流参数重建一帧
    pub fn reconstruct(&mut self, layout: VoiceLayout, idx: &VoiceFrameIndices) -> Vec<f32> {
        let len = layout.frame_len();
        let out = if idx.frame_type == FrameType::Inactive {
            let step = gain_step(idx.gains.first().copied().unwrap_or(0));
            let out = self.noise_frame(len, step, NOISE_CHIRP);
            self.last = FrameSummary {
                frame_type: FrameType::Inactive,
                lag_q2: self.last.lag_q2,
                ltp_gain: 0.0,
                excitation_rms: step,
            };
            out
        } else {
            let filters = self.filters(layout, &idx.lsf, idx.interpolate);
            let sub = layout.subframe_len();
            let mut out = Vec::with_capacity(len);
            let mut last_params = (0, 0.0);
            for s in 0..layout.subframes {
                let params = Self::subframe_params(layout, idx, &filters, s);
                let pulses: Vec<i32> = (s * sub..(s + 1) * sub)
                    .map(|n| idx.pulses.get(n).copied().unwrap_or(0))
                    .collect();
                out.extend(self.syn.synthesize(&params, &pulses));
                last_params = (params.lag_q2, params.ltp_gain);
            }
            self.prev_lsf = filters.lsf;
            self.lpc = filters.lpc;
            self.has_prev = true;
            self.last = FrameSummary {
                frame_type: idx.frame_type,
                lag_q2: last_params.0,
                ltp_gain: last_params.1,
                excitation_rms: rms(self.syn.recent_excitation(len)),
            };
            out
        };
        self.syn.trim();
        self.lost = 0;
        out
    }

    /// 丢包补偿一帧, 状态按补偿结果更新
    pub fn conceal(&mut self, layout: VoiceLayout) -> Vec<f32> {
        let len = layout.frame_len();
        self.lost += 1;
        let mut lpc = self.lpc.clone();
        bandwidth_expand(&mut lpc, PLC_CHIRP);
        let out = if self.last.frame_type == FrameType::Voiced && self.last.lag_q2 > 0 {
            // 按基音周期重复上一帧激励, 帧内逐样本衰减
            let per_sample = PLC_DECAY.powf(1.0 / len as f32);
            let gain = self.last.ltp_gain.clamp(0.5, 1.0);
            let mut g = 1.0f32;
            (0..len)
                .map(|_| {
                    g *= per_sample;
                    let exc = g * self.syn.long_term(self.last.lag_q2, gain);
                    let st = self.syn.short_term(&lpc);
                    self.syn.emit(exc, st)
                })
                .collect()
        } else {
            let level = self.last.excitation_rms * PLC_DECAY;
            self.noise_frame(len, level, NOISE_CHIRP)
        };
        self.last.excitation_rms *= PLC_DECAY;
        self.lpc = lpc;
        self.syn.trim();
        out
    }

    /// 经合成滤波的均匀噪声, 激励均方根为 `level`
    fn noise_frame(&mut self, len: usize, level: f32, chirp: f32) -> Vec<f32> {
        let mut lpc = self.lpc.clone();
        bandwidth_expand(&mut lpc, chirp);
        let scale = level * 3f32.sqrt();
        (0..len)
            .map(|_| {
                self.seed = lcg_rand(self.seed);
                let u = (self.seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
                let st = self.syn.short_term(&lpc);
                self.syn.emit(u * scale, st)
            })
            .collect()
    }
}

fn rms(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
}
