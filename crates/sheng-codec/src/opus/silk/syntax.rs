//! 语音帧的码流语法.
//!
//! 顺序: 帧类型, 子帧步长, LSF 残差, LSF 插值标志 (20 ms), 基音参数 (浊音),
//! 脉冲参数组, 脉冲. 静默帧只有帧类型和一个舒适噪声电平.
//! 所有概率表都是固定的, 解析不依赖解码器历史.

use sheng_core::ShengResult;

use super::VoiceLayout;
use super::pitch::{lag_bits, lag_range};
use super::tables::{
    FRAME_TYPE_ICDF, GAIN_DELTA_LAPLACE, GAIN_DELTA_MAX, GAIN_LEVELS, LSF_LAPLACE,
    LSF_RESIDUAL_MAX, LTP_GAIN_ICDF, LTP_GAINS, PITCH_DELTA_LAPLACE, PITCH_DELTA_MAX,
    PULSE_LEVEL_ICDF, PULSE_LEVELS,
};
use crate::opus::coder::SymbolCoder;

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// 静默, 解码端生成舒适噪声
    Inactive,
    /// 清音, 无长时预测
    Unvoiced,
    /// 浊音, 带长时预测
    Voiced,
}

impl FrameType {
    fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Inactive,
            1 => Self::Unvoiced,
            _ => Self::Voiced,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Inactive => 0,
            Self::Unvoiced => 1,
            Self::Voiced => 2,
        }
    }
}

/// 浊音帧的基音参数
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PitchIndices {
    /// 帧基音延迟 (1/4 样本)
    pub lag_q2: u32,
    /// 每子帧的整数偏移
    pub deltas: Vec<i32>,
    /// 每子帧的长时预测增益索引
    pub ltp_gains: Vec<usize>,
}

/// 一个语音帧的全部码流参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrameIndices {
    pub frame_type: FrameType,
    /// 每子帧的步长索引 (静默帧只有一个)
    pub gains: Vec<u32>,
    /// LSF 残差
    pub lsf: Vec<i32>,
    /// 前半帧使用插值 LSF
    pub interpolate: bool,
    pub pitch: Option<PitchIndices>,
    /// 脉冲参数组
    pub pulse_level: usize,
    pub pulses: Vec<i32>,
}

impl VoiceFrameIndices {
    /// 静默帧
    pub fn inactive(gain: u32) -> Self {
        Self {
            frame_type: FrameType::Inactive,
            gains: vec![gain],
            lsf: Vec::new(),
            interpolate: false,
            pitch: None,
            pulse_level: 0,
            pulses: Vec::new(),
        }
    }
}

fn at<T: Copy + Default>(v: &[T], i: usize) -> T {
    v.get(i).copied().unwrap_or_default()
}

/// 编解码一个语音帧的参数
pub fn code_frame(
    coder: &mut SymbolCoder<'_, '_>,
    layout: VoiceLayout,
    idx: &mut VoiceFrameIndices,
) -> ShengResult<()> {
    let t = coder.icdf(idx.frame_type.index(), &FRAME_TYPE_ICDF, 8);
    idx.frame_type = FrameType::from_index(t);

    if idx.frame_type == FrameType::Inactive {
        let g = coder.uint(at(&idx.gains, 0).min(GAIN_LEVELS - 1), GAIN_LEVELS)?;
        *idx = VoiceFrameIndices::inactive(g);
        return Ok(());
    }

    let subframes = layout.subframes;
    let mut gains = Vec::with_capacity(subframes);
    let mut prev = coder.uint(at(&idx.gains, 0).min(GAIN_LEVELS - 1), GAIN_LEVELS)? as i32;
    gains.push(prev as u32);
    for s in 1..subframes {
        let delta = (at(&idx.gains, s) as i32 - prev).clamp(-GAIN_DELTA_MAX, GAIN_DELTA_MAX);
        let delta = coder.laplace(delta, GAIN_DELTA_LAPLACE.0, GAIN_DELTA_LAPLACE.1);
        prev = (prev + delta).clamp(0, GAIN_LEVELS as i32 - 1);
        gains.push(prev as u32);
    }
    idx.gains = gains;

    let order = layout.order();
    idx.lsf = (0..order)
        .map(|i| {
            let r = at(&idx.lsf, i).clamp(-LSF_RESIDUAL_MAX, LSF_RESIDUAL_MAX);
            coder.laplace(r, LSF_LAPLACE.0, LSF_LAPLACE.1)
        })
        .collect();
    idx.interpolate = subframes == 4 && coder.bit_logp(idx.interpolate, 1);

    if idx.frame_type == FrameType::Voiced {
        let wanted = idx.pitch.take().unwrap_or_default();
        let (min, max) = lag_range(layout.rate);
        let int = ((wanted.lag_q2 >> 2) as usize).clamp(min, max) - min;
        let int = coder.raw_bits(int as u32, lag_bits(layout.rate)) as usize;
        let frac = coder.raw_bits(wanted.lag_q2 & 3, 2);
        let lag_q2 = (((min + int).min(max) as u32) << 2) | frac;
        let deltas = (0..subframes)
            .map(|s| {
                let d = at(&wanted.deltas, s).clamp(-PITCH_DELTA_MAX, PITCH_DELTA_MAX);
                coder
                    .laplace(d, PITCH_DELTA_LAPLACE.0, PITCH_DELTA_LAPLACE.1)
                    .clamp(-PITCH_DELTA_MAX, PITCH_DELTA_MAX)
            })
            .collect();
        let ltp_gains = (0..subframes)
            .map(|s| {
                let g = at(&wanted.ltp_gains, s).min(LTP_GAINS.len() - 1);
                coder.icdf(g, &LTP_GAIN_ICDF, 8)
            })
            .collect();
        idx.pitch = Some(PitchIndices {
            lag_q2,
            deltas,
            ltp_gains,
        });
    } else {
        idx.pitch = None;
    }

    let level = idx.pulse_level.min(PULSE_LEVELS.len() - 1);
    idx.pulse_level = coder.icdf(level, &PULSE_LEVEL_ICDF, 8);
    let (fs, decay) = PULSE_LEVELS[idx.pulse_level];
    idx.pulses = (0..layout.frame_len())
        .map(|n| coder.laplace(at(&idx.pulses, n), fs, decay))
        .collect();
    Ok(())
}

/// 选择编码脉冲代价最小的参数组
pub fn best_pulse_level(pulses: &[i32]) -> usize {
    let peak = pulses.iter().map(|p| p.abs()).max().unwrap_or(0);
    let mut best = (PULSE_LEVELS.len() - 1, u32::MAX);
    for (level, &(fs, decay)) in PULSE_LEVELS.iter().enumerate() {
        if crate::opus::laplace::max_magnitude(fs, decay) < peak {
            continue;
        }
        let mut scratch = sheng_core::RangeEncoder::new(pulses.len() * 2 + 16);
        for &p in pulses {
            crate::opus::laplace::encode_laplace(&mut scratch, p, fs, decay);
        }
        let cost = scratch.tell_frac();
        if cost < best.1 {
            best = (level, cost);
        }
    }
    best.0
}
