//! 合成滤波与噪声整形量化.
//!
//! 激励 `exc = pulse * step + g * exc[n - lag]`, 输出 `y = exc + Σ a[k] y[n-1-k]`.
//! 编码端逐样本选择脉冲时把过去的重建误差经 `1 / (1 - B(z))` 反馈到目标上,
//! 其中 `B(z)` 是带宽扩展后的预测滤波器, 重建噪声因此跟随共振峰包络.

use super::lpc::MAX_ORDER;
use super::pitch::delayed;
use super::tables::PULSE_LIMIT;

/// 激励历史长度, 覆盖最大基音延迟
pub const EXC_HISTORY: usize = 320;

/// 一个子帧的合成参数
#[derive(Debug, Clone, Copy)]
pub struct SubframeParams<'a> {
    pub lpc: &'a [f32],
    pub step: f32,
    /// 基音延迟 (1/4 样本), 清音帧忽略
    pub lag_q2: u32,
    /// 长时预测增益, 0 表示不使用
    pub ltp_gain: f32,
}

/// 合成滤波器状态, 编解码两端各持有一份且始终一致
#[derive(Debug, Clone)]
pub struct Synthesis {
    exc: Vec<f32>,
    out: Vec<f32>,
}

impl Default for Synthesis {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesis {
    pub fn new() -> Self {
        Self {
            exc: vec![0.0; EXC_HISTORY],
            out: vec![0.0; MAX_ORDER],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 长时预测值
    pub fn long_term(&self, lag_q2: u32, gain: f32) -> f32 {
        if gain == 0.0 {
            return 0.0;
        }
        gain * delayed(&self.exc, self.exc.len(), lag_q2)
    }

    /// 短时预测值
    pub fn short_term(&self, lpc: &[f32]) -> f32 {
        let len = self.out.len();
        lpc.iter()
            .enumerate()
            .map(|(k, a)| a * self.out[len - 1 - k])
            .sum()
    }

    /// 由激励产生一个输出样本
    pub fn emit(&mut self, exc: f32, short_term: f32) -> f32 {
        let y = exc + short_term;
        self.exc.push(exc);
        self.out.push(y);
        y
    }

    /// 最近的激励样本
    pub fn recent_excitation(&self, len: usize) -> &[f32] {
        &self.exc[self.exc.len() - len.min(self.exc.len())..]
    }

    /// 帧结束时裁剪历史
    pub fn trim(&mut self) {
        let cut = self.exc.len() - EXC_HISTORY;
        self.exc.drain(..cut);
        let cut = self.out.len() - MAX_ORDER;
        self.out.drain(..cut);
    }

    /// 按脉冲合成一个子帧
    pub fn synthesize(&mut self, params: &SubframeParams<'_>, pulses: &[i32]) -> Vec<f32> {
        pulses
            .iter()
            .map(|&p| {
                let ltp = self.long_term(params.lag_q2, params.ltp_gain);
                let st = self.short_term(params.lpc);
                self.emit(p as f32 * params.step + ltp, st)
            })
            .collect()
    }
}

/// 噪声整形反馈状态 (仅编码端)
#[derive(Debug, Clone)]
pub struct NoiseShaper {
    error: Vec<f32>,
}

impl Default for NoiseShaper {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseShaper {
    pub fn new() -> Self {
        Self {
            error: vec![0.0; MAX_ORDER],
        }
    }

    pub fn reset(&mut self) {
        self.error.fill(0.0);
    }

    fn feedback(&self, shaping: &[f32]) -> f32 {
        let len = self.error.len();
        shaping
            .iter()
            .enumerate()
            .map(|(k, b)| b * self.error[len - 1 - k])
            .sum()
    }

    fn push(&mut self, e: f32) {
        self.error.remove(0);
        self.error.push(e);
    }
}

/// 量化一个子帧, 返回脉冲. `syn` 与 `shaper` 随之前进
pub fn quantize_subframe(
    syn: &mut Synthesis,
    shaper: &mut NoiseShaper,
    params: &SubframeParams<'_>,
    shaping: &[f32],
    target: &[f32],
) -> Vec<i32> {
    let inv_step = 1.0 / params.step;
    target
        .iter()
        .map(|&x| {
            let ltp = syn.long_term(params.lag_q2, params.ltp_gain);
            let st = syn.short_term(params.lpc);
            let u = x - st - ltp + shaper.feedback(shaping);
            let pulse = ((u * inv_step).round() as i32).clamp(-PULSE_LIMIT, PULSE_LIMIT);
            let y = syn.emit(pulse as f32 * params.step + ltp, st);
            shaper.push(y - x);
            pulse
        })
        .collect()
}

/// 噪声整形系数 `b[k] = gamma^(k+1) * a[k]`
pub fn shaping_filter(lpc: &[f32], gamma: f32) -> Vec<f32> {
    let mut b = lpc.to_vec();
    super::lpc::bandwidth_expand(&mut b, gamma);
    b
}
