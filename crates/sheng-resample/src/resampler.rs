//! 有理数比例多相 FIR 重采样器.
//!
//! 概念上先插零上采样 `up` 倍, 在 `in_rate * up` 的高采样率上做线性相位低通,
//! 再每 `down` 个取一个. 滤波器是因果的, 半长 D (高采样率下) 由调用方以微秒给定,
//! 因此输入与输出之间的群延迟是精确已知的整数个样本. 编解码器依赖这一点把
//! 不同采样率的处理路径在时间上对齐.

use std::sync::Arc;

use sheng_core::{ShengError, ShengResult};

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// 有理数比例重采样器, 处理单声道连续样本流
#[derive(Debug, Clone)]
pub struct Resampler {
    in_rate: u32,
    out_rate: u32,
    up: u64,
    down: u64,
    /// 高采样率下的滤波器系数, 长度 2D+1, 克隆间共享
    taps: Arc<[f32]>,
    /// 半长 D
    half: u64,
    /// 输入缓冲, buf[0] 对应绝对输入序号 buf_start
    buf: Vec<f32>,
    buf_start: u64,
    total_in: u64,
    total_out: u64,
}

impl Resampler {
    /// 创建重采样器, `delay_us` 为群延迟 (微秒)
    ///
    /// 延迟换算到高采样率、输入采样率、输出采样率后都必须是整数个样本.
    pub fn new(in_rate: u32, out_rate: u32, delay_us: u32) -> ShengResult<Self> {
        if in_rate == 0 || out_rate == 0 {
            return Err(ShengError::InvalidArgument(format!(
                "重采样率无效: {in_rate} -> {out_rate}"
            )));
        }
        let g = gcd(u64::from(in_rate), u64::from(out_rate));
        let up = u64::from(out_rate) / g;
        let down = u64::from(in_rate) / g;
        let high_rate = u64::from(in_rate) * up;
        let half_scaled = u64::from(delay_us) * high_rate;
        let exact = half_scaled % 1_000_000 == 0;
        let half = half_scaled / 1_000_000;
        if !exact || half % down != 0 || half % up != 0 {
            return Err(ShengError::InvalidArgument(format!(
                "延迟 {delay_us}us 在 {in_rate} -> {out_rate} 下不是整数个样本"
            )));
        }
        let taps = design_lowpass(in_rate, out_rate, up, half);
        log::trace!(
            "创建重采样器: {} -> {} Hz, up={}, down={}, 滤波器长度 {}",
            in_rate,
            out_rate,
            up,
            down,
            taps.len()
        );
        Ok(Self {
            in_rate,
            out_rate,
            up,
            down,
            taps: taps.into(),
            half,
            buf: Vec::new(),
            buf_start: 0,
            total_in: 0,
            total_out: 0,
        })
    }

    /// 输入采样率
    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    /// 输出采样率
    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    /// 以输出样本计的群延迟
    pub fn delay_out(&self) -> usize {
        (self.half / self.down) as usize
    }

    /// 以输入样本计的群延迟
    pub fn delay_in(&self) -> usize {
        (self.half / self.up) as usize
    }

    /// 清空历史
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf_start = 0;
        self.total_in = 0;
        self.total_out = 0;
    }

    fn input_at(&self, idx: u64) -> f32 {
        if idx < self.buf_start {
            return 0.0;
        }
        self.buf
            .get((idx - self.buf_start) as usize)
            .copied()
            .unwrap_or(0.0)
    }

    /// 处理一段输入, 返回所有已可计算的输出样本
    ///
    /// 当 `input.len() * out_rate` 能被 `in_rate` 整除时, 输出恰好为
    /// `input.len() * out_rate / in_rate` 个样本.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.buf.extend_from_slice(input);
        self.total_in += input.len() as u64;

        let limit = self.total_in * self.up;
        let mut out = Vec::with_capacity((input.len() as u64 * self.up / self.down) as usize + 1);
        let ntaps = self.taps.len() as u64;
        let gain = self.up as f32;
        while self.total_out * self.down < limit {
            let j = self.total_out * self.down;
            let phase = j % self.up;
            let i0 = j / self.up;
            let mut acc = 0.0f32;
            let mut k = phase;
            let mut m = 0u64;
            while k < ntaps {
                if m <= i0 {
                    acc += self.taps[k as usize] * self.input_at(i0 - m);
                }
                k += self.up;
                m += 1;
            }
            out.push(acc * gain);
            self.total_out += 1;
        }

        // 只保留下一次计算需要的历史
        let keep = (ntaps / self.up + 2) as usize;
        if self.buf.len() > keep {
            let drop = self.buf.len() - keep;
            self.buf.drain(..drop);
            self.buf_start += drop as u64;
        }
        out
    }
}

/// Hann 窗 sinc 低通, 直流增益归一化为 1
fn design_lowpass(in_rate: u32, out_rate: u32, up: u64, half: u64) -> Vec<f32> {
    let len = (2 * half + 1) as usize;
    if in_rate == out_rate {
        // 纯延迟
        let mut taps = vec![0.0f32; len];
        taps[half as usize] = 1.0;
        return taps;
    }
    let high_rate = f64::from(in_rate) * up as f64;
    let cutoff = 0.5 * f64::from(in_rate.min(out_rate)) * 0.85 / high_rate;
    let mut taps: Vec<f64> = (0..len)
        .map(|k| {
            let t = k as f64 - half as f64;
            let sinc = if t == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * std::f64::consts::PI * cutoff * t).sin() / (std::f64::consts::PI * t)
            };
            let w = 0.5 * (1.0 + (std::f64::consts::PI * t / (half as f64 + 1.0)).cos());
            sinc * w
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    if sum.abs() > 1e-12 {
        for t in &mut taps {
            *t /= sum;
        }
    }
    taps.into_iter().map(|t| t as f32).collect()
}
