//! 逐帧信号统计, 供模式控制器使用.
//!
//! 统计量都在单声道混合信号上计算: 过零率, 频谱平坦度 (功率谱几何均值与算术均值之比),
//! 高通分段能量突增检测, 帧能量. 另外保留最近若干帧的对数能量, 用其标准差衡量
//! 音节式的能量起伏.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// 瞬态判定: 分段高通能量相对此前平均能量的比值
const TRANSIENT_RATIO: f32 = 8.0;

/// 瞬态检测的分段数
const TRANSIENT_SEGMENTS: usize = 8;

/// 计算能量起伏的历史帧数
const MODULATION_FRAMES: usize = 10;

/// 视为静音的均方能量
const SILENCE_ENERGY: f32 = 1e-8;

/// 一帧的统计量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalStats {
    /// 均方能量
    pub energy: f32,
    /// 过零率, 每样本 0..1
    pub zcr: f32,
    /// 频谱平坦度 0..1, 白噪声约 0.56, 纯音接近 0
    pub flatness: f32,
    /// 帧内能量突增
    pub transient: bool,
    /// 最近若干帧对数能量 (log2) 的标准差
    pub modulation: f32,
}

impl SignalStats {
    /// 静音帧
    pub fn is_silent(&self) -> bool {
        self.energy < SILENCE_ENERGY
    }

    /// 调性, 1 减平坦度
    pub fn tonality(&self) -> f32 {
        1.0 - self.flatness
    }
}

/// 信号分析器, 缓存 FFT 计划与能量历史
pub struct SignalAnalyzer {
    /// 最近一次使用的 FFT 长度与计划
    plan: Option<(usize, Arc<dyn Fft<f32>>)>,
    history: VecDeque<f32>,
}

impl std::fmt::Debug for SignalAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalAnalyzer")
            .field("fft_len", &self.plan.as_ref().map(|(n, _)| *n))
            .field("history", &self.history)
            .finish()
    }
}

impl Default for SignalAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalAnalyzer {
    pub fn new() -> Self {
        Self {
            plan: None,
            history: VecDeque::with_capacity(MODULATION_FRAMES),
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// 分析一帧交错 PCM
    pub fn analyze(&mut self, pcm: &[f32], channels: usize) -> SignalStats {
        let channels = channels.max(1);
        let mono: Vec<f32> = pcm
            .chunks(channels)
            .map(|s| s.iter().sum::<f32>() / channels as f32)
            .collect();
        self.analyze_mono(&mono)
    }

    /// 分析一帧单声道 PCM
    pub fn analyze_mono(&mut self, x: &[f32]) -> SignalStats {
        let energy = mean_square(x);
        let zcr = zero_crossing_rate(x);
        let flatness = self.flatness(x);
        let transient = detect_transient(x);

        if self.history.len() == MODULATION_FRAMES {
            self.history.pop_front();
        }
        self.history.push_back((energy + SILENCE_ENERGY).log2());
        let modulation = std_dev(self.history.iter().copied());

        SignalStats {
            energy,
            zcr,
            flatness,
            transient,
            modulation,
        }
    }

    /// Hann 窗功率谱的平坦度, 静音返回 1
    fn flatness(&mut self, x: &[f32]) -> f32 {
        let n = x.len();
        if n < 8 || mean_square(x) < SILENCE_ENERGY {
            return 1.0;
        }
        let fft = match &self.plan {
            Some((len, fft)) if *len == n => Arc::clone(fft),
            _ => {
                let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
                self.plan = Some((n, Arc::clone(&fft)));
                fft
            }
        };
        let mut buf: Vec<Complex<f32>> = x
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let w = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos();
                Complex::new(v * w, 0.0)
            })
            .collect();
        fft.process(&mut buf);

        // 跳过直流, 只用正频率
        let bins = &buf[1..n / 2];
        let floor = 1e-12f32;
        let (mut log_sum, mut sum) = (0.0f64, 0.0f64);
        for c in bins {
            let p = c.norm_sqr() + floor;
            log_sum += f64::from(p.ln());
            sum += f64::from(p);
        }
        let count = bins.len() as f64;
        let geometric = (log_sum / count).exp();
        let arithmetic = sum / count;
        (geometric / arithmetic).clamp(0.0, 1.0) as f32
    }
}

fn mean_square(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32
}

/// 每样本过零率
pub fn zero_crossing_rate(x: &[f32]) -> f32 {
    if x.len() < 2 {
        return 0.0;
    }
    let crossings = x
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (x.len() - 1) as f32
}

/// 一阶差分高通后分段能量是否突增
pub fn detect_transient(x: &[f32]) -> bool {
    let seg = x.len() / TRANSIENT_SEGMENTS;
    if seg < 2 {
        return false;
    }
    let hp: Vec<f32> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let energies: Vec<f32> = hp
        .chunks(seg)
        .take(TRANSIENT_SEGMENTS)
        .map(mean_square)
        .collect();
    let mut acc = 0.0f32;
    for (i, &e) in energies.iter().enumerate() {
        if i > 0 && e > SILENCE_ENERGY && e > TRANSIENT_RATIO * (acc / i as f32 + SILENCE_ENERGY) {
            return true;
        }
        acc += e;
    }
    false
}

fn std_dev(values: impl Iterator<Item = f32> + Clone) -> f32 {
    let n = values.clone().count();
    if n < 2 {
        return 0.0;
    }
    let mean = values.clone().sum::<f32>() / n as f32;
    (values.map(|v| (v - mean) * (v - mean)).sum::<f32>() / n as f32).sqrt()
}
