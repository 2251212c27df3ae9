//! 低重叠 MDCT.
//!
//! N 个系数对应 N + ov 个输入样本: 前 ov 个样本是上升窗, 中间 N - ov 个为平坦
//! 部分, 最后 ov 个是下降窗. 在 2N 点 MDCT 帧中两侧各补 (N - ov) / 2 个零.
//! 窗满足 w[i]^2 + w[ov-1-i]^2 = 1, 相邻块叠加后时域混叠相消.
//!
//! DCT-IV 通过 N/2 点复数 FFT 计算. 正变换带 2/N 缩放, 逆变换不缩放,
//! 因此同一频率的系数幅度与块长 (以及采样率) 无关.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// 功率互补的上升窗, 长度 `overlap`
pub fn rising_window(overlap: usize) -> Vec<f32> {
    (0..overlap)
        .map(|i| {
            let x = (PI / 2.0 * (i as f32 + 0.5) / overlap as f32).sin();
            (PI / 2.0 * x * x).sin()
        })
        .collect()
}

/// 某一块长的 MDCT
#[derive(Clone)]
pub struct Mdct {
    /// 系数个数
    n: usize,
    /// 重叠长度
    overlap: usize,
    /// 上升窗
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    /// 前旋转因子 e^(-iπm/N)
    pre: Vec<Complex<f32>>,
    /// 后旋转因子 e^(-iπ(p + 1/4)/N)
    post: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Mdct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mdct")
            .field("n", &self.n)
            .field("overlap", &self.overlap)
            .finish()
    }
}

impl Mdct {
    /// 创建 N 个系数、重叠 `overlap` 的变换, 要求 N 为偶数且 overlap ≤ N
    pub fn new(n: usize, overlap: usize) -> Self {
        debug_assert!(n % 2 == 0 && overlap <= n && (n - overlap) % 2 == 0);
        let half = n / 2;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(half);
        let pre = (0..half)
            .map(|m| Complex::from_polar(1.0, -PI * m as f32 / n as f32))
            .collect();
        let post = (0..half)
            .map(|p| Complex::from_polar(1.0, -PI * (p as f32 + 0.25) / n as f32))
            .collect();
        Self {
            n,
            overlap,
            window: rising_window(overlap),
            fft,
            pre,
            post,
        }
    }

    /// 系数个数
    pub fn len(&self) -> usize {
        self.n
    }

    /// 重叠长度
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// 上升窗
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    fn window_at(&self, i: usize) -> f32 {
        let (n, ov) = (self.n, self.overlap);
        if i < ov {
            self.window[i]
        } else if i < n {
            1.0
        } else {
            self.window[ov - 1 - (i - n)]
        }
    }

    /// 未缩放的 DCT-IV
    fn dct4(&self, u: &[f32]) -> Vec<f32> {
        let n = self.n;
        let half = n / 2;
        let mut z: Vec<Complex<f32>> = (0..half)
            .map(|m| Complex::new(u[2 * m], u[n - 1 - 2 * m]) * self.pre[m])
            .collect();
        self.fft.process(&mut z);
        let mut out = vec![0.0f32; n];
        for p in 0..half {
            let s = z[p] * self.post[p];
            out[2 * p] = s.re;
            out[n - 1 - 2 * p] = -s.im;
        }
        out
    }

    /// 正变换: `input` 为 N + ov 个样本, 返回 N 个系数
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        let n = self.n;
        let q = n / 2;
        let z = (n - self.overlap) / 2;
        let mut block = vec![0.0f32; 2 * n];
        for (i, &s) in input.iter().take(n + self.overlap).enumerate() {
            block[z + i] = s * self.window_at(i);
        }
        // (a, b, c, d) -> (-c_r - d, a - b_r)
        let mut u = vec![0.0f32; n];
        for i in 0..q {
            u[i] = -block[3 * q - 1 - i] - block[3 * q + i];
            u[q + i] = block[i] - block[2 * q - 1 - i];
        }
        let scale = 2.0 / n as f32;
        let mut out = self.dct4(&u);
        for v in &mut out {
            *v *= scale;
        }
        out
    }

    /// 逆变换: 返回已加窗的 N + ov 个样本, 前 ov 个需与上一块的尾部叠加
    pub fn inverse(&self, coeffs: &[f32]) -> Vec<f32> {
        let n = self.n;
        let q = n / 2;
        let z = (n - self.overlap) / 2;
        let u = self.dct4(coeffs);
        let at = |j: usize| -> f32 {
            if j < q {
                u[q + j]
            } else if j < 2 * q {
                -u[2 * q - 1 - (j - q)]
            } else if j < 3 * q {
                -u[q - 1 - (j - 2 * q)]
            } else {
                -u[j - 3 * q]
            }
        };
        (0..n + self.overlap)
            .map(|i| at(z + i) * self.window_at(i))
            .collect()
    }
}

/// 下降窗区间上由外部信号估计出的 MDCT 尾部
///
/// 等价于对一个只在下降窗区间含有 `signal` 的块做正逆变换后取尾部,
/// 用于从非变换路径切换到变换路径时补齐叠加所需的尾部.
pub fn folded_tail(window: &[f32], signal: &[f32]) -> Vec<f32> {
    let ov = window.len();
    (0..ov)
        .map(|i| {
            let fall = window[ov - 1 - i];
            let fall_mirror = window[i];
            let x = signal.get(i).copied().unwrap_or(0.0);
            let xm = signal.get(ov - 1 - i).copied().unwrap_or(0.0);
            fall * (fall * x + fall_mirror * xm)
        })
        .collect()
}
