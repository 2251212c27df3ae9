//! 短时线性预测分析.
//!
//! 预测系数 `a` 的约定: `x[n] ≈ Σ a[k] * x[n - 1 - k]`, 即 `A(z) = 1 - Σ a[k] z^-(k+1)`.

/// 最大预测阶数
pub const MAX_ORDER: usize = 16;

/// 自相关白噪声修正
const WHITE_NOISE_FRACTION: f64 = 1e-4;

/// 滞后窗的高斯带宽 (Hz)
const LAG_WINDOW_HZ: f64 = 60.0;

/// 反射系数的稳定上限
const MAX_REFLECTION: f32 = 0.999;

/// 按内部采样率选择预测阶数
pub fn order_for_rate(rate: u32) -> usize {
    if rate >= 16000 { 16 } else { 10 }
}

/// 非对称分析窗: 前 `rise` 个样本正弦上升, 末尾 `fall` 个样本余弦下降, 中间为 1
pub fn asymmetric_window(len: usize, rise: usize, fall: usize) -> Vec<f32> {
    let mut w = vec![1.0f32; len];
    let rise = rise.min(len);
    for (i, v) in w.iter_mut().take(rise).enumerate() {
        *v = (std::f32::consts::FRAC_PI_2 * (i as f32 + 0.5) / rise as f32).sin();
    }
    let fall = fall.min(len - rise);
    for i in 0..fall {
        w[len - 1 - i] = (std::f32::consts::FRAC_PI_2 * (i as f32 + 0.5) / fall as f32).sin();
    }
    w
}

/// 自相关 r[0..=order]
pub fn autocorrelation(x: &[f32], order: usize) -> Vec<f64> {
    (0..=order)
        .map(|lag| {
            x.iter()
                .skip(lag)
                .zip(x)
                .map(|(a, b)| f64::from(*a) * f64::from(*b))
                .sum()
        })
        .collect()
}

/// 高斯滞后窗与白噪声修正
pub fn lag_window(r: &mut [f64], rate: u32) {
    if r.is_empty() {
        return;
    }
    r[0] *= 1.0 + WHITE_NOISE_FRACTION;
    let k = 2.0 * std::f64::consts::PI * LAG_WINDOW_HZ / f64::from(rate);
    for (lag, v) in r.iter_mut().enumerate().skip(1) {
        let t = k * lag as f64;
        *v *= (-0.5 * t * t).exp();
    }
}

/// Levinson-Durbin 递推, 返回预测系数与预测误差能量
pub fn levinson(r: &[f64], order: usize) -> Option<(Vec<f32>, f64)> {
    if r.len() <= order || r[0] <= 0.0 {
        return None;
    }
    let mut a = vec![0.0f64; order];
    let mut tmp = vec![0.0f64; order];
    let mut err = r[0];
    for i in 0..order {
        let mut acc = r[i + 1];
        for j in 0..i {
            acc -= a[j] * r[i - j];
        }
        let k = acc / err;
        if !k.is_finite() || k.abs() >= 1.0 {
            return None;
        }
        tmp[..i].copy_from_slice(&a[..i]);
        for j in 0..i {
            a[j] = tmp[j] - k * tmp[i - 1 - j];
        }
        a[i] = k;
        err *= 1.0 - k * k;
    }
    Some((a.into_iter().map(|v| v as f32).collect(), err))
}

/// 带宽扩展 `a[k] *= chirp^(k+1)`
pub fn bandwidth_expand(a: &mut [f32], chirp: f32) {
    let mut g = chirp;
    for v in a.iter_mut() {
        *v *= g;
        g *= chirp;
    }
}

/// 由预测系数反推反射系数, 判断合成滤波器是否稳定
pub fn is_stable(a: &[f32]) -> bool {
    let mut cur: Vec<f64> = a.iter().map(|&v| f64::from(v)).collect();
    for i in (0..cur.len()).rev() {
        let k = cur[i];
        if !k.is_finite() || k.abs() >= f64::from(MAX_REFLECTION) {
            return false;
        }
        let den = 1.0 - k * k;
        let prev: Vec<f64> = (0..i)
            .map(|j| (cur[j] + k * cur[i - 1 - j]) / den)
            .collect();
        cur.truncate(i);
        cur.copy_from_slice(&prev);
    }
    true
}

/// 反复带宽扩展直到稳定, 仍失败时清零
pub fn make_stable(a: &mut [f32]) {
    for _ in 0..32 {
        if is_stable(a) {
            return;
        }
        bandwidth_expand(a, 0.98);
    }
    a.fill(0.0);
}

/// 对加窗后的信号做完整的 LPC 分析
pub fn analyze(windowed: &[f32], order: usize, rate: u32, chirp: f32) -> Vec<f32> {
    let mut r = autocorrelation(windowed, order);
    lag_window(&mut r, rate);
    let mut a = levinson(&r, order)
        .map(|(a, _)| a)
        .unwrap_or_else(|| vec![0.0; order]);
    bandwidth_expand(&mut a, chirp);
    make_stable(&mut a);
    a
}

/// 预测误差滤波, `history` 为 `x` 之前的样本 (最近的在末尾)
pub fn residual(x: &[f32], history: &[f32], a: &[f32]) -> Vec<f32> {
    let order = a.len();
    let mut buf = Vec::with_capacity(order + x.len());
    let pad = order.saturating_sub(history.len());
    buf.extend(std::iter::repeat_n(0.0f32, pad));
    buf.extend_from_slice(&history[history.len().saturating_sub(order)..]);
    buf.extend_from_slice(x);
    (0..x.len())
        .map(|n| {
            let pos = n + order;
            let pred: f32 = a
                .iter()
                .enumerate()
                .map(|(k, c)| c * buf[pos - 1 - k])
                .sum();
            buf[pos] - pred
        })
        .collect()
}
