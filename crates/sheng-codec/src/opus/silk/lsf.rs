//! 线谱频率 (LSF).
//!
//! LSF 以 Q15 整数表示, 0..32768 对应 0..π. 量化按差分进行: 每个 LSF 与前一个的间隔
//! 先由上一帧的量化间隔预测, 残差乘以固定步长后累加. 编码端闭环计算残差, 最后两端用
//! 同一个 `stabilize` 保证最小间隔.

use super::lpc::make_stable;
use super::tables::{LSF_MIN_GAP, LSF_PRED_SHIFT, LSF_RESIDUAL_MAX, LSF_STEP};

/// LSF 满量程 (对应 π)
pub const LSF_SCALE: i32 = 32768;

const GRID_POINTS: usize = 1024;
const BISECTION_STEPS: usize = 24;

/// 对称多项式 `s[0..=2h]` 在单位圆上的实值, `x = cos ω`
fn eval_symmetric(s: &[f64], x: f64) -> f64 {
    let half = s.len() / 2;
    let mut sum = s[half];
    let (mut t_prev, mut t) = (1.0f64, x);
    for m in 1..=half {
        sum += 2.0 * s[half - m] * t;
        let next = 2.0 * x * t - t_prev;
        t_prev = t;
        t = next;
    }
    sum
}

fn find_roots(s: &[f64]) -> Vec<f64> {
    let mut roots = Vec::new();
    let f = |w: f64| eval_symmetric(s, w.cos());
    let step = std::f64::consts::PI / GRID_POINTS as f64;
    let mut w0 = 0.0f64;
    let mut f0 = f(w0);
    for i in 1..=GRID_POINTS {
        let w1 = step * i as f64;
        let f1 = f(w1);
        if f0 == 0.0 {
            roots.push(w0);
        } else if f0 * f1 < 0.0 {
            let (mut lo, mut hi, mut flo) = (w0, w1, f0);
            for _ in 0..BISECTION_STEPS {
                let mid = 0.5 * (lo + hi);
                let fm = f(mid);
                if fm * flo <= 0.0 {
                    hi = mid;
                } else {
                    lo = mid;
                    flo = fm;
                }
            }
            roots.push(0.5 * (lo + hi));
        }
        w0 = w1;
        f0 = f1;
    }
    roots
}

/// 预测系数转 LSF (弧度, 升序). 阶数必须为偶数, 求根失败时返回 `None`
pub fn lpc_to_lsf(a: &[f32]) -> Option<Vec<f64>> {
    let p = a.len();
    if p == 0 || p % 2 != 0 {
        return None;
    }
    let mut c = vec![0.0f64; p + 2];
    c[0] = 1.0;
    for (k, &v) in a.iter().enumerate() {
        c[k + 1] = -f64::from(v);
    }
    let sum: Vec<f64> = (0..=p + 1).map(|k| c[k] + c[p + 1 - k]).collect();
    let diff: Vec<f64> = (0..=p + 1).map(|k| c[k] - c[p + 1 - k]).collect();

    // 去掉 z = -1 与 z = 1 处的平凡根
    let mut ps = vec![0.0f64; p + 1];
    let mut qs = vec![0.0f64; p + 1];
    ps[0] = sum[0];
    qs[0] = diff[0];
    for k in 1..=p {
        ps[k] = sum[k] - ps[k - 1];
        qs[k] = diff[k] + qs[k - 1];
    }

    let mut roots = find_roots(&ps);
    let q_roots = find_roots(&qs);
    if roots.len() != p / 2 || q_roots.len() != p / 2 {
        return None;
    }
    roots.extend(q_roots);
    roots.sort_by(f64::total_cmp);
    Some(roots)
}

fn multiply_quadratic(poly: &mut Vec<f64>, w: f64) {
    let b = -2.0 * w.cos();
    let mut out = vec![0.0f64; poly.len() + 2];
    for (k, &v) in poly.iter().enumerate() {
        out[k] += v;
        out[k + 1] += b * v;
        out[k + 2] += v;
    }
    *poly = out;
}

/// LSF (弧度, 升序) 转预测系数
pub fn lsf_to_lpc(lsf: &[f64]) -> Vec<f32> {
    let p = lsf.len();
    let mut ps = vec![1.0f64];
    let mut qs = vec![1.0f64];
    for (i, &w) in lsf.iter().enumerate() {
        if i % 2 == 0 {
            multiply_quadratic(&mut ps, w);
        } else {
            multiply_quadratic(&mut qs, w);
        }
    }
    // 乘回 (1 + z^-1) 与 (1 - z^-1)
    let mut full_p = vec![0.0f64; p + 2];
    let mut full_q = vec![0.0f64; p + 2];
    for k in 0..=p {
        full_p[k] += ps[k];
        full_p[k + 1] += ps[k];
        full_q[k] += qs[k];
        full_q[k + 1] -= qs[k];
    }
    let mut a: Vec<f32> = (1..=p)
        .map(|k| (-0.5 * (full_p[k] + full_q[k])) as f32)
        .collect();
    make_stable(&mut a);
    a
}

/// Q15 LSF 转预测系数
pub fn lsf_q15_to_lpc(lsf: &[i32]) -> Vec<f32> {
    let radians: Vec<f64> = lsf
        .iter()
        .map(|&q| std::f64::consts::PI * f64::from(q) / f64::from(LSF_SCALE))
        .collect();
    lsf_to_lpc(&radians)
}

/// 弧度转 Q15
pub fn lsf_to_q15(lsf: &[f64]) -> Vec<i32> {
    lsf.iter()
        .map(|&w| (w / std::f64::consts::PI * f64::from(LSF_SCALE)).round() as i32)
        .collect()
}

/// 均匀分布的 LSF, 用作没有历史时的预测基准
pub fn default_lsf(order: usize) -> Vec<i32> {
    let slots = order as i32 + 1;
    (1..=order as i32).map(|i| i * LSF_SCALE / slots).collect()
}

/// 强制最小间隔, 两端结果必须完全一致
pub fn stabilize(lsf: &mut [i32]) {
    let p = lsf.len() as i32;
    if p == 0 {
        return;
    }
    let gap = LSF_MIN_GAP.min(LSF_SCALE / (p + 1));
    let mut lower = 0;
    for v in lsf.iter_mut() {
        *v = (*v).max(lower + gap);
        lower = *v;
    }
    let mut upper = LSF_SCALE;
    for v in lsf.iter_mut().rev() {
        *v = (*v).min(upper - gap);
        upper = *v;
    }
}

fn predicted_gap(prev: &[i32], i: usize, mean: i32) -> i32 {
    let prev_gap = prev[i] - if i == 0 { 0 } else { prev[i - 1] };
    mean + ((prev_gap - mean) >> LSF_PRED_SHIFT)
}

/// 闭环量化目标 LSF, 返回各阶残差
pub fn quantize(target: &[i32], prev: &[i32]) -> Vec<i32> {
    let mean = LSF_SCALE / (target.len() as i32 + 1);
    let mut last = 0;
    target
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let base = last + predicted_gap(prev, i, mean);
            let r = ((t - base) as f32 / LSF_STEP as f32).round() as i32;
            let r = r.clamp(-LSF_RESIDUAL_MAX, LSF_RESIDUAL_MAX);
            last = base + r * LSF_STEP;
            r
        })
        .collect()
}

/// 由残差重建 LSF
pub fn dequantize(residuals: &[i32], prev: &[i32]) -> Vec<i32> {
    let mean = LSF_SCALE / (residuals.len() as i32 + 1);
    let mut last = 0;
    let mut out: Vec<i32> = residuals
        .iter()
        .enumerate()
        .map(|(i, &r)| {
            let r = r.clamp(-LSF_RESIDUAL_MAX, LSF_RESIDUAL_MAX);
            last += predicted_gap(prev, i, mean) + r * LSF_STEP;
            last
        })
        .collect();
    stabilize(&mut out);
    out
}

/// 两组 LSF 的中点
pub fn interpolate(prev: &[i32], cur: &[i32]) -> Vec<i32> {
    prev.iter().zip(cur).map(|(a, b)| (a + b) / 2).collect()
}
