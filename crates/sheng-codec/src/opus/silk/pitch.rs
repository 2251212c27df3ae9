//! 基音分析与长时预测.
//!
//! 延迟以 1/4 样本为单位 (`lag_q2`), 整数部分 `lag_q2 >> 2`, 小数部分线性插值.

use sheng_core::range_coder::ilog;

use super::tables::PITCH_DELTA_MAX;

/// 两个相邻延迟的相关度比值超过该值时取较短的延迟
const OCTAVE_PREFERENCE: f32 = 0.9;

/// 基音搜索结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// 延迟, 1/4 样本
    pub lag_q2: u32,
    /// 归一化相关度
    pub correlation: f32,
}

/// 整数延迟范围 [2 ms, 18 ms]
pub fn lag_range(rate: u32) -> (usize, usize) {
    (rate as usize / 500, rate as usize * 18 / 1000)
}

/// 整数延迟的原始比特数
pub fn lag_bits(rate: u32) -> u32 {
    let (min, max) = lag_range(rate);
    ilog((max - min) as u32)
}

/// 子帧延迟, 两端使用同一限幅规则
pub fn subframe_lag(lag_q2: u32, delta: i32, rate: u32) -> u32 {
    let (min, max) = lag_range(rate);
    (lag_q2 as i32 + 4 * delta).clamp(4 * min as i32, 4 * max as i32) as u32
}

/// 分数延迟处的历史值, 要求 `pos > lag_q2 / 4`
pub fn delayed(buf: &[f32], pos: usize, lag_q2: u32) -> f32 {
    let lag = (lag_q2 >> 2) as usize;
    let frac = (lag_q2 & 3) as f32 * 0.25;
    let a = buf[pos - lag];
    let b = buf[pos - lag - 1];
    (1.0 - frac) * a + frac * b
}

fn normalized_correlation(signal: &[f32], start: usize, len: usize, lag_q2: u32) -> f32 {
    let (mut xy, mut xx, mut yy) = (0.0f64, 0.0f64, 0.0f64);
    for n in start..start + len {
        let x = f64::from(signal[n]);
        let y = f64::from(delayed(signal, n, lag_q2));
        xy += x * y;
        xx += x * x;
        yy += y * y;
    }
    if xx <= 0.0 || yy <= 0.0 {
        return 0.0;
    }
    (xy / (xx * yy).sqrt()) as f32
}

/// 在 `signal[start..start + len]` 上搜索基音, `start` 之前至少要有最大延迟加一个样本的历史
pub fn search(signal: &[f32], start: usize, len: usize, rate: u32) -> Option<PitchEstimate> {
    let (min, max) = lag_range(rate);
    if start < max + 2 || signal.len() < start + len || len == 0 {
        return None;
    }
    let corr: Vec<f32> = (min - 1..=max + 1)
        .map(|lag| normalized_correlation(signal, start, len, (lag as u32) << 2))
        .collect();
    let at = |lag: usize| corr[lag + 1 - min];

    let mut best = min;
    for lag in min..=max {
        if at(lag) > at(best) {
            best = lag;
        }
    }
    // 倍频检查: 整数分之一延迟相关度相近时取短的
    for k in [3usize, 2] {
        let short = (best + k / 2) / k;
        if short >= min && at(short) > OCTAVE_PREFERENCE * at(best) {
            best = short;
            break;
        }
    }

    let (c0, c1, c2) = (at(best - 1), at(best), at(best + 1));
    let den = c0 - 2.0 * c1 + c2;
    let offset = if den < 0.0 {
        (0.5 * (c0 - c2) / den).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let lag_q2 = ((best as f32 + offset) * 4.0).round() as i32;
    let lag_q2 = lag_q2.clamp(4 * min as i32, 4 * max as i32) as u32;
    Some(PitchEstimate {
        lag_q2,
        correlation: c1,
    })
}

/// 逐子帧在帧延迟附近微调, 返回整数样本偏移
pub fn subframe_deltas(
    signal: &[f32],
    start: usize,
    sub_len: usize,
    subframes: usize,
    lag_q2: u32,
    rate: u32,
) -> Vec<i32> {
    (0..subframes)
        .map(|s| {
            let pos = start + s * sub_len;
            let mut best = (0, f32::MIN);
            for d in -PITCH_DELTA_MAX..=PITCH_DELTA_MAX {
                let lag = subframe_lag(lag_q2, d, rate);
                let c = normalized_correlation(signal, pos, sub_len, lag);
                // 同等相关度时偏向零偏移
                let c = c - 0.002 * d.abs() as f32;
                if c > best.1 {
                    best = (d, c);
                }
            }
            best.0
        })
        .collect()
}

/// 开环长时预测增益, 限制在 [0, 1]
pub fn ltp_gain(signal: &[f32], start: usize, len: usize, lag_q2: u32) -> f32 {
    let (mut xy, mut yy) = (0.0f64, 0.0f64);
    for n in start..start + len {
        let y = f64::from(delayed(signal, n, lag_q2));
        xy += f64::from(signal[n]) * y;
        yy += y * y;
    }
    if yy <= 1e-12 {
        return 0.0;
    }
    ((xy / yy) as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_train(period: usize, len: usize) -> Vec<f32> {
        let mut x = vec![0.0f32; len];
        let mut state = 0.0f32;
        for (n, v) in x.iter_mut().enumerate() {
            let impulse = if n % period == 0 { 1.0 } else { 0.0 };
            state = 0.7 * state + impulse;
            *v = state;
        }
        x
    }

    #[test]
    fn test_脉冲串基音() {
        let x = pulse_train(100, 1000);
        let est = search(&x, 400, 320, 16000).unwrap();
        assert!((est.lag_q2 as i32 - 400).abs() <= 2, "{est:?}");
        assert!(est.correlation > 0.95);
        let deltas = subframe_deltas(&x, 400, 80, 4, est.lag_q2, 16000);
        assert_eq!(deltas, vec![0; 4]);
        assert!(ltp_gain(&x, 400, 80, 400) > 0.95);
    }

    #[test]
    fn test_历史不足时不搜索() {
        let x = pulse_train(50, 400);
        assert!(search(&x, 100, 160, 16000).is_none());
    }

    #[test]
    fn test_延迟范围与限幅() {
        assert_eq!(lag_range(8000), (16, 144));
        assert_eq!(lag_range(16000), (32, 288));
        assert_eq!(lag_bits(16000), 9);
        assert_eq!(subframe_lag(4 * 33, -6, 16000), 4 * 32);
        assert_eq!(subframe_lag(4 * 100 + 2, 3, 16000), 4 * 103 + 2);
    }

    #[test]
    fn test_分数延迟插值() {
        let buf = [0.0f32, 4.0, 8.0, 12.0];
        assert!((delayed(&buf, 3, 4 * 2) - 4.0).abs() < 1e-6);
        assert!((delayed(&buf, 3, 4 * 2 + 2) - 2.0).abs() < 1e-6);
    }
}
