//! 金字塔矢量量化 (PVQ).
//!
//! 码本为 n 维整数向量中 L1 范数为 K 的全部向量, 个数记为 V(n, K).
//! 向量按坐标依次枚举: 每个坐标上先 0, 再按幅度从小到大, 同一幅度正号在前,
//! 得到 [0, V(n, K)) 内的唯一序号, 以均匀整数写入码流.

use std::sync::OnceLock;

use sheng_core::range_coder::ilog;

/// 单个向量允许的最大脉冲数
pub const MAX_PULSES: usize = 128;

/// 最大维数 (20 ms 最高频带)
pub const MAX_DIM: usize = 176;

fn table() -> &'static Vec<Vec<u64>> {
    static TABLE: OnceLock<Vec<Vec<u64>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut v = vec![vec![0u64; MAX_PULSES + 1]; MAX_DIM + 1];
        v[0][0] = 1;
        for n in 1..=MAX_DIM {
            v[n][0] = 1;
            for k in 1..=MAX_PULSES {
                v[n][k] = v[n - 1][k]
                    .saturating_add(v[n][k - 1])
                    .saturating_add(v[n - 1][k - 1]);
            }
        }
        v
    })
}

/// 码本大小 V(n, k), 超出 u64 时饱和
pub fn codebook_size(n: usize, k: usize) -> u64 {
    table()[n][k]
}

/// 码本大小不超过 32 位时允许的最大脉冲数
pub fn max_pulses(n: usize) -> usize {
    let row = &table()[n];
    (0..=MAX_PULSES)
        .rev()
        .find(|&k| row[k] < 1u64 << 32)
        .unwrap_or(0)
}

/// 以 2 为底的对数, `frac` 位小数, 非 2 的幂时向上取整
pub fn log2_frac(val: u32, frac: u32) -> i32 {
    let mut l = ilog(val) as i32;
    if val & val.wrapping_sub(1) == 0 {
        return (l - 1) << frac;
    }
    let mut v = if l > 16 {
        u64::from(((val - 1) >> (l - 16) as u32) + 1)
    } else {
        u64::from(val) << (16 - l) as u32
    };
    l = (l - 1) << frac;
    for f in (0..=frac).rev() {
        let b = (v >> 16) as i32;
        l += b << f;
        v = (v + b as u64) >> b;
        v = (v * v + 0x7FFF) >> 15;
    }
    l + i32::from(v > 0x8000)
}

/// n 维 k 个脉冲的编码代价 (1/8 位)
pub fn pulse_cost(n: usize, k: usize) -> i32 {
    if k == 0 {
        return 0;
    }
    log2_frac(codebook_size(n, k) as u32, 3)
}

/// 代价不超过 `bits` (1/8 位) 的最大脉冲数
pub fn bits_to_pulses(n: usize, bits: i32) -> usize {
    let kmax = max_pulses(n);
    let mut best = 0;
    for k in 1..=kmax {
        if pulse_cost(n, k) > bits {
            break;
        }
        best = k;
    }
    best
}

/// 整数向量到码本序号
pub fn encode_pulses(y: &[i32]) -> u32 {
    let mut k: usize = y.iter().map(|v| v.unsigned_abs() as usize).sum();
    let n = y.len();
    let mut index = 0u64;
    for (j, &yj) in y.iter().enumerate() {
        let m = n - j - 1;
        let a = yj.unsigned_abs() as usize;
        if a > 0 {
            index += codebook_size(m, k);
            for mag in 1..a {
                index += 2 * codebook_size(m, k - mag);
            }
            if yj < 0 {
                index += codebook_size(m, k - a);
            }
        }
        k -= a;
    }
    index as u32
}

/// 码本序号到整数向量
pub fn decode_pulses(index: u32, n: usize, k: usize) -> Vec<i32> {
    let mut y = vec![0i32; n];
    let mut rest = u64::from(index);
    let mut k = k;
    for (j, yj) in y.iter_mut().enumerate() {
        if k == 0 {
            break;
        }
        let m = n - j - 1;
        let zero = codebook_size(m, k);
        if rest < zero {
            continue;
        }
        rest -= zero;
        let mut mag = 1;
        loop {
            let half = codebook_size(m, k - mag);
            if rest < half {
                *yj = mag as i32;
                break;
            }
            rest -= half;
            if rest < half {
                *yj = -(mag as i32);
                break;
            }
            rest -= half;
            if mag == k {
                // 序号越界时把剩余脉冲放在当前坐标
                *yj = mag as i32;
                break;
            }
            mag += 1;
        }
        k -= yj.unsigned_abs() as usize;
    }
    if k > 0 {
        if let Some(last) = y.last_mut() {
            *last += k as i32;
        }
    }
    y
}

/// 在 L1 范数为 k 的整数向量中寻找与 `x` 方向最接近的一个
pub fn pvq_search(x: &[f32], k: usize) -> Vec<i32> {
    let n = x.len();
    let abs: Vec<f32> = x.iter().map(|v| v.abs()).collect();
    let sum: f32 = abs.iter().sum();
    let mut y = vec![0i32; n];
    if k == 0 || n == 0 {
        return y;
    }
    if !(sum > 1e-15) {
        y[0] = k as i32;
        return y;
    }

    let mut left = k as i32;
    let mut xy = 0.0f32;
    let mut yy = 0.0f32;
    if k > n / 2 {
        // 先按比例投影, 再贪心补齐
        let scale = k as f32 / sum;
        for j in 0..n {
            let p = (abs[j] * scale).floor() as i32;
            y[j] = p;
            left -= p;
            xy += abs[j] * p as f32;
            yy += (p * p) as f32;
        }
        if left < 0 {
            y.fill(0);
            left = k as i32;
            xy = 0.0;
            yy = 0.0;
        }
    }
    while left > 0 {
        let mut best = 0;
        let mut best_num = -1.0f32;
        let mut best_den = 1.0f32;
        for j in 0..n {
            let num = xy + abs[j];
            let den = yy + 2.0 * y[j] as f32 + 1.0;
            // 比较 num^2/den, 交叉相乘避免除法
            if num * num * best_den > best_num * den {
                best = j;
                best_num = num * num;
                best_den = den;
            }
        }
        xy += abs[best];
        yy += 2.0 * y[best] as f32 + 1.0;
        y[best] += 1;
        left -= 1;
    }
    for (yj, &xj) in y.iter_mut().zip(x) {
        if xj < 0.0 {
            *yj = -*yj;
        }
    }
    y
}

/// 把整数向量归一化为单位范数
pub fn normalize_pulses(y: &[i32]) -> Vec<f32> {
    let energy: f32 = y.iter().map(|&v| (v * v) as f32).sum();
    if energy <= 0.0 {
        return vec![0.0; y.len()];
    }
    let g = 1.0 / energy.sqrt();
    y.iter().map(|&v| v as f32 * g).collect()
}

/// 线性同余随机数
pub fn lcg_rand(seed: u32) -> u32 {
    seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223)
}

/// 以随机噪声填充并归一化
pub fn noise_fill(x: &mut [f32], seed: &mut u32) {
    for v in x.iter_mut() {
        *seed = lcg_rand(*seed);
        *v = if *seed & 0x8000 != 0 { 1.0 } else { -1.0 };
    }
    let g = 1.0 / (x.len().max(1) as f32).sqrt();
    for v in x.iter_mut() {
        *v *= g;
    }
}

#[inline]
fn frac_mul16(a: i32, b: i32) -> i32 {
    (16384 + a * b) >> 15
}

/// 整数余弦, 输入为 Q14 角度 (16384 对应 π/2), 输出 Q15
pub fn bitexact_cos(x: i32) -> i32 {
    let tmp = (4096 + x * x) >> 13;
    let x2 = tmp;
    let x2 = (32767 - x2) + frac_mul16(x2, -7651 + frac_mul16(x2, 8277 + frac_mul16(-626, x2)));
    1 + x2
}

/// log2(sin / cos) 的整数近似, Q11
pub fn bitexact_log2tan(isin: i32, icos: i32) -> i32 {
    let lc = ilog(icos as u32) as i32;
    let ls = ilog(isin as u32) as i32;
    let icos = icos << (15 - lc);
    let isin = isin << (15 - ls);
    (ls - lc) * (1 << 11) + frac_mul16(isin, frac_mul16(isin, -2597) + 7932)
        - frac_mul16(icos, frac_mul16(icos, -2597) + 7932)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_码本大小() {
        assert_eq!(codebook_size(1, 5), 2);
        assert_eq!(codebook_size(2, 3), 12);
        assert_eq!(codebook_size(3, 1), 6);
        // V(3, 2) = 18
        assert_eq!(codebook_size(3, 2), 18);
        assert_eq!(max_pulses(176), 4);
        assert_eq!(max_pulses(2), MAX_PULSES);
    }

    #[test]
    fn test_整数对数() {
        assert_eq!(log2_frac(1, 3), 0);
        assert_eq!(log2_frac(2, 3), 8);
        assert_eq!(log2_frac(3, 3), 13);
        assert_eq!(log2_frac(1024, 3), 80);
        assert_eq!(log2_frac(1025, 3), 81);
    }

    #[test]
    fn test_序号双射() {
        let (n, k) = (4usize, 3usize);
        let total = codebook_size(n, k) as u32;
        let mut seen = std::collections::HashSet::new();
        for idx in 0..total {
            let y = decode_pulses(idx, n, k);
            let pulses: usize = y.iter().map(|v| v.unsigned_abs() as usize).sum();
            assert_eq!(pulses, k);
            assert_eq!(encode_pulses(&y), idx);
            assert!(seen.insert(y));
        }
    }

    #[test]
    fn test_搜索结果接近原向量() {
        let x = [0.8f32, -0.5, 0.1, 0.0, -0.3];
        let y = pvq_search(&x, 10);
        assert_eq!(y.iter().map(|v| v.abs()).sum::<i32>(), 10);
        assert!(y[0] > 0 && y[1] < 0);
        let q = normalize_pulses(&y);
        let norm = x.iter().map(|v| v * v).sum::<f32>().sqrt();
        let corr: f32 = q.iter().zip(&x).map(|(a, b)| a * b / norm).sum();
        assert!(corr > 0.95, "相关系数 {corr}");
    }

    #[test]
    fn test_脉冲数随比特增加() {
        let mut last = 0;
        for bits in (0..400).step_by(8) {
            let k = bits_to_pulses(8, bits);
            assert!(k >= last);
            assert!(pulse_cost(8, k) <= bits);
            last = k;
        }
        assert!(last > 10);
    }

    #[test]
    fn test_整数三角函数() {
        assert_eq!(bitexact_cos(0), 32767 + 1);
        let mid = bitexact_cos(8192);
        assert!((mid - 23170).abs() < 40, "cos(π/4) = {mid}");
        assert_eq!(bitexact_log2tan(mid, mid), 0);
    }
}
