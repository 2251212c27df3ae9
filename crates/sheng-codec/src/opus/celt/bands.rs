//! 频带形状编码.
//!
//! 每个频带的系数除以其 L2 范数后成为单位向量. 向量维数较大且比特充足时一分为二,
//! 先编码两半能量之比对应的角度 theta, 再递归编码两半; 否则直接用 PVQ 编码.
//! 比特为零的频带由解码端以噪声填充, 能量仍由能量层保证.

use sheng_core::ShengResult;
use sheng_core::range_coder::BITRES;

use super::energy::{BandEnergies, ENERGY_FLOOR};
use super::pvq;
use super::rate::Allocation;
use super::{NB_EBANDS, band_start, band_width};
use crate::opus::coder::SymbolCoder;

/// 每个频带留给区间编码器取整误差的余量 (1/8 位)
const BAND_MARGIN: i32 = 2 << BITRES;

/// 计算各频带的 log2 幅度
pub fn compute_energies(coeffs: &[f32], lm: usize, end: usize) -> [f32; NB_EBANDS] {
    let mut e = [ENERGY_FLOOR; NB_EBANDS];
    for (band, slot) in e.iter_mut().enumerate().take(end) {
        let s = band_start(band, lm);
        let w = band_width(band, lm);
        let sum: f32 = coeffs
            .iter()
            .skip(s)
            .take(w)
            .map(|v| v * v)
            .sum();
        *slot = (0.5 * (sum + 1e-30).log2()).max(ENERGY_FLOOR);
    }
    e
}

/// 把系数除以各频带的范数
pub fn normalize_bands(coeffs: &[f32], lm: usize, range: (usize, usize)) -> Vec<f32> {
    let mut shape = vec![0.0f32; coeffs.len()];
    for band in range.0..range.1 {
        let s = band_start(band, lm);
        let w = band_width(band, lm);
        let Some(src) = coeffs.get(s..s + w) else {
            continue;
        };
        let norm = src.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-15 {
            for (d, v) in shape[s..s + w].iter_mut().zip(src) {
                *d = v / norm;
            }
        }
    }
    shape
}

/// 用量化能量把单位形状还原为系数
pub fn denormalize_bands(
    shape: &[f32],
    energies: &[f32; NB_EBANDS],
    lm: usize,
    range: (usize, usize),
) -> Vec<f32> {
    let mut coeffs = vec![0.0f32; shape.len()];
    for band in range.0..range.1 {
        let s = band_start(band, lm);
        let w = band_width(band, lm);
        let gain = energies[band].exp2();
        for (d, v) in coeffs[s..s + w].iter_mut().zip(&shape[s..s + w]) {
            *d = v * gain;
        }
    }
    coeffs
}

fn unit(x: &mut [f32]) {
    let norm = x.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-15 {
        for v in x.iter_mut() {
            *v /= norm;
        }
    }
}

fn code_half(
    coder: &mut SymbolCoder<'_, '_>,
    x: &mut [f32],
    bits: i32,
    seed: &mut u32,
) -> ShengResult<i32> {
    let before = coder.tell_frac() as i32;
    code_partition(coder, x, bits, seed)?;
    Ok(coder.tell_frac() as i32 - before)
}

/// 编解码一个单位向量, 完成后 `x` 为两端一致的重建形状
pub fn code_partition(
    coder: &mut SymbolCoder<'_, '_>,
    x: &mut [f32],
    bits: i32,
    seed: &mut u32,
) -> ShengResult<()> {
    let n = x.len();
    if n == 0 {
        return Ok(());
    }
    if n == 1 {
        if bits >= 1 << BITRES {
            let negative = coder.raw_bits(u32::from(x[0] < 0.0), 1);
            x[0] = if negative == 1 { -1.0 } else { 1.0 };
        } else {
            pvq::noise_fill(x, seed);
        }
        return Ok(());
    }

    let kmax = pvq::max_pulses(n);
    if n > 2 && bits > pvq::pulse_cost(n, kmax) + (1 << BITRES) {
        return code_split(coder, x, bits, seed);
    }

    let k = pvq::bits_to_pulses(n, bits);
    if k == 0 {
        pvq::noise_fill(x, seed);
        return Ok(());
    }
    let index = if coder.is_encoder() {
        pvq::encode_pulses(&pvq::pvq_search(x, k))
    } else {
        0
    };
    let size = pvq::codebook_size(n, k) as u32;
    let index = coder.uint(index, size)?;
    let y = pvq::decode_pulses(index, n, k);
    x.copy_from_slice(&pvq::normalize_pulses(&y));
    Ok(())
}

fn code_split(
    coder: &mut SymbolCoder<'_, '_>,
    x: &mut [f32],
    bits: i32,
    seed: &mut u32,
) -> ShengResult<()> {
    let n = x.len();
    let n1 = n / 2;
    let qn = 1i32 << (bits / 48).clamp(2, 6);

    let itheta = if coder.is_encoder() {
        let mid = x[..n1].iter().map(|v| v * v).sum::<f32>().sqrt();
        let side = x[n1..].iter().map(|v| v * v).sum::<f32>().sqrt();
        let theta = side.atan2(mid) / std::f32::consts::FRAC_PI_2;
        ((theta * qn as f32).round() as i32).clamp(0, qn)
    } else {
        0
    };
    let before = coder.tell_frac() as i32;
    let itheta = coder.uint(itheta as u32, qn as u32 + 1)? as i32;
    let rest = bits - (coder.tell_frac() as i32 - before);

    let itheta = itheta * 16384 / qn;
    let (imid, iside, delta) = match itheta {
        0 => (32767, 0, -16384),
        16384 => (0, 32767, 16384),
        _ => {
            let imid = pvq::bitexact_cos(itheta);
            let iside = pvq::bitexact_cos(16384 - itheta);
            let delta = (16384 + ((n as i32 - 1) << 7) * pvq::bitexact_log2tan(iside, imid)) >> 15;
            (imid, iside, delta)
        }
    };
    let rest = rest.max(0);
    let mut mbits = ((rest - delta) / 2).clamp(0, rest);
    let mut sbits = rest - mbits;

    let (first, second) = x.split_at_mut(n1);
    unit(first);
    unit(second);
    if mbits >= sbits {
        let used = code_half(coder, first, mbits, seed)?;
        let rebalance = mbits - used;
        if rebalance > 3 << BITRES && itheta != 0 {
            sbits += rebalance - (3 << BITRES);
        }
        code_half(coder, second, sbits, seed)?;
    } else {
        let used = code_half(coder, second, sbits, seed)?;
        let rebalance = sbits - used;
        if rebalance > 3 << BITRES && itheta != 16384 {
            mbits += rebalance - (3 << BITRES);
        }
        code_half(coder, first, mbits, seed)?;
    }

    let mid = imid as f32 / 32768.0;
    let side = iside as f32 / 32768.0;
    for v in first.iter_mut() {
        *v *= mid;
    }
    for v in second.iter_mut() {
        *v *= side;
    }
    Ok(())
}

/// 频带循环的输入
#[derive(Debug, Clone, Copy)]
pub struct BandParams {
    pub start: usize,
    pub end: usize,
    pub lm: usize,
    pub channels: usize,
    /// 整帧位数
    pub total_bits: u32,
}

/// 按分配结果依次编解码全部频带的形状
///
/// 每个 (频带, 声道) 单元的预算为分配值加上当前 balance 的一部分 (最多分摊到接下来
/// 三个单元), 实际用量与分配值之差回流到 balance.
pub fn code_bands(
    coder: &mut SymbolCoder<'_, '_>,
    params: BandParams,
    alloc: &Allocation,
    shapes: &mut [Vec<f32>],
    seed: &mut u32,
) -> ShengResult<()> {
    let total_frac = (params.total_bits as i32) << BITRES;
    let units: Vec<(usize, usize)> = (params.start..params.end)
        .flat_map(|band| (0..params.channels).map(move |c| (band, c)))
        .collect();
    let mut balance = alloc.balance;
    for (u, &(band, c)) in units.iter().enumerate() {
        let remaining_units = (units.len() - u).min(3) as i32;
        let curr = balance / remaining_units;
        let remaining_bits = total_frac - coder.tell_frac() as i32 - BAND_MARGIN;
        let planned = alloc.shape_bits[c][band];
        let bits = (planned + curr).min(remaining_bits).max(0);

        let s = band_start(band, params.lm);
        let w = band_width(band, params.lm);
        let x = &mut shapes[c][s..s + w];
        let before = coder.tell_frac() as i32;
        code_partition(coder, x, bits, seed)?;
        let used = coder.tell_frac() as i32 - before;
        balance += planned - used;
    }
    Ok(())
}

/// 立体声 M/S 变换 (正交), 原地进行
pub fn stereo_to_mid_side(left: &mut [f32], right: &mut [f32]) {
    let g = std::f32::consts::FRAC_1_SQRT_2;
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let (m, s) = ((*l + *r) * g, (*l - *r) * g);
        *l = m;
        *r = s;
    }
}

/// `stereo_to_mid_side` 的逆变换
pub fn mid_side_to_stereo(mid: &mut [f32], side: &mut [f32]) {
    stereo_to_mid_side(mid, side);
}

/// 量化能量的线性幅度
pub fn energy_gains(energies: &BandEnergies, channel: usize) -> [f32; NB_EBANDS] {
    let mut g = [0.0f32; NB_EBANDS];
    for (d, e) in g.iter_mut().zip(&energies[channel]) {
        *d = e.exp2();
    }
    g
}
