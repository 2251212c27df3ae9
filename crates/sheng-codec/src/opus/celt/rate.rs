//! 频带间的比特分配.
//!
//! 分配只用整数运算, 输入全部来自码流 (帧长、频带范围、声道数、倾斜修正、侧声道份额)
//! 与 `tell_frac`, 编解码两端得到完全相同的结果. 单位为 1/8 位.
//!
//! 每个频带按 `C * w * q * weight / 512` 分配, `weight` 随频带升高递减并由倾斜修正调整.
//! 二分查找满足总量不超过预算的最大 q, 余量作为初始 balance 交给 PVQ 逐带分配.

use sheng_core::range_coder::{BITRES, ilog};

use super::energy::MAX_FINE_BITS;
use super::{NB_EBANDS, band_width};

/// 倾斜修正的逆累计分布, 取值 0..=10
pub const TRIM_ICDF: [u8; 11] = [126, 124, 119, 109, 87, 41, 19, 9, 4, 2, 0];

/// 默认倾斜修正
pub const DEFAULT_TRIM: usize = 5;

/// 侧声道份额的取值个数 (0..=8, 8 为均分)
pub const SIDE_SHARE_LEVELS: u32 = 9;

/// 默认侧声道份额
pub const DEFAULT_SIDE_SHARE: u32 = 8;

/// 分配给细量化的最大位数
const FINE_CAP: u32 = 5;

/// 每个系数的分配上限 (1/8 位)
const MAX_FRAC_PER_COEFF: i32 = 56;

const Q_MAX: i32 = 4096;

/// 一帧的分配结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// PVQ 形状可用的位数 (1/8 位)
    pub shape_bits: [[i32; NB_EBANDS]; 2],
    /// 细量化位数
    pub fine_bits: [[u32; NB_EBANDS]; 2],
    /// 未分配的余量 (1/8 位)
    pub balance: i32,
    /// 二分得到的质量参数
    pub quality: i32,
}

impl Allocation {
    /// 全部为零的分配
    pub fn empty() -> Self {
        Self {
            shape_bits: [[0; NB_EBANDS]; 2],
            fine_bits: [[0; NB_EBANDS]; 2],
            balance: 0,
            quality: 0,
        }
    }

    /// 分配的总量 (1/8 位)
    pub fn total(&self) -> i32 {
        let shape: i32 = self.shape_bits.iter().flatten().sum();
        let fine: u32 = self.fine_bits.iter().flatten().sum();
        shape + ((fine as i32) << BITRES)
    }
}

/// 分配输入
#[derive(Debug, Clone, Copy)]
pub struct AllocParams {
    pub start: usize,
    pub end: usize,
    pub lm: usize,
    pub channels: usize,
    pub trim: usize,
    pub side_share: u32,
}

fn band_weight(band: usize, end: usize, trim: usize) -> i32 {
    let tilt = (trim as i32 - DEFAULT_TRIM as i32) * (end as i32 - 1 - band as i32) / 2;
    (64 - 2 * band as i32 + tilt).max(8)
}

fn band_alloc(band: usize, q: i32, p: &AllocParams) -> i32 {
    let w = band_width(band, p.lm) as i32;
    let c = p.channels as i32;
    let weight = band_weight(band, p.end, p.trim);
    let alloc = (c * w * q * weight / 512).min(c * w * MAX_FRAC_PER_COEFF);
    let threshold = c * 8 * (ilog(w as u32) as i32 + 2);
    if alloc < threshold { 0 } else { alloc }
}

fn total_alloc(q: i32, p: &AllocParams) -> i32 {
    (p.start..p.end).map(|i| band_alloc(i, q, p)).sum()
}

/// 在 `budget` (1/8 位) 内计算分配
pub fn compute_allocation(params: AllocParams, budget: i32) -> Allocation {
    let mut result = Allocation::empty();
    if budget <= 0 || params.start >= params.end {
        result.balance = budget.max(0);
        return result;
    }

    let (mut lo, mut hi) = (0, Q_MAX);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if total_alloc(mid, &params) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let q = lo;
    let total = total_alloc(q, &params);
    result.quality = q;
    result.balance = budget - total;

    let share = params.side_share.min(DEFAULT_SIDE_SHARE) as i32;
    for band in params.start..params.end {
        let alloc = band_alloc(band, q, &params);
        let per_channel = if params.channels == 2 {
            let second = alloc * share / 16;
            [alloc - second, second]
        } else {
            [alloc, 0]
        };
        let w = band_width(band, params.lm) as i32;
        for c in 0..params.channels {
            let a = per_channel[c];
            // 约每系数每位一个细量化位
            let fine = ((a + 4 * w) / (8 * w + 16)).clamp(0, FINE_CAP as i32) as u32;
            result.fine_bits[c][band] = fine.min(MAX_FINE_BITS);
            result.shape_bits[c][band] = a - ((fine as i32) << BITRES);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(channels: usize, trim: usize) -> AllocParams {
        AllocParams {
            start: 0,
            end: NB_EBANDS,
            lm: 3,
            channels,
            trim,
            side_share: DEFAULT_SIDE_SHARE,
        }
    }

    #[test]
    fn test_分配不超过预算() {
        for budget in [0, 100, 800, 2000, 5000, 10_000, 40_000] {
            for channels in [1, 2] {
                let a = compute_allocation(params(channels, 5), budget);
                assert!(a.total() + a.balance <= budget.max(0));
                assert!(a.balance >= 0);
            }
        }
    }

    #[test]
    fn test_预算越多分配越多() {
        let mut last = 0;
        for budget in (0..20_000).step_by(500) {
            let total = compute_allocation(params(1, 5), budget).total();
            assert!(total >= last);
            last = total;
        }
        assert!(last > 15_000);
    }

    #[test]
    fn test_倾斜修正偏向低频() {
        let budget = 3000;
        let flat = compute_allocation(params(1, 5), budget);
        let low = compute_allocation(params(1, 9), budget);
        let sum_low = |a: &Allocation| a.shape_bits[0][..8].iter().sum::<i32>();
        assert!(sum_low(&low) > sum_low(&flat));
    }

    #[test]
    fn test_侧声道份额() {
        let mut p = params(2, 5);
        p.side_share = 0;
        let a = compute_allocation(p, 6000);
        assert!(a.shape_bits[1].iter().all(|&b| b == 0));
        assert!(a.fine_bits[1].iter().all(|&b| b == 0));
        p.side_share = 8;
        let a = compute_allocation(p, 6000);
        for band in 0..NB_EBANDS {
            let diff = a.shape_bits[0][band] + ((a.fine_bits[0][band] as i32) << 3)
                - a.shape_bits[1][band]
                - ((a.fine_bits[1][band] as i32) << 3);
            assert!(diff.abs() <= 1);
        }
    }
}
