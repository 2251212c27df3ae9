//! 变换路径一帧的码流语法.
//!
//! 符号顺序: 静音标志, 瞬态标志, 帧内标志, (立体声) M/S 标志与侧声道份额,
//! 粗量化能量, 倾斜修正, 细量化能量, 频带形状, 最终能量补充位.
//! 编码端与解码端调用同一个函数, 差别只在 `SymbolCoder` 的方向.

use sheng_core::ShengResult;
use sheng_core::range_coder::BITRES;

use super::bands::{BandParams, code_bands};
use super::energy::{
    self, BandEnergies, CoarseParams, ENERGY_FLOOR, code_coarse_energy, code_final_energy,
    code_fine_energy,
};
use super::rate::{
    AllocParams, Allocation, DEFAULT_SIDE_SHARE, DEFAULT_TRIM, SIDE_SHARE_LEVELS, TRIM_ICDF,
    compute_allocation,
};
use crate::opus::coder::SymbolCoder;

/// 分配预算之外保留的余量 (1/8 位)
const ALLOC_RESERVE: i32 = 2 << BITRES;

/// 帧的结构参数, 由 TOC 与存储大小决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub lm: usize,
    pub start: usize,
    pub end: usize,
    /// 编码声道数
    pub channels: usize,
    /// 整帧位数
    pub total_bits: u32,
}

/// 帧级决策. 编码端填入期望值, 调用后为实际写入 (或读出) 的值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDecisions {
    pub silent: bool,
    pub transient: bool,
    pub intra: bool,
    pub mid_side: bool,
    pub side_share: u32,
    pub trim: usize,
    pub allocation: Allocation,
}

impl Default for FrameDecisions {
    fn default() -> Self {
        Self {
            silent: false,
            transient: false,
            intra: false,
            mid_side: false,
            side_share: DEFAULT_SIDE_SHARE,
            trim: DEFAULT_TRIM,
            allocation: Allocation::empty(),
        }
    }
}

/// 编解码一帧
///
/// `target` 为编码端的目标能量, `old` 为预测状态 (完成后保存本帧量化能量),
/// `shapes` 每声道一条 48 kHz 等效长度的形状缓冲.
pub fn code_frame(
    coder: &mut SymbolCoder<'_, '_>,
    layout: FrameLayout,
    decisions: &mut FrameDecisions,
    target: &BandEnergies,
    old: &mut BandEnergies,
    shapes: &mut [Vec<f32>],
    seed: &mut u32,
) -> ShengResult<()> {
    let FrameLayout {
        lm,
        start,
        end,
        channels,
        total_bits,
    } = layout;

    decisions.silent = if start == 0 {
        if coder.tell() + 16 > total_bits {
            true
        } else {
            coder.bit_logp(decisions.silent, 15)
        }
    } else {
        false
    };
    if decisions.silent {
        for c in 0..channels {
            old[c] = [ENERGY_FLOOR; super::NB_EBANDS];
        }
        for shape in shapes.iter_mut() {
            shape.fill(0.0);
        }
        decisions.allocation = Allocation::empty();
        return Ok(());
    }

    decisions.transient = lm > 0
        && coder.tell() + 3 <= total_bits
        && coder.bit_logp(decisions.transient, 3);
    decisions.intra = coder.tell() + 3 <= total_bits && coder.bit_logp(decisions.intra, 3);
    if channels == 2 && coder.tell() + 5 <= total_bits {
        decisions.mid_side = coder.bit_logp(decisions.mid_side, 1);
        let share = decisions.side_share.min(SIDE_SHARE_LEVELS - 1);
        decisions.side_share = coder.uint(share, SIDE_SHARE_LEVELS)?;
    } else {
        decisions.mid_side = false;
        decisions.side_share = DEFAULT_SIDE_SHARE;
    }

    let mut error = [[0.0f32; super::NB_EBANDS]; 2];
    code_coarse_energy(
        coder,
        CoarseParams {
            start,
            end,
            channels,
            lm,
            intra: decisions.intra,
            total_bits,
        },
        target,
        old,
        &mut error,
    );

    let total_frac = (total_bits as i32) << BITRES;
    decisions.trim = if coder.tell_frac() as i32 + (6 << BITRES) <= total_frac {
        coder.icdf(decisions.trim.min(TRIM_ICDF.len() - 1), &TRIM_ICDF, 7)
    } else {
        DEFAULT_TRIM
    };

    let budget = total_frac - coder.tell_frac() as i32 - ALLOC_RESERVE;
    let allocation = compute_allocation(
        AllocParams {
            start,
            end,
            lm,
            channels,
            trim: decisions.trim,
            side_share: decisions.side_share,
        },
        budget,
    );

    code_fine_energy(
        coder,
        &allocation.fine_bits,
        (start, end),
        channels,
        old,
        &mut error,
    );
    code_bands(
        coder,
        BandParams {
            start,
            end,
            lm,
            channels,
            total_bits,
        },
        &allocation,
        shapes,
        seed,
    )?;
    let bits_left = total_bits as i32 - coder.tell() as i32;
    code_final_energy(
        coder,
        &allocation.fine_bits,
        (start, end),
        channels,
        bits_left,
        old,
        &mut error,
    );
    if channels == 1 {
        old[1] = old[0];
    }
    decisions.allocation = allocation;
    Ok(())
}

/// 解码端使用的空目标能量
pub fn no_target() -> BandEnergies {
    energy::floor_energies()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opus::celt::bands::normalize_bands;
    use crate::opus::celt::{NB_EBANDS, coeffs_48k};
    use sheng_core::{RangeDecoder, RangeEncoder};

    fn layout(total_bits: u32) -> FrameLayout {
        FrameLayout {
            lm: 3,
            start: 0,
            end: NB_EBANDS,
            channels: 2,
            total_bits,
        }
    }

    fn roundtrip(
        total_bytes: usize,
        decisions: FrameDecisions,
    ) -> (FrameDecisions, FrameDecisions) {
        let n = coeffs_48k(3);
        let spectrum: Vec<f32> = (0..n)
            .map(|j| ((j * 37 % 11) as f32 - 5.0) * 0.01)
            .collect();
        let mut target = energy::floor_energies();
        for i in 0..NB_EBANDS {
            target[0][i] = 2.0 - 0.3 * i as f32;
            target[1][i] = 0.5 - 0.3 * i as f32;
        }
        let l = layout(total_bytes as u32 * 8);

        let mut enc_dec = decisions;
        let mut enc_old = energy::floor_energies();
        let mut shapes = vec![normalize_bands(&spectrum, 3, (0, NB_EBANDS)); 2];
        let mut enc = RangeEncoder::new(total_bytes);
        let mut seed = 1;
        code_frame(
            &mut SymbolCoder::Encoder(&mut enc),
            l,
            &mut enc_dec,
            &target,
            &mut enc_old,
            &mut shapes,
            &mut seed,
        )
        .unwrap();
        assert!(enc.tell() <= l.total_bits);
        let data = enc.finish().unwrap();

        let mut dec_dec = FrameDecisions::default();
        let mut dec_old = energy::floor_energies();
        let mut dec_shapes = vec![vec![0.0f32; n]; 2];
        let mut dec = RangeDecoder::new(&data);
        let mut seed = 1;
        code_frame(
            &mut SymbolCoder::Decoder(&mut dec),
            l,
            &mut dec_dec,
            &no_target(),
            &mut dec_old,
            &mut dec_shapes,
            &mut seed,
        )
        .unwrap();
        assert_eq!(enc_old, dec_old);
        assert_eq!(shapes, dec_shapes);
        (enc_dec, dec_dec)
    }

    #[test]
    fn test_帧语法两端一致() {
        let wanted = FrameDecisions {
            transient: true,
            intra: true,
            mid_side: true,
            side_share: 3,
            trim: 7,
            ..FrameDecisions::default()
        };
        let (enc, dec) = roundtrip(160, wanted);
        assert_eq!(enc, dec);
        assert!(dec.transient && dec.intra && dec.mid_side);
        assert_eq!(dec.side_share, 3);
        assert_eq!(dec.trim, 7);
    }

    #[test]
    fn test_极小帧隐式静音() {
        let (enc, dec) = roundtrip(
            2,
            FrameDecisions {
                transient: true,
                ..FrameDecisions::default()
            },
        );
        assert!(enc.silent && dec.silent);
        assert_eq!(dec.allocation, Allocation::empty());
    }

    #[test]
    fn test_比特紧张时两端仍一致() {
        for bytes in [3usize, 5, 9, 17, 40] {
            let (enc, dec) = roundtrip(bytes, FrameDecisions::default());
            assert_eq!(enc, dec, "{bytes} 字节");
        }
    }
}
