//! 频带能量量化.
//!
//! 能量以 log2 幅度表示 (1.0 约合 6 dB). 粗量化步长为 1.0, 对上一帧同频带做时间预测、
//! 对本帧前一频带做频率预测, 残差用拉普拉斯分布编码. 细量化与最终补充位用原始比特
//! 写在码流尾部.

use super::NB_EBANDS;
use crate::opus::coder::SymbolCoder;

/// 每声道每频带的能量
pub type BandEnergies = [[f32; NB_EBANDS]; 2];

/// 能量下限
pub const ENERGY_FLOOR: f32 = -24.0;

/// 细量化的最大位数
pub const MAX_FINE_BITS: u32 = 8;

/// 帧间预测系数, 按 LM 索引
const PRED_COEF: [f32; 4] = [0.898, 0.797, 0.648, 0.5];
/// 频率方向预测的衰减, 按 LM 索引
const BETA_COEF: [f32; 4] = [0.92, 0.68, 0.37, 0.2];
const BETA_INTRA: f32 = 0.15;

/// 帧内与帧间模式下的拉普拉斯参数 (零频率, 衰减)
const INTRA_LAPLACE: (u32, u32) = (9000, 9000);
const INTER_LAPLACE: (u32, u32) = (16000, 7000);

/// 比特不足时使用的三值分布: 0, -1, +1
const SMALL_ENERGY_ICDF: [u8; 3] = [2, 1, 0];

/// 创建全部为下限的能量状态
pub fn floor_energies() -> BandEnergies {
    [[ENERGY_FLOOR; NB_EBANDS]; 2]
}

/// 粗量化参数
#[derive(Debug, Clone, Copy)]
pub struct CoarseParams {
    pub start: usize,
    pub end: usize,
    pub channels: usize,
    pub lm: usize,
    pub intra: bool,
    /// 整帧位数
    pub total_bits: u32,
}

/// 编解码粗量化能量
///
/// `target` 仅编码端使用. `old` 为预测状态, 完成后保存本帧的量化能量;
/// `error` 保存目标与量化值之差, 供细量化使用.
pub fn code_coarse_energy(
    coder: &mut SymbolCoder<'_, '_>,
    params: CoarseParams,
    target: &BandEnergies,
    old: &mut BandEnergies,
    error: &mut BandEnergies,
) {
    let CoarseParams {
        start,
        end,
        channels,
        lm,
        intra,
        total_bits,
    } = params;
    let (coef, beta) = if intra {
        (0.0, BETA_INTRA)
    } else {
        (PRED_COEF[lm], BETA_COEF[lm])
    };
    let (fs, decay) = if intra { INTRA_LAPLACE } else { INTER_LAPLACE };
    let total = total_bits as i32;
    let mut prev = [0.0f32; 2];

    for i in start..end {
        for c in 0..channels {
            let x = target[c][i];
            let old_e = old[c][i].max(-9.0);
            let f = (x - coef * old_e - prev[c]).clamp(-64.0, 64.0);
            let mut qi = (f + 0.5).floor() as i32;

            let tell = coder.tell() as i32;
            let bits_left = total - tell - 3 * (channels * (end - i)) as i32;
            if i != start && bits_left < 30 {
                if bits_left < 24 {
                    qi = qi.min(1);
                }
                if bits_left < 16 {
                    qi = qi.max(-1);
                }
            }
            let remaining = total - tell;
            qi = if remaining >= 15 {
                coder.laplace(qi, fs, decay)
            } else if remaining >= 2 {
                let qi = qi.clamp(-1, 1);
                let sym = match qi {
                    0 => 0,
                    -1 => 1,
                    _ => 2,
                };
                match coder.icdf(sym, &SMALL_ENERGY_ICDF, 2) {
                    0 => 0,
                    1 => -1,
                    _ => 1,
                }
            } else if remaining >= 1 {
                let qi = qi.min(0);
                -i32::from(coder.bit_logp(qi != 0, 1))
            } else {
                -1
            };

            let q = qi as f32;
            old[c][i] = (coef * old_e + prev[c] + q).max(ENERGY_FLOOR);
            error[c][i] = x - old[c][i];
            prev[c] += q - beta * q;
        }
    }
}

/// 编解码细量化能量
pub fn code_fine_energy(
    coder: &mut SymbolCoder<'_, '_>,
    fine_bits: &[[u32; NB_EBANDS]; 2],
    range: (usize, usize),
    channels: usize,
    old: &mut BandEnergies,
    error: &mut BandEnergies,
) {
    for i in range.0..range.1 {
        for c in 0..channels {
            let bits = fine_bits[c][i];
            if bits == 0 {
                continue;
            }
            let levels = (1u32 << bits) as f32;
            let q = ((error[c][i] + 0.5) * levels)
                .floor()
                .clamp(0.0, levels - 1.0) as u32;
            let q = coder.raw_bits(q, bits);
            let offset = (q as f32 + 0.5) / levels - 0.5;
            old[c][i] += offset;
            error[c][i] -= offset;
        }
    }
}

/// 用剩余的整数位为每个频带再补一位细量化
pub fn code_final_energy(
    coder: &mut SymbolCoder<'_, '_>,
    fine_bits: &[[u32; NB_EBANDS]; 2],
    range: (usize, usize),
    channels: usize,
    bits_left: i32,
    old: &mut BandEnergies,
    error: &mut BandEnergies,
) {
    let mut left = bits_left;
    for i in range.0..range.1 {
        if left < channels as i32 {
            break;
        }
        if fine_bits[..channels]
            .iter()
            .any(|f| f[i] >= MAX_FINE_BITS)
        {
            continue;
        }
        for c in 0..channels {
            let bit = u32::from(error[c][i] >= 0.0);
            let bit = coder.raw_bits(bit, 1);
            let offset = (bit as f32 - 0.5) / (1u32 << (fine_bits[c][i] + 1)) as f32;
            old[c][i] += offset;
            error[c][i] -= offset;
            left -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheng_core::{RangeDecoder, RangeEncoder};

    fn target() -> BandEnergies {
        let mut t = floor_energies();
        for i in 0..NB_EBANDS {
            t[0][i] = 3.0 - 0.4 * i as f32;
            t[1][i] = 1.3 - 0.2 * i as f32;
        }
        t
    }

    fn run(
        coder: &mut SymbolCoder<'_, '_>,
        params: CoarseParams,
        target: &BandEnergies,
        old: &mut BandEnergies,
    ) -> BandEnergies {
        let mut error = [[0.0; NB_EBANDS]; 2];
        code_coarse_energy(coder, params, target, old, &mut error);
        let fine = [[2u32; NB_EBANDS]; 2];
        let range = (params.start, params.end);
        code_fine_energy(coder, &fine, range, params.channels, old, &mut error);
        let left = params.total_bits as i32 - coder.tell() as i32;
        code_final_energy(coder, &fine, range, params.channels, left, old, &mut error);
        error
    }

    #[test]
    fn test_能量两端一致且误差有界() {
        let t = target();
        let mut enc_state = floor_energies();
        let mut dec_state = floor_energies();
        for (frame, intra) in [true, false, false].into_iter().enumerate() {
            let params = CoarseParams {
                start: 0,
                end: NB_EBANDS,
                channels: 2,
                lm: 3,
                intra,
                total_bits: 1600,
            };
            let mut enc = RangeEncoder::new(200);
            let mut coder = SymbolCoder::Encoder(&mut enc);
            let error = run(&mut coder, params, &t, &mut enc_state);
            let data = enc.finish().unwrap();
            let mut dec = RangeDecoder::new(&data);
            run(
                &mut SymbolCoder::Decoder(&mut dec),
                params,
                &floor_energies(),
                &mut dec_state,
            );
            assert_eq!(enc_state, dec_state, "第 {frame} 帧");
            for c in 0..2 {
                for i in 0..NB_EBANDS {
                    assert!(error[c][i].abs() <= 0.13, "c={c} i={i} err={}", error[c][i]);
                }
            }
        }
    }

    #[test]
    fn test_比特不足时仍可解析() {
        let t = target();
        let params = CoarseParams {
            start: 0,
            end: NB_EBANDS,
            channels: 2,
            lm: 2,
            intra: true,
            total_bits: 40,
        };
        let mut enc_state = floor_energies();
        let mut enc = RangeEncoder::new(5);
        let mut err = [[0.0; NB_EBANDS]; 2];
        let mut coder = SymbolCoder::Encoder(&mut enc);
        code_coarse_energy(&mut coder, params, &t, &mut enc_state, &mut err);
        assert!(enc.tell() <= 40);
        let data = enc.finish().unwrap();
        let mut dec_state = floor_energies();
        let mut dec = RangeDecoder::new(&data);
        code_coarse_energy(
            &mut SymbolCoder::Decoder(&mut dec),
            params,
            &floor_energies(),
            &mut dec_state,
            &mut err,
        );
        assert_eq!(enc_state, dec_state);
    }
}
