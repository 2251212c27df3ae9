//! 变换路径编码器.

use std::sync::Arc;

use sheng_core::{RangeEncoder, ShengResult};

use super::bands::{compute_energies, normalize_bands, stereo_to_mid_side};
use super::energy::{self, BandEnergies};
use super::mdct::Mdct;
use super::syntax::{FrameDecisions, FrameLayout, code_frame};
use super::{MAX_LM, band_start, coeffs_48k, overlap, short_blocks};
use crate::opus::coder::SymbolCoder;

/// 瞬态判定: 子块能量相对之前平均能量的比值
const TRANSIENT_RATIO: f32 = 12.0;

/// 帧内编码的能量跳变阈值 (log2 幅度)
const INTRA_JUMP: f32 = 4.0;

/// 单帧编码参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
    pub lm: usize,
    /// 起始频带, 混合模式下非零
    pub start: usize,
    /// 终止频带 (不含)
    pub end: usize,
}

/// 一帧编码后的实际决策
pub type FrameInfo = FrameDecisions;

/// 变换路径编码器
#[derive(Debug, Clone)]
pub struct CeltEncoder {
    sample_rate: u32,
    overlap: usize,
    /// 按 LM 索引的长块变换, LM = 0 同时用作短块. 克隆间共享
    mdct: Arc<[Mdct]>,
    /// 每声道上一帧末尾 overlap 个样本
    history: [Vec<f32>; 2],
    old_energy: BandEnergies,
    force_intra: bool,
    seed: u32,
}

impl CeltEncoder {
    /// 创建编码器
    pub fn new(sample_rate: u32) -> Self {
        let ov = overlap(sample_rate);
        Self {
            sample_rate,
            overlap: ov,
            mdct: (0..=MAX_LM).map(|lm| Mdct::new(ov << lm, ov)).collect(),
            history: [vec![0.0; ov], vec![0.0; ov]],
            old_energy: energy::floor_energies(),
            force_intra: true,
            seed: 0,
        }
    }

    /// 采样率
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 清空全部状态
    pub fn reset(&mut self) {
        for h in &mut self.history {
            h.fill(0.0);
        }
        self.old_energy = energy::floor_energies();
        self.force_intra = true;
        self.seed = 0;
    }

    /// 下一帧强制帧内编码能量
    pub fn force_intra(&mut self) {
        self.force_intra = true;
    }

    /// 当前能量预测状态
    pub fn energies(&self) -> &BandEnergies {
        &self.old_energy
    }

    /// 不编码, 只把本帧末尾样本记入重叠历史
    ///
    /// 其他路径编码的帧也要调用, 切回变换路径时第一块的上升窗区间才是真实信号.
    pub fn push_history(&mut self, pcm: &[&[f32]]) {
        let ov = self.overlap;
        for (h, ch) in self.history.iter_mut().zip(pcm) {
            if ch.len() >= ov {
                h.copy_from_slice(&ch[ch.len() - ov..]);
            } else {
                h.copy_within(ch.len().., 0);
                let keep = ov - ch.len();
                h[keep..].copy_from_slice(ch);
            }
        }
    }

    /// 编码一帧, `pcm` 每声道 `overlap << lm` 个样本
    pub fn encode_frame(
        &mut self,
        enc: &mut RangeEncoder,
        pcm: &[&[f32]],
        params: FrameParams,
    ) -> ShengResult<FrameInfo> {
        let channels = pcm.len().clamp(1, 2);
        let lm = params.lm.min(MAX_LM);
        let ov = self.overlap;
        let n = ov << lm;

        let blocks: Vec<Vec<f32>> = (0..channels)
            .map(|c| {
                let mut b = Vec::with_capacity(n + ov);
                b.extend_from_slice(&self.history[c]);
                b.extend(pcm[c].iter().copied().take(n));
                b.resize(n + ov, 0.0);
                b
            })
            .collect();
        for c in 0..channels {
            self.history[c].copy_from_slice(&blocks[c][n..]);
        }

        let silent = blocks.iter().flatten().all(|v| v.abs() < 1e-9);
        let transient = lm > 0 && blocks.iter().any(|b| detect_transient(b, ov));

        let mut wanted = FrameDecisions {
            silent,
            transient,
            ..FrameDecisions::default()
        };
        let checkpoint = (enc.clone(), self.old_energy, self.seed, self.force_intra);
        let mut info = self.encode_with(enc, &blocks, lm, params, &wanted, true)?;
        if !info.silent && (info.transient != wanted.transient || info.mid_side != wanted.mid_side)
        {
            // 比特不足以写入标志时按写入的值重新分析
            log::trace!("变换帧标志被预算截断, 重新编码");
            let (saved_enc, energy, seed, force_intra) = checkpoint;
            *enc = saved_enc;
            self.old_energy = energy;
            self.seed = seed;
            self.force_intra = force_intra;
            wanted.transient = info.transient;
            wanted.mid_side = info.mid_side;
            info = self.encode_with(enc, &blocks, lm, params, &wanted, false)?;
        }
        Ok(info)
    }

    fn encode_with(
        &mut self,
        enc: &mut RangeEncoder,
        blocks: &[Vec<f32>],
        lm: usize,
        params: FrameParams,
        wanted: &FrameDecisions,
        choose_mid_side: bool,
    ) -> ShengResult<FrameInfo> {
        let mut spectra: Vec<Vec<f32>> = blocks
            .iter()
            .map(|b| self.analyze(b, lm, wanted.transient))
            .collect();
        let mut decisions = wanted.clone();
        if spectra.len() == 2 {
            let (mid_side, share) = stereo_decision(&spectra, lm, params.end);
            if choose_mid_side {
                decisions.mid_side = mid_side;
            }
            decisions.side_share = share;
        }
        self.finish_frame(enc, &mut spectra, lm, params, decisions)
    }

    fn finish_frame(
        &mut self,
        enc: &mut RangeEncoder,
        spectra: &mut [Vec<f32>],
        lm: usize,
        params: FrameParams,
        mut decisions: FrameDecisions,
    ) -> ShengResult<FrameInfo> {
        let channels = spectra.len();
        if channels == 2 && decisions.mid_side {
            let (l, r) = spectra.split_at_mut(1);
            stereo_to_mid_side(&mut l[0], &mut r[0]);
        }

        let mut target = energy::floor_energies();
        for (c, s) in spectra.iter().enumerate() {
            target[c] = compute_energies(s, lm, params.end);
        }
        let range = (params.start, params.end);
        decisions.intra =
            self.force_intra || energy_jump(&target, &self.old_energy, range, channels);
        decisions.trim = tilt_trim(&target, range, channels);

        let mut shapes: Vec<Vec<f32>> = spectra
            .iter()
            .map(|s| normalize_bands(s, lm, range))
            .collect();
        let layout = FrameLayout {
            lm,
            start: params.start,
            end: params.end,
            channels,
            total_bits: (enc.storage() * 8) as u32,
        };
        code_frame(
            &mut SymbolCoder::Encoder(enc),
            layout,
            &mut decisions,
            &target,
            &mut self.old_energy,
            &mut shapes,
            &mut self.seed,
        )?;
        self.force_intra = false;
        log::trace!(
            "变换帧: LM={} 频带 {}..{} 声道 {} 瞬态={} 帧内={} M/S={} 用 {} / {} 位",
            lm,
            params.start,
            params.end,
            channels,
            decisions.transient,
            decisions.intra,
            decisions.mid_side,
            enc.tell(),
            layout.total_bits
        );
        Ok(decisions)
    }

    /// MDCT 分析, 返回 48 kHz 等效长度的系数 (短块交织存放)
    fn analyze(&self, block: &[f32], lm: usize, transient: bool) -> Vec<f32> {
        let ov = self.overlap;
        let n = ov << lm;
        let mut out = vec![0.0f32; coeffs_48k(lm)];
        if transient {
            let b_count = short_blocks(lm, true);
            for b in 0..b_count {
                let coeffs = self.mdct[0].forward(&block[b * ov..b * ov + 2 * ov]);
                for (j, v) in coeffs.into_iter().enumerate() {
                    out[j * b_count + b] = v;
                }
            }
        } else {
            let coeffs = self.mdct[lm].forward(block);
            out[..n].copy_from_slice(&coeffs);
        }
        out
    }
}

/// 检测块内是否有能量突增
fn detect_transient(block: &[f32], segment: usize) -> bool {
    if segment == 0 {
        return false;
    }
    let energies: Vec<f32> = block
        .chunks(segment)
        .map(|s| s.iter().map(|v| v * v).sum::<f32>() / s.len() as f32)
        .collect();
    let mut acc = 0.0f32;
    for (i, &e) in energies.iter().enumerate() {
        if i > 0 {
            let mean = acc / i as f32;
            if e > 1e-6 && e > TRANSIENT_RATIO * (mean + 1e-9) {
                return true;
            }
        }
        acc += e;
    }
    false
}

/// 决定是否使用 M/S 以及第二声道的份额
fn stereo_decision(spectra: &[Vec<f32>], lm: usize, end: usize) -> (bool, u32) {
    let limit = band_start(end, lm).min(spectra[0].len());
    let (mut el, mut er, mut es, mut em) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for j in 0..limit {
        let (l, r) = (spectra[0][j], spectra[1][j]);
        el += l * l;
        er += r * r;
        em += 0.5 * (l + r) * (l + r);
        es += 0.5 * (l - r) * (l - r);
    }
    let mid_side = es < 0.5 * el.min(er);
    let (e0, e1) = if mid_side { (em, es) } else { (el, er) };
    let (a0, a1) = (e0.sqrt(), e1.sqrt());
    let share = if a0 + a1 <= 1e-12 {
        8
    } else {
        ((16.0 * a1 / (a0 + a1)).round() as u32).min(8)
    };
    (mid_side, share)
}

fn energy_jump(
    target: &BandEnergies,
    old: &BandEnergies,
    range: (usize, usize),
    channels: usize,
) -> bool {
    let count = ((range.1 - range.0) * channels).max(1) as f32;
    let sum: f32 = (0..channels)
        .flat_map(|c| (range.0..range.1).map(move |i| (c, i)))
        .map(|(c, i)| (target[c][i] - old[c][i]).abs())
        .sum();
    sum / count > INTRA_JUMP
}

/// 由低频与高频平均能量之差选择倾斜修正
fn tilt_trim(target: &BandEnergies, range: (usize, usize), channels: usize) -> usize {
    let (start, end) = range;
    if end <= start + 1 {
        return super::rate::DEFAULT_TRIM;
    }
    let mid = (start + end) / 2;
    let mean = |a: usize, b: usize| -> f32 {
        let n = ((b - a) * channels) as f32;
        (0..channels)
            .map(|c| target[c][a..b].iter().sum::<f32>())
            .sum::<f32>()
            / n
    };
    let diff = mean(start, mid) - mean(mid, end);
    (5 + (diff / 4.0).round() as i32).clamp(2, 8) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opus::celt::NB_EBANDS;

    #[test]
    fn test_瞬态检测() {
        let mut block = vec![0.001f32; 1080];
        assert!(!detect_transient(&block, 120));
        for v in block.iter_mut().skip(700) {
            *v = 0.5;
        }
        assert!(detect_transient(&block, 120));
    }

    #[test]
    fn test_相同声道选择中侧() {
        let a: Vec<f32> = (0..480).map(|j| (j as f32 * 0.1).sin()).collect();
        let (ms, share) = stereo_decision(&[a.clone(), a.clone()], 2, NB_EBANDS);
        assert!(ms);
        assert_eq!(share, 0);
        let silent = vec![0.0f32; 480];
        let (ms, share) = stereo_decision(&[a, silent], 2, NB_EBANDS);
        assert!(!ms);
        assert_eq!(share, 0);
    }

    #[test]
    fn test_静音帧() {
        let mut encoder = CeltEncoder::new(48000);
        let zeros = vec![0.0f32; 960];
        let mut enc = RangeEncoder::new(100);
        let params = FrameParams {
            lm: 3,
            start: 0,
            end: 21,
        };
        let info = encoder.encode_frame(&mut enc, &[&zeros], params).unwrap();
        assert!(info.silent);
        // 静音标志本身约 15 位, 之后不再写任何符号
        assert!(enc.tell() <= 17);
    }
}
