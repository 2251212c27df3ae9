//! 变换路径解码器.

use std::sync::Arc;

use sheng_core::{RangeDecoder, ShengResult};

use super::bands::{denormalize_bands, mid_side_to_stereo};
use super::energy::{self, BandEnergies, ENERGY_FLOOR};
use super::mdct::Mdct;
use super::pvq::noise_fill;
use super::syntax::{FrameDecisions, FrameLayout, code_frame, no_target};
use super::{MAX_LM, NB_EBANDS, band_start, band_width, coeffs_48k, overlap, short_blocks};
use crate::opus::coder::SymbolCoder;

/// 每丢一帧能量衰减量 (log2 幅度, 约 3 dB)
const PLC_DECAY: f32 = 0.5;

/// 最近一次成功解码的帧结构, 供丢包补偿沿用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastFrame {
    start: usize,
    end: usize,
    channels: usize,
}

/// 变换路径解码器
#[derive(Debug, Clone)]
pub struct CeltDecoder {
    sample_rate: u32,
    /// 输出声道数
    channels: usize,
    overlap: usize,
    /// 按 LM 索引的逆变换, 克隆间共享
    mdct: Arc<[Mdct]>,
    /// 每个输出声道尚待叠加的尾部
    tail: [Vec<f32>; 2],
    old_energy: BandEnergies,
    seed: u32,
    last: Option<LastFrame>,
}

impl CeltDecoder {
    /// 创建解码器, `channels` 为输出声道数
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let ov = overlap(sample_rate);
        Self {
            sample_rate,
            channels: channels.clamp(1, 2),
            overlap: ov,
            mdct: (0..=MAX_LM).map(|lm| Mdct::new(ov << lm, ov)).collect(),
            tail: [vec![0.0; ov], vec![0.0; ov]],
            old_energy: energy::floor_energies(),
            seed: 0,
            last: None,
        }
    }

    /// 采样率
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 重叠长度
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// 上升窗
    pub fn window(&self) -> &[f32] {
        self.mdct[0].window()
    }

    /// 当前能量状态
    pub fn energies(&self) -> &BandEnergies {
        &self.old_energy
    }

    /// 清空全部状态
    pub fn reset(&mut self) {
        self.clear_tail();
        self.old_energy = energy::floor_energies();
        self.seed = 0;
        self.last = None;
    }

    /// 丢弃待叠加的尾部
    pub fn clear_tail(&mut self) {
        for t in &mut self.tail {
            t.fill(0.0);
        }
    }

    /// 取出并清空待叠加的尾部, 每输出声道 overlap 个样本
    pub fn take_tail(&mut self) -> Vec<Vec<f32>> {
        let tail = self.tail[..self.channels].to_vec();
        self.clear_tail();
        tail
    }

    /// 把外部信号折叠成的尾部叠加进来 (每输出声道 overlap 个样本)
    pub fn add_to_tail(&mut self, contribution: &[Vec<f32>]) {
        for (t, c) in self.tail.iter_mut().zip(contribution) {
            for (d, v) in t.iter_mut().zip(c) {
                *d += v;
            }
        }
    }

    /// 解码一帧, 返回每输出声道 `overlap << lm` 个样本
    pub fn decode_frame(
        &mut self,
        dec: &mut RangeDecoder<'_>,
        lm: usize,
        band_range: (usize, usize),
        coded_channels: usize,
    ) -> ShengResult<(Vec<Vec<f32>>, FrameDecisions)> {
        let lm = lm.min(MAX_LM);
        let coded_channels = coded_channels.clamp(1, 2);
        let (start, end) = band_range;
        let layout = FrameLayout {
            lm,
            start,
            end,
            channels: coded_channels,
            total_bits: (dec.storage() * 8) as u32,
        };
        let mut shapes = vec![vec![0.0f32; coeffs_48k(lm)]; coded_channels];
        let mut decisions = FrameDecisions::default();
        code_frame(
            &mut SymbolCoder::Decoder(dec),
            layout,
            &mut decisions,
            &no_target(),
            &mut self.old_energy,
            &mut shapes,
            &mut self.seed,
        )?;

        let mut spectra: Vec<Vec<f32>> = (0..coded_channels)
            .map(|c| {
                if decisions.silent {
                    vec![0.0; coeffs_48k(lm)]
                } else {
                    denormalize_bands(&shapes[c], &self.old_energy[c], lm, (start, end))
                }
            })
            .collect();
        if coded_channels == 2 && decisions.mid_side {
            let (m, s) = spectra.split_at_mut(1);
            mid_side_to_stereo(&mut m[0], &mut s[0]);
        }
        self.last = Some(LastFrame {
            start,
            end,
            channels: coded_channels,
        });
        let pcm = self.render(spectra, lm, decisions.transient);
        Ok((pcm, decisions))
    }

    /// 丢包补偿: 沿用上一帧的频带结构, 能量逐帧衰减, 形状为噪声
    pub fn conceal(&mut self, lm: usize) -> Vec<Vec<f32>> {
        let lm = lm.min(MAX_LM);
        let last = self.last.unwrap_or(LastFrame {
            start: 0,
            end: NB_EBANDS,
            channels: self.channels,
        });
        for c in 0..2 {
            for e in self.old_energy[c].iter_mut() {
                *e = (*e - PLC_DECAY).max(ENERGY_FLOOR);
            }
        }
        let spectra: Vec<Vec<f32>> = (0..last.channels)
            .map(|c| {
                let mut shape = vec![0.0f32; coeffs_48k(lm)];
                for band in last.start..last.end {
                    let s = band_start(band, lm);
                    noise_fill(&mut shape[s..s + band_width(band, lm)], &mut self.seed);
                }
                denormalize_bands(&shape, &self.old_energy[c], lm, (last.start, last.end))
            })
            .collect();
        self.render(spectra, lm, false)
    }

    /// 声道转换后做逆变换与叠加
    fn render(&mut self, spectra: Vec<Vec<f32>>, lm: usize, transient: bool) -> Vec<Vec<f32>> {
        let outputs: Vec<Vec<f32>> = match (spectra.len(), self.channels) {
            (2, 1) => vec![
                spectra[0]
                    .iter()
                    .zip(&spectra[1])
                    .map(|(l, r)| 0.5 * (l + r))
                    .collect(),
            ],
            (1, 2) => vec![spectra[0].clone(), spectra[0].clone()],
            _ => spectra,
        };
        outputs
            .iter()
            .enumerate()
            .map(|(c, coeffs)| self.synthesize(c, coeffs, lm, transient))
            .collect()
    }

    fn synthesize(
        &mut self,
        channel: usize,
        coeffs: &[f32],
        lm: usize,
        transient: bool,
    ) -> Vec<f32> {
        let ov = self.overlap;
        let n = ov << lm;
        let mut buf = vec![0.0f32; n + ov];
        if transient {
            let count = short_blocks(lm, true);
            for b in 0..count {
                let block: Vec<f32> = (0..ov).map(|j| coeffs[j * count + b]).collect();
                let y = self.mdct[0].inverse(&block);
                for (d, v) in buf[b * ov..b * ov + 2 * ov].iter_mut().zip(&y) {
                    *d += v;
                }
            }
        } else {
            buf = self.mdct[lm].inverse(&coeffs[..n]);
        }
        for (d, t) in buf.iter_mut().zip(&self.tail[channel]) {
            *d += t;
        }
        self.tail[channel].copy_from_slice(&buf[n..]);
        buf.truncate(n);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opus::celt::encoder::{CeltEncoder, FrameParams};
    use sheng_core::RangeEncoder;

    fn tone(rate: u32, freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn snr(reference: &[f32], decoded: &[f32]) -> f64 {
        let (mut s, mut e) = (0.0f64, 0.0f64);
        for (a, b) in reference.iter().zip(decoded) {
            s += f64::from(*a).powi(2);
            e += f64::from(a - b).powi(2);
        }
        10.0 * (s / e.max(1e-20)).log10()
    }

    fn run(
        rate: u32,
        lm: usize,
        end: usize,
        bytes: usize,
        frames: usize,
        input: &[f32],
    ) -> Vec<f32> {
        let n = overlap(rate) << lm;
        let mut enc = CeltEncoder::new(rate);
        let mut dec = CeltDecoder::new(rate, 1);
        let mut out = Vec::new();
        for f in 0..frames {
            let pcm = &input[f * n..(f + 1) * n];
            let mut rc = RangeEncoder::new(bytes);
            enc.encode_frame(&mut rc, &[pcm], FrameParams { lm, start: 0, end })
                .unwrap();
            let data = rc.finish().unwrap();
            let mut rd = RangeDecoder::new(&data);
            let (pcm, _) = dec.decode_frame(&mut rd, lm, (0, end), 1).unwrap();
            out.extend_from_slice(&pcm[0]);
        }
        out
    }

    #[test]
    fn test_正弦往返() {
        let rate = 48000;
        let input = tone(rate, 440.0, 960 * 12);
        let out = run(rate, 3, 21, 160, 12, &input);
        // 输出比输入晚 overlap 个样本
        let ov = overlap(rate);
        let snr = snr(&input[960..960 * 11], &out[960 + ov..960 * 11 + ov]);
        assert!(snr > 10.0, "SNR {snr:.1} dB");
    }

    #[test]
    fn test_低采样率往返() {
        let rate = 16000;
        let input = tone(rate, 700.0, 160 * 20);
        let out = run(rate, 2, 17, 60, 20, &input);
        let ov = overlap(rate);
        let snr = snr(&input[480..160 * 18], &out[480 + ov..160 * 18 + ov]);
        assert!(snr > 8.0, "SNR {snr:.1} dB");
    }

    #[test]
    fn test_丢包补偿能量衰减() {
        let rate = 48000;
        let input = tone(rate, 1000.0, 960 * 6);
        let mut enc = CeltEncoder::new(rate);
        let mut dec = CeltDecoder::new(rate, 1);
        let params = FrameParams {
            lm: 3,
            start: 0,
            end: 21,
        };
        let mut last_energy = 0.0f32;
        for f in 0..6 {
            let mut rc = RangeEncoder::new(120);
            let pcm = &input[f * 960..(f + 1) * 960];
            enc.encode_frame(&mut rc, &[pcm], params).unwrap();
            let data = rc.finish().unwrap();
            let (pcm, _) = dec
                .decode_frame(&mut RangeDecoder::new(&data), 3, (0, 21), 1)
                .unwrap();
            last_energy = pcm[0].iter().map(|v| v * v).sum();
        }
        let before = *dec.energies();
        let mut concealed = Vec::new();
        for k in 1..=4 {
            let pcm = dec.conceal(3);
            for i in 0..NB_EBANDS {
                let want = (before[0][i] - PLC_DECAY * k as f32).max(ENERGY_FLOOR);
                assert!((dec.energies()[0][i] - want).abs() < 1e-4);
            }
            concealed.push(pcm[0][120..].iter().map(|v| v * v).sum::<f32>());
        }
        assert!(concealed[3] < concealed[0]);
        assert!(concealed[0] < last_energy * 2.0);
    }

    #[test]
    fn test_立体声转单声道输出() {
        let rate = 24000;
        let n = 240;
        let left = tone(rate, 500.0, n * 8);
        let right: Vec<f32> = left.iter().map(|v| v * 0.8).collect();
        let mut enc = CeltEncoder::new(rate);
        let mut dec = CeltDecoder::new(rate, 1);
        let mut out = Vec::new();
        for f in 0..8 {
            let l = &left[f * n..(f + 1) * n];
            let r = &right[f * n..(f + 1) * n];
            let mut rc = RangeEncoder::new(150);
            let params = FrameParams {
                lm: 2,
                start: 0,
                end: 19,
            };
            enc.encode_frame(&mut rc, &[l, r], params).unwrap();
            let data = rc.finish().unwrap();
            let (pcm, info) = dec
                .decode_frame(&mut RangeDecoder::new(&data), 2, (0, 19), 2)
                .unwrap();
            assert_eq!(pcm.len(), 1);
            assert!(info.mid_side);
            out.extend_from_slice(&pcm[0]);
        }
        let mono: Vec<f32> = left
            .iter()
            .zip(&right)
            .map(|(l, r)| 0.5 * (l + r))
            .collect();
        let ov = overlap(rate);
        let snr = snr(&mono[n * 2..n * 7], &out[n * 2 + ov..n * 7 + ov]);
        assert!(snr > 8.0, "SNR {snr:.1} dB");
    }

    #[test]
    fn test_克隆共享变换且历史独立() {
        let rate = 48000;
        let input = tone(rate, 440.0, 960 * 3);
        let mut enc = CeltEncoder::new(rate);
        let mut dec = CeltDecoder::new(rate, 1);
        let params = FrameParams {
            lm: 3,
            start: 0,
            end: 21,
        };
        let mut packets = Vec::new();
        for f in 0..3 {
            let mut rc = RangeEncoder::new(160);
            enc.encode_frame(&mut rc, &[&input[f * 960..(f + 1) * 960]], params)
                .unwrap();
            packets.push(rc.finish().unwrap());
        }
        dec.decode_frame(&mut RangeDecoder::new(&packets[0]), 3, (0, 21), 1)
            .unwrap();

        let mut twin = dec.clone();
        assert!(Arc::ptr_eq(&dec.mdct, &twin.mdct));
        // 副本上的解码不影响原解码器
        twin.decode_frame(&mut RangeDecoder::new(&packets[1]), 3, (0, 21), 1)
            .unwrap();
        assert_ne!(twin.tail, dec.tail);
        let (a, _) = dec
            .decode_frame(&mut RangeDecoder::new(&packets[1]), 3, (0, 21), 1)
            .unwrap();
        let (b, _) = dec
            .clone()
            .decode_frame(&mut RangeDecoder::new(&packets[2]), 3, (0, 21), 1)
            .unwrap();
        let (c, _) = twin
            .decode_frame(&mut RangeDecoder::new(&packets[2]), 3, (0, 21), 1)
            .unwrap();
        assert_eq!(b, c);
        assert_eq!(a.len(), 1);
    }
}
