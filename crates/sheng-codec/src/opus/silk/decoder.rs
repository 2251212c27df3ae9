//! 语音路径解码器.

use sheng_core::{RangeDecoder, ShengResult};

use super::VoiceLayout;
use super::lpc::order_for_rate;
use super::state::VoiceState;
use super::syntax::{VoiceFrameIndices, code_frame};
use crate::opus::coder::SymbolCoder;

/// 语音路径解码器, 持有中、侧两个声道的状态
#[derive(Debug, Clone)]
pub struct VoiceDecoder {
    rate: u32,
    mid: VoiceState,
    side: VoiceState,
    /// 上一帧的编码声道数
    last_channels: usize,
}

impl VoiceDecoder {
    pub fn new(rate: u32) -> Self {
        let order = order_for_rate(rate);
        Self {
            rate,
            mid: VoiceState::new(order),
            side: VoiceState::new(order),
            last_channels: 1,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// 切换内部采样率, 采样率改变时清空全部状态
    pub fn set_rate(&mut self, rate: u32) {
        if rate != self.rate {
            log::debug!("语音路径内部采样率 {} -> {} Hz", self.rate, rate);
            *self = Self::new(rate);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.rate);
    }

    /// 连续补偿的帧数
    pub fn lost_frames(&self) -> u32 {
        self.mid.lost_frames()
    }

    /// 解码一个语音帧, 返回 `coded_channels` 个声道 (立体声时已还原为左右)
    pub fn decode_frame(
        &mut self,
        dec: &mut RangeDecoder<'_>,
        layout: VoiceLayout,
        coded_channels: usize,
    ) -> ShengResult<Vec<Vec<f32>>> {
        self.set_rate(layout.rate);
        let coded_channels = coded_channels.clamp(1, 2);
        let mut frames = Vec::with_capacity(coded_channels);
        for _ in 0..coded_channels {
            let mut idx = VoiceFrameIndices::inactive(0);
            code_frame(&mut SymbolCoder::Decoder(dec), layout, &mut idx)?;
            frames.push(idx);
        }

        if coded_channels == 1 && self.last_channels == 2 {
            self.side.reset();
        }
        self.last_channels = coded_channels;
        let mid = self.mid.reconstruct(layout, &frames[0]);
        if coded_channels == 1 {
            return Ok(vec![mid]);
        }
        let side = self.side.reconstruct(layout, &frames[1]);
        Ok(mid_side_to_left_right(&mid, &side))
    }

    /// 丢包补偿一个语音帧
    pub fn conceal(&mut self, layout: VoiceLayout) -> Vec<Vec<f32>> {
        self.set_rate(layout.rate);
        let mid = self.mid.conceal(layout);
        if self.last_channels == 1 {
            return vec![mid];
        }
        let side = self.side.conceal(layout);
        mid_side_to_left_right(&mid, &side)
    }
}

fn mid_side_to_left_right(mid: &[f32], side: &[f32]) -> Vec<Vec<f32>> {
    let left = mid.iter().zip(side).map(|(m, s)| m + s).collect();
    let right = mid.iter().zip(side).map(|(m, s)| m - s).collect();
    vec![left, right]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opus::silk::{FrameType, VoiceEncoder};
    use sheng_core::RangeEncoder;

    fn tone(rate: u32, freq: f32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
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

    /// 逐帧编解码, 返回解码输出与编码端的最终区间
    fn run(
        rate: u32,
        channels: &[Vec<f32>],
        frame: usize,
        bytes: usize,
    ) -> (Vec<Vec<f32>>, Vec<FrameType>) {
        let mut enc = VoiceEncoder::new(rate, channels.len());
        let mut dec = VoiceDecoder::new(rate);
        let mut out = vec![Vec::new(); channels.len()];
        let mut types = Vec::new();
        let frames = channels[0].len() / frame;
        for f in 0..frames {
            let pcm: Vec<&[f32]> = channels
                .iter()
                .map(|c| &c[f * frame..(f + 1) * frame])
                .collect();
            let mut rc = RangeEncoder::new(bytes);
            let budget = (bytes * 8 - 8) as u32;
            let info = enc.encode_frame(&mut rc, &pcm, budget).unwrap();
            types.extend(info.frame_types);
            let rng = rc.final_range();
            let data = rc.finish().unwrap();
            let mut rd = RangeDecoder::new(&data);
            let layout = VoiceLayout::new(rate, frame / (rate as usize / 200));
            let decoded = dec.decode_frame(&mut rd, layout, channels.len()).unwrap();
            assert_eq!(rd.final_range(), rng, "第 {f} 帧");
            for (o, d) in out.iter_mut().zip(decoded) {
                o.extend(d);
            }
        }
        (out, types)
    }

    #[test]
    fn test_浊音往返() {
        let rate = 16000;
        let input = tone(rate, 230.0, 320 * 15, 0.4);
        let (out, types) = run(rate, &[input.clone()], 320, 60);
        assert!(
            types[3..].iter().all(|t| *t == FrameType::Voiced),
            "{types:?}"
        );
        let s = snr(&input[320 * 3..], &out[0][320 * 3..]);
        assert!(s > 8.0, "SNR {s:.1} dB");
    }

    #[test]
    fn test_窄带十毫秒往返() {
        let rate = 8000;
        let input = tone(rate, 440.0, 80 * 30, 0.3);
        let (out, _) = run(rate, &[input.clone()], 80, 30);
        let s = snr(&input[80 * 5..], &out[0][80 * 5..]);
        assert!(s > 8.0, "SNR {s:.1} dB");
    }

    #[test]
    fn test_静音输入按静默帧编码() {
        let rate = 12000;
        let input = vec![0.0f32; 240 * 4];
        let (out, types) = run(rate, &[input], 240, 20);
        assert!(types.iter().all(|t| *t == FrameType::Inactive));
        assert!(out[0].iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn test_立体声中侧() {
        let rate = 16000;
        let left = tone(rate, 300.0, 320 * 10, 0.3);
        let right = left.clone();
        let (out, types) = run(rate, &[left.clone(), right], 320, 80);
        // 左右相同时侧声道为静默帧
        let mut side = types.iter().skip(1).step_by(2);
        assert!(side.all(|t| *t == FrameType::Inactive));
        let s = snr(&left[320 * 3..], &out[1][320 * 3..]);
        assert!(s > 8.0, "SNR {s:.1} dB");
    }

    #[test]
    fn test_丢包补偿() {
        let rate = 16000;
        let input = tone(rate, 200.0, 320 * 6, 0.4);
        let mut enc = VoiceEncoder::new(rate, 1);
        let mut dec = VoiceDecoder::new(rate);
        let layout = VoiceLayout::new(rate, 4);
        let mut last = 0.0f32;
        for f in 0..6 {
            let mut rc = RangeEncoder::new(60);
            enc.encode_frame(&mut rc, &[&input[f * 320..(f + 1) * 320]], 470).unwrap();
            let data = rc.finish().unwrap();
            let out = dec
                .decode_frame(&mut RangeDecoder::new(&data), layout, 1)
                .unwrap();
            last = out[0].iter().map(|v| v * v).sum();
        }
        for k in 1..=3 {
            let out = dec.conceal(layout);
            let e: f32 = out[0].iter().map(|v| v * v).sum();
            assert!(e < last * 1.5, "第 {k} 帧 {e} {last}");
        }
        assert_eq!(dec.lost_frames(), 3);
    }
}
