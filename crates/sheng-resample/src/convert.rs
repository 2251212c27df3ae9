//! 采样格式和声道数转换.

use sheng_core::{SampleFormat, ShengError, ShengResult};

/// S16 转 F32, 满幅映射到 ±1.0
pub fn s16_to_f32(input: &[i16]) -> Vec<f32> {
    input.iter().map(|&v| f32::from(v) / 32768.0).collect()
}

/// F32 转 S16, 四舍五入并饱和
pub fn f32_to_s16(input: &[f32]) -> Vec<i16> {
    input
        .iter()
        .map(|&v| (v * 32768.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// 把小端字节解码为 F32 样本
pub fn bytes_to_f32(data: &[u8], format: SampleFormat) -> ShengResult<Vec<f32>> {
    match format {
        SampleFormat::S16 => {
            if data.len() % 2 != 0 {
                return Err(ShengError::InvalidArgument(format!(
                    "S16 数据长度 {} 不是 2 的倍数",
                    data.len()
                )));
            }
            Ok(data
                .chunks_exact(2)
                .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
                .collect())
        }
        SampleFormat::F32 => {
            if data.len() % 4 != 0 {
                return Err(ShengError::InvalidArgument(format!(
                    "F32 数据长度 {} 不是 4 的倍数",
                    data.len()
                )));
            }
            Ok(data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect())
        }
        SampleFormat::None => Err(ShengError::InvalidArgument("无效的采样格式".to_string())),
    }
}

/// 把 F32 样本编码为小端字节
pub fn f32_to_bytes(samples: &[f32], format: SampleFormat) -> ShengResult<Vec<u8>> {
    let bps = format.bytes_per_sample() as usize;
    let mut out = Vec::with_capacity(samples.len() * bps);
    match format {
        SampleFormat::S16 => {
            for v in f32_to_s16(samples) {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        SampleFormat::F32 => {
            for v in samples {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        SampleFormat::None => {
            return Err(ShengError::InvalidArgument("无效的采样格式".to_string()));
        }
    }
    Ok(out)
}

/// 声道混合 (交错格式)
///
/// - 单声道 → 多声道: 复制
/// - 多声道 → 单声道: 取平均
/// - 其他: 对应声道直接映射, 多出的声道填零
pub fn mix_channels(input: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == dst_channels || src_channels == 0 {
        return input.to_vec();
    }
    let nb_samples = input.len() / src_channels;
    let mut output = Vec::with_capacity(nb_samples * dst_channels);
    for frame in input.chunks_exact(src_channels) {
        for dst_ch in 0..dst_channels {
            let v = if src_channels == 1 {
                frame[0]
            } else if dst_channels == 1 {
                frame.iter().sum::<f32>() / src_channels as f32
            } else if dst_ch < src_channels {
                frame[dst_ch]
            } else {
                0.0
            };
            output.push(v);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16_f32_互转() {
        let f = s16_to_f32(&[32767, -32768, 0]);
        assert!((f[0] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(f[1], -1.0);
        assert_eq!(f32_to_s16(&[1.5, -2.0, 0.5]), vec![32767, -32768, 16384]);
    }

    #[test]
    fn test_字节格式转换() {
        let bytes = f32_to_bytes(&[0.25, -0.5], SampleFormat::S16).unwrap();
        assert_eq!(bytes.len(), 4);
        let back = bytes_to_f32(&bytes, SampleFormat::S16).unwrap();
        assert_eq!(back, vec![0.25, -0.5]);
        assert!(bytes_to_f32(&[0, 1, 2], SampleFormat::S16).is_err());
        assert!(f32_to_bytes(&[0.0], SampleFormat::None).is_err());
    }

    #[test]
    fn test_mix_mono_stereo() {
        assert_eq!(
            mix_channels(&[0.5, -0.25], 1, 2),
            vec![0.5, 0.5, -0.25, -0.25]
        );
        let mono = mix_channels(&[0.2, 0.4, -1.0, 0.0], 2, 1);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] + 0.5).abs() < 1e-6);
    }
}
