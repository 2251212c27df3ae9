//! 原始 PCM 文件读写.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs;
use std::path::Path;

use sheng::core::SampleFormat;
use sheng::resample::{bytes_to_f32, f32_to_bytes};

/// 原始 PCM 的采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PcmFormat {
    /// 有符号 16 位小端
    S16le,
    /// 32 位浮点小端
    F32le,
}

impl PcmFormat {
    fn sample_format(self) -> SampleFormat {
        match self {
            Self::S16le => SampleFormat::S16,
            Self::F32le => SampleFormat::F32,
        }
    }
}

/// 读取整个文件为交错 F32 采样
pub fn read_pcm(path: &Path, format: PcmFormat) -> Result<Vec<f32>> {
    let data = fs::read(path)
        .with_context(|| format!("读取 PCM 文件失败, path={}", path.display()))?;
    bytes_to_f32(&data, format.sample_format())
        .with_context(|| format!("PCM 数据无效, path={}", path.display()))
}

/// 写出交错 F32 采样
pub fn write_pcm(path: &Path, samples: &[f32], format: PcmFormat) -> Result<()> {
    let data = f32_to_bytes(samples, format.sample_format()).context("转换 PCM 数据失败")?;
    fs::write(path, data).with_context(|| format!("写入 PCM 文件失败, path={}", path.display()))
}

/// 信噪比 (dB), `reference` 与 `decoded` 按较短者对齐
pub fn snr_db(reference: &[f32], decoded: &[f32]) -> f64 {
    let (mut signal, mut noise) = (0.0f64, 0.0f64);
    for (a, b) in reference.iter().zip(decoded) {
        signal += f64::from(*a).powi(2);
        noise += f64::from(a - b).powi(2);
    }
    if noise == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (signal / noise).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_读写往返() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.raw");
        let samples = [0.0f32, 0.5, -0.5, 0.25];
        write_pcm(&path, &samples, PcmFormat::F32le).unwrap();
        assert_eq!(read_pcm(&path, PcmFormat::F32le).unwrap(), samples);
        write_pcm(&path, &samples, PcmFormat::S16le).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 8);
    }

    #[test]
    fn test_信噪比() {
        let a = [1.0f32, -1.0, 1.0, -1.0];
        assert!(snr_db(&a, &a).is_infinite());
        // 误差为信号的一半: 10 * log10(4) dB
        let b: Vec<f32> = a.iter().map(|v| v * 0.5).collect();
        assert!((snr_db(&a, &b) - 6.0206).abs() < 1e-3);
        let c: Vec<f32> = a.iter().map(|v| v * 0.9).collect();
        assert!((snr_db(&a, &c) - 20.0).abs() < 1e-3);
    }
}
