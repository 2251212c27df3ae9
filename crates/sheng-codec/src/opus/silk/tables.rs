//! 语音路径的概率表与量化常量.

/// 帧类型分布: 静默, 清音, 浊音
pub const FRAME_TYPE_ICDF: [u8; 3] = [230, 128, 0];

/// 量化步长的级数, 第 i 级步长为 `2^(i/4 - 16)`
pub const GAIN_LEVELS: u32 = 80;
/// 子帧间步长索引的最大差值
pub const GAIN_DELTA_MAX: i32 = 20;
/// 步长索引差值的拉普拉斯参数
pub const GAIN_DELTA_LAPLACE: (u32, u32) = (12000, 12000);

/// LSF 残差的量化步长 (Q15)
pub const LSF_STEP: i32 = 96;
/// LSF 最小间隔 (Q15)
pub const LSF_MIN_GAP: i32 = 100;
/// 上一帧间隔的预测权重为 `2^-LSF_PRED_SHIFT`
pub const LSF_PRED_SHIFT: i32 = 1;
/// LSF 残差的最大幅度
pub const LSF_RESIDUAL_MAX: i32 = 60;
/// LSF 残差的拉普拉斯参数
pub const LSF_LAPLACE: (u32, u32) = (10000, 13000);

/// 子帧基音延迟相对帧延迟的最大偏移 (整数样本)
pub const PITCH_DELTA_MAX: i32 = 6;
/// 子帧基音偏移的拉普拉斯参数
pub const PITCH_DELTA_LAPLACE: (u32, u32) = (20000, 8000);

/// 长时预测增益的量化级
pub const LTP_GAINS: [f32; 8] = [0.0, 0.2, 0.35, 0.5, 0.62, 0.74, 0.86, 0.97];
/// 长时预测增益索引的分布
pub const LTP_GAIN_ICDF: [u8; 8] = [236, 212, 184, 150, 112, 70, 30, 0];

/// 脉冲的拉普拉斯参数, 每帧选一组 (越往后越适合大幅度)
pub const PULSE_LEVELS: [(u32, u32); 5] = [
    (30000, 6000),
    (24000, 9000),
    (16000, 11000),
    (12000, 13000),
    (8000, 15000),
];
/// 脉冲参数组的分布
pub const PULSE_LEVEL_ICDF: [u8; 5] = [200, 150, 100, 50, 0];
/// 脉冲幅度上限, 不超过最后一组参数可表示的范围
pub const PULSE_LIMIT: i32 = 400;

/// 步长索引对应的量化步长
pub fn gain_step(index: u32) -> f32 {
    (index.min(GAIN_LEVELS - 1) as f32 * 0.25 - 16.0).exp2()
}

/// 最接近给定步长的索引
pub fn step_index(step: f32) -> i32 {
    if step <= 0.0 {
        return 0;
    }
    ((step.log2() + 16.0) * 4.0)
        .round()
        .clamp(0.0, (GAIN_LEVELS - 1) as f32) as i32
}

/// 最接近给定增益的长时预测级
pub fn ltp_gain_index(gain: f32) -> usize {
    let mut best = 0;
    for (i, g) in LTP_GAINS.iter().enumerate() {
        if (g - gain).abs() < (LTP_GAINS[best] - gain).abs() {
            best = i;
        }
    }
    best
}
