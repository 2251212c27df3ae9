//! 模式与带宽控制器.
//!
//! 每帧由信号统计、码率与应用类型给三种模式打分. 语音与混合共用一个"语音类"分数,
//! 两者之间只由带宽决定 (语音模式最高宽带, 混合模式至少超宽带).
//! 切换由 [`Hysteresis`] 状态机把关: 候选模式的分数须比当前模式高出 `margin`,
//! 并连续保持 `min_dwell` 帧才切换; 带宽同样按阈值加迟滞选择.

use super::allocation::{BitAllocation, split_budget};
use super::analysis::SignalStats;
use super::{Application, Bandwidth, FrameDuration, Mode, Signal};

/// 默认切换裕量
pub const DEFAULT_MARGIN: f32 = 0.1;

/// 默认最短持续帧数
pub const DEFAULT_MIN_DWELL: u32 = 2;

/// 语音通话应用给语音类模式的加分
const VOIP_BIAS: f32 = 0.2;

/// 通用音频应用给音乐模式的加分
const AUDIO_BIAS: f32 = 0.1;

/// 码率 (每声道) 对打分的影响中心与范围
const RATE_PIVOT: f32 = 24000.0;
const RATE_WEIGHT: f32 = 0.3;

/// 升到某一带宽所需的每声道码率与迟滞, 依次为 MB, WB, SWB, FB
const BANDWIDTH_THRESHOLDS: [(u32, u32); 4] =
    [(9000, 700), (11000, 1000), (14000, 1000), (20000, 2000)];

/// 模式打分
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeScores {
    pub voice: f32,
    pub hybrid: f32,
    pub music: f32,
}

impl ModeScores {
    pub fn get(&self, mode: Mode) -> f32 {
        match mode {
            Mode::Voice => self.voice,
            Mode::Hybrid => self.hybrid,
            Mode::Music => self.music,
        }
    }
}

/// 带裕量与最短持续时间的模式状态机
#[derive(Debug, Clone, PartialEq)]
pub struct Hysteresis {
    margin: f32,
    min_dwell: u32,
    current: Mode,
    pending: Option<Mode>,
    streak: u32,
}

impl Hysteresis {
    /// `min_dwell` 至少为 1
    pub fn new(initial: Mode, margin: f32, min_dwell: u32) -> Self {
        Self {
            margin: margin.max(0.0),
            min_dwell: min_dwell.max(1),
            current: initial,
            pending: None,
            streak: 0,
        }
    }

    pub fn current(&self) -> Mode {
        self.current
    }

    /// 候选模式已连续领先的帧数
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// 直接切换, 清空计数
    pub fn force(&mut self, mode: Mode) {
        self.current = mode;
        self.pending = None;
        self.streak = 0;
    }

    /// 送入一帧的分数, 返回本帧使用的模式
    pub fn update(&mut self, scores: &ModeScores) -> Mode {
        let current_score = scores.get(self.current);
        let candidate = [Mode::Voice, Mode::Hybrid, Mode::Music]
            .into_iter()
            .filter(|&m| m != self.current)
            .max_by(|a, b| scores.get(*a).total_cmp(&scores.get(*b)));
        match candidate {
            Some(c) if scores.get(c) > current_score + self.margin => {
                if self.pending == Some(c) {
                    self.streak += 1;
                } else {
                    self.pending = Some(c);
                    self.streak = 1;
                }
                if self.streak >= self.min_dwell {
                    log::debug!(
                        "模式切换 {} -> {} (分数 {:.2} > {:.2}, 持续 {} 帧)",
                        self.current,
                        c,
                        scores.get(c),
                        current_score,
                        self.streak
                    );
                    self.force(c);
                }
            }
            _ => {
                self.pending = None;
                self.streak = 0;
            }
        }
        self.current
    }
}

/// 控制器的每帧输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeInputs {
    /// 目标码率 (bits/s, 全部声道)
    pub bitrate: u32,
    pub channels: usize,
    pub sample_rate: u32,
    pub application: Application,
    pub signal: Signal,
    pub frame_duration: FrameDuration,
    pub max_bandwidth: Bandwidth,
    pub force_mode: Option<Mode>,
    /// 本帧的字节预算 (可变码率调整之后)
    pub frame_bytes: usize,
}

/// 控制器的每帧输出
#[derive(Debug, Clone, PartialEq)]
pub struct ModeDecision {
    pub mode: Mode,
    pub bandwidth: Bandwidth,
    pub frame_duration: FrameDuration,
    pub allocation: BitAllocation,
}

/// 模式与带宽控制器
#[derive(Debug, Clone)]
pub struct ModeController {
    hysteresis: Hysteresis,
    bandwidth: Bandwidth,
}

impl ModeController {
    pub fn new(application: Application) -> Self {
        let initial = match application {
            Application::Voip => Mode::Voice,
            _ => Mode::Music,
        };
        Self::with_hysteresis(initial, DEFAULT_MARGIN, DEFAULT_MIN_DWELL)
    }

    pub fn with_hysteresis(initial: Mode, margin: f32, min_dwell: u32) -> Self {
        Self {
            hysteresis: Hysteresis::new(initial, margin, min_dwell),
            bandwidth: Bandwidth::Wide,
        }
    }

    pub fn mode(&self) -> Mode {
        self.hysteresis.current()
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    pub fn reset(&mut self, application: Application) {
        *self = Self::new(application);
    }

    /// 决定本帧的模式、带宽与比特分配
    pub fn decide(&mut self, inputs: &ModeInputs, stats: &SignalStats) -> ModeDecision {
        let per_channel = inputs.bitrate / inputs.channels.max(1) as u32;
        let bandwidth = self.select_bandwidth(per_channel, inputs);

        let music_only = inputs.application == Application::LowDelay
            || inputs.frame_duration < FrameDuration::Ms10;
        let voice_family = if bandwidth >= Bandwidth::SuperWide {
            Mode::Hybrid
        } else {
            Mode::Voice
        };

        let mode = if music_only {
            self.hysteresis.force(Mode::Music);
            Mode::Music
        } else if let Some(forced) = inputs.force_mode {
            self.hysteresis.force(forced);
            forced
        } else if inputs.signal != Signal::Auto {
            let mode = if inputs.signal == Signal::Voice {
                voice_family
            } else {
                Mode::Music
            };
            self.hysteresis.force(mode);
            mode
        } else {
            let current = self.hysteresis.current();
            if current.has_voice() && current != voice_family {
                // 语音与混合之间由带宽决定, 不经过迟滞
                self.hysteresis.force(voice_family);
            }
            let scores = score(stats, per_channel, inputs.application, voice_family);
            self.hysteresis.update(&scores)
        };

        let cap = Bandwidth::max_for_rate(inputs.sample_rate).min(inputs.max_bandwidth);
        let bandwidth = consistent_bandwidth(mode, bandwidth, cap);
        let allocation = split_budget(
            mode,
            bandwidth,
            inputs.frame_bytes,
            inputs.frame_duration,
            inputs.channels,
        );
        log::trace!(
            "模式决策: {} {} {} 每声道 {} bits/s, 预算 {} 字节",
            mode,
            bandwidth,
            inputs.frame_duration,
            per_channel,
            inputs.frame_bytes
        );
        ModeDecision {
            mode,
            bandwidth,
            frame_duration: inputs.frame_duration,
            allocation,
        }
    }

    /// 按每声道码率选择带宽, 升档与降档阈值之间留有迟滞
    fn select_bandwidth(&mut self, per_channel: u32, inputs: &ModeInputs) -> Bandwidth {
        let mut chosen = Bandwidth::Narrow;
        for (i, &(threshold, hysteresis)) in BANDWIDTH_THRESHOLDS.iter().enumerate() {
            let level = Bandwidth::ALL[i + 1];
            let needed = if self.bandwidth >= level {
                threshold.saturating_sub(hysteresis)
            } else {
                threshold + hysteresis
            };
            if per_channel >= needed {
                chosen = level;
            }
        }
        let cap = Bandwidth::max_for_rate(inputs.sample_rate).min(inputs.max_bandwidth);
        let chosen = chosen.min(cap);
        if chosen != self.bandwidth {
            log::debug!("带宽 {} -> {}", self.bandwidth, chosen);
            self.bandwidth = chosen;
        }
        chosen
    }
}

/// 三种模式的分数
pub fn score(
    stats: &SignalStats,
    per_channel: u32,
    application: Application,
    voice_family: Mode,
) -> ModeScores {
    // 高码率偏向音乐模式
    let rate_bias = ((per_channel as f32 - RATE_PIVOT) / RATE_PIVOT).clamp(-1.0, 1.0) * RATE_WEIGHT;
    // 音节式能量起伏与中等过零率是语音的特征, 稳定的调性信号与瞬态偏向音乐
    let voiced_zcr = if (0.02..0.3).contains(&stats.zcr) {
        0.2
    } else {
        0.0
    };
    let speech = (stats.modulation / 3.0).clamp(0.0, 1.0) * 0.6 + voiced_zcr;
    let music = stats.tonality() * (1.0 - (stats.modulation / 3.0).clamp(0.0, 1.0)) * 0.6
        + if stats.transient { 0.2 } else { 0.0 };

    let mut voice = 0.5 + speech - rate_bias;
    let mut music = 0.5 + music + rate_bias;
    match application {
        Application::Voip => voice += VOIP_BIAS,
        Application::Audio => music += AUDIO_BIAS,
        Application::LowDelay => {}
    }
    let (v, h) = if voice_family == Mode::Hybrid {
        (f32::NEG_INFINITY, voice)
    } else {
        (voice, f32::NEG_INFINITY)
    };
    ModeScores {
        voice: v,
        hybrid: h,
        music,
    }
}

/// 让带宽与模式相容: 语音最高宽带, 混合至少超宽带, 音乐没有中带
///
/// 音乐模式的中带在上限允许时升为宽带, 否则降为窄带, 不越过 `cap`.
fn consistent_bandwidth(mode: Mode, bandwidth: Bandwidth, cap: Bandwidth) -> Bandwidth {
    match mode {
        Mode::Voice => bandwidth.min(Bandwidth::Wide),
        Mode::Hybrid => bandwidth
            .max(Bandwidth::SuperWide)
            .min(cap.max(Bandwidth::SuperWide)),
        Mode::Music if bandwidth == Bandwidth::Medium && cap >= Bandwidth::Wide => {
            Bandwidth::Wide
        }
        Mode::Music if bandwidth == Bandwidth::Medium => {
            log::debug!("音乐模式没有中带, 上限 {cap} 低于宽带, 改用窄带");
            Bandwidth::Narrow
        }
        Mode::Music => bandwidth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(voice: f32, music: f32) -> ModeScores {
        ModeScores {
            voice,
            hybrid: f32::NEG_INFINITY,
            music,
        }
    }

    fn stats(flatness: f32, zcr: f32, modulation: f32) -> SignalStats {
        SignalStats {
            energy: 0.01,
            zcr,
            flatness,
            transient: false,
            modulation,
        }
    }

    fn inputs(bitrate: u32) -> ModeInputs {
        ModeInputs {
            bitrate,
            channels: 1,
            sample_rate: 48000,
            application: Application::Audio,
            signal: Signal::Auto,
            frame_duration: FrameDuration::Ms20,
            max_bandwidth: Bandwidth::Full,
            force_mode: None,
            frame_bytes: (bitrate / 400) as usize,
        }
    }

    #[test]
    fn test_迟滞需要持续领先() {
        let mut h = Hysteresis::new(Mode::Voice, 0.1, 2);
        let music = scores(0.5, 0.9);
        let voice = scores(0.9, 0.5);
        assert_eq!(h.update(&music), Mode::Voice);
        assert_eq!(h.streak(), 1);
        assert_eq!(h.update(&voice), Mode::Voice);
        assert_eq!(h.streak(), 0);
        assert_eq!(h.update(&music), Mode::Voice);
        assert_eq!(h.update(&music), Mode::Music);
    }

    #[test]
    fn test_领先不足裕量不切换() {
        let mut h = Hysteresis::new(Mode::Music, 0.1, 2);
        let close = scores(0.65, 0.6);
        for _ in 0..10 {
            assert_eq!(h.update(&close), Mode::Music);
        }
    }

    #[test]
    fn test_纯音噪声交替不会逐帧切换() {
        let mut c = ModeController::new(Application::Audio);
        let tone = stats(0.01, 0.02, 0.0);
        let noise = stats(0.56, 0.5, 4.0);
        let mut switches = 0;
        let mut last = c.mode();
        for k in 0..40 {
            let s = if k % 2 == 0 { tone } else { noise };
            let d = c.decide(&inputs(16000), &s);
            if d.mode != last {
                switches += 1;
                last = d.mode;
            }
        }
        assert!(switches <= 1, "切换 {switches} 次");
    }

    #[test]
    fn test_持续语音特征切到语音类模式() {
        let mut c = ModeController::new(Application::Audio);
        let speech = stats(0.3, 0.1, 4.0);
        let decisions: Vec<Mode> = (0..4)
            .map(|_| c.decide(&inputs(12000), &speech).mode)
            .collect();
        assert_eq!(decisions[0], Mode::Music);
        assert_eq!(decisions[3], Mode::Voice);
        let d = c.decide(&inputs(12000), &speech);
        assert!(d.bandwidth <= Bandwidth::Wide);
    }

    #[test]
    fn test_短帧与低延迟只用音乐模式() {
        let mut c = ModeController::new(Application::Voip);
        let speech = stats(0.3, 0.1, 4.0);
        let mut i = inputs(12000);
        i.frame_duration = FrameDuration::Ms5;
        assert_eq!(c.decide(&i, &speech).mode, Mode::Music);
        let mut i = inputs(12000);
        i.application = Application::LowDelay;
        i.force_mode = Some(Mode::Voice);
        assert_eq!(c.decide(&i, &speech).mode, Mode::Music);
    }

    #[test]
    fn test_信号提示与强制模式() {
        let mut c = ModeController::new(Application::Audio);
        let tone = stats(0.01, 0.02, 0.0);
        let mut i = inputs(32000);
        i.signal = Signal::Voice;
        let d = c.decide(&i, &tone);
        assert_eq!(d.mode, Mode::Hybrid);
        assert!(d.bandwidth >= Bandwidth::SuperWide);
        i.signal = Signal::Auto;
        i.force_mode = Some(Mode::Voice);
        let d = c.decide(&i, &tone);
        assert_eq!(d.mode, Mode::Voice);
        assert_eq!(d.bandwidth, Bandwidth::Wide);
    }

    #[test]
    fn test_带宽阈值与迟滞() {
        let mut c = ModeController::new(Application::Audio);
        let s = stats(0.5, 0.3, 0.0);
        let mut i = inputs(8000);
        assert_eq!(c.decide(&i, &s).bandwidth, Bandwidth::Narrow);
        i.bitrate = 64000;
        assert_eq!(c.decide(&i, &s).bandwidth, Bandwidth::Full);
        // 刚低于升档阈值但高于降档阈值, 保持全带
        i.bitrate = 19000;
        assert_eq!(c.decide(&i, &s).bandwidth, Bandwidth::Full);
        i.bitrate = 17000;
        assert_eq!(c.decide(&i, &s).bandwidth, Bandwidth::SuperWide);
        // 采样率与用户上限
        i.sample_rate = 16000;
        i.bitrate = 64000;
        assert_eq!(c.decide(&i, &s).bandwidth, Bandwidth::Wide);
        i.sample_rate = 48000;
        i.max_bandwidth = Bandwidth::Medium;
        let d = c.decide(&i, &s);
        assert_eq!(c.bandwidth(), Bandwidth::Medium);
        if d.mode == Mode::Music {
            assert_eq!(d.bandwidth, Bandwidth::Narrow);
        }
    }

    #[test]
    fn test_音乐模式不越过带宽上限() {
        let s = stats(0.5, 0.3, 0.0);
        // 用户上限为中带
        let mut c = ModeController::new(Application::Audio);
        let mut i = inputs(64000);
        i.force_mode = Some(Mode::Music);
        i.max_bandwidth = Bandwidth::Medium;
        let d = c.decide(&i, &s);
        assert_eq!(d.mode, Mode::Music);
        assert_eq!(d.bandwidth, Bandwidth::Narrow);
        // 12 kHz 输入的奈奎斯特上限
        let mut c = ModeController::new(Application::Audio);
        let mut i = inputs(64000);
        i.force_mode = Some(Mode::Music);
        i.sample_rate = 12000;
        let d = c.decide(&i, &s);
        assert_eq!(d.bandwidth, Bandwidth::Narrow);
        // 上限允许时中带仍升为宽带
        let mut c = ModeController::new(Application::Audio);
        let mut i = inputs(9500);
        i.force_mode = Some(Mode::Music);
        assert_eq!(c.decide(&i, &s).bandwidth, Bandwidth::Wide);
        assert_eq!(c.bandwidth(), Bandwidth::Medium);
    }
}
