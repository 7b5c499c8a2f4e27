use crate::core::{AudioData, MediaClock, PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 第一个音频块锚定时钟时的启动延迟
const ANCHOR_DELAY_SEC: f64 = 0.05;

/// 音频输出设备抽象
///
/// 设备时钟是自由行走的真实时间（启动后持续推进，欠载也不停），
/// 音频启用时它就是整个会话的墙钟。schedule 在设备时间轴的绝对
/// 时刻写入一段 PCM，间隙自动补静音。
pub trait AudioDevice: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// 设备当前时间（秒）
    fn current_time_sec(&self) -> f64;

    /// 在 start_sec 起播一段交织 f32 采样
    fn schedule(&mut self, start_sec: f64, samples: &[f32]);

    fn set_volume(&mut self, volume: f32);

    /// 停掉所有已排期的声音
    fn stop_all(&mut self);
}

/// 音频输出 - 使用 cpal 播放
///
/// 设备时间取流启动时刻起的单调真实时间；采样计数只用来算队列
/// 水位，排期端按时间差补静音后入队。
pub struct CpalAudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    queue: Arc<SegQueue<f32>>,
    /// 已入队未消耗的采样数（仅队列水位核算用）
    queued: Arc<AtomicU64>,
    /// 流启动时刻；设备时钟从这里自由行走
    started_at: Option<Instant>,
    volume: Arc<Mutex<f32>>,
}

// cpal::Stream 不是 Send，但设备只在创建它的编排线程上使用
unsafe impl Send for CpalAudioOutput {}

impl CpalAudioOutput {
    /// 创建音频输出（支持非标准配置自动回退）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let mut config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // 检查设备是否支持该配置，不支持则回退到标准配置
        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let compatible = |cfg: &StreamConfig| {
            supported.iter().any(|s| {
                cfg.sample_rate.0 >= s.min_sample_rate().0
                    && cfg.sample_rate.0 <= s.max_sample_rate().0
                    && cfg.channels == s.channels()
            })
        };

        if !compatible(&config) {
            warn!(
                "⚠️  音频设备不支持 {} Hz, {} 声道，回退到标准配置",
                sample_rate, channels
            );
            let fallbacks = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
            let fallback = fallbacks
                .iter()
                .map(|&(rate, ch)| StreamConfig {
                    channels: ch,
                    sample_rate: cpal::SampleRate(rate),
                    buffer_size: cpal::BufferSize::Default,
                })
                .find(|cfg| compatible(cfg));
            let Some(fallback) = fallback else {
                return Err(PlayerError::AudioError(format!(
                    "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                    sample_rate, channels
                )));
            };
            info!("✅ 使用回退配置: {} Hz, {} 声道", fallback.sample_rate.0, fallback.channels);
            config = fallback;
        }

        Ok(Self {
            device,
            config,
            stream: None,
            queue: Arc::new(SegQueue::new()),
            queued: Arc::new(AtomicU64::new(0)),
            started_at: None,
            volume: Arc::new(Mutex::new(1.0)),
        })
    }

    /// 启动输出流
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let queue = self.queue.clone();
        let queued = self.queued.clone();
        let volume = self.volume.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock();
                    let mut taken = 0u64;
                    for sample in data.iter_mut() {
                        if let Some(value) = queue.pop() {
                            *sample = value * vol;
                            taken += 1;
                        } else {
                            // 欠载补静音；设备时钟是真实时间，不受影响
                            *sample = 0.0;
                        }
                    }
                    queued.fetch_sub(taken, Ordering::Relaxed);
                },
                move |err| {
                    warn!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;
        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;
        self.stream = Some(stream);
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        info!("音频输出已启动");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }

    fn samples_per_sec(&self) -> f64 {
        self.config.sample_rate.0 as f64 * self.config.channels as f64
    }
}

impl AudioDevice for CpalAudioOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn current_time_sec(&self) -> f64 {
        self.started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn schedule(&mut self, start_sec: f64, samples: &[f32]) {
        // 队列尾在时间轴上的位置 = 现在 + 排队未播时长
        let rate = self.sample_rate() as f64;
        let channels = self.channels() as u64;
        let queued = self.queued.load(Ordering::Relaxed);
        let queue_end_sec = self.current_time_sec() + queued as f64 / self.samples_per_sec();
        let gap_sec = start_sec - queue_end_sec;
        if gap_sec > 0.0 {
            let gap = (gap_sec * rate).round() as u64 * channels;
            for _ in 0..gap {
                self.queue.push(0.0);
            }
            self.queued.fetch_add(gap, Ordering::Relaxed);
        }
        for &s in samples {
            self.queue.push(s);
        }
        self.queued.fetch_add(samples.len() as u64, Ordering::Relaxed);
    }

    fn set_volume(&mut self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    fn stop_all(&mut self) {
        while self.queue.pop().is_some() {}
        self.queued.store(0, Ordering::Relaxed);
    }
}

impl Drop for CpalAudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 离线音频设备：无声卡环境与测试用
///
/// 时间由外部推进，排期调用全部记录下来。
pub struct OfflineAudioDevice {
    sample_rate: u32,
    channels: u16,
    now_sec: f64,
    pub scheduled: Vec<(f64, usize)>,
    pub volume: f32,
}

impl OfflineAudioDevice {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            now_sec: 0.0,
            scheduled: Vec::new(),
            volume: 1.0,
        }
    }

    /// 手动推进设备时钟
    pub fn set_time(&mut self, now_sec: f64) {
        self.now_sec = now_sec;
    }
}

impl AudioDevice for OfflineAudioDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn current_time_sec(&self) -> f64 {
        self.now_sec
    }

    fn schedule(&mut self, start_sec: f64, samples: &[f32]) {
        self.scheduled.push((start_sec, samples.len()));
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn stop_all(&mut self) {
        self.scheduled.clear();
    }
}

/// 排期结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// 第一个块：时钟以它为锚点启动
    Anchored,
    Scheduled,
    /// 整块迟到，被丢弃
    DroppedLate,
}

/// 音频排期器
///
/// 把解码出的 PCM 块放到设备时间轴上：理想时刻由时钟锚点推出，
/// 迟到的块整体丢弃或剪掉开头，绝不推迟播放。
pub struct AudioScheduler {
    device: Box<dyn AudioDevice>,
    last_scheduled_end_sec: f64,
    prev_device_time: f64,
}

impl AudioScheduler {
    pub fn new(device: Box<dyn AudioDevice>) -> Self {
        Self {
            device,
            last_scheduled_end_sec: 0.0,
            prev_device_time: 0.0,
        }
    }

    pub fn device(&self) -> &dyn AudioDevice {
        self.device.as_ref()
    }

    /// 设备墙钟（毫秒），音频启用时的会话时钟源
    pub fn wall_ms(&self) -> f64 {
        self.device.current_time_sec() * 1000.0
    }

    /// 已排期未播放的时长（秒），供 2 秒前瞻上限用
    pub fn lookahead_sec(&self) -> f64 {
        (self.last_scheduled_end_sec - self.device.current_time_sec()).max(0.0)
    }

    /// 排一个解码块；时钟未启动时以它为锚点启动（带 50 ms 起播延迟）
    pub fn schedule(&mut self, data: &AudioData, clock: &MediaClock) -> ScheduleOutcome {
        let device_now = self.device.current_time_sec();

        // 设备时钟被重置（suspend/resume 等）时重新锚定：
        // 旧时间轴作废，时钟锚点落到当前块上
        if device_now < self.prev_device_time {
            warn!(
                "音频设备时钟回退: {:.3} → {:.3}，重新锚定",
                self.prev_device_time, device_now
            );
            self.last_scheduled_end_sec = device_now;
            clock.seek(
                data.timestamp_us,
                (device_now + ANCHOR_DELAY_SEC) * 1000.0,
            );
        }
        self.prev_device_time = device_now;

        let mut anchored = false;
        if !clock.is_started() {
            clock.start(
                data.timestamp_us,
                (device_now + ANCHOR_DELAY_SEC) * 1000.0,
            );
            anchored = true;
            debug!(
                "🎯 音频锚定时钟: ts={} µs @ {:.3} s",
                data.timestamp_us,
                device_now + ANCHOR_DELAY_SEC
            );
        }

        let Some((base_ts_us, base_wall_ms)) = clock.anchor() else {
            return ScheduleOutcome::DroppedLate;
        };
        let base_time_sec = base_wall_ms / 1000.0;
        let ideal_start_sec = base_time_sec + (data.timestamp_us - base_ts_us) as f64 / 1_000_000.0;
        let duration_sec = data.duration_sec();

        let min_start_sec = device_now.max(self.last_scheduled_end_sec);
        let offset_sec = (min_start_sec - ideal_start_sec).max(0.0);
        if duration_sec > 0.0 && offset_sec >= duration_sec {
            debug!(
                "🗑️  丢弃迟到音频块: ts={} µs (迟 {:.0} ms)",
                data.timestamp_us,
                offset_sec * 1000.0
            );
            return ScheduleOutcome::DroppedLate;
        }

        // 迟到部分剪掉块开头
        let skip_frames = (offset_sec * data.sample_rate as f64).round() as usize;
        let skip = (skip_frames * data.channels as usize).min(data.data.len());
        self.device
            .schedule(ideal_start_sec + offset_sec, &data.data[skip..]);
        self.last_scheduled_end_sec = self
            .last_scheduled_end_sec
            .max(ideal_start_sec + duration_sec);

        if anchored {
            ScheduleOutcome::Anchored
        } else {
            ScheduleOutcome::Scheduled
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.device.set_volume(volume);
    }

    /// 停掉所有排期并复位
    pub fn stop(&mut self) {
        self.device.stop_all();
        self.last_scheduled_end_sec = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// 测试里把离线设备共享出来，便于推进时间和检查排期
    #[derive(Clone)]
    struct SharedDevice(Arc<StdMutex<OfflineAudioDevice>>);

    impl SharedDevice {
        fn new(now_sec: f64) -> Self {
            let mut device = OfflineAudioDevice::new(48_000, 2);
            device.set_time(now_sec);
            Self(Arc::new(StdMutex::new(device)))
        }

        fn set_time(&self, now_sec: f64) {
            self.0.lock().unwrap().set_time(now_sec);
        }

        fn scheduled(&self) -> Vec<(f64, usize)> {
            self.0.lock().unwrap().scheduled.clone()
        }
    }

    impl AudioDevice for SharedDevice {
        fn sample_rate(&self) -> u32 {
            self.0.lock().unwrap().sample_rate()
        }
        fn channels(&self) -> u16 {
            self.0.lock().unwrap().channels()
        }
        fn current_time_sec(&self) -> f64 {
            self.0.lock().unwrap().current_time_sec()
        }
        fn schedule(&mut self, start_sec: f64, samples: &[f32]) {
            self.0.lock().unwrap().schedule(start_sec, samples);
        }
        fn set_volume(&mut self, volume: f32) {
            self.0.lock().unwrap().set_volume(volume);
        }
        fn stop_all(&mut self) {
            self.0.lock().unwrap().stop_all();
        }
    }

    fn block(timestamp_us: i64, frames: usize) -> AudioData {
        AudioData {
            timestamp_us,
            sample_rate: 48_000,
            channels: 2,
            data: vec![0.1; frames * 2],
        }
    }

    #[test]
    fn test_first_block_anchors_with_delay() {
        // 设备时间 1.0 s，第一个块 ts=0，时长 0.02 s
        let device = SharedDevice::new(1.0);
        let mut scheduler = AudioScheduler::new(Box::new(device.clone()));
        let clock = MediaClock::new();

        let outcome = scheduler.schedule(&block(0, 960), &clock);
        assert_eq!(outcome, ScheduleOutcome::Anchored);
        // 排在 1.05 s 起播
        let scheduled = device.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert!((scheduled[0].0 - 1.05).abs() < 1e-9);
        assert_eq!(scheduled[0].1, 960 * 2);
        // last_scheduled_end = 1.07
        assert!((scheduler.last_scheduled_end_sec - 1.07).abs() < 1e-9);
        // 锚点：now_us(1050 ms) == 0
        assert_eq!(clock.now_us(1050.0), 0);
    }

    #[test]
    fn test_subsequent_blocks_land_on_timeline() {
        let device = SharedDevice::new(1.0);
        let mut scheduler = AudioScheduler::new(Box::new(device.clone()));
        let clock = MediaClock::new();
        scheduler.schedule(&block(0, 960), &clock);

        let outcome = scheduler.schedule(&block(20_000, 960), &clock);
        assert_eq!(outcome, ScheduleOutcome::Scheduled);
        let scheduled = device.scheduled();
        assert!((scheduled[1].0 - 1.07).abs() < 1e-9);
        assert!((scheduler.last_scheduled_end_sec - 1.09).abs() < 1e-9);
    }

    #[test]
    fn test_wholly_late_block_dropped() {
        let device = SharedDevice::new(1.0);
        let mut scheduler = AudioScheduler::new(Box::new(device.clone()));
        let clock = MediaClock::new();
        scheduler.schedule(&block(0, 960), &clock);

        // 设备时间跳到 5 s，ts=20ms 的块整体迟到
        device.set_time(5.0);
        let outcome = scheduler.schedule(&block(20_000, 960), &clock);
        assert_eq!(outcome, ScheduleOutcome::DroppedLate);
        assert_eq!(device.scheduled().len(), 1);
    }

    #[test]
    fn test_partially_late_block_trimmed() {
        let device = SharedDevice::new(1.0);
        let mut scheduler = AudioScheduler::new(Box::new(device.clone()));
        let clock = MediaClock::new();
        scheduler.schedule(&block(0, 960), &clock);

        // 设备时间 1.08：ts=20ms 的块理想起点 1.07，迟 0.01 s
        device.set_time(1.08);
        let outcome = scheduler.schedule(&block(20_000, 960), &clock);
        assert_eq!(outcome, ScheduleOutcome::Scheduled);
        let scheduled = device.scheduled();
        // 起播点推到 1.08，开头 0.01 s（480 帧 × 2 声道）被剪掉
        assert!((scheduled[1].0 - 1.08).abs() < 1e-9);
        assert_eq!(scheduled[1].1, 960 * 2 - 480 * 2);
    }

    #[test]
    fn test_device_clock_reset_reanchors() {
        let device = SharedDevice::new(2.0);
        let mut scheduler = AudioScheduler::new(Box::new(device.clone()));
        let clock = MediaClock::new();
        scheduler.schedule(&block(0, 960), &clock);
        assert!(scheduler.last_scheduled_end_sec > 2.0);

        // 设备时钟被重置回接近零
        device.set_time(0.1);
        scheduler.schedule(&block(20_000, 960), &clock);
        // last_scheduled_end 被钳回设备时间附近而不是停在旧时间轴上
        assert!(scheduler.last_scheduled_end_sec < 1.0);
    }

    #[test]
    fn test_lookahead() {
        let device = SharedDevice::new(1.0);
        let mut scheduler = AudioScheduler::new(Box::new(device.clone()));
        let clock = MediaClock::new();
        scheduler.schedule(&block(0, 960), &clock);
        // 1.07 - 1.0
        assert!((scheduler.lookahead_sec() - 0.07).abs() < 1e-9);
    }
}
