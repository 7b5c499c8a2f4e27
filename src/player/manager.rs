use crate::core::{
    BufferStatus, ContainerKind, EncodedAudioChunk, EncodedVideoChunk, FrameRing, MediaClock,
    MediaInfo, MediaSource, PipelineKind, PlaybackState, PlayerError, PlayerState, Result,
    SubtitleCue, VideoFrame,
};
use crate::demux::{open_demuxer, subtitle, Demuxer, MediaChunk};
use crate::player::audio_output::{AudioDevice, AudioScheduler, ScheduleOutcome};
use crate::player::decoder::{
    AudioDecoder, AudioDecoderConfig, VideoDecoder, VideoDecoderConfig,
};
use crate::source::{ByteSource, FileSource, HttpSource, HttpSourceConfig};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// 编码块队列背压水位
const QUEUE_HIGH_WATER: usize = 120;
const QUEUE_LOW_WATER: usize = 40;
/// 视频帧环容量
const FRAME_RING_CAPACITY: usize = 8;
/// 视频解码在途上限
const VIDEO_PENDING_LIMIT: usize = 4;
/// 音频解码在途上限
const AUDIO_PENDING_LIMIT: usize = 8;
/// 音频排期前瞻上限（秒）
const AUDIO_LOOKAHEAD_SEC: f64 = 2.0;
/// 等待音频锚定的超时（毫秒），超时后用最早缓冲帧强启时钟
const AUDIO_ANCHOR_TIMEOUT_MS: f64 = 1000.0;
/// 每个 tick 最多拉取的块数
const MAX_PULL_PER_TICK: usize = 512;

/// 播放管理器 - 整体控制播放流程
///
/// 单线程协作式编排：宿主每个显示刷新调用一次 tick()，拿到到期的
/// 视频帧去渲染；所有队列、帧环与标志只在 tick 内变更。
/// 音频启用时墙钟取音频设备时间，否则取单调系统时钟。
pub struct PlaybackManager {
    state: PlaybackState,
    pipeline: PipelineKind,
    clock: MediaClock,
    epoch: Instant,

    demuxer: Option<Box<dyn Demuxer>>,
    video_decoder: Option<Box<dyn VideoDecoder>>,
    audio_decoder: Option<Box<dyn AudioDecoder>>,
    scheduler: Option<AudioScheduler>,

    video_queue: VecDeque<EncodedVideoChunk>,
    audio_queue: VecDeque<EncodedAudioChunk>,
    frame_ring: FrameRing<VideoFrame>,

    subtitle_tx: Sender<SubtitleCue>,
    subtitle_rx: Receiver<SubtitleCue>,

    demux_eos: bool,
    video_flushed: bool,
    audio_flushed: bool,
    waiting_for_audio: bool,
    /// 会话装配时刻（单调时钟毫秒），音频锚定超时以它起算
    session_start_monotonic: f64,
    duration_ms: i64,
    volume: f32,
}

impl PlaybackManager {
    pub fn new() -> Self {
        info!("🎮 创建播放管理器");
        let (subtitle_tx, subtitle_rx) = unbounded();
        Self {
            state: PlaybackState::Idle,
            pipeline: PipelineKind::None,
            clock: MediaClock::new(),
            epoch: Instant::now(),
            demuxer: None,
            video_decoder: None,
            audio_decoder: None,
            scheduler: None,
            video_queue: VecDeque::new(),
            audio_queue: VecDeque::new(),
            frame_ring: FrameRing::new(FRAME_RING_CAPACITY),
            subtitle_tx,
            subtitle_rx,
            demux_eos: false,
            video_flushed: false,
            audio_flushed: false,
            waiting_for_audio: false,
            session_start_monotonic: 0.0,
            duration_ms: 0,
            volume: 1.0,
        }
    }

    /// 打开媒体源并装配管线
    ///
    /// 解码器与音频设备由宿主注入（黑盒）。MP4 解封装失败时回退到
    /// 宿主的原生 <video> 管线；MKV/TS 无法原生播放，直接报错。
    pub fn load(
        &mut self,
        source: MediaSource,
        video_decoder: Option<Box<dyn VideoDecoder>>,
        audio_decoder: Option<Box<dyn AudioDecoder>>,
        audio_device: Option<Box<dyn AudioDevice>>,
    ) -> Result<MediaInfo> {
        self.stop();

        let Some(container) = source.detect_container() else {
            return Err(PlayerError::OpenError("无法识别容器格式".to_string()));
        };
        info!("🎬 加载媒体源，容器: {}", container.as_str());

        let byte_source: Arc<dyn ByteSource> = match &source {
            MediaSource::LocalFile(path) => Arc::new(FileSource::open(path)?),
            MediaSource::Url { url, .. } => {
                Arc::new(HttpSource::open(url, HttpSourceConfig::default())?)
            }
        };

        let demuxer = match open_demuxer(container, byte_source) {
            Ok(demuxer) => demuxer,
            Err(e) => {
                if container.natively_playable() {
                    warn!("解封装失败，回退到原生 <video> 管线: {}", e);
                    self.pipeline = PipelineKind::VideoElement;
                    self.state = PlaybackState::Idle;
                    return Ok(MediaInfo {
                        container: container.as_str().to_string(),
                        ..Default::default()
                    });
                }
                return Err(PlayerError::FormatError(format!(
                    "{} 解封装失败且无法原生回退: {}",
                    container.as_str(),
                    e
                )));
            }
        };

        let pipeline = match container {
            ContainerKind::Mp4 => PipelineKind::WebcodecsMp4,
            ContainerKind::Mkv => PipelineKind::WebcodecsMkv,
            ContainerKind::Ts => PipelineKind::WebcodecsTs,
        };
        let info = self.attach_demuxer(demuxer, pipeline, video_decoder, audio_decoder, audio_device)?;

        // 本地文件：旁挂字幕文件并入同一条提示流
        if let MediaSource::LocalFile(path) = &source {
            for file in subtitle::find_subtitle_files(path) {
                match subtitle::parse_subtitle_file(&file) {
                    Ok(cues) => {
                        info!("📄 外部字幕 {}: {} 条", file.display(), cues.len());
                        for cue in cues {
                            let _ = self.subtitle_tx.send(cue);
                        }
                    }
                    Err(e) => warn!("外部字幕解析失败 {}: {}", file.display(), e),
                }
            }
        }
        Ok(info)
    }

    /// 装配一个已打开的解封装器（load 的内核，测试也从这里进）
    pub fn attach_demuxer(
        &mut self,
        mut demuxer: Box<dyn Demuxer>,
        pipeline: PipelineKind,
        video_decoder: Option<Box<dyn VideoDecoder>>,
        audio_decoder: Option<Box<dyn AudioDecoder>>,
        audio_device: Option<Box<dyn AudioDevice>>,
    ) -> Result<MediaInfo> {
        info!("📎 附加解封装器: {}", demuxer.description());

        // 视频：能力不支持即会话失败
        let mut video = None;
        if let Some(track) = demuxer.video_track() {
            let Some(mut dec) = video_decoder else {
                return Err(PlayerError::DecodeError("缺少视频解码器".to_string()));
            };
            let config = VideoDecoderConfig::from_track(track);
            let support = dec.is_config_supported(&config);
            if !support.supported {
                return Err(PlayerError::DecodeError(format!(
                    "视频解码器不支持 {}",
                    config.codec
                )));
            }
            dec.configure(&support.config)?;
            video = Some(dec);
        }

        // 音频：失败只禁用音频，会话继续
        let mut audio = None;
        let mut scheduler = None;
        if let Some(track) = demuxer.audio_track() {
            match (audio_decoder, audio_device) {
                (Some(mut dec), Some(device)) => {
                    let config = AudioDecoderConfig::from_track(track);
                    let support = dec.is_config_supported(&config);
                    if !support.supported {
                        warn!("🔇 音频解码器不支持 {}，禁用音频", config.codec);
                    } else {
                        match dec.configure(&support.config) {
                            Ok(()) => {
                                audio = Some(dec);
                                scheduler = Some(AudioScheduler::new(device));
                            }
                            Err(e) => warn!("🔇 音频解码器配置失败，禁用音频: {}", e),
                        }
                    }
                }
                _ => warn!("🔇 未注入音频解码器或设备，禁用音频"),
            }
        }

        // 默认选中第一条字幕轨
        if let Some(first) = demuxer.subtitle_tracks().first().map(|t| t.id) {
            let _ = demuxer.select_subtitle_track(first);
        }

        let container_name = match pipeline {
            PipelineKind::WebcodecsMp4 => "MP4",
            PipelineKind::WebcodecsMkv => "MKV",
            PipelineKind::WebcodecsTs => "MPEG-TS",
            PipelineKind::VideoElement => "native",
            PipelineKind::None => "",
        };
        let mut info = MediaInfo {
            container: container_name.to_string(),
            duration_ms: demuxer.duration_ms(),
            ..Default::default()
        };
        if let Some(track) = demuxer.video_track() {
            info.width = track.width;
            info.height = track.height;
            info.video_codec = track.codec.clone();
        }
        if let Some(track) = demuxer.audio_track() {
            info.audio_codec = track.codec.clone();
            info.sample_rate = track.sample_rate;
            info.channels = track.channels;
        }

        self.duration_ms = info.duration_ms;
        self.waiting_for_audio = audio.is_some();
        self.video_decoder = video;
        self.audio_decoder = audio;
        self.scheduler = scheduler;
        self.demuxer = Some(demuxer);
        self.pipeline = pipeline;
        self.state = PlaybackState::Paused;
        self.demux_eos = false;
        self.video_flushed = false;
        self.audio_flushed = false;
        self.session_start_monotonic = self.monotonic_wall_ms();

        info!("✅ 管线就绪: {:?}，{:?}", self.pipeline, info);
        Ok(info)
    }

    /// 渲染节拍：拉取、解码、排期，并返回到期待渲染的帧
    ///
    /// 返回的帧按时间戳有序；迟到的帧也会返回（立即呈现，不丢帧）。
    /// 调用方渲染后直接丢弃即完成关闭。
    pub fn tick(&mut self) -> Vec<VideoFrame> {
        let wall_ms = self.wall_now_ms();
        self.tick_at(wall_ms)
    }

    pub(crate) fn tick_at(&mut self, wall_ms: f64) -> Vec<VideoFrame> {
        if self.state != PlaybackState::Playing {
            return Vec::new();
        }

        self.pull_chunks();
        self.pump_video(wall_ms);
        self.pump_audio(wall_ms);

        // 等音频锚定超过 1 秒：用最早缓冲帧强启时钟。
        // 超时按单调时钟量，音频迟迟不来时设备墙钟靠不住
        if self.waiting_for_audio
            && !self.clock.is_started()
            && self.monotonic_wall_ms() - self.session_start_monotonic > AUDIO_ANCHOR_TIMEOUT_MS
        {
            if let Some(frame) = self.frame_ring.peek() {
                info!("⏱ 音频未锚定，从视频帧 {} µs 强启时钟", frame.timestamp_us);
                self.clock.start(frame.timestamp_us, wall_ms);
                self.waiting_for_audio = false;
            }
        }

        // 收集到期帧
        let mut due = Vec::new();
        if self.clock.is_started() && !self.clock.is_paused() {
            let now_us = self.clock.now_us(wall_ms);
            while self
                .frame_ring
                .peek()
                .map_or(false, |f| f.timestamp_us <= now_us)
            {
                if let Some(frame) = self.frame_ring.pop_front() {
                    due.push(frame);
                }
            }
        }
        // 渲染腾出了环位，再喂一轮解码器
        if !due.is_empty() {
            self.pump_video(wall_ms);
        }
        due
    }

    /// 按背压水位从解封装器拉块
    fn pull_chunks(&mut self) {
        if self.demux_eos {
            return;
        }
        let Some(demuxer) = self.demuxer.as_mut() else {
            return;
        };
        let mut pulled = 0usize;
        loop {
            // 任一队列越过高水位即暂停提取；两个队列都退到低水位才恢复
            let vq = self.video_queue.len();
            let aq = self.audio_queue.len();
            if vq > QUEUE_HIGH_WATER || aq > QUEUE_HIGH_WATER {
                if !demuxer.is_extraction_paused() {
                    debug!("⏸ 背压暂停提取 (video={}, audio={})", vq, aq);
                    demuxer.pause_extraction();
                }
            } else if demuxer.is_extraction_paused() && vq < QUEUE_LOW_WATER && aq < QUEUE_LOW_WATER
            {
                debug!("▶ 背压解除，恢复提取");
                demuxer.resume_extraction();
            }
            if demuxer.is_extraction_paused() || pulled >= MAX_PULL_PER_TICK {
                break;
            }

            match demuxer.next_chunk() {
                Ok(Some(MediaChunk::Video(chunk))) => self.video_queue.push_back(chunk),
                Ok(Some(MediaChunk::Audio(chunk))) => {
                    if self.audio_decoder.is_some() {
                        self.audio_queue.push_back(chunk);
                    }
                }
                Ok(Some(MediaChunk::Subtitle(cue))) => {
                    let _ = self.subtitle_tx.send(cue);
                }
                Ok(None) => {
                    info!("📄 解封装到达流尾");
                    self.demux_eos = true;
                    break;
                }
                Err(e) => {
                    error!("❌ 提取失败: {}", e);
                    self.demux_eos = true;
                    break;
                }
            }
            pulled += 1;
        }
    }

    /// 喂视频解码器并收帧
    fn pump_video(&mut self, wall_ms: f64) {
        let mut frames = Vec::new();
        {
            let Some(decoder) = self.video_decoder.as_mut() else {
                return;
            };
            while decoder.pending() <= VIDEO_PENDING_LIMIT
                && self.frame_ring.len() <= FRAME_RING_CAPACITY - 2
            {
                let Some(chunk) = self.video_queue.pop_front() else {
                    break;
                };
                if let Err(e) = decoder.decode(&chunk) {
                    // 视频解码错误不致命：记录并继续（帧可能不再到来）
                    error!("视频解码错误（跳过该块）: {}", e);
                }
            }

            // 流尾且队列排空：冲刷一次，尽力而为
            if self.demux_eos && self.video_queue.is_empty() && !self.video_flushed {
                self.video_flushed = true;
                match decoder.flush() {
                    Ok(flushed) => frames.extend(flushed),
                    Err(e) => warn!("视频冲刷失败（忽略）: {}", e),
                }
            }

            while let Some(frame) = decoder.poll_frame() {
                frames.push(frame);
            }
        }
        for frame in frames {
            self.accept_frame(frame, wall_ms);
        }
    }

    /// 收一个解码帧进帧环；满则淘汰并关闭队头
    fn accept_frame(&mut self, frame: VideoFrame, wall_ms: f64) {
        if !self.clock.is_started() && !self.waiting_for_audio {
            info!("⏱ 时钟从视频帧 {} µs 启动", frame.timestamp_us);
            self.clock.start(frame.timestamp_us, wall_ms);
        }
        match self.frame_ring.push(frame) {
            Ok(()) => {}
            Err(rejected) => {
                if let Some(evicted) = self.frame_ring.pop_front() {
                    evicted.close();
                }
                let _ = self.frame_ring.push(rejected);
            }
        }
    }

    /// 喂音频解码器并把 PCM 排到设备时间轴
    fn pump_audio(&mut self, wall_ms: f64) {
        let mut blocks = Vec::new();
        let mut failed = false;
        {
            let Some(decoder) = self.audio_decoder.as_mut() else {
                return;
            };
            loop {
                let lookahead = self
                    .scheduler
                    .as_ref()
                    .map(|s| s.lookahead_sec())
                    .unwrap_or(0.0);
                if decoder.pending() > AUDIO_PENDING_LIMIT || lookahead > AUDIO_LOOKAHEAD_SEC {
                    break;
                }
                let Some(chunk) = self.audio_queue.pop_front() else {
                    break;
                };
                if let Err(e) = decoder.decode(&chunk) {
                    // 音频运行时错误：静默终止音频管线
                    warn!("音频解码错误，终止音频管线: {}", e);
                    failed = true;
                    break;
                }
            }

            if !failed && self.demux_eos && self.audio_queue.is_empty() && !self.audio_flushed {
                self.audio_flushed = true;
                match decoder.flush() {
                    Ok(flushed) => blocks.extend(flushed),
                    Err(e) => debug!("音频冲刷失败（忽略）: {}", e),
                }
            }

            while let Some(data) = decoder.poll_data() {
                blocks.push(data);
            }
        }

        if failed {
            self.disable_audio(wall_ms);
            return;
        }

        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        for data in blocks {
            match scheduler.schedule(&data, &self.clock) {
                ScheduleOutcome::Anchored => {
                    self.waiting_for_audio = false;
                }
                ScheduleOutcome::Scheduled | ScheduleOutcome::DroppedLate => {}
            }
            // 已拷贝进设备缓冲
            data.close();
        }
    }

    /// 静默拆除音频管线，视频切换到单调时钟继续
    fn disable_audio(&mut self, device_wall_ms: f64) {
        warn!("🔇 禁用音频，视频继续播放");
        if let Some(mut decoder) = self.audio_decoder.take() {
            decoder.reset();
            decoder.close();
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        self.audio_queue.clear();
        // 墙钟源从设备切到单调时钟：保持媒体时间连续
        if self.clock.is_started() {
            let ts = self.clock.now_us(device_wall_ms);
            self.clock.seek(ts, self.monotonic_wall_ms());
        }
        self.waiting_for_audio = false;
    }

    /// 开始 / 恢复播放
    pub fn play(&mut self) {
        if self.state == PlaybackState::Playing || self.demuxer.is_none() {
            return;
        }
        info!("▶️  播放");
        let wall_ms = self.wall_now_ms();
        if self.clock.is_started() {
            self.clock.resume(wall_ms);
        }
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.resume_extraction();
        }
        self.state = PlaybackState::Playing;
    }

    /// 暂停：时钟停走，提取暂停
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        info!("⏸ 暂停");
        let wall_ms = self.wall_now_ms();
        self.clock.pause(wall_ms);
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.pause_extraction();
        }
        self.state = PlaybackState::Paused;
    }

    /// 停止并拆除整条管线
    pub fn stop(&mut self) {
        if self.pipeline == PipelineKind::None && self.demuxer.is_none() {
            self.state = PlaybackState::Idle;
            return;
        }
        info!("⏹ 停止播放");

        // 帧环逐个关闭
        for frame in self.frame_ring.drain() {
            frame.close();
        }
        self.video_queue.clear();
        self.audio_queue.clear();

        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        if let Some(mut decoder) = self.video_decoder.take() {
            decoder.close();
        }
        if let Some(mut decoder) = self.audio_decoder.take() {
            decoder.close();
        }
        // 解封装器 stop 会中止底层字节源
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.stop();
        }
        while self.subtitle_rx.try_recv().is_ok() {}

        self.clock.reset();
        self.pipeline = PipelineKind::None;
        self.state = PlaybackState::Stopped;
        self.demux_eos = false;
        self.video_flushed = false;
        self.audio_flushed = false;
        self.waiting_for_audio = false;
        self.duration_ms = 0;
        info!("✅ 停止完成，资源已清理");
    }

    /// 设置播放速率（r > 0）
    pub fn set_rate(&mut self, rate: f64) {
        let wall_ms = self.wall_now_ms();
        self.clock.set_rate(rate, wall_ms);
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_volume(self.volume);
        }
    }

    /// 选择字幕轨
    pub fn select_subtitle_track(&mut self, id: u64) -> Result<()> {
        let Some(demuxer) = self.demuxer.as_mut() else {
            return Err(PlayerError::Other("没有活动的解封装器".to_string()));
        };
        demuxer.select_subtitle_track(id)
    }

    /// 字幕提示流（宿主持有接收端轮询）
    pub fn subtitle_cues(&self) -> Receiver<SubtitleCue> {
        self.subtitle_rx.clone()
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_decoder.is_some()
    }

    /// 当前状态快照
    pub fn get_state(&self) -> PlayerState {
        let position_ms = if self.clock.is_started() {
            self.clock.now_us(self.wall_now_ms()) / 1000
        } else {
            0
        };
        PlayerState {
            state: self.state,
            pipeline: self.pipeline,
            position_ms,
            duration_ms: self.duration_ms,
            volume: self.volume,
        }
    }

    /// 缓冲状态（监控与调试）
    pub fn buffer_status(&self) -> BufferStatus {
        BufferStatus {
            video_chunks: self.video_queue.len(),
            audio_chunks: self.audio_queue.len(),
            video_frames: self.frame_ring.len(),
            audio_scheduled_sec: self
                .scheduler
                .as_ref()
                .map(|s| s.lookahead_sec())
                .unwrap_or(0.0),
            extraction_paused: self
                .demuxer
                .as_ref()
                .map(|d| d.is_extraction_paused())
                .unwrap_or(false),
        }
    }

    /// 会话墙钟（毫秒）：音频启用时用设备时钟，否则单调时钟
    fn wall_now_ms(&self) -> f64 {
        match &self.scheduler {
            Some(scheduler) => scheduler.wall_ms(),
            None => self.monotonic_wall_ms(),
        }
    }

    fn monotonic_wall_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for PlaybackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop();
    }
}
