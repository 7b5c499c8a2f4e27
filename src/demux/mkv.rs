use crate::core::{
    ChunkKind, EncodedAudioChunk, EncodedVideoChunk, PlayerError, Result, SubtitleCue,
    SubtitleFormat, TrackDescriptor, TrackKind,
};
use crate::demux::codec::{
    aac_string_from_asc, av1_string, avc_string, hevc_string, opus_channel_count,
    vp9_string_from_features,
};
use crate::demux::ebml::{parse_vint, EbmlReader};
use crate::demux::subtitle::{
    ass_block_text, default_ass_format, is_sup_stream, parse_ass_format, pgs_wrap_segments,
    pts_90k_from_us,
};
use crate::demux::{Demuxer, MediaChunk};
use crate::source::ByteSource;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// Matroska 元素 ID
const EBML_HEADER: u32 = 0x1A45DFA3;
const SEGMENT: u32 = 0x18538067;
const SEEK_HEAD: u32 = 0x114D9B74;
const INFO: u32 = 0x1549A966;
const TIMECODE_SCALE: u32 = 0x2AD7B1;
const SEGMENT_DURATION: u32 = 0x4489;
const TRACKS: u32 = 0x1654AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_TYPE: u32 = 0x83;
const CODEC_ID: u32 = 0x86;
const CODEC_PRIVATE: u32 = 0x63A2;
const DEFAULT_DURATION: u32 = 0x23E383;
const TRACK_NAME: u32 = 0x536E;
const TRACK_LANGUAGE: u32 = 0x22B59C;
const VIDEO_SETTINGS: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;
const AUDIO_SETTINGS: u32 = 0xE1;
const SAMPLING_FREQUENCY: u32 = 0xB5;
const CHANNELS: u32 = 0x9F;
const CLUSTER: u32 = 0x1F43B675;
const CLUSTER_TIMECODE: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;
const BLOCK_GROUP: u32 = 0xA0;
const BLOCK: u32 = 0xA1;
const BLOCK_DURATION: u32 = 0x9B;
const CUES: u32 = 0x1C53BB6B;
const CHAPTERS: u32 = 0x1043A770;
const TAGS: u32 = 0x1254C367;
const ATTACHMENTS: u32 = 0x1941A469;

// TrackType 取值
const TRACK_TYPE_VIDEO: u64 = 1;
const TRACK_TYPE_AUDIO: u64 = 2;
const TRACK_TYPE_SUBTITLE: u64 = 17;

/// 没有 BlockDuration 的字幕提示在流结束时的兜底时长
const TEXT_CUE_FALLBACK_US: i64 = 5_000_000;

/// 提取游标位置
#[derive(Clone, Copy)]
enum WalkState {
    /// 在 Segment 体内寻找下一个 Cluster
    Scanning,
    /// 在 Cluster 内逐元素处理
    InCluster {
        end: Option<u64>,
        timecode: i64,
    },
}

/// 一个等待下一块确定时长的视频块
struct PendingVideo {
    kind: ChunkKind,
    timestamp_us: i64,
    data: Vec<u8>,
}

/// Matroska/WebM 解封装器
///
/// 流式 EBML 解析：打开时只扫到第一个 Cluster（解析 Info 与 Tracks），
/// 之后按拉取逐块前进。
pub struct MkvDemuxer {
    source: Arc<dyn ByteSource>,
    reader: EbmlReader,
    segment_end: u64,

    timecode_scale_ns: u64,
    duration_ms: i64,

    video: Option<TrackDescriptor>,
    audio: Option<TrackDescriptor>,
    subtitles: Vec<TrackDescriptor>,
    video_number: Option<u64>,
    audio_number: Option<u64>,
    selected_subtitle: Option<u64>,
    subtitle_formats: HashMap<u64, SubtitleFormat>,

    state: WalkState,
    queue: VecDeque<MediaChunk>,
    pending_video: Option<PendingVideo>,
    pending_text: Option<(i64, String)>,
    pgs_buffer: Vec<u8>,

    warned_laced_video: bool,
    paused: bool,
    stopped: bool,
    eos: bool,
    flushed: bool,
}

impl MkvDemuxer {
    pub fn open(source: Arc<dyn ByteSource>) -> Result<Self> {
        info!("📦 打开 MKV 源: {}", source.description());
        let mut reader = EbmlReader::new(source.clone());

        // 顶层：EBML 头，然后 Segment
        let mut segment_start = None;
        let mut segment_end = source.len();
        while let Some(el) = reader.read_element()? {
            match el.id {
                EBML_HEADER => {
                    let size = el
                        .size
                        .ok_or_else(|| PlayerError::FormatError("EBML 头长度未知".into()))?;
                    reader.skip(size);
                }
                SEGMENT => {
                    segment_start = Some(el.data_start);
                    if let Some(end) = el.data_end() {
                        segment_end = end.min(source.len());
                    }
                    break;
                }
                _ => {
                    let size = el.size.ok_or_else(|| {
                        PlayerError::FormatError(format!("顶层元素 {:#X} 长度未知", el.id))
                    })?;
                    reader.skip(size);
                }
            }
        }
        if segment_start.is_none() {
            return Err(PlayerError::FormatError("找不到 Segment 元素".into()));
        }

        let mut demuxer = Self {
            source,
            reader,
            segment_end,
            timecode_scale_ns: 1_000_000,
            duration_ms: 0,
            video: None,
            audio: None,
            subtitles: Vec::new(),
            video_number: None,
            audio_number: None,
            selected_subtitle: None,
            subtitle_formats: HashMap::new(),
            state: WalkState::Scanning,
            queue: VecDeque::new(),
            pending_video: None,
            pending_text: None,
            pgs_buffer: Vec::new(),
            warned_laced_video: false,
            paused: false,
            stopped: false,
            eos: false,
            flushed: false,
        };
        demuxer.scan_segment_head()?;
        Ok(demuxer)
    }

    /// 扫描 Segment 头部：解析 Info 与 Tracks，停在第一个 Cluster 前
    fn scan_segment_head(&mut self) -> Result<()> {
        let mut duration_ticks = 0.0f64;
        loop {
            if self.reader.pos() >= self.segment_end {
                break;
            }
            let start = self.reader.pos();
            let Some(el) = self.reader.read_element()? else {
                break;
            };
            match el.id {
                INFO => {
                    let end = el
                        .data_end()
                        .ok_or_else(|| PlayerError::FormatError("Info 长度未知".into()))?;
                    while self.reader.pos() < end {
                        let Some(child) = self.reader.read_element()? else {
                            break;
                        };
                        let size = child.size.unwrap_or(0);
                        match child.id {
                            TIMECODE_SCALE => {
                                self.timecode_scale_ns = self.reader.read_uint(size)?;
                            }
                            SEGMENT_DURATION => {
                                duration_ticks = self.reader.read_float(size)?;
                            }
                            _ => self.reader.skip(size),
                        }
                    }
                }
                TRACKS => {
                    let end = el
                        .data_end()
                        .ok_or_else(|| PlayerError::FormatError("Tracks 长度未知".into()))?;
                    while self.reader.pos() < end {
                        let Some(child) = self.reader.read_element()? else {
                            break;
                        };
                        let size = child.size.unwrap_or(0);
                        if child.id == TRACK_ENTRY {
                            self.parse_track_entry(child.data_start + size)?;
                        } else {
                            self.reader.skip(size);
                        }
                    }
                }
                CLUSTER => {
                    // 提取从这里开始，回退到元素起点
                    self.reader.seek(start);
                    break;
                }
                SEEK_HEAD | CUES | CHAPTERS | TAGS | ATTACHMENTS => {
                    let size = el
                        .size
                        .ok_or_else(|| PlayerError::FormatError("段头元素长度未知".into()))?;
                    self.reader.skip(size);
                }
                _ => {
                    let size = el.size.unwrap_or(0);
                    self.reader.skip(size);
                }
            }
        }

        self.duration_ms =
            (duration_ticks * self.timecode_scale_ns as f64 / 1_000_000.0).round() as i64;
        debug!(
            "MKV 段头解析完成: TimecodeScale={} ns, 时长={} ms, 视频={:?}, 音频={:?}, 字幕 {} 轨",
            self.timecode_scale_ns,
            self.duration_ms,
            self.video.as_ref().map(|t| &t.codec),
            self.audio.as_ref().map(|t| &t.codec),
            self.subtitles.len()
        );
        Ok(())
    }

    /// 解析一个 TrackEntry 并映射为 TrackDescriptor
    fn parse_track_entry(&mut self, end: u64) -> Result<()> {
        let mut number = 0u64;
        let mut track_type = 0u64;
        let mut codec_id = String::new();
        let mut codec_private: Option<Vec<u8>> = None;
        let mut default_duration_ns = 0u64;
        let mut name = None;
        let mut language = None;
        let mut width = 0u32;
        let mut height = 0u32;
        let mut sample_rate = 0u32;
        let mut channels = 0u16;

        while self.reader.pos() < end {
            let Some(el) = self.reader.read_element()? else {
                break;
            };
            let size = el.size.unwrap_or(0);
            match el.id {
                TRACK_NUMBER => number = self.reader.read_uint(size)?,
                TRACK_TYPE => track_type = self.reader.read_uint(size)?,
                CODEC_ID => codec_id = self.reader.read_string(size)?,
                CODEC_PRIVATE => codec_private = Some(self.reader.read_bytes(size)?),
                DEFAULT_DURATION => default_duration_ns = self.reader.read_uint(size)?,
                TRACK_NAME => name = Some(self.reader.read_string(size)?),
                TRACK_LANGUAGE => language = Some(self.reader.read_string(size)?),
                VIDEO_SETTINGS => {
                    let vend = el.data_start + size;
                    while self.reader.pos() < vend {
                        let Some(v) = self.reader.read_element()? else {
                            break;
                        };
                        let vsize = v.size.unwrap_or(0);
                        match v.id {
                            PIXEL_WIDTH => width = self.reader.read_uint(vsize)? as u32,
                            PIXEL_HEIGHT => height = self.reader.read_uint(vsize)? as u32,
                            _ => self.reader.skip(vsize),
                        }
                    }
                }
                AUDIO_SETTINGS => {
                    let aend = el.data_start + size;
                    while self.reader.pos() < aend {
                        let Some(a) = self.reader.read_element()? else {
                            break;
                        };
                        let asize = a.size.unwrap_or(0);
                        match a.id {
                            SAMPLING_FREQUENCY => {
                                sample_rate = self.reader.read_float(asize)?.round() as u32
                            }
                            CHANNELS => channels = self.reader.read_uint(asize)? as u16,
                            _ => self.reader.skip(asize),
                        }
                    }
                }
                _ => self.reader.skip(size),
            }
        }

        match track_type {
            TRACK_TYPE_VIDEO => {
                if self.video.is_some() {
                    return Ok(());
                }
                let Some(codec) = video_codec_string(&codec_id, codec_private.as_deref()) else {
                    warn!("跳过不支持的视频轨: {}", codec_id);
                    return Ok(());
                };
                let mut desc = TrackDescriptor::new(number, TrackKind::Video, codec);
                desc.width = width;
                desc.height = height;
                desc.description = video_codec_description(&codec_id, codec_private);
                if default_duration_ns > 0 {
                    desc.default_duration_us = Some((default_duration_ns / 1000) as i64);
                }
                desc.name = name;
                desc.language = language;
                self.video_number = Some(number);
                self.video = Some(desc);
            }
            TRACK_TYPE_AUDIO => {
                if self.audio.is_some() {
                    return Ok(());
                }
                let Some((codec, forced_rate, desc_bytes)) =
                    audio_codec_mapping(&codec_id, codec_private.as_deref())
                else {
                    warn!("跳过不支持的音频轨: {}", codec_id);
                    return Ok(());
                };
                let mut desc = TrackDescriptor::new(number, TrackKind::Audio, codec);
                desc.sample_rate = forced_rate.unwrap_or(sample_rate);
                desc.channels = if channels > 0 {
                    channels
                } else {
                    opus_channel_count(codec_private.as_deref()).unwrap_or(2)
                };
                desc.description = desc_bytes;
                desc.name = name;
                desc.language = language;
                self.audio_number = Some(number);
                self.audio = Some(desc);
            }
            TRACK_TYPE_SUBTITLE => {
                let format = match codec_id.as_str() {
                    "S_TEXT/UTF8" => SubtitleFormat::PlainText,
                    "S_TEXT/ASS" | "S_TEXT/SSA" => {
                        let header = codec_private
                            .as_deref()
                            .map(|p| String::from_utf8_lossy(p).to_string())
                            .unwrap_or_default();
                        SubtitleFormat::Ass {
                            format: parse_ass_format(&header).unwrap_or_else(default_ass_format),
                        }
                    }
                    "S_HDMV/PGS" => SubtitleFormat::Pgs,
                    _ => {
                        debug!("跳过不支持的字幕轨: {}", codec_id);
                        return Ok(());
                    }
                };
                let mut desc = TrackDescriptor::new(number, TrackKind::Subtitle, codec_id);
                desc.name = name;
                desc.language = language;
                desc.subtitle_format = Some(format.clone());
                self.subtitle_formats.insert(number, format);
                self.subtitles.push(desc);
            }
            _ => {}
        }
        Ok(())
    }

    /// Block 时间码换算为微秒
    fn block_timestamp_us(&self, cluster_tc: i64, rel_tc: i16) -> i64 {
        ((cluster_tc + rel_tc as i64) as f64 * self.timecode_scale_ns as f64 / 1000.0).round()
            as i64
    }

    /// 处理一个 Block / SimpleBlock 载荷
    fn process_block(
        &mut self,
        payload: &[u8],
        cluster_tc: i64,
        duration_ticks: Option<u64>,
        is_simple: bool,
    ) -> Result<()> {
        let (track_number, vint_len) = parse_vint(payload)
            .ok_or_else(|| PlayerError::FormatError("Block 轨道号非法".into()))?;
        if payload.len() < vint_len + 3 {
            return Err(PlayerError::FormatError("Block 头不完整".into()));
        }
        let rel_tc = i16::from_be_bytes([payload[vint_len], payload[vint_len + 1]]);
        let flags = payload[vint_len + 2];
        let lacing = (flags >> 1) & 0x03;
        let body = &payload[vint_len + 3..];
        let timestamp_us = self.block_timestamp_us(cluster_tc, rel_tc);

        if Some(track_number) == self.video_number {
            // 视频不支持花边，整块跳过（载荷已读出，游标保持对齐）
            if lacing != 0 {
                if !self.warned_laced_video {
                    warn!("⚠️  视频轨出现花边 Block，不支持，按块丢弃");
                    self.warned_laced_video = true;
                }
                return Ok(());
            }
            let kind = if is_simple && (flags & 0x80) != 0 {
                ChunkKind::Key
            } else {
                ChunkKind::Delta
            };
            // 单槽前瞻：上一块的时长 = 本块时间戳差
            if let Some(prev) = self.pending_video.take() {
                let duration_us = (timestamp_us - prev.timestamp_us).max(0);
                self.queue.push_back(MediaChunk::Video(EncodedVideoChunk {
                    kind: prev.kind,
                    timestamp_us: prev.timestamp_us,
                    duration_us,
                    data: prev.data,
                }));
            }
            self.pending_video = Some(PendingVideo {
                kind,
                timestamp_us,
                data: body.to_vec(),
            });
        } else if Some(track_number) == self.audio_number {
            // 音频花边：剥掉尺寸元数据，保留拼接的帧载荷
            let frames = strip_lacing(lacing, body)
                .ok_or_else(|| PlayerError::FormatError("音频花边头非法".into()))?;
            self.queue.push_back(MediaChunk::Audio(EncodedAudioChunk {
                kind: ChunkKind::Key,
                timestamp_us,
                duration_us: 0,
                data: frames.to_vec(),
            }));
        } else if Some(track_number) == self.selected_subtitle {
            let format = self.subtitle_formats.get(&track_number).cloned();
            match format {
                Some(SubtitleFormat::Pgs) => {
                    if is_sup_stream(body) {
                        self.pgs_buffer.extend_from_slice(body);
                    } else {
                        let pts = pts_90k_from_us(timestamp_us);
                        let mut buf = std::mem::take(&mut self.pgs_buffer);
                        pgs_wrap_segments(body, pts, &mut buf);
                        self.pgs_buffer = buf;
                    }
                }
                Some(text_format) => {
                    let raw = String::from_utf8_lossy(body).replace('\0', "");
                    let text = match &text_format {
                        SubtitleFormat::Ass { format } => {
                            ass_block_text(format, &raw).unwrap_or(raw)
                        }
                        _ => raw,
                    };
                    // 先关闭上一条挂起的提示
                    if let Some((start_us, pending)) = self.pending_text.take() {
                        self.queue.push_back(MediaChunk::Subtitle(SubtitleCue::Text {
                            start_us,
                            end_us: timestamp_us,
                            text: pending,
                        }));
                    }
                    match duration_ticks {
                        Some(ticks) => {
                            let dur_us = (ticks as f64 * self.timecode_scale_ns as f64 / 1000.0)
                                .round() as i64;
                            self.queue.push_back(MediaChunk::Subtitle(SubtitleCue::Text {
                                start_us: timestamp_us,
                                end_us: timestamp_us + dur_us,
                                text,
                            }));
                        }
                        None => {
                            self.pending_text = Some((timestamp_us, text));
                        }
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    /// 前进一步：处理一个元素，可能向队列里放入若干块
    fn advance(&mut self) -> Result<()> {
        match self.state {
            WalkState::Scanning => {
                if self.reader.pos() >= self.segment_end || self.reader.at_end() {
                    self.eos = true;
                    return Ok(());
                }
                let Some(el) = self.reader.read_element()? else {
                    self.eos = true;
                    return Ok(());
                };
                if el.id == CLUSTER {
                    self.state = WalkState::InCluster {
                        end: el.data_end(),
                        timecode: 0,
                    };
                } else {
                    match el.size {
                        Some(size) => self.reader.skip(size),
                        None => {
                            self.eos = true;
                        }
                    }
                }
            }
            WalkState::InCluster { end, timecode } => {
                let in_bounds = match end {
                    Some(end) => self.reader.pos() < end,
                    None => !self.reader.at_end() && self.reader.pos() < self.segment_end,
                };
                if !in_bounds {
                    self.state = WalkState::Scanning;
                    return Ok(());
                }
                let start = self.reader.pos();
                let Some(el) = self.reader.read_element()? else {
                    self.state = WalkState::Scanning;
                    return Ok(());
                };
                let size = el.size.unwrap_or(0);
                match el.id {
                    CLUSTER_TIMECODE => {
                        let tc = self.reader.read_uint(size)? as i64;
                        self.state = WalkState::InCluster { end, timecode: tc };
                    }
                    SIMPLE_BLOCK => {
                        let payload = self.reader.read_bytes(size)?;
                        self.process_block(&payload, timecode, None, true)?;
                    }
                    BLOCK_GROUP => {
                        let gend = el.data_start + size;
                        let mut block: Option<Vec<u8>> = None;
                        let mut duration: Option<u64> = None;
                        while self.reader.pos() < gend {
                            let Some(child) = self.reader.read_element()? else {
                                break;
                            };
                            let csize = child.size.unwrap_or(0);
                            match child.id {
                                BLOCK => block = Some(self.reader.read_bytes(csize)?),
                                BLOCK_DURATION => duration = Some(self.reader.read_uint(csize)?),
                                _ => self.reader.skip(csize),
                            }
                        }
                        if let Some(payload) = block {
                            self.process_block(&payload, timecode, duration, false)?;
                        }
                    }
                    CLUSTER => {
                        // 未知长度 Cluster 被下一个 Cluster 截断
                        self.state = WalkState::InCluster {
                            end: el.data_end(),
                            timecode: 0,
                        };
                    }
                    id if id >= 0x1000_0000 => {
                        // 4 字节级别的顶层元素结束了未知长度的 Cluster
                        self.reader.seek(start);
                        self.state = WalkState::Scanning;
                    }
                    _ => self.reader.skip(size),
                }
            }
        }
        Ok(())
    }

    /// 流结束时冲刷挂起状态
    fn flush_pending(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;
        if let Some(prev) = self.pending_video.take() {
            self.queue.push_back(MediaChunk::Video(EncodedVideoChunk {
                kind: prev.kind,
                timestamp_us: prev.timestamp_us,
                duration_us: 0,
                data: prev.data,
            }));
        }
        if let Some((start_us, text)) = self.pending_text.take() {
            self.queue.push_back(MediaChunk::Subtitle(SubtitleCue::Text {
                start_us,
                end_us: start_us + TEXT_CUE_FALLBACK_US,
                text,
            }));
        }
        if !self.pgs_buffer.is_empty() {
            let data = std::mem::take(&mut self.pgs_buffer);
            self.queue
                .push_back(MediaChunk::Subtitle(SubtitleCue::Pgs { data }));
        }
    }
}

impl Demuxer for MkvDemuxer {
    fn video_track(&self) -> Option<&TrackDescriptor> {
        self.video.as_ref()
    }

    fn audio_track(&self) -> Option<&TrackDescriptor> {
        self.audio.as_ref()
    }

    fn subtitle_tracks(&self) -> &[TrackDescriptor] {
        &self.subtitles
    }

    fn select_subtitle_track(&mut self, id: u64) -> Result<()> {
        if !self.subtitles.iter().any(|t| t.id == id) {
            return Err(PlayerError::Other(format!("字幕轨 {} 不存在", id)));
        }
        self.selected_subtitle = Some(id);
        self.pgs_buffer.clear();
        self.pending_text = None;
        Ok(())
    }

    fn next_chunk(&mut self) -> Result<Option<MediaChunk>> {
        loop {
            if self.stopped {
                return Ok(None);
            }
            if let Some(chunk) = self.queue.pop_front() {
                return Ok(Some(chunk));
            }
            if self.eos {
                self.flush_pending();
                return Ok(self.queue.pop_front());
            }
            match self.advance() {
                Ok(()) => {}
                Err(PlayerError::Aborted) if self.stopped => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn pause_extraction(&mut self) {
        self.paused = true;
    }

    fn resume_extraction(&mut self) {
        self.paused = false;
    }

    fn is_extraction_paused(&self) -> bool {
        self.paused
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.source.abort();
    }

    fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    fn description(&self) -> String {
        format!("MkvDemuxer: {}", self.source.description())
    }
}

/// 剥离花边尺寸元数据，返回拼接的帧载荷
fn strip_lacing(lacing: u8, body: &[u8]) -> Option<&[u8]> {
    match lacing {
        0 => Some(body),
        // Xiph：帧数-1，随后每帧尺寸为 255 结尾的字节和
        1 => {
            let count = *body.first()? as usize;
            let mut pos = 1usize;
            for _ in 0..count {
                loop {
                    let b = *body.get(pos)?;
                    pos += 1;
                    if b != 255 {
                        break;
                    }
                }
            }
            Some(&body[pos..])
        }
        // 定长花边：只有帧数
        2 => Some(body.get(1..)?),
        // EBML：一个 VINT 首帧尺寸 + N-1 个有符号差分
        3 => {
            let count = *body.first()? as usize;
            let mut pos = 1usize;
            let (_, first_len) = parse_vint(body.get(pos..)?)?;
            pos += first_len;
            for _ in 0..count.saturating_sub(1) {
                let (_, diff_len) = parse_vint(body.get(pos..)?)?;
                pos += diff_len;
            }
            Some(body.get(pos..)?)
        }
        _ => None,
    }
}

// ============= CodecID 映射 =============

/// 视频 CodecID 映射为 WebCodecs 风格 codec 字符串
fn video_codec_string(codec_id: &str, private: Option<&[u8]>) -> Option<String> {
    match codec_id {
        "V_MPEG4/ISO/AVC" => avc_string(private?),
        "V_MPEGH/ISO/HEVC" => hevc_string(private?),
        "V_VP9" => Some(vp9_string_from_features(private)),
        "V_AV1" => av1_string(private?),
        _ => None,
    }
}

/// 视频轨的 description 字节（解码器私有数据）
fn video_codec_description(codec_id: &str, private: Option<Vec<u8>>) -> Option<Vec<u8>> {
    match codec_id {
        // VP9 的配置直接编码在 codec 字符串里
        "V_VP9" => None,
        _ => private,
    }
}

/// 音频 CodecID 映射：(codec 字符串, 强制采样率, description)
fn audio_codec_mapping(
    codec_id: &str,
    private: Option<&[u8]>,
) -> Option<(String, Option<u32>, Option<Vec<u8>>)> {
    match codec_id {
        "A_AAC" => {
            let p = private?;
            Some((aac_string_from_asc(p)?, None, Some(p.to_vec())))
        }
        "A_OPUS" => Some((
            "opus".to_string(),
            Some(48_000),
            private.map(|p| p.to_vec()),
        )),
        "A_MPEG/L3" => Some(("mp3".to_string(), None, None)),
        "A_FLAC" => Some(("flac".to_string(), None, private.map(|p| p.to_vec()))),
        _ => None,
    }
}
