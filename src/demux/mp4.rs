use crate::core::{
    ChunkKind, EncodedAudioChunk, EncodedVideoChunk, PlayerError, Result, TrackDescriptor,
    TrackKind,
};
use crate::demux::codec::{
    aac_string_from_asc, av1_string, avc_string, hevc_string, opus_channel_count,
    vp9_string_from_vpcc,
};
use crate::demux::{Demuxer, MediaChunk};
use crate::source::ByteSource;
use log::{debug, info, warn};
use std::sync::Arc;

// 盒类型 fourcc
const FTYP: u32 = fourcc(b"ftyp");
const MOOV: u32 = fourcc(b"moov");
const MVHD: u32 = fourcc(b"mvhd");
const TRAK: u32 = fourcc(b"trak");
const TKHD: u32 = fourcc(b"tkhd");
const MDIA: u32 = fourcc(b"mdia");
const MDHD: u32 = fourcc(b"mdhd");
const HDLR: u32 = fourcc(b"hdlr");
const MINF: u32 = fourcc(b"minf");
const STBL: u32 = fourcc(b"stbl");
const STSD: u32 = fourcc(b"stsd");
const STTS: u32 = fourcc(b"stts");
const CTTS: u32 = fourcc(b"ctts");
const STSC: u32 = fourcc(b"stsc");
const STSZ: u32 = fourcc(b"stsz");
const STCO: u32 = fourcc(b"stco");
const CO64: u32 = fourcc(b"co64");
const STSS: u32 = fourcc(b"stss");

// 样本描述 fourcc
const AVC1: u32 = fourcc(b"avc1");
const AVC3: u32 = fourcc(b"avc3");
const HVC1: u32 = fourcc(b"hvc1");
const HEV1: u32 = fourcc(b"hev1");
const VP09: u32 = fourcc(b"vp09");
const AV01: u32 = fourcc(b"av01");
const MP4A: u32 = fourcc(b"mp4a");
const OPUS: u32 = fourcc(b"Opus");
const FLAC: u32 = fourcc(b"fLaC");

// 配置记录 fourcc
const AVCC: u32 = fourcc(b"avcC");
const HVCC: u32 = fourcc(b"hvcC");
const VPCC: u32 = fourcc(b"vpcC");
const AV1C: u32 = fourcc(b"av1C");
const ESDS: u32 = fourcc(b"esds");
const DOPS: u32 = fourcc(b"dOps");
const DFLA: u32 = fourcc(b"dfLa");

// handler 类型
const HDLR_VIDE: u32 = fourcc(b"vide");
const HDLR_SOUN: u32 = fourcc(b"soun");

const fn fourcc(b: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*b)
}

/// moov 盒大小上限，防御性限制
const MAX_MOOV_SIZE: u64 = 128 * 1024 * 1024;

/// 展平后的单个样本
#[derive(Debug, Clone, Copy)]
struct SampleInfo {
    offset: u64,
    size: u32,
    cts: i64,
    duration: u32,
    is_sync: bool,
}

/// 一条轨道的提取状态
struct Mp4Track {
    kind: TrackKind,
    timescale: u32,
    samples: Vec<SampleInfo>,
    /// 已发出的累计样本数；暂停恢复后从这里继续，绝不重复投递
    cursor: usize,
}

impl Mp4Track {
    fn next_sample(&self) -> Option<&SampleInfo> {
        self.samples.get(self.cursor)
    }

    /// 当前样本的微秒时间戳
    fn next_timestamp_us(&self) -> Option<i64> {
        self.next_sample()
            .map(|s| scale_to_us(s.cts, self.timescale))
    }
}

fn scale_to_us(value: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (value as f64 * 1_000_000.0 / timescale as f64).round() as i64
}

/// ISO-BMFF (MP4) 解封装器
///
/// 打开时把 moov 整体读入内存解析出样本表，之后按需逐样本懒读取。
pub struct Mp4Demuxer {
    source: Arc<dyn ByteSource>,
    movie_timescale: u32,
    duration_ms: i64,
    video: Option<TrackDescriptor>,
    audio: Option<TrackDescriptor>,
    subtitles: Vec<TrackDescriptor>,
    video_track: Option<usize>,
    audio_track: Option<usize>,
    tracks: Vec<Mp4Track>,
    paused: bool,
    stopped: bool,
}

impl std::fmt::Debug for Mp4Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4Demuxer")
            .field("movie_timescale", &self.movie_timescale)
            .field("duration_ms", &self.duration_ms)
            .field("video", &self.video)
            .field("audio", &self.audio)
            .field("subtitles", &self.subtitles)
            .field("video_track", &self.video_track)
            .field("audio_track", &self.audio_track)
            .field("tracks_count", &self.tracks.len())
            .field("paused", &self.paused)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Mp4Demuxer {
    pub fn open(source: Arc<dyn ByteSource>) -> Result<Self> {
        info!("📦 打开 MP4 源: {}", source.description());
        let len = source.len();

        // 顶层盒遍历，定位并读入 moov
        let mut moov: Option<Vec<u8>> = None;
        let mut pos = 0u64;
        while pos + 8 <= len {
            let header = source.read_range(pos, (pos + 16).min(len))?;
            let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let box_type = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            let (box_size, header_len) = if size32 == 1 {
                if header.len() < 16 {
                    return Err(PlayerError::FormatError("64 位盒头不完整".into()));
                }
                (
                    u64::from_be_bytes([
                        header[8], header[9], header[10], header[11], header[12], header[13],
                        header[14], header[15],
                    ]),
                    16u64,
                )
            } else if size32 == 0 {
                (len - pos, 8u64)
            } else {
                (size32, 8u64)
            };
            if box_size < header_len || pos + box_size > len {
                return Err(PlayerError::FormatError(format!(
                    "盒尺寸非法: {} @ {}",
                    box_size, pos
                )));
            }

            if box_type == MOOV {
                if box_size - header_len > MAX_MOOV_SIZE {
                    return Err(PlayerError::FormatError("moov 过大".into()));
                }
                moov = Some(source.read_range(pos + header_len, pos + box_size)?);
                break;
            }
            if box_type != FTYP {
                debug!("跳过顶层盒 {:08X} ({} bytes)", box_type, box_size);
            }
            pos += box_size;
        }

        let Some(moov) = moov else {
            return Err(PlayerError::FormatError("找不到 moov 盒".into()));
        };

        let mut demuxer = Self {
            source,
            movie_timescale: 1000,
            duration_ms: 0,
            video: None,
            audio: None,
            subtitles: Vec::new(),
            video_track: None,
            audio_track: None,
            tracks: Vec::new(),
            paused: false,
            stopped: false,
        };
        demuxer.parse_moov(&moov)?;

        if demuxer.video.is_none() && demuxer.audio.is_none() {
            return Err(PlayerError::FormatError("没有可用的音视频轨".into()));
        }
        Ok(demuxer)
    }

    fn parse_moov(&mut self, moov: &[u8]) -> Result<()> {
        let mut cursor = BoxCursor::new(moov);
        let mut movie_duration = 0u64;
        while let Some((box_type, payload)) = cursor.next_box()? {
            match box_type {
                MVHD => {
                    let (timescale, duration) = parse_mvhd(payload)?;
                    self.movie_timescale = timescale;
                    movie_duration = duration;
                }
                TRAK => self.parse_trak(payload)?,
                _ => {}
            }
        }
        self.duration_ms = if self.movie_timescale > 0 {
            (movie_duration as f64 * 1000.0 / self.movie_timescale as f64).round() as i64
        } else {
            0
        };
        debug!(
            "MP4 解析完成: timescale={}, 时长={} ms, 视频={:?}, 音频={:?}",
            self.movie_timescale,
            self.duration_ms,
            self.video.as_ref().map(|t| &t.codec),
            self.audio.as_ref().map(|t| &t.codec)
        );
        Ok(())
    }

    fn parse_trak(&mut self, trak: &[u8]) -> Result<()> {
        let mut track_id = 0u64;
        let mut media_timescale = 0u32;
        let mut handler = 0u32;
        let mut language = None;
        let mut stbl_payload: Option<&[u8]> = None;

        let mut cursor = BoxCursor::new(trak);
        while let Some((box_type, payload)) = cursor.next_box()? {
            match box_type {
                TKHD => track_id = parse_tkhd_id(payload)? as u64,
                MDIA => {
                    let mut mdia = BoxCursor::new(payload);
                    while let Some((mbox, mpayload)) = mdia.next_box()? {
                        match mbox {
                            MDHD => {
                                let (ts, lang) = parse_mdhd(mpayload)?;
                                media_timescale = ts;
                                language = lang;
                            }
                            HDLR => handler = parse_hdlr(mpayload)?,
                            MINF => {
                                let mut minf = BoxCursor::new(mpayload);
                                while let Some((ibox, ipayload)) = minf.next_box()? {
                                    if ibox == STBL {
                                        stbl_payload = Some(ipayload);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        let kind = match handler {
            HDLR_VIDE => TrackKind::Video,
            HDLR_SOUN => TrackKind::Audio,
            _ => return Ok(()),
        };
        let Some(stbl) = stbl_payload else {
            return Ok(());
        };
        // timescale 回退到 movie 级
        let timescale = if media_timescale > 0 {
            media_timescale
        } else {
            self.movie_timescale
        };

        let tables = parse_stbl(stbl)?;
        let Some(entry) = tables.sample_entry.as_ref() else {
            warn!("轨道 {} 缺少样本描述，跳过", track_id);
            return Ok(());
        };

        let mut desc = match kind {
            TrackKind::Video => {
                let Some(codec) = video_codec_from_entry(entry) else {
                    warn!("跳过不支持的视频样本描述 {:08X}", entry.entry_type);
                    return Ok(());
                };
                let mut d = TrackDescriptor::new(track_id, TrackKind::Video, codec);
                d.width = entry.width as u32;
                d.height = entry.height as u32;
                d.description = entry.config.clone();
                d
            }
            TrackKind::Audio => {
                let Some((codec, description)) = audio_codec_from_entry(entry) else {
                    warn!("跳过不支持的音频样本描述 {:08X}", entry.entry_type);
                    return Ok(());
                };
                let mut d = TrackDescriptor::new(track_id, TrackKind::Audio, codec);
                d.sample_rate = entry.sample_rate;
                d.channels = if entry.channels > 0 {
                    entry.channels
                } else {
                    opus_channel_count(entry.config.as_deref()).unwrap_or(2)
                };
                d.description = description;
                d
            }
            TrackKind::Subtitle => unreachable!(),
        };
        desc.language = language;

        let samples = build_samples(&tables)?;
        desc.sample_count = samples.len() as u64;
        if let Some(first) = samples.first() {
            if first.duration > 0 {
                desc.default_duration_us = Some(scale_to_us(first.duration as i64, timescale));
            }
        }

        let track = Mp4Track {
            kind,
            timescale,
            samples,
            cursor: 0,
        };
        match kind {
            TrackKind::Video if self.video.is_none() => {
                self.video = Some(desc);
                self.video_track = Some(self.tracks.len());
                self.tracks.push(track);
            }
            TrackKind::Audio if self.audio.is_none() => {
                self.audio = Some(desc);
                self.audio_track = Some(self.tracks.len());
                self.tracks.push(track);
            }
            _ => {}
        }
        Ok(())
    }

    /// 挑选下一个样本时间最早的轨道
    fn pick_track(&self) -> Option<usize> {
        let mut best: Option<(usize, i64)> = None;
        for (idx, track) in self.tracks.iter().enumerate() {
            if let Some(ts) = track.next_timestamp_us() {
                if best.map_or(true, |(_, t)| ts < t) {
                    best = Some((idx, ts));
                }
            }
        }
        best.map(|(idx, _)| idx)
    }
}

impl Demuxer for Mp4Demuxer {
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
        Err(PlayerError::Other(format!(
            "MP4 管线不提供字幕轨 (id={})",
            id
        )))
    }

    fn next_chunk(&mut self) -> Result<Option<MediaChunk>> {
        if self.stopped {
            return Ok(None);
        }
        let Some(idx) = self.pick_track() else {
            // 所有轨道的累计发出数都到达 sample_count，流结束
            return Ok(None);
        };

        let (kind, timescale, sample) = {
            let track = &self.tracks[idx];
            (track.kind, track.timescale, *track.next_sample().unwrap())
        };
        let data = match self
            .source
            .read_range(sample.offset, sample.offset + sample.size as u64)
        {
            Ok(data) => data,
            Err(PlayerError::Aborted) if self.stopped => return Ok(None),
            Err(e) => return Err(e),
        };
        self.tracks[idx].cursor += 1;

        let timestamp_us = scale_to_us(sample.cts, timescale);
        let duration_us = scale_to_us(sample.duration as i64, timescale);
        let chunk = match kind {
            TrackKind::Video => MediaChunk::Video(EncodedVideoChunk {
                kind: if sample.is_sync {
                    ChunkKind::Key
                } else {
                    ChunkKind::Delta
                },
                timestamp_us,
                duration_us,
                data,
            }),
            TrackKind::Audio => MediaChunk::Audio(EncodedAudioChunk {
                kind: ChunkKind::Key,
                timestamp_us,
                duration_us,
                data,
            }),
            TrackKind::Subtitle => unreachable!(),
        };
        Ok(Some(chunk))
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
        format!("Mp4Demuxer: {}", self.source.description())
    }
}

// ============= 盒解析 =============

/// 内存内盒遍历游标
struct BoxCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BoxCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 下一个子盒：(fourcc, 载荷)
    fn next_box(&mut self) -> Result<Option<(u32, &'a [u8])>> {
        if self.pos + 8 > self.data.len() {
            return Ok(None);
        }
        let size32 = read_u32(self.data, self.pos) as usize;
        let box_type = read_u32(self.data, self.pos + 4);
        let (size, header_len) = if size32 == 1 {
            if self.pos + 16 > self.data.len() {
                return Err(PlayerError::FormatError("64 位盒头不完整".into()));
            }
            let size64 = u64::from_be_bytes(
                self.data[self.pos + 8..self.pos + 16].try_into().unwrap(),
            ) as usize;
            (size64, 16usize)
        } else if size32 == 0 {
            (self.data.len() - self.pos, 8usize)
        } else {
            (size32, 8usize)
        };
        if size < header_len || self.pos + size > self.data.len() {
            return Err(PlayerError::FormatError(format!(
                "子盒尺寸非法: {} @ {}",
                size, self.pos
            )));
        }
        let payload = &self.data[self.pos + header_len..self.pos + size];
        self.pos += size;
        Ok(Some((box_type, payload)))
    }
}

fn read_u16(data: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([data[pos], data[pos + 1]])
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn read_u64(data: &[u8], pos: usize) -> Result<u64> {
    if pos + 8 > data.len() {
        return Err(PlayerError::FormatError(format!(
            "64 位整数读取越界: {} / {}",
            pos,
            data.len()
        )));
    }
    Ok(u64::from_be_bytes(data[pos..pos + 8].try_into().unwrap()))
}

fn check_len(data: &[u8], need: usize, what: &str) -> Result<()> {
    if data.len() < need {
        return Err(PlayerError::FormatError(format!("{} 盒太短", what)));
    }
    Ok(())
}

/// mvhd → (timescale, duration)
fn parse_mvhd(p: &[u8]) -> Result<(u32, u64)> {
    check_len(p, 4, "mvhd")?;
    let version = p[0];
    if version == 1 {
        check_len(p, 32, "mvhd")?;
        Ok((read_u32(p, 20), read_u64(p, 24)?))
    } else {
        check_len(p, 20, "mvhd")?;
        Ok((read_u32(p, 12), read_u32(p, 16) as u64))
    }
}

/// tkhd → track_id
fn parse_tkhd_id(p: &[u8]) -> Result<u32> {
    check_len(p, 4, "tkhd")?;
    let version = p[0];
    if version == 1 {
        check_len(p, 24, "tkhd")?;
        Ok(read_u32(p, 20))
    } else {
        check_len(p, 16, "tkhd")?;
        Ok(read_u32(p, 12))
    }
}

/// mdhd → (timescale, language)
fn parse_mdhd(p: &[u8]) -> Result<(u32, Option<String>)> {
    check_len(p, 4, "mdhd")?;
    let version = p[0];
    let (timescale, lang_pos) = if version == 1 {
        check_len(p, 34, "mdhd")?;
        (read_u32(p, 20), 32usize)
    } else {
        check_len(p, 22, "mdhd")?;
        (read_u32(p, 12), 20usize)
    };
    // ISO-639-2 压缩编码
    let lang = read_u16(p, lang_pos);
    let language = if lang != 0 && lang != 0x55C4 {
        let c1 = (((lang >> 10) & 0x1F) as u8 + 0x60) as char;
        let c2 = (((lang >> 5) & 0x1F) as u8 + 0x60) as char;
        let c3 = ((lang & 0x1F) as u8 + 0x60) as char;
        Some(format!("{}{}{}", c1, c2, c3))
    } else {
        None
    };
    Ok((timescale, language))
}

/// hdlr → handler 类型
fn parse_hdlr(p: &[u8]) -> Result<u32> {
    check_len(p, 12, "hdlr")?;
    Ok(read_u32(p, 8))
}

/// stsd 第一个样本描述的解析结果
struct SampleEntry {
    entry_type: u32,
    width: u16,
    height: u16,
    sample_rate: u32,
    channels: u16,
    /// {avcC, hvcC, vpcC, av1C} / {esds 内的 ASC, dOps, dfLa} 中的第一个
    config: Option<Vec<u8>>,
    /// esds 的 DecoderSpecificInfo（AAC 的 ASC）
    asc: Option<Vec<u8>>,
}

/// stbl 内的原始表
#[derive(Default)]
struct SampleTables {
    sample_entry: Option<SampleEntry>,
    time_to_sample: Vec<(u32, u32)>,
    composition_offsets: Vec<(u32, i32)>,
    sample_to_chunk: Vec<(u32, u32)>,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    sync_samples: Vec<u32>,
}

fn parse_stbl(stbl: &[u8]) -> Result<SampleTables> {
    let mut tables = SampleTables::default();
    let mut cursor = BoxCursor::new(stbl);
    while let Some((box_type, p)) = cursor.next_box()? {
        match box_type {
            STSD => tables.sample_entry = parse_stsd(p)?,
            STTS => {
                check_len(p, 8, "stts")?;
                let count = read_u32(p, 4) as usize;
                check_len(p, 8 + count * 8, "stts")?;
                for i in 0..count {
                    tables
                        .time_to_sample
                        .push((read_u32(p, 8 + i * 8), read_u32(p, 12 + i * 8)));
                }
            }
            CTTS => {
                check_len(p, 8, "ctts")?;
                let count = read_u32(p, 4) as usize;
                check_len(p, 8 + count * 8, "ctts")?;
                for i in 0..count {
                    tables
                        .composition_offsets
                        .push((read_u32(p, 8 + i * 8), read_u32(p, 12 + i * 8) as i32));
                }
            }
            STSC => {
                check_len(p, 8, "stsc")?;
                let count = read_u32(p, 4) as usize;
                check_len(p, 8 + count * 12, "stsc")?;
                for i in 0..count {
                    tables
                        .sample_to_chunk
                        .push((read_u32(p, 8 + i * 12), read_u32(p, 12 + i * 12)));
                }
            }
            STSZ => {
                check_len(p, 12, "stsz")?;
                let fixed = read_u32(p, 4);
                let count = read_u32(p, 8) as usize;
                if fixed == 0 {
                    check_len(p, 12 + count * 4, "stsz")?;
                    for i in 0..count {
                        tables.sample_sizes.push(read_u32(p, 12 + i * 4));
                    }
                } else {
                    tables.sample_sizes = vec![fixed; count];
                }
            }
            STCO => {
                check_len(p, 8, "stco")?;
                let count = read_u32(p, 4) as usize;
                check_len(p, 8 + count * 4, "stco")?;
                for i in 0..count {
                    tables.chunk_offsets.push(read_u32(p, 8 + i * 4) as u64);
                }
            }
            CO64 => {
                check_len(p, 8, "co64")?;
                let count = read_u32(p, 4) as usize;
                check_len(p, 8 + count * 8, "co64")?;
                for i in 0..count {
                    tables.chunk_offsets.push(read_u64(p, 8 + i * 8)?);
                }
            }
            STSS => {
                check_len(p, 8, "stss")?;
                let count = read_u32(p, 4) as usize;
                check_len(p, 8 + count * 4, "stss")?;
                for i in 0..count {
                    tables.sync_samples.push(read_u32(p, 8 + i * 4));
                }
            }
            _ => {}
        }
    }
    Ok(tables)
}

/// stsd：只取第一个样本描述
fn parse_stsd(p: &[u8]) -> Result<Option<SampleEntry>> {
    check_len(p, 8, "stsd")?;
    let entry_count = read_u32(p, 4);
    if entry_count == 0 {
        return Ok(None);
    }
    let mut cursor = BoxCursor::new(&p[8..]);
    let Some((entry_type, entry)) = cursor.next_box()? else {
        return Ok(None);
    };

    let mut result = SampleEntry {
        entry_type,
        width: 0,
        height: 0,
        sample_rate: 0,
        channels: 0,
        config: None,
        asc: None,
    };

    match entry_type {
        AVC1 | AVC3 | HVC1 | HEV1 | VP09 | AV01 => {
            // VisualSampleEntry：6 保留 + 2 dri + 16 预定义 = 24，然后宽高
            check_len(entry, 78, "视频样本描述")?;
            result.width = read_u16(entry, 24);
            result.height = read_u16(entry, 26);
            // 固定头 78 字节之后是配置盒
            let mut children = BoxCursor::new(&entry[78..]);
            while let Some((cbox, cp)) = children.next_box()? {
                if matches!(cbox, AVCC | HVCC | VPCC | AV1C) && result.config.is_none() {
                    result.config = Some(cp.to_vec());
                }
            }
        }
        MP4A | OPUS | FLAC => {
            // AudioSampleEntry：8 保留 + 声道数 + 样本位宽 + 4 + 采样率(16.16)
            check_len(entry, 28, "音频样本描述")?;
            result.channels = read_u16(entry, 16);
            result.sample_rate = read_u32(entry, 24) >> 16;
            let mut children = BoxCursor::new(&entry[28..]);
            while let Some((cbox, cp)) = children.next_box()? {
                match cbox {
                    ESDS => result.asc = parse_esds_asc(cp),
                    DOPS | DFLA if result.config.is_none() => {
                        result.config = Some(cp.to_vec());
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(Some(result))
}

/// 从 esds 里取 DecoderSpecificInfo（AudioSpecificConfig）
///
/// MPEG-4 描述符：tag u8 + 变长长度（高位延续），ES(0x03) → DecoderConfig(0x04)
/// → DecSpecificInfo(0x05)。
fn parse_esds_asc(p: &[u8]) -> Option<Vec<u8>> {
    // 跳过 version + flags
    let mut pos = 4usize;

    fn read_descriptor(data: &[u8], pos: &mut usize) -> Option<(u8, usize)> {
        let tag = *data.get(*pos)?;
        *pos += 1;
        let mut len = 0usize;
        for _ in 0..4 {
            let b = *data.get(*pos)?;
            *pos += 1;
            len = (len << 7) | (b & 0x7F) as usize;
            if b & 0x80 == 0 {
                break;
            }
        }
        Some((tag, len))
    }

    let (tag, _) = read_descriptor(p, &mut pos)?;
    if tag != 0x03 {
        return None;
    }
    // ES_Descriptor: ES_ID(2) + flags(1)
    pos += 3;
    let (tag, _) = read_descriptor(p, &mut pos)?;
    if tag != 0x04 {
        return None;
    }
    // DecoderConfigDescriptor: objectType(1) + streamType(1) + bufferSize(3) + maxBitrate(4) + avgBitrate(4)
    pos += 13;
    let (tag, len) = read_descriptor(p, &mut pos)?;
    if tag != 0x05 {
        return None;
    }
    p.get(pos..pos + len).map(|s| s.to_vec())
}

/// 视频样本描述 → codec 字符串
fn video_codec_from_entry(entry: &SampleEntry) -> Option<String> {
    let config = entry.config.as_deref();
    match entry.entry_type {
        AVC1 | AVC3 => avc_string(config?),
        HVC1 | HEV1 => hevc_string(config?),
        VP09 => vp9_string_from_vpcc(config?),
        AV01 => av1_string(config?),
        _ => None,
    }
}

/// 音频样本描述 → (codec 字符串, description)
fn audio_codec_from_entry(entry: &SampleEntry) -> Option<(String, Option<Vec<u8>>)> {
    match entry.entry_type {
        MP4A => {
            let asc = entry.asc.as_deref()?;
            Some((aac_string_from_asc(asc)?, Some(asc.to_vec())))
        }
        OPUS => Some(("opus".to_string(), entry.config.clone())),
        FLAC => Some(("flac".to_string(), entry.config.clone())),
        _ => None,
    }
}

/// 把 stbl 的各表展平成逐样本数组
fn build_samples(tables: &SampleTables) -> Result<Vec<SampleInfo>> {
    let count = tables.sample_sizes.len();
    if count == 0 {
        return Ok(Vec::new());
    }
    if tables.sample_to_chunk.is_empty() || tables.chunk_offsets.is_empty() {
        return Err(PlayerError::FormatError("缺少 stsc/stco 表".into()));
    }

    // dts 与时长
    let mut dts = Vec::with_capacity(count);
    let mut durations = Vec::with_capacity(count);
    let mut t = 0i64;
    for &(n, delta) in &tables.time_to_sample {
        for _ in 0..n {
            if dts.len() >= count {
                break;
            }
            dts.push(t);
            durations.push(delta);
            t += delta as i64;
        }
    }
    while dts.len() < count {
        dts.push(t);
        durations.push(0);
    }

    // cts = dts + ctts 偏移
    let mut cts = dts.clone();
    if !tables.composition_offsets.is_empty() {
        let mut idx = 0usize;
        for &(n, offset) in &tables.composition_offsets {
            for _ in 0..n {
                if idx >= count {
                    break;
                }
                cts[idx] = dts[idx] + offset as i64;
                idx += 1;
            }
        }
    }

    // 逐 chunk 展开偏移
    let mut offsets = vec![0u64; count];
    let stsc = &tables.sample_to_chunk;
    let mut sample = 0usize;
    'outer: for i in 0..stsc.len() {
        let first_chunk = (stsc[i].0.max(1) - 1) as usize;
        let per_chunk = stsc[i].1 as usize;
        let next_first = if i + 1 < stsc.len() {
            (stsc[i + 1].0.max(1) - 1) as usize
        } else {
            tables.chunk_offsets.len()
        };
        for chunk in first_chunk..next_first {
            let Some(&base) = tables.chunk_offsets.get(chunk) else {
                break 'outer;
            };
            let mut offset = base;
            for _ in 0..per_chunk {
                if sample >= count {
                    break 'outer;
                }
                offsets[sample] = offset;
                offset += tables.sample_sizes[sample] as u64;
                sample += 1;
            }
        }
    }
    if sample < count {
        return Err(PlayerError::FormatError(format!(
            "样本偏移表不完整: {}/{}",
            sample, count
        )));
    }

    // 关键帧：无 stss 表时全部视为同步样本
    let is_sync = |idx: usize| {
        tables.sync_samples.is_empty() || tables.sync_samples.contains(&(idx as u32 + 1))
    };

    let samples = (0..count)
        .map(|i| SampleInfo {
            offset: offsets[i],
            size: tables.sample_sizes[i],
            cts: cts[i],
            duration: durations[i],
            is_sync: is_sync(i),
        })
        .collect();
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    // ============= 夹具构造 =============

    fn mp4_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(payload);
        out
    }

    fn full_box(name: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![version, 0, 0, 0];
        payload.extend_from_slice(body);
        mp4_box(name, &payload)
    }

    fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
        let mut body = vec![0u8; 8]; // creation + modification
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&duration.to_be_bytes());
        body.extend_from_slice(&[0u8; 80]); // 其余字段
        full_box(b"mvhd", 0, &body)
    }

    fn tkhd(track_id: u32) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(&track_id.to_be_bytes());
        body.extend_from_slice(&[0u8; 68]);
        full_box(b"tkhd", 0, &body)
    }

    fn mdhd(timescale: u32) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes()); // duration
        body.extend_from_slice(&0x55C4u16.to_be_bytes()); // und
        body.extend_from_slice(&[0u8; 2]);
        full_box(b"mdhd", 0, &body)
    }

    fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
        let mut body = vec![0u8; 4];
        body.extend_from_slice(handler);
        body.extend_from_slice(&[0u8; 13]);
        full_box(b"hdlr", 0, &body)
    }

    fn avc1_entry() -> Vec<u8> {
        // VisualSampleEntry 固定 78 字节 + avcC 子盒
        let mut entry = vec![0u8; 78];
        entry[24..26].copy_from_slice(&640u16.to_be_bytes());
        entry[26..28].copy_from_slice(&360u16.to_be_bytes());
        let avcc = mp4_box(b"avcC", &[0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x00]);
        entry.extend_from_slice(&avcc);
        mp4_box(b"avc1", &entry)
    }

    fn mp4a_entry() -> Vec<u8> {
        let mut entry = vec![0u8; 28];
        entry[16..18].copy_from_slice(&2u16.to_be_bytes()); // channels
        entry[24..28].copy_from_slice(&(44100u32 << 16).to_be_bytes());
        // esds: ES(0x03) → DecoderConfig(0x04) → DecSpecificInfo(0x05) = ASC [0x12, 0x10]
        let esds_body: Vec<u8> = vec![
            0x00, 0x00, 0x00, 0x00, // version + flags
            0x03, 0x16, 0x00, 0x01, 0x00, // ES 描述符
            0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, // objectType + streamType + buffer/bitrate 共 13 字节
            0x05, 0x02, 0x12, 0x10, // ASC: AOT=2, 44.1kHz, 双声道
        ];
        entry.extend_from_slice(&mp4_box(b"esds", &esds_body));
        mp4_box(b"mp4a", &entry)
    }

    fn stbl(entry: Vec<u8>, sizes: &[u32], deltas: &[(u32, u32)], offsets: &[u32], sync: &[u32]) -> Vec<u8> {
        let mut stsd_body = 1u32.to_be_bytes().to_vec();
        stsd_body.extend_from_slice(&entry);
        let stsd = full_box(b"stsd", 0, &stsd_body);

        let mut stts_body = (deltas.len() as u32).to_be_bytes().to_vec();
        for &(n, d) in deltas {
            stts_body.extend_from_slice(&n.to_be_bytes());
            stts_body.extend_from_slice(&d.to_be_bytes());
        }
        let stts = full_box(b"stts", 0, &stts_body);

        // 每 chunk 一个样本
        let mut stsc_body = 1u32.to_be_bytes().to_vec();
        stsc_body.extend_from_slice(&1u32.to_be_bytes());
        stsc_body.extend_from_slice(&1u32.to_be_bytes());
        stsc_body.extend_from_slice(&1u32.to_be_bytes());
        let stsc = full_box(b"stsc", 0, &stsc_body);

        let mut stsz_body = 0u32.to_be_bytes().to_vec();
        stsz_body.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
        for s in sizes {
            stsz_body.extend_from_slice(&s.to_be_bytes());
        }
        let stsz = full_box(b"stsz", 0, &stsz_body);

        let mut stco_body = (offsets.len() as u32).to_be_bytes().to_vec();
        for o in offsets {
            stco_body.extend_from_slice(&o.to_be_bytes());
        }
        let stco = full_box(b"stco", 0, &stco_body);

        let mut body = Vec::new();
        body.extend(stsd);
        body.extend(stts);
        body.extend(stsc);
        body.extend(stsz);
        body.extend(stco);
        if !sync.is_empty() {
            let mut stss_body = (sync.len() as u32).to_be_bytes().to_vec();
            for s in sync {
                stss_body.extend_from_slice(&s.to_be_bytes());
            }
            body.extend(full_box(b"stss", 0, &stss_body));
        }
        mp4_box(b"stbl", &body)
    }

    fn trak(track_id: u32, timescale: u32, handler: &[u8; 4], stbl: Vec<u8>) -> Vec<u8> {
        let minf = mp4_box(b"minf", &stbl);
        let mut mdia_body = mdhd(timescale);
        mdia_body.extend(hdlr(handler));
        mdia_body.extend(minf);
        let mdia = mp4_box(b"mdia", &mdia_body);
        let mut trak_body = tkhd(track_id);
        trak_body.extend(mdia);
        mp4_box(b"trak", &trak_body)
    }

    /// 两遍构造：先占位算出 mdat 数据偏移，再回填 stco
    fn build_mp4(
        video_samples: &[&[u8]],
        deltas: &[(u32, u32)],
        sync: &[u32],
    ) -> (Vec<u8>, Vec<u64>) {
        let sizes: Vec<u32> = video_samples.iter().map(|s| s.len() as u32).collect();

        let build = |offsets: &[u32]| -> Vec<u8> {
            let ftyp = mp4_box(b"ftyp", b"isom\x00\x00\x02\x00isomiso2");
            let stbl = stbl(avc1_entry(), &sizes, deltas, offsets, sync);
            let mut moov_body = mvhd(1000, 5000);
            moov_body.extend(trak(1, 90000, b"vide", stbl));
            let moov = mp4_box(b"moov", &moov_body);
            let mut mdat_body = Vec::new();
            for s in video_samples {
                mdat_body.extend_from_slice(s);
            }
            let mdat = mp4_box(b"mdat", &mdat_body);
            let mut out = ftyp;
            out.extend(moov);
            out.extend(mdat);
            out
        };

        // 第一遍确定布局
        let placeholder = vec![0u32; sizes.len()];
        let pass1 = build(&placeholder);
        let mdat_payload_start = (pass1.len()
            - video_samples.iter().map(|s| s.len()).sum::<usize>())
            as u32;
        let mut offsets = Vec::new();
        let mut acc = mdat_payload_start;
        for s in &sizes {
            offsets.push(acc);
            acc += s;
        }
        let data = build(&offsets);
        (data, offsets.iter().map(|&o| o as u64).collect())
    }

    fn open_fixture(data: Vec<u8>) -> Mp4Demuxer {
        Mp4Demuxer::open(Arc::new(MemorySource::new(data))).unwrap()
    }

    // ============= 用例 =============

    #[test]
    fn test_track_descriptor_normalized() {
        let (data, _) = build_mp4(&[b"frame0", b"frame11"], &[(2, 3000)], &[1]);
        let demuxer = open_fixture(data);

        let video = demuxer.video_track().unwrap();
        assert_eq!(video.codec, "avc1.42C01E");
        assert_eq!(video.width, 640);
        assert_eq!(video.height, 360);
        assert_eq!(video.sample_count, 2);
        assert!(video.description.is_some());
        assert_eq!(demuxer.duration_ms(), 5000);
    }

    #[test]
    fn test_sample_extraction_with_timestamps() {
        let (data, _) = build_mp4(&[b"frame0", b"frame11"], &[(2, 3000)], &[1]);
        let mut demuxer = open_fixture(data);

        let mut chunks = Vec::new();
        while let Some(chunk) = demuxer.next_chunk().unwrap() {
            if let MediaChunk::Video(v) = chunk {
                chunks.push(v);
            }
        }
        assert_eq!(chunks.len(), 2);
        // 3000/90000 s = 33333.3 µs
        assert_eq!(chunks[0].timestamp_us, 0);
        assert_eq!(chunks[1].timestamp_us, 33_333);
        assert_eq!(chunks[0].duration_us, 33_333);
        assert_eq!(chunks[0].kind, ChunkKind::Key);
        assert_eq!(chunks[1].kind, ChunkKind::Delta);
        assert_eq!(chunks[0].data, b"frame0");
        assert_eq!(chunks[1].data, b"frame11");
    }

    #[test]
    fn test_eos_at_sample_count() {
        let (data, _) = build_mp4(&[b"only"], &[(1, 3000)], &[1]);
        let mut demuxer = open_fixture(data);
        assert!(demuxer.next_chunk().unwrap().is_some());
        assert!(demuxer.next_chunk().unwrap().is_none());
        // 重复调用仍然是 None
        assert!(demuxer.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_no_stss_means_all_sync() {
        let (data, _) = build_mp4(&[b"a", b"b"], &[(2, 3000)], &[]);
        let mut demuxer = open_fixture(data);
        while let Some(chunk) = demuxer.next_chunk().unwrap() {
            if let MediaChunk::Video(v) = chunk {
                assert_eq!(v.kind, ChunkKind::Key);
            }
        }
    }

    #[test]
    fn test_esds_asc_extraction() {
        let entry = mp4a_entry();
        let parsed = parse_stsd(&{
            let mut stsd_body = 1u32.to_be_bytes().to_vec();
            stsd_body.extend_from_slice(&entry);
            let mut p = vec![0u8; 4];
            p.extend_from_slice(&stsd_body);
            p
        })
        .unwrap()
        .unwrap();
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.sample_rate, 44100);
        assert_eq!(parsed.asc, Some(vec![0x12, 0x10]));
        let (codec, desc) = audio_codec_from_entry(&parsed).unwrap();
        assert_eq!(codec, "mp4a.40.2");
        assert_eq!(desc, Some(vec![0x12, 0x10]));
    }

    #[test]
    fn test_missing_moov_is_format_error() {
        let data = mp4_box(b"ftyp", b"isom\x00\x00\x02\x00");
        let err = Mp4Demuxer::open(Arc::new(MemorySource::new(data))).unwrap_err();
        assert!(matches!(err, PlayerError::FormatError(_)));
    }
}
