use crate::core::{
    ChunkKind, EncodedAudioChunk, EncodedVideoChunk, PlayerError, Result, TrackDescriptor,
    TrackKind,
};
use crate::demux::{Demuxer, MediaChunk};
use crate::source::ByteSource;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// TS 包固定长度；192 / 204 是 M2TS / FEC 外包装
const TS_PACKET: usize = 188;
const SYNC_BYTE: u8 = 0x47;
/// 探测窗口：最多 50 个最大步长的包
const PROBE_WINDOW: usize = 50 * 204;
/// 每次推进读取的包数
const READ_BATCH: usize = 256;
/// 轨道发现的扫描上限
const DISCOVERY_LIMIT: usize = 20_000;

// PMT stream_type
const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_HEVC: u8 = 0x24;
const STREAM_TYPE_AAC: u8 = 0x0F;
const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;

/// 音频时间轴漂移超过该值时重新对齐到 PES PTS
const AUDIO_RESYNC_US: f64 = 500_000.0;

/// 探测包步长与同步偏移
///
/// 对 {188, 192, 204} 每个候选步长和 [0, stride) 内的偏移，要求连续
/// 5 个包位上都是 0x47；取命中数最多者，平手取最小步长。
/// 窗口装不下 5 个包的候选直接跳过；全部不中则判定格式错误。
pub(crate) fn probe_packet_layout(data: &[u8]) -> Result<(usize, usize)> {
    let mut best: Option<(usize, usize, usize)> = None; // (count, stride, offset)
    for &stride in &[188usize, 192, 204] {
        if data.len() < stride * 5 {
            continue;
        }
        let max_offset = data.len() - stride * 5;
        for offset in 0..stride.min(max_offset + 1) {
            let mut count = 0usize;
            loop {
                let pos = offset + count * stride;
                if pos >= data.len() || data[pos] != SYNC_BYTE {
                    break;
                }
                count += 1;
            }
            if count >= 5 {
                let better = match best {
                    None => true,
                    Some((c, s, _)) => count > c || (count == c && stride < s),
                };
                if better {
                    best = Some((count, stride, offset));
                }
            }
        }
    }
    best.map(|(_, stride, offset)| (stride, offset))
        .ok_or_else(|| PlayerError::FormatError("找不到 TS 同步字节".into()))
}

/// PES 头里的 33 位 PTS（90 kHz 时钟）
pub(crate) fn parse_pts(b: &[u8]) -> Option<u64> {
    if b.len() < 5 {
        return None;
    }
    let pts = (((b[0] as u64 >> 1) & 0x07) << 30)
        | ((b[1] as u64) << 22)
        | (((b[2] as u64 >> 1) & 0x7F) << 15)
        | ((b[3] as u64) << 7)
        | ((b[4] as u64 >> 1) & 0x7F);
    Some(pts)
}

fn pts_to_us(pts: u64) -> i64 {
    (pts as f64 * 1_000_000.0 / 90_000.0).round() as i64
}

/// 扫描 Annex-B 字节流的 NAL 单元（不含起始码）
pub(crate) fn annexb_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut starts = Vec::new();
    let mut i = 0usize;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }
    for (n, &start) in starts.iter().enumerate() {
        let mut end = if n + 1 < starts.len() {
            starts[n + 1] - 3
        } else {
            data.len()
        };
        // 4 字节起始码的前导零归前一个 NAL 去尾
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            units.push(&data[start..end]);
        }
    }
    units
}

/// Annex-B → AVCC：每个 NAL 换成 4 字节大端长度前缀；同时报告是否含 IDR
pub(crate) fn annexb_to_avcc(data: &[u8]) -> (Vec<u8>, bool) {
    let units = annexb_nal_units(data);
    let mut out = Vec::with_capacity(data.len() + units.len() * 4);
    let mut has_idr = false;
    for nal in units {
        if nal[0] & 0x1F == 5 {
            has_idr = true;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    (out, has_idr)
}

/// 用一个 SPS + 一个 PPS 合成 AVCDecoderConfigurationRecord
pub(crate) fn build_avcc(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(0x01);
    out.push(sps[1]);
    out.push(sps[2]);
    out.push(sps[3]);
    out.push(0xFF); // lengthSizeMinusOne = 3
    out.push(0xE1); // 1 个 SPS
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(0x01); // 1 个 PPS
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    out
}

/// ADTS 头解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    pub profile: u8,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_len: usize,
}

const ADTS_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// 解析一个 ADTS 头（7/9 字节）
pub(crate) fn parse_adts_header(b: &[u8]) -> Option<AdtsHeader> {
    if b.len() < 7 {
        return None;
    }
    // 前 12 位全 1
    if b[0] != 0xFF || (b[1] & 0xF0) != 0xF0 {
        return None;
    }
    // layer 必须为 0
    if (b[1] >> 1) & 0x03 != 0 {
        return None;
    }
    let profile = (b[2] >> 6) & 0x03;
    let sfi = ((b[2] >> 2) & 0x0F) as usize;
    if sfi >= ADTS_SAMPLE_RATES.len() {
        return None;
    }
    let channel_config = ((b[2] & 0x01) << 2) | ((b[3] >> 6) & 0x03);
    let frame_len =
        (((b[3] & 0x03) as usize) << 11) | ((b[4] as usize) << 3) | ((b[5] >> 5) as usize);
    if frame_len < 7 {
        return None;
    }
    Some(AdtsHeader {
        profile,
        sample_rate: ADTS_SAMPLE_RATES[sfi],
        channels: channel_config as u16,
        frame_len,
    })
}

/// 由 (AOT, 采样率索引, 声道配置) 合成 2 字节 AudioSpecificConfig
pub(crate) fn build_asc(aot: u8, sfi: u8, channels: u8) -> [u8; 2] {
    [
        (aot << 3) | (sfi >> 1),
        ((sfi & 0x01) << 7) | (channels << 3),
    ]
}

fn adts_sfi(sample_rate: u32) -> u8 {
    ADTS_SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(3) as u8
}

/// MPEG 音频头解析结果（Layer III）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mp3Header {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_len: usize,
    pub samples_per_frame: u32,
}

const MP3_BITRATES_V1: [u32; 16] =
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0];
const MP3_BITRATES_V2: [u32; 16] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0];
const MP3_RATES_V1: [u32; 4] = [44100, 48000, 32000, 0];
const MP3_RATES_V2: [u32; 4] = [22050, 24000, 16000, 0];
const MP3_RATES_V25: [u32; 4] = [11025, 12000, 8000, 0];

/// 解析一个 MPEG-1/2/2.5 Layer III 帧头
pub(crate) fn parse_mp3_header(b: &[u8]) -> Option<Mp3Header> {
    if b.len() < 4 {
        return None;
    }
    if b[0] != 0xFF || (b[1] & 0xE0) != 0xE0 {
        return None;
    }
    let version = (b[1] >> 3) & 0x03; // 0=2.5, 2=2, 3=1
    if version == 1 {
        return None;
    }
    let layer = (b[1] >> 1) & 0x03;
    if layer != 0x01 {
        // Layer III 的编码是 01
        return None;
    }
    let bitrate_index = ((b[2] >> 4) & 0x0F) as usize;
    let rate_index = ((b[2] >> 2) & 0x03) as usize;
    let padding = ((b[2] >> 1) & 0x01) as usize;
    let mode = (b[3] >> 6) & 0x03;

    let is_v1 = version == 3;
    let kbps = if is_v1 {
        MP3_BITRATES_V1[bitrate_index]
    } else {
        MP3_BITRATES_V2[bitrate_index]
    };
    let sample_rate = match version {
        3 => MP3_RATES_V1[rate_index],
        2 => MP3_RATES_V2[rate_index],
        _ => MP3_RATES_V25[rate_index],
    };
    if kbps == 0 || sample_rate == 0 {
        return None;
    }
    let coef = if is_v1 { 144 } else { 72 };
    let frame_len = (coef * kbps as usize * 1000) / sample_rate as usize + padding;
    Some(Mp3Header {
        sample_rate,
        channels: if mode == 3 { 1 } else { 2 },
        frame_len,
        samples_per_frame: if is_v1 { 1152 } else { 576 },
    })
}

/// 跨包的 PSI 段重组器
#[derive(Default)]
struct SectionAssembler {
    buf: Vec<u8>,
    collecting: bool,
}

impl SectionAssembler {
    /// 喂入一个包的载荷；攒满一个完整段时返回
    fn push(&mut self, payload_unit_start: bool, payload: &[u8]) -> Option<Vec<u8>> {
        if payload_unit_start {
            let pointer = *payload.first()? as usize;
            let start = 1 + pointer;
            if start > payload.len() {
                return None;
            }
            self.buf = payload[start..].to_vec();
            self.collecting = true;
        } else if self.collecting {
            self.buf.extend_from_slice(payload);
        } else {
            return None;
        }

        if self.buf.len() >= 3 {
            let section_length = (((self.buf[1] & 0x0F) as usize) << 8) | self.buf[2] as usize;
            let total = 3 + section_length;
            if self.buf.len() >= total {
                self.collecting = false;
                return Some(self.buf[..total].to_vec());
            }
        }
        None
    }
}

/// PAT：(program_number, pmt_pid) 列表
fn parse_pat(section: &[u8]) -> Vec<(u16, u16)> {
    let mut programs = Vec::new();
    if section.first() != Some(&0x00) || section.len() < 12 {
        return programs;
    }
    let mut pos = 8usize;
    while pos + 4 <= section.len() - 4 {
        let program = u16::from_be_bytes([section[pos], section[pos + 1]]);
        let pid = u16::from_be_bytes([section[pos + 2] & 0x1F, section[pos + 3]]);
        programs.push((program, pid));
        pos += 4;
    }
    programs
}

/// PMT：(stream_type, elementary_pid) 列表
fn parse_pmt(section: &[u8]) -> Vec<(u8, u16)> {
    let mut streams = Vec::new();
    if section.first() != Some(&0x02) || section.len() < 16 {
        return streams;
    }
    let program_info_len = (((section[10] & 0x0F) as usize) << 8) | section[11] as usize;
    let mut pos = 12 + program_info_len;
    while pos + 5 <= section.len() - 4 {
        let stream_type = section[pos];
        let pid = u16::from_be_bytes([section[pos + 1] & 0x1F, section[pos + 2]]);
        let es_info_len = (((section[pos + 3] & 0x0F) as usize) << 8) | section[pos + 4] as usize;
        streams.push((stream_type, pid));
        pos += 5 + es_info_len;
    }
    streams
}

/// 跨包的 PES 重组器
#[derive(Default)]
struct PesAssembler {
    buf: Vec<u8>,
    active: bool,
}

impl PesAssembler {
    /// 新 PES 开始时返回上一个完整 PES
    fn push(&mut self, payload_unit_start: bool, payload: &[u8]) -> Option<Vec<u8>> {
        let mut finished = None;
        if payload_unit_start {
            if self.active && !self.buf.is_empty() {
                finished = Some(std::mem::take(&mut self.buf));
            }
            self.buf.clear();
            self.active = true;
        }
        if self.active {
            self.buf.extend_from_slice(payload);
        }
        finished
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.active && !self.buf.is_empty() {
            self.active = false;
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }
}

/// 解析 PES 头，返回 (PTS 微秒, 载荷起点)
fn parse_pes(data: &[u8]) -> Option<(Option<i64>, usize)> {
    if data.len() < 9 || data[0] != 0 || data[1] != 0 || data[2] != 1 {
        return None;
    }
    let pts_dts_flags = (data[7] >> 6) & 0x03;
    let header_data_len = data[8] as usize;
    let payload_start = 9 + header_data_len;
    if payload_start > data.len() {
        return None;
    }
    let pts = if pts_dts_flags == 2 || pts_dts_flags == 3 {
        parse_pts(&data[9..]).map(pts_to_us)
    } else {
        None
    };
    Some((pts, payload_start))
}

/// 一个等待下一块确定时长的视频块
struct PendingVideo {
    kind: ChunkKind,
    timestamp_us: i64,
    data: Vec<u8>,
}

/// 音频帧切分方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioFraming {
    Adts,
    Mp3,
}

/// MPEG-TS 解封装器
pub struct TsDemuxer {
    source: Arc<dyn ByteSource>,
    stride: usize,
    sync_offset: u64,
    pos: u64,

    video_pid: Option<u16>,
    audio_pid: Option<u16>,
    video: Option<TrackDescriptor>,
    audio: Option<TrackDescriptor>,
    subtitles: Vec<TrackDescriptor>,
    audio_framing: Option<AudioFraming>,
    audio_sample_rate: u32,
    audio_samples_per_frame: u32,

    video_pes: PesAssembler,
    audio_pes: PesAssembler,
    audio_rem: Vec<u8>,
    /// 音频时间轴（微秒，小数累加避免漂移）
    audio_next_ts: Option<f64>,
    last_video_ts: i64,
    pending_video: Option<PendingVideo>,

    queue: VecDeque<MediaChunk>,
    paused: bool,
    stopped: bool,
    eos: bool,
    flushed: bool,
}

impl TsDemuxer {
    pub fn open(source: Arc<dyn ByteSource>) -> Result<Self> {
        info!("📦 打开 TS 源: {}", source.description());
        let len = source.len();
        let probe = source.read_range(0, (PROBE_WINDOW as u64).min(len))?;
        let (stride, sync_offset) = probe_packet_layout(&probe)?;
        debug!("TS 包布局: stride={}, sync_offset={}", stride, sync_offset);

        let mut demuxer = Self {
            source,
            stride,
            sync_offset: sync_offset as u64,
            pos: sync_offset as u64,
            video_pid: None,
            audio_pid: None,
            video: None,
            audio: None,
            subtitles: Vec::new(),
            audio_framing: None,
            audio_sample_rate: 0,
            audio_samples_per_frame: 0,
            video_pes: PesAssembler::default(),
            audio_pes: PesAssembler::default(),
            audio_rem: Vec::new(),
            audio_next_ts: None,
            last_video_ts: 0,
            pending_video: None,
            queue: VecDeque::new(),
            paused: false,
            stopped: false,
            eos: false,
            flushed: false,
        };
        demuxer.discover_tracks()?;

        // 提取从头重放：丢掉发现阶段的组装状态
        demuxer.pos = demuxer.sync_offset;
        demuxer.video_pes = PesAssembler::default();
        demuxer.audio_pes = PesAssembler::default();
        demuxer.audio_rem.clear();
        demuxer.audio_next_ts = None;
        Ok(demuxer)
    }

    /// 轨道发现：PAT → PMT → 扫出视频 SPS/PPS 与音频帧头
    fn discover_tracks(&mut self) -> Result<()> {
        let len = self.source.len();
        let mut pat = SectionAssembler::default();
        let mut pmt = SectionAssembler::default();
        let mut pmt_pid: Option<u16> = None;
        let mut video_stream_type = 0u8;
        let mut audio_stream_type = 0u8;
        let mut video_init = PesAssembler::default();
        let mut audio_init = PesAssembler::default();

        let mut packets = 0usize;
        let mut pos = self.sync_offset;
        'scan: while pos + TS_PACKET as u64 <= len && packets < DISCOVERY_LIMIT {
            let end = (pos + (READ_BATCH * self.stride) as u64).min(len);
            let batch = self.source.read_range(pos, end)?;
            let mut off = 0usize;
            while off + TS_PACKET <= batch.len() {
                let packet = &batch[off..off + TS_PACKET];
                off += self.stride;
                pos += self.stride as u64;
                packets += 1;

                let Some((pid, pus, payload)) = split_packet(packet) else {
                    continue;
                };

                if pid == 0 {
                    if let Some(section) = pat.push(pus, payload) {
                        if pmt_pid.is_none() {
                            pmt_pid = parse_pat(&section)
                                .into_iter()
                                .find(|&(program, _)| program != 0)
                                .map(|(_, pid)| pid);
                            debug!("PAT: pmt_pid={:?}", pmt_pid.map(|p| format!("{:#X}", p)));
                        }
                    }
                    continue;
                }
                if Some(pid) == pmt_pid && self.video_pid.is_none() && self.audio_pid.is_none() {
                    if let Some(section) = pmt.push(pus, payload) {
                        let streams = parse_pmt(&section);
                        for &(stream_type, es_pid) in &streams {
                            if self.video_pid.is_none()
                                && matches!(stream_type, STREAM_TYPE_H264 | STREAM_TYPE_HEVC)
                            {
                                self.video_pid = Some(es_pid);
                                video_stream_type = stream_type;
                            }
                            if self.audio_pid.is_none() && stream_type == STREAM_TYPE_AAC {
                                self.audio_pid = Some(es_pid);
                                audio_stream_type = stream_type;
                            }
                        }
                        // 没有 AAC 时回退到 MPEG 音频
                        if self.audio_pid.is_none() {
                            for &(stream_type, es_pid) in &streams {
                                if matches!(
                                    stream_type,
                                    STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO
                                ) {
                                    self.audio_pid = Some(es_pid);
                                    audio_stream_type = stream_type;
                                    break;
                                }
                            }
                        }
                        debug!(
                            "PMT: video_pid={:?} audio_pid={:?}",
                            self.video_pid, self.audio_pid
                        );
                        if video_stream_type == STREAM_TYPE_HEVC {
                            return Err(PlayerError::FormatError(
                                "TS 中的 HEVC 流暂不支持".into(),
                            ));
                        }
                    }
                    continue;
                }

                if Some(pid) == self.video_pid && self.video.is_none() {
                    if let Some(pes) = video_init.push(pus, payload) {
                        self.try_video_init(&pes);
                    }
                }
                if Some(pid) == self.audio_pid && self.audio.is_none() {
                    let _ = audio_init.push(pus, payload);
                    // 攒到的载荷里一出现有效帧头就能完成初始化，不必等完整 PES
                    if let Some((_, start)) = parse_pes(&audio_init.buf) {
                        let scan = audio_init.buf[start..].to_vec();
                        self.try_audio_init(&scan, audio_stream_type);
                    }
                }

                let video_done = self.video_pid.is_none() || self.video.is_some();
                let audio_done = self.audio_pid.is_none() || self.audio.is_some();
                if video_done && audio_done && self.video_pid.is_some() {
                    break 'scan;
                }
            }
        }

        // 扫描结束后再试一次残余的 PES
        if self.video.is_none() {
            if let Some(pes) = video_init.finish() {
                self.try_video_init(&pes);
            }
        }

        if pmt_pid.is_none() {
            return Err(PlayerError::FormatError("找不到 PAT/PMT".into()));
        }
        if self.video.is_none() && self.audio.is_none() {
            return Err(PlayerError::FormatError("TS 中没有可识别的音视频流".into()));
        }
        if self.video_pid.is_some() && self.video.is_none() {
            return Err(PlayerError::FormatError("找不到 H.264 SPS/PPS".into()));
        }
        if self.audio_pid.is_some() && self.audio.is_none() {
            warn!("音频初始化数据缺失，禁用音频轨");
            self.audio_pid = None;
        }
        Ok(())
    }

    /// 从一个视频 PES 里找 SPS/PPS 并构造轨道
    fn try_video_init(&mut self, pes: &[u8]) {
        let Some((_, start)) = parse_pes(pes) else {
            return;
        };
        let units = annexb_nal_units(&pes[start..]);
        let sps = units.iter().find(|n| n[0] & 0x1F == 7);
        let pps = units.iter().find(|n| n[0] & 0x1F == 8);
        if let (Some(sps), Some(pps)) = (sps, pps) {
            if sps.len() < 4 {
                return;
            }
            let codec = format!("avc1.{:02X}{:02X}{:02X}", sps[1], sps[2], sps[3]);
            let mut desc = TrackDescriptor::new(
                self.video_pid.unwrap_or(0) as u64,
                TrackKind::Video,
                codec,
            );
            desc.description = Some(build_avcc(sps, pps));
            info!("🎬 TS 视频轨: {}", desc.codec);
            self.video = Some(desc);
        }
    }

    /// 从音频 PES 载荷里找 ADTS / MP3 帧头并构造轨道
    fn try_audio_init(&mut self, payload: &[u8], stream_type: u8) {
        if stream_type == STREAM_TYPE_AAC {
            for i in 0..payload.len().saturating_sub(6) {
                if let Some(header) = parse_adts_header(&payload[i..]) {
                    let codec = format!("mp4a.40.{}", header.profile + 1);
                    let mut desc = TrackDescriptor::new(
                        self.audio_pid.unwrap_or(0) as u64,
                        TrackKind::Audio,
                        codec,
                    );
                    desc.sample_rate = header.sample_rate;
                    desc.channels = header.channels;
                    desc.description = Some(
                        build_asc(
                            header.profile + 1,
                            adts_sfi(header.sample_rate),
                            header.channels as u8,
                        )
                        .to_vec(),
                    );
                    self.audio_framing = Some(AudioFraming::Adts);
                    self.audio_sample_rate = header.sample_rate;
                    self.audio_samples_per_frame = 1024;
                    info!("🔊 TS 音频轨: {} ({} Hz)", desc.codec, desc.sample_rate);
                    self.audio = Some(desc);
                    return;
                }
            }
        } else {
            for i in 0..payload.len().saturating_sub(3) {
                if let Some(header) = parse_mp3_header(&payload[i..]) {
                    let mut desc = TrackDescriptor::new(
                        self.audio_pid.unwrap_or(0) as u64,
                        TrackKind::Audio,
                        "mp3",
                    );
                    desc.sample_rate = header.sample_rate;
                    desc.channels = header.channels;
                    self.audio_framing = Some(AudioFraming::Mp3);
                    self.audio_sample_rate = header.sample_rate;
                    self.audio_samples_per_frame = header.samples_per_frame;
                    info!("🔊 TS 音频轨: mp3 ({} Hz)", desc.sample_rate);
                    self.audio = Some(desc);
                    return;
                }
            }
        }
    }

    /// 读一批包并推进状态机
    fn advance(&mut self) -> Result<()> {
        let len = self.source.len();
        if self.pos + TS_PACKET as u64 > len {
            self.eos = true;
            return Ok(());
        }
        let end = (self.pos + (READ_BATCH * self.stride) as u64).min(len);
        let batch = match self.source.read_range(self.pos, end) {
            Ok(batch) => batch,
            Err(PlayerError::Aborted) if self.stopped => {
                self.eos = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut off = 0usize;
        while off + TS_PACKET <= batch.len() {
            let packet = &batch[off..off + TS_PACKET];
            off += self.stride;
            self.pos += self.stride as u64;

            let Some((pid, pus, payload)) = split_packet(packet) else {
                continue;
            };
            if Some(pid) == self.video_pid {
                if let Some(pes) = self.video_pes.push(pus, payload) {
                    self.emit_video_pes(&pes);
                }
            } else if Some(pid) == self.audio_pid {
                if let Some(pes) = self.audio_pes.push(pus, payload) {
                    self.emit_audio_pes(&pes);
                }
            }
        }
        Ok(())
    }

    /// 一个完整视频 PES → 一个 AVCC 访问单元
    fn emit_video_pes(&mut self, pes: &[u8]) {
        let Some((pts, start)) = parse_pes(pes) else {
            return;
        };
        let (data, has_idr) = annexb_to_avcc(&pes[start..]);
        if data.is_empty() {
            return;
        }
        let timestamp_us = pts.unwrap_or(self.last_video_ts);
        self.last_video_ts = timestamp_us;
        let kind = if has_idr {
            ChunkKind::Key
        } else {
            ChunkKind::Delta
        };
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
            data,
        });
    }

    /// 一个完整音频 PES → 拼进余量缓冲，逐帧切分
    fn emit_audio_pes(&mut self, pes: &[u8]) {
        let Some((pts, start)) = parse_pes(pes) else {
            return;
        };
        // 漂移保护：时间轴偏离 PES PTS 过远时重新对齐
        if let Some(pes_pts) = pts {
            match self.audio_next_ts {
                None => self.audio_next_ts = Some(pes_pts as f64),
                Some(next) => {
                    if (next - pes_pts as f64).abs() >= AUDIO_RESYNC_US {
                        debug!(
                            "音频时间轴重对齐: {:.0} → {} (漂移 {:.0} µs)",
                            next,
                            pes_pts,
                            (next - pes_pts as f64).abs()
                        );
                        self.audio_next_ts = Some(pes_pts as f64);
                        self.audio_rem.clear();
                    }
                }
            }
        }
        self.audio_rem.extend_from_slice(&pes[start..]);
        self.drain_audio_frames();
    }

    /// 从余量缓冲里切出所有完整帧
    fn drain_audio_frames(&mut self) {
        let Some(framing) = self.audio_framing else {
            return;
        };
        let mut pos = 0usize;
        loop {
            let rem = &self.audio_rem[pos..];
            if rem.is_empty() {
                break;
            }
            let header_frame_len = match framing {
                AudioFraming::Adts => parse_adts_header(rem).map(|h| h.frame_len),
                AudioFraming::Mp3 => parse_mp3_header(rem).map(|h| h.frame_len),
            };
            let Some(frame_len) = header_frame_len else {
                // 无效字节，丢一个继续找同步
                pos += 1;
                continue;
            };
            if rem.len() < frame_len {
                break;
            }
            let frame = rem[..frame_len].to_vec();
            let ts = self.audio_next_ts.unwrap_or(0.0);
            let duration_us =
                self.audio_samples_per_frame as f64 * 1_000_000.0 / self.audio_sample_rate as f64;
            self.queue.push_back(MediaChunk::Audio(EncodedAudioChunk {
                kind: ChunkKind::Key,
                timestamp_us: ts.round() as i64,
                duration_us: duration_us.round() as i64,
                data: frame,
            }));
            self.audio_next_ts = Some(ts + duration_us);
            pos += frame_len;
        }
        self.audio_rem.drain(..pos);
    }

    /// 流结束：冲刷组装器与前瞻槽
    fn flush_pending(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;
        if let Some(pes) = self.video_pes.finish() {
            self.emit_video_pes(&pes);
        }
        if let Some(pes) = self.audio_pes.finish() {
            self.emit_audio_pes(&pes);
        }
        if let Some(prev) = self.pending_video.take() {
            self.queue.push_back(MediaChunk::Video(EncodedVideoChunk {
                kind: prev.kind,
                timestamp_us: prev.timestamp_us,
                duration_us: 0,
                data: prev.data,
            }));
        }
    }
}

/// 拆一个 188 字节包：(pid, payload_unit_start, 载荷)
fn split_packet(packet: &[u8]) -> Option<(u16, bool, &[u8])> {
    if packet.len() < 4 || packet[0] != SYNC_BYTE {
        return None;
    }
    let payload_unit_start = (packet[1] >> 6) & 0x01 == 1;
    let pid = u16::from_be_bytes([packet[1] & 0x1F, packet[2]]);
    let afc = (packet[3] >> 4) & 0x03;
    // 无载荷
    if afc == 0 || afc == 2 {
        return None;
    }
    let payload_start = if afc == 3 {
        let af_len = *packet.get(4)? as usize;
        5 + af_len
    } else {
        4
    };
    if payload_start >= packet.len() {
        return None;
    }
    Some((pid, payload_unit_start, &packet[payload_start..]))
}

impl Demuxer for TsDemuxer {
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
            "TS 管线不提供字幕轨 (id={})",
            id
        )))
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
            self.advance()?;
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

    fn description(&self) -> String {
        format!(
            "TsDemuxer: {} (stride={})",
            self.source.description(),
            self.stride
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    // ============= 夹具构造 =============

    /// 一个 188 字节包，载荷不足时以 0xFF 填充
    fn ts_packet(pid: u16, pus: bool, counter: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 184);
        let mut packet = Vec::with_capacity(TS_PACKET);
        packet.push(SYNC_BYTE);
        packet.push(((pus as u8) << 6) | ((pid >> 8) as u8 & 0x1F));
        packet.push((pid & 0xFF) as u8);
        packet.push(0x10 | (counter & 0x0F)); // 仅载荷
        packet.extend_from_slice(payload);
        packet.resize(TS_PACKET, 0xFF);
        packet
    }

    /// 带指针字节的 PSI 载荷
    fn psi_payload(section: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x00];
        payload.extend_from_slice(section);
        payload
    }

    fn pat_section(program: u16, pmt_pid: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_be_bytes()); // transport_stream_id
        body.push(0xC1); // version + current_next
        body.push(0x00); // section_number
        body.push(0x00); // last_section_number
        body.extend_from_slice(&program.to_be_bytes());
        body.extend_from_slice(&(0xE000 | pmt_pid).to_be_bytes());
        body.extend_from_slice(&[0u8; 4]); // CRC 占位
        let mut section = vec![0x00];
        section.push(0xB0 | ((body.len() >> 8) as u8 & 0x0F));
        section.push((body.len() & 0xFF) as u8);
        section.extend_from_slice(&body);
        section
    }

    fn pmt_section(streams: &[(u8, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_be_bytes()); // program_number
        body.push(0xC1);
        body.push(0x00);
        body.push(0x00);
        body.extend_from_slice(&(0xE000 | 0x1FFF_u16).to_be_bytes()); // PCR PID
        body.extend_from_slice(&0xF000u16.to_be_bytes()); // program_info_length = 0
        for &(stream_type, pid) in streams {
            body.push(stream_type);
            body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
            body.extend_from_slice(&0xF000u16.to_be_bytes()); // es_info_length = 0
        }
        body.extend_from_slice(&[0u8; 4]); // CRC
        let mut section = vec![0x02];
        section.push(0xB0 | ((body.len() >> 8) as u8 & 0x0F));
        section.push((body.len() & 0xFF) as u8);
        section.extend_from_slice(&body);
        section
    }

    /// 编码 33 位 PTS 为 5 字节
    fn encode_pts(pts: u64) -> [u8; 5] {
        [
            0x21 | (((pts >> 30) & 0x07) as u8) << 1,
            ((pts >> 22) & 0xFF) as u8,
            0x01 | (((pts >> 15) & 0x7F) as u8) << 1,
            ((pts >> 7) & 0xFF) as u8,
            0x01 | ((pts & 0x7F) as u8) << 1,
        ]
    }

    fn pes_packet(stream_id: u8, pts: Option<u64>, payload: &[u8]) -> Vec<u8> {
        let mut pes = vec![0x00, 0x00, 0x01, stream_id, 0x00, 0x00, 0x80];
        match pts {
            Some(pts) => {
                pes.push(0x80); // 仅 PTS
                pes.push(0x05);
                pes.extend_from_slice(&encode_pts(pts));
            }
            None => {
                pes.push(0x00);
                pes.push(0x00);
            }
        }
        pes.extend_from_slice(payload);
        pes
    }

    /// SPS: profile 0x42, compat 0xC0, level 0x1E
    fn sps_nal() -> Vec<u8> {
        vec![0x67, 0x42, 0xC0, 0x1E, 0x8C, 0x68]
    }

    fn pps_nal() -> Vec<u8> {
        vec![0x68, 0xCE, 0x3C, 0x80]
    }

    fn idr_nal() -> Vec<u8> {
        vec![0x65, 0x88, 0x84, 0x00]
    }

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for u in units {
            out.extend_from_slice(&[0x00, 0x00, 0x01]);
            out.extend_from_slice(u);
        }
        out
    }

    /// 一个有效 ADTS 帧：48 kHz, AAC-LC, 双声道
    fn adts_frame(body_len: usize) -> Vec<u8> {
        let frame_len = 7 + body_len;
        let mut frame = vec![0u8; frame_len];
        frame[0] = 0xFF;
        frame[1] = 0xF1; // MPEG-4, layer 0, 无 CRC
        frame[2] = 0x4C; // profile=1 (LC), sfi=3 (48k)
        frame[3] = 0x80 | ((frame_len >> 11) & 0x03) as u8; // channels=2
        frame[4] = ((frame_len >> 3) & 0xFF) as u8;
        frame[5] = ((frame_len & 0x07) as u8) << 5 | 0x1F;
        frame[6] = 0xFC;
        for (i, b) in frame.iter_mut().enumerate().skip(7) {
            *b = (i & 0xFF) as u8;
        }
        frame
    }

    const VIDEO_PID: u16 = 0x100;
    const AUDIO_PID: u16 = 0x101;

    /// 完整的小 TS 流：PAT + PMT + 视频 PES (SPS/PPS/IDR) + 音频 PES (1 个 ADTS 帧)
    fn build_ts() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(ts_packet(0, true, 0, &psi_payload(&pat_section(1, 0x20))));
        out.extend(ts_packet(
            0x20,
            true,
            0,
            &psi_payload(&pmt_section(&[
                (STREAM_TYPE_H264, VIDEO_PID),
                (STREAM_TYPE_AAC, AUDIO_PID),
            ])),
        ));
        let video_es = annexb(&[&sps_nal(), &pps_nal(), &idr_nal()]);
        out.extend(ts_packet(
            VIDEO_PID,
            true,
            0,
            &pes_packet(0xE0, Some(0), &video_es),
        ));
        out.extend(ts_packet(
            AUDIO_PID,
            true,
            0,
            &pes_packet(0xC0, Some(0), &adts_frame(16)),
        ));
        // 第二个视频 PES 用来顶出前瞻槽
        let delta_es = annexb(&[&[0x41, 0x9A, 0x00]]);
        out.extend(ts_packet(
            VIDEO_PID,
            true,
            1,
            &pes_packet(0xE0, Some(3600), &delta_es), // 40 ms @ 90 kHz
        ));
        out
    }

    // ============= 用例 =============

    #[test]
    fn test_probe_stride_188() {
        let mut data = Vec::new();
        for _ in 0..6 {
            data.extend(ts_packet(0x30, false, 0, &[0x00]));
        }
        assert_eq!(probe_packet_layout(&data).unwrap(), (188, 0));
    }

    #[test]
    fn test_probe_stride_192_with_offset() {
        // M2TS：每个包前面 4 字节额外头
        let mut data = Vec::new();
        for _ in 0..6 {
            data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
            data.extend(ts_packet(0x30, false, 0, &[0x00]));
        }
        assert_eq!(probe_packet_layout(&data).unwrap(), (192, 4));
    }

    #[test]
    fn test_probe_rejects_garbage_and_short_buffers() {
        assert!(probe_packet_layout(&vec![0x00u8; 4000]).is_err());
        // 窗口装不下 5 个包
        assert!(probe_packet_layout(&vec![0x47u8; 100]).is_err());
    }

    #[test]
    fn test_probe_consecutive_sync_holds() {
        let mut data = Vec::new();
        for _ in 0..8 {
            data.extend(ts_packet(0x30, false, 0, &[0x00]));
        }
        let (stride, offset) = probe_packet_layout(&data).unwrap();
        for i in 0..5 {
            assert_eq!(data[offset + i * stride], SYNC_BYTE);
        }
    }

    #[test]
    fn test_pat_parsing_yields_pmt_pid() {
        // 3 个包，PID 0，一个程序 (program_number=1, pmt_pid=0x100)
        let section = pat_section(1, 0x100);
        let mut assembler = SectionAssembler::default();
        let mut result = None;
        for (i, pus) in [(0usize, true), (1, false), (2, false)] {
            let payload = if pus {
                psi_payload(&section)
            } else {
                vec![0xFF; 32]
            };
            let packet = ts_packet(0, pus, i as u8, &payload);
            let (_, pus, p) = split_packet(&packet).unwrap();
            if let Some(s) = assembler.push(pus, p) {
                result = Some(parse_pat(&s));
            }
        }
        let programs = result.expect("PAT 未组装完成");
        assert_eq!(programs, vec![(1, 0x100)]);
    }

    #[test]
    fn test_parse_pts_vectors() {
        // 全零向量
        assert_eq!(parse_pts(&[0x21, 0x00, 0x01, 0x00, 0x01]), Some(0));
        // 机械验证：3·2³⁰ + (1<<15) + 1
        assert_eq!(
            parse_pts(&[0x27, 0x00, 0x03, 0x00, 0x03]),
            Some(3_221_258_241)
        );
        // 编码再解码
        for &pts in &[0u64, 1, 90_000, (1 << 33) - 1] {
            assert_eq!(parse_pts(&encode_pts(pts)), Some(pts));
        }
    }

    #[test]
    fn test_avcc_synthesis() {
        let sps = sps_nal();
        let pps = pps_nal();
        let avcc = build_avcc(&sps, &pps);
        // 头部: 01 42 C0 1E FF E1 00 {sps_len}
        assert_eq!(&avcc[0..6], &[0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1]);
        assert_eq!(
            u16::from_be_bytes([avcc[6], avcc[7]]) as usize,
            sps.len()
        );
        assert_eq!(&avcc[8..8 + sps.len()], &sps[..]);
        let pps_pos = 8 + sps.len();
        assert_eq!(avcc[pps_pos], 0x01);
        assert_eq!(
            u16::from_be_bytes([avcc[pps_pos + 1], avcc[pps_pos + 2]]) as usize,
            pps.len()
        );
    }

    #[test]
    fn test_annexb_to_avcc_lengths() {
        let stream = annexb(&[&sps_nal(), &pps_nal(), &idr_nal()]);
        let (out, has_idr) = annexb_to_avcc(&stream);
        assert!(has_idr);
        let nal_sizes = [sps_nal().len(), pps_nal().len(), idr_nal().len()];
        // sum(NAL) + 4·count == 输出长度
        assert_eq!(out.len(), nal_sizes.iter().sum::<usize>() + 4 * 3);
        // 每个长度字段与其后的 NAL 一致
        let mut pos = 0usize;
        for size in nal_sizes {
            let len = u32::from_be_bytes(out[pos..pos + 4].try_into().unwrap()) as usize;
            assert_eq!(len, size);
            pos += 4 + len;
        }
        assert_eq!(pos, out.len());
    }

    #[test]
    fn test_adts_header_roundtrip() {
        let frame = adts_frame(16);
        let header = parse_adts_header(&frame).unwrap();
        assert_eq!(header.profile, 1);
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(header.channels, 2);
        assert_eq!(header.frame_len, frame.len());
        // codec 与 ASC
        assert_eq!(format!("mp4a.40.{}", header.profile + 1), "mp4a.40.2");
        let asc = build_asc(2, 3, 2);
        assert_eq!(asc, [0x11, 0x90]);
    }

    #[test]
    fn test_adts_refeed_concatenation() {
        // 任意切碎的 ADTS 流重组后与原字节一致
        let mut original = Vec::new();
        for i in 0..4 {
            original.extend(adts_frame(8 + i * 3));
        }
        let mut demuxer = open_fixture(build_ts());
        demuxer.audio_rem.clear();
        demuxer.audio_next_ts = Some(0.0);
        demuxer.queue.clear();

        for piece in original.chunks(11) {
            demuxer.audio_rem.extend_from_slice(piece);
            demuxer.drain_audio_frames();
        }
        let mut reassembled = Vec::new();
        for chunk in demuxer.queue.drain(..) {
            if let MediaChunk::Audio(a) = chunk {
                reassembled.extend(a.data);
            }
        }
        assert_eq!(reassembled, original);
    }

    #[test]
    fn test_mp3_header_frame_len() {
        // MPEG-1 Layer III, 128 kbps, 44100 Hz, 无填充, 立体声
        let header = parse_mp3_header(&[0xFF, 0xFB, 0x90, 0x00]).unwrap();
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.samples_per_frame, 1152);
        assert_eq!(header.frame_len, 144 * 128_000 / 44_100);
        assert_eq!(header.channels, 2);

        // MPEG-2, 64 kbps, 24000 Hz → coef 72, 576 采样
        let header2 = parse_mp3_header(&[0xFF, 0xF3, 0x84, 0xC0]).unwrap();
        assert_eq!(header2.samples_per_frame, 576);
        assert_eq!(header2.frame_len, 72 * 64_000 / 24_000);
        assert_eq!(header2.channels, 1);
    }

    fn open_fixture(data: Vec<u8>) -> TsDemuxer {
        TsDemuxer::open(Arc::new(MemorySource::new(data))).unwrap()
    }

    #[test]
    fn test_open_discovers_tracks() {
        let demuxer = open_fixture(build_ts());
        let video = demuxer.video_track().unwrap();
        assert_eq!(video.codec, "avc1.42C01E");
        let avcc = video.description.as_ref().unwrap();
        assert_eq!(&avcc[0..6], &[0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1]);

        let audio = demuxer.audio_track().unwrap();
        assert_eq!(audio.codec, "mp4a.40.2");
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.description, Some(vec![0x11, 0x90]));
    }

    #[test]
    fn test_extraction_video_and_audio() {
        let mut demuxer = open_fixture(build_ts());
        let mut videos = Vec::new();
        let mut audios = Vec::new();
        while let Some(chunk) = demuxer.next_chunk().unwrap() {
            match chunk {
                MediaChunk::Video(v) => videos.push(v),
                MediaChunk::Audio(a) => audios.push(a),
                _ => {}
            }
        }
        assert_eq!(videos.len(), 2);
        // 第一个 PES 含 IDR → key；时长来自前瞻（3600 ticks = 40 ms）
        assert_eq!(videos[0].kind, ChunkKind::Key);
        assert_eq!(videos[0].timestamp_us, 0);
        assert_eq!(videos[0].duration_us, 40_000);
        // 尾块时长 0
        assert_eq!(videos[1].kind, ChunkKind::Delta);
        assert_eq!(videos[1].duration_us, 0);
        // AVCC 转换后以长度前缀开头
        let first_len = u32::from_be_bytes(videos[0].data[0..4].try_into().unwrap()) as usize;
        assert_eq!(first_len, sps_nal().len());

        assert_eq!(audios.len(), 1);
        assert_eq!(audios[0].timestamp_us, 0);
        // 1024 / 48000 s
        assert_eq!(audios[0].duration_us, 21_333);
    }

    #[test]
    fn test_audio_pts_drift_resync() {
        let mut out = Vec::new();
        out.extend(ts_packet(0, true, 0, &psi_payload(&pat_section(1, 0x20))));
        out.extend(ts_packet(
            0x20,
            true,
            0,
            &psi_payload(&pmt_section(&[
                (STREAM_TYPE_H264, VIDEO_PID),
                (STREAM_TYPE_AAC, AUDIO_PID),
            ])),
        ));
        let video_es = annexb(&[&sps_nal(), &pps_nal(), &idr_nal()]);
        out.extend(ts_packet(
            VIDEO_PID,
            true,
            0,
            &pes_packet(0xE0, Some(0), &video_es),
        ));
        // 第一个音频 PES @ 0，第二个 @ 1 s（漂移 ≥ 500 ms → 重对齐）
        out.extend(ts_packet(
            AUDIO_PID,
            true,
            0,
            &pes_packet(0xC0, Some(0), &adts_frame(8)),
        ));
        out.extend(ts_packet(
            AUDIO_PID,
            true,
            1,
            &pes_packet(0xC0, Some(90_000), &adts_frame(8)),
        ));

        let mut demuxer = open_fixture(out);
        let mut audio_ts = Vec::new();
        while let Some(chunk) = demuxer.next_chunk().unwrap() {
            if let MediaChunk::Audio(a) = chunk {
                audio_ts.push(a.timestamp_us);
            }
        }
        assert_eq!(audio_ts, vec![0, 1_000_000]);
    }

    #[test]
    fn test_single_video_pes_yields_key_with_zero_duration() {
        let mut out = Vec::new();
        out.extend(ts_packet(0, true, 0, &psi_payload(&pat_section(1, 0x20))));
        out.extend(ts_packet(
            0x20,
            true,
            0,
            &psi_payload(&pmt_section(&[(STREAM_TYPE_H264, VIDEO_PID)])),
        ));
        let video_es = annexb(&[&sps_nal(), &pps_nal(), &idr_nal()]);
        out.extend(ts_packet(
            VIDEO_PID,
            true,
            0,
            &pes_packet(0xE0, Some(0), &video_es),
        ));

        let mut demuxer = open_fixture(out);
        let mut videos = Vec::new();
        while let Some(chunk) = demuxer.next_chunk().unwrap() {
            if let MediaChunk::Video(v) = chunk {
                videos.push(v);
            }
        }
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].kind, ChunkKind::Key);
        assert_eq!(videos[0].duration_us, 0);
    }
}
