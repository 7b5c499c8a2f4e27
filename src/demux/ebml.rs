use crate::core::{PlayerError, Result};
use crate::source::ByteSource;

/// EBML 变长整数（VINT）解析
///
/// 首字节的前导 1 的位置决定总长度；返回 (去掉长度标记的值, 占用字节数)。
/// 用于元素尺寸与 Block 里的轨道号。
pub fn parse_vint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    if len > 8 || data.len() < len {
        return None;
    }
    let mut value = (first as u64) & (0xFF >> len);
    for &b in &data[1..len] {
        value = (value << 8) | b as u64;
    }
    Some((value, len))
}

/// 元素 ID 解析：保留长度标记位（Matroska 的 ID 约定）
pub fn parse_vint_id(data: &[u8]) -> Option<(u32, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    if len > 4 || data.len() < len {
        return None;
    }
    let mut value = first as u32;
    for &b in &data[1..len] {
        value = (value << 8) | b as u32;
    }
    Some((value, len))
}

/// 有符号 VINT（EBML 花边的尺寸差分）：值减去 2^(7·len-1) - 1
pub fn parse_vint_signed(data: &[u8]) -> Option<(i64, usize)> {
    let (raw, len) = parse_vint(data)?;
    let bias = (1i64 << (7 * len - 1)) - 1;
    Some((raw as i64 - bias, len))
}

/// 尺寸 VINT 是否为"未知长度"（有效位全 1）
fn vint_size_is_unknown(value: u64, len: usize) -> bool {
    value == (1u64 << (7 * len)) - 1
}

/// 一个元素头：ID、数据长度（未知为 None）与数据起始偏移
#[derive(Debug, Clone, Copy)]
pub struct ElementHeader {
    pub id: u32,
    pub size: Option<u64>,
    pub data_start: u64,
}

impl ElementHeader {
    /// 已知尺寸元素的数据结束偏移
    pub fn data_end(&self) -> Option<u64> {
        self.size.map(|s| self.data_start + s)
    }
}

/// 基于字节源的流式 EBML 读取器
///
/// 维护一个滑动缓冲窗口，保证任何时刻至少能看到一个元素头 + 尺寸。
pub struct EbmlReader {
    source: std::sync::Arc<dyn ByteSource>,
    pos: u64,
    len: u64,
    buf: Vec<u8>,
    buf_start: u64,
}

/// 缓冲窗口大小
const WINDOW: u64 = 64 * 1024;
/// 元素头最大字节数（4 字节 ID + 8 字节尺寸）
const MAX_HEADER: u64 = 12;

impl EbmlReader {
    pub fn new(source: std::sync::Arc<dyn ByteSource>) -> Self {
        let len = source.len();
        Self {
            source,
            pos: 0,
            len,
            buf: Vec::new(),
            buf_start: 0,
        }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos.min(self.len);
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.len
    }

    /// 保证缓冲窗口覆盖 [pos, pos+want)，返回窗口内的切片
    fn window(&mut self, want: u64) -> Result<&[u8]> {
        let want = want.min(self.len - self.pos);
        let covered = self.pos >= self.buf_start
            && self.pos + want <= self.buf_start + self.buf.len() as u64;
        if !covered {
            let end = (self.pos + want.max(WINDOW)).min(self.len);
            self.buf = self.source.read_range(self.pos, end)?;
            self.buf_start = self.pos;
        }
        let off = (self.pos - self.buf_start) as usize;
        Ok(&self.buf[off..off + want as usize])
    }

    /// 读取下一个元素头；到达流尾返回 None
    pub fn read_element(&mut self) -> Result<Option<ElementHeader>> {
        if self.at_end() {
            return Ok(None);
        }
        let pos = self.pos;
        let head = self.window(MAX_HEADER)?;
        let (id, id_len) = parse_vint_id(head)
            .ok_or_else(|| PlayerError::FormatError(format!("无效的 EBML ID @ {}", pos)))?;
        let (raw_size, size_len) = parse_vint(&head[id_len..])
            .ok_or_else(|| PlayerError::FormatError(format!("无效的 EBML 尺寸 @ {}", pos)))?;

        let data_start = self.pos + (id_len + size_len) as u64;
        let size = if vint_size_is_unknown(raw_size, size_len) {
            None
        } else {
            Some(raw_size)
        };
        self.pos = data_start;
        Ok(Some(ElementHeader {
            id,
            size,
            data_start,
        }))
    }

    /// 读取 n 字节数据并前进
    pub fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>> {
        if self.pos + n > self.len {
            return Err(PlayerError::FormatError(format!(
                "EBML 数据越界: 需要 {} 字节 @ {}",
                n, self.pos
            )));
        }
        let data = self.window(n)?.to_vec();
        self.pos += n;
        Ok(data)
    }

    /// 跳过 n 字节
    pub fn skip(&mut self, n: u64) {
        self.pos = (self.pos + n).min(self.len);
    }

    /// 读取无符号整数元素（最长 8 字节，大端）
    pub fn read_uint(&mut self, size: u64) -> Result<u64> {
        if size > 8 {
            return Err(PlayerError::FormatError(format!("整数元素过长: {}", size)));
        }
        let data = self.read_bytes(size)?;
        let mut value = 0u64;
        for b in data {
            value = (value << 8) | b as u64;
        }
        Ok(value)
    }

    /// 读取 UTF-8 字符串元素
    pub fn read_string(&mut self, size: u64) -> Result<String> {
        let data = self.read_bytes(size)?;
        Ok(String::from_utf8_lossy(&data)
            .trim_end_matches('\0')
            .to_string())
    }

    /// 读取浮点元素（4 或 8 字节）
    pub fn read_float(&mut self, size: u64) -> Result<f64> {
        let data = self.read_bytes(size)?;
        match data.len() {
            4 => Ok(f32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64),
            8 => Ok(f64::from_be_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ])),
            n => Err(PlayerError::FormatError(format!("浮点元素长度非法: {}", n))),
        }
    }
}
