use crate::core::{PlayerError, Result};
use crate::source::ByteSource;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// HTTP 源请求策略
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// 每个请求的最大重试次数
    pub max_retries: u32,
    /// 指数退避基数（毫秒）
    pub backoff_base_ms: u64,
    /// Referer 头；跨域源默认不携带
    pub referer: Option<String>,
    /// 请求超时
    pub timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_base_ms: 300,
            referer: None,
            timeout: Duration::from_secs(15),
        }
    }
}

/// 第 attempt 次重试前的退避时长（attempt 从 0 开始）
fn backoff_delay_ms(config: &HttpSourceConfig, attempt: u32) -> u64 {
    config.backoff_base_ms.saturating_mul(1u64 << attempt.min(16))
}

/// 解析 `Content-Range: bytes 0-1/<total>` 的总长度
fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim();
    let total = rest.split('/').nth(1)?.trim();
    if total == "*" {
        return None;
    }
    total.parse().ok()
}

/// 读取模式：真实 Range 读取，或整体下载后的内存降级模式
enum ReadMode {
    /// 服务器支持字节区间
    Range,
    /// 服务器忽略 Range：整个资源一次取回缓存在内存（降级模式）
    Cached(Vec<u8>),
}

/// HTTP 字节源
///
/// 打开时用一字节 `Range: bytes=0-1` 探测：
/// 响应 206 且带 `Content-Range: bytes 0-1/<total>` 则使用真实区间读取；
/// 否则退化为一次性整体下载（仅当能确定总长度时可接受）。
pub struct HttpSource {
    client: reqwest::blocking::Client,
    url: String,
    len: u64,
    mode: ReadMode,
    config: HttpSourceConfig,
    aborted: AtomicBool,
}

impl HttpSource {
    pub fn open(url: &str, config: HttpSourceConfig) -> Result<Self> {
        info!("🌐 打开 HTTP 源: {}", url);

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PlayerError::NetworkError(format!("创建 HTTP 客户端失败: {}", e)))?;

        // 探测请求：Range: bytes=0-1
        let probe = Self::request_with_retry(&client, &config, url, Some((0, 2)))?;
        let status = probe.status();
        let headers = probe.headers().clone();

        let content_range_total = headers
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        if status.as_u16() == 206 {
            if let Some(total) = content_range_total {
                info!("✅ 服务器支持 Range 读取，总长度 {} 字节", total);
                return Ok(Self {
                    client,
                    url: url.to_string(),
                    len: total,
                    mode: ReadMode::Range,
                    config,
                    aborted: AtomicBool::new(false),
                });
            }
        }

        // 服务器忽略 Range：必须能确定总长度，然后整体下载
        let content_length = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .or_else(|| headers.get("x-content-length"))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let Some(expected) = content_length else {
            return Err(PlayerError::OpenError(format!(
                "服务器不支持 Range 且未提供 Content-Length: {}",
                url
            )));
        };

        warn!("⚠️  服务器不支持 Range，整体下载 {} 字节（降级模式）", expected);
        let body = Self::request_with_retry(&client, &config, url, None)?
            .bytes()
            .map_err(|e| PlayerError::NetworkError(format!("下载响应体失败: {}", e)))?
            .to_vec();

        if body.len() as u64 != expected {
            debug!("下载长度 {} 与 Content-Length {} 不一致，以实际为准", body.len(), expected);
        }

        Ok(Self {
            client,
            url: url.to_string(),
            len: body.len() as u64,
            mode: ReadMode::Cached(body),
            config,
            aborted: AtomicBool::new(false),
        })
    }

    /// 发送一次请求（可选 Range），带重试与指数退避
    fn request_with_retry(
        client: &reqwest::blocking::Client,
        config: &HttpSourceConfig,
        url: &str,
        range: Option<(u64, u64)>,
    ) -> Result<reqwest::blocking::Response> {
        let mut last_err = None;

        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                let delay = backoff_delay_ms(config, attempt - 1);
                warn!("🔄 第 {} 次重试 {}（退避 {} ms）", attempt, url, delay);
                std::thread::sleep(Duration::from_millis(delay));
            }

            let mut builder = client.get(url);
            if let Some((start, end)) = range {
                builder = builder.header(
                    reqwest::header::RANGE,
                    format!("bytes={}-{}", start, end.saturating_sub(1)),
                );
            }
            if let Some(referer) = &config.referer {
                builder = builder.header(reqwest::header::REFERER, referer.clone());
            }

            match builder.send() {
                Ok(resp) if resp.status().is_success() || resp.status().as_u16() == 206 => {
                    return Ok(resp);
                }
                Ok(resp) => {
                    last_err = Some(PlayerError::NetworkError(format!(
                        "HTTP {}: {}",
                        resp.status(),
                        url
                    )));
                }
                Err(e) => {
                    last_err = Some(PlayerError::NetworkError(format!("请求失败: {}", e)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| PlayerError::NetworkError("未知网络错误".to_string())))
    }
}

impl ByteSource for HttpSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(PlayerError::Aborted);
        }
        if start > end || end > self.len {
            return Err(PlayerError::FormatError(format!(
                "读取区间越界: [{}, {}) / {}",
                start, end, self.len
            )));
        }
        if start == end {
            return Ok(Vec::new());
        }

        match &self.mode {
            ReadMode::Cached(data) => Ok(data[start as usize..end as usize].to_vec()),
            ReadMode::Range => {
                let resp =
                    Self::request_with_retry(&self.client, &self.config, &self.url, Some((start, end)))?;
                if resp.status().as_u16() != 206 {
                    return Err(PlayerError::NetworkError(format!(
                        "期望 206，收到 {}: {}",
                        resp.status(),
                        self.url
                    )));
                }
                let body = resp
                    .bytes()
                    .map_err(|e| {
                        if self.aborted.load(Ordering::SeqCst) {
                            PlayerError::Aborted
                        } else {
                            PlayerError::NetworkError(format!("读取响应体失败: {}", e))
                        }
                    })?
                    .to_vec();
                if body.len() as u64 != end - start {
                    return Err(PlayerError::NetworkError(format!(
                        "Range 响应长度不符: 期望 {}，收到 {}",
                        end - start,
                        body.len()
                    )));
                }
                Ok(body)
            }
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn description(&self) -> String {
        let mode = match self.mode {
            ReadMode::Range => "range",
            ReadMode::Cached(_) => "cached",
        };
        format!("HttpSource: {} ({} bytes, {})", self.url, self.len, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-1/1048576"), Some(1048576));
        assert_eq!(parse_content_range_total("bytes 0-1/*"), None);
        assert_eq!(parse_content_range_total("items 0-1/5"), None);
        assert_eq!(parse_content_range_total("bytes 500-999/1000"), Some(1000));
    }

    #[test]
    fn test_backoff_is_exponential() {
        let config = HttpSourceConfig::default();
        assert_eq!(backoff_delay_ms(&config, 0), 300);
        assert_eq!(backoff_delay_ms(&config, 1), 600);
        assert_eq!(backoff_delay_ms(&config, 2), 1200);
    }

    #[test]
    fn test_default_config_has_no_referer() {
        let config = HttpSourceConfig::default();
        assert!(config.referer.is_none());
        assert_eq!(config.max_retries, 1);
    }
}
