use std::sync::{Arc, Mutex};

/// 播放时钟 - 用于音视频同步
///
/// 把外部墙钟（毫秒）映射到媒体时间戳（微秒）。墙钟由调用方提供：
/// 音频启用时用音频设备时钟，否则用单调系统时钟。
#[derive(Clone)]
pub struct MediaClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_ts_us: i64,       // 基准媒体时间（微秒）
    base_wall_ms: f64,     // 基准墙钟时刻（毫秒）
    rate: f64,             // 播放速率（1.0 = 正常）
    started: bool,
    paused_at_wall_ms: Option<f64>,
    paused_at_ts_us: i64,  // 暂停时锁存的位置
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_ts_us: 0,
                base_wall_ms: 0.0,
                rate: 1.0,
                started: false,
                paused_at_wall_ms: None,
                paused_at_ts_us: 0,
            })),
        }
    }

    /// 启动时钟，把 (ts_us, wall_ms) 设为基准锚点
    pub fn start(&self, ts_us: i64, wall_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.base_ts_us = ts_us;
        inner.base_wall_ms = wall_ms;
        inner.started = true;
        inner.paused_at_wall_ms = None;
        inner.paused_at_ts_us = ts_us;
    }

    /// 获取当前媒体时间（微秒）
    pub fn now_us(&self, wall_ms: f64) -> i64 {
        let inner = self.inner.lock().unwrap();
        Self::now_unlocked(&inner, wall_ms)
    }

    /// 暂停：锁存当前位置，时间停止推进
    pub fn pause(&self, wall_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.paused_at_wall_ms.is_none() {
            inner.paused_at_ts_us = Self::now_unlocked(&inner, wall_ms);
            inner.paused_at_wall_ms = Some(wall_ms);
        }
    }

    /// 恢复：从锁存位置继续，resume 时刻成为新锚点
    pub fn resume(&self, wall_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.paused_at_wall_ms.is_some() {
            inner.base_ts_us = inner.paused_at_ts_us;
            inner.base_wall_ms = wall_ms;
            inner.paused_at_wall_ms = None;
        }
    }

    /// 跳转：重设两个锚点，不改变暂停状态
    pub fn seek(&self, ts_us: i64, wall_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.base_ts_us = ts_us;
        inner.base_wall_ms = wall_ms;
        inner.paused_at_ts_us = ts_us;
        if let Some(paused_at) = inner.paused_at_wall_ms.as_mut() {
            *paused_at = wall_ms;
        }
    }

    /// 设置播放速率（r > 0），换基保证时间连续
    pub fn set_rate(&self, rate: f64, wall_ms: f64) {
        if rate <= 0.0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.paused_at_wall_ms.is_none() && inner.started {
            let current = Self::now_unlocked(&inner, wall_ms);
            inner.base_ts_us = current;
            inner.base_wall_ms = wall_ms;
        }
        inner.rate = rate;
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().unwrap().started
    }

    /// 当前锚点 (base_ts_us, base_wall_ms)；未启动时为 None
    pub fn anchor(&self) -> Option<(i64, f64)> {
        let inner = self.inner.lock().unwrap();
        if inner.started {
            Some((inner.base_ts_us, inner.base_wall_ms))
        } else {
            None
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().paused_at_wall_ms.is_some()
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().unwrap().rate
    }

    /// 完全复位（load/stop 时使用）
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.base_ts_us = 0;
        inner.base_wall_ms = 0.0;
        inner.rate = 1.0;
        inner.started = false;
        inner.paused_at_wall_ms = None;
        inner.paused_at_ts_us = 0;
    }

    fn now_unlocked(inner: &ClockInner, wall_ms: f64) -> i64 {
        if !inner.started {
            return 0;
        }
        if inner.paused_at_wall_ms.is_some() {
            inner.paused_at_ts_us
        } else {
            inner.base_ts_us + ((wall_ms - inner.base_wall_ms) * 1000.0 * inner.rate).round() as i64
        }
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}
