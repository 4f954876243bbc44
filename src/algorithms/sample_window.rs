//! 按信标划分的滚动采样窗口
//!
//! 每个窗口保存时间跨度内的 (rssi, 时间戳) 样本，按时间衰减加权给出
//! 代表 RSSI。窗口时钟只前进不后退：乱序样本会被接受，但不会回拨过期时钟。

use std::collections::{HashMap, VecDeque};

use crate::algorithms::{Measurement, ObservationVector};
use crate::config::LocalizationConfig;

/// 窗口参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowParams {
    /// 时间跨度（毫秒）
    pub horizon_ms: i64,
    /// 衰减半衰期（毫秒）
    pub half_life_ms: i64,
    /// 给出代表值所需的最少样本数
    pub min_samples: usize,
}

impl WindowParams {
    pub fn from_config(config: &LocalizationConfig) -> Self {
        WindowParams {
            horizon_ms: config.window_horizon_ms,
            half_life_ms: config.window_half_life_ms,
            min_samples: config.window_min_samples,
        }
    }
}

impl Default for WindowParams {
    fn default() -> Self {
        Self::from_config(&LocalizationConfig::default())
    }
}

#[derive(Clone, Copy, Debug)]
struct TimedRssi {
    rssi: i32,
    timestamp_ms: i64,
}

/// 单个信标的滚动采样窗口
#[derive(Clone, Debug)]
pub struct SampleWindow {
    /// 按时间戳非递减排列
    samples: VecDeque<TimedRssi>,
    /// 见过的最新时间戳
    clock_ms: Option<i64>,
    params: WindowParams,
}

impl SampleWindow {
    /// 创建空窗口
    pub fn new(params: WindowParams) -> Self {
        SampleWindow {
            samples: VecDeque::new(),
            clock_ms: None,
            params,
        }
    }

    /// 记录一个样本，先清理过期样本
    pub fn record(&mut self, rssi: i32, timestamp_ms: i64) {
        self.expire(timestamp_ms);
        if self.is_expired_at(timestamp_ms) {
            return;
        }
        let pos = self
            .samples
            .partition_point(|s| s.timestamp_ms <= timestamp_ms);
        self.samples.insert(pos, TimedRssi { rssi, timestamp_ms });
    }

    /// 推进窗口时钟并移除过期样本；早于当前时钟的时间不会回拨
    pub fn expire(&mut self, now_ms: i64) {
        let clock = self.clock_ms.map_or(now_ms, |c| c.max(now_ms));
        self.clock_ms = Some(clock);

        while let Some(front) = self.samples.front() {
            if self.is_expired_at(front.timestamp_ms) {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_expired_at(&self, timestamp_ms: i64) -> bool {
        match self.clock_ms {
            Some(clock) => timestamp_ms < clock.saturating_sub(self.params.horizon_ms),
            None => false,
        }
    }

    /// 时间衰减加权平均；存活样本不足时返回 None（信标当前不可见）
    pub fn current_value(&self) -> Option<f64> {
        if self.samples.is_empty() || self.samples.len() < self.params.min_samples {
            return None;
        }
        let clock = self.clock_ms?;
        let half_life = self.params.half_life_ms as f64;

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for sample in &self.samples {
            let age = (clock - sample.timestamp_ms).max(0) as f64;
            let weight = 2f64.powf(-age / half_life);
            weighted_sum += weight * sample.rssi as f64;
            weight_total += weight;
        }

        if weight_total > 0.0 {
            Some(weighted_sum / weight_total)
        } else {
            None
        }
    }

    /// 信标当前是否可见
    pub fn is_visible(&self) -> bool {
        self.current_value().is_some()
    }

    /// 存活样本数
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 窗口时钟
    pub fn clock_ms(&self) -> Option<i64> {
        self.clock_ms
    }

    /// 清空样本，时钟保留
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// 一个会话内全部信标的窗口集合，共享同一时钟
///
/// 某个信标停止上报后，其它信标的新样本会推进共享时钟，使它按时过期。
#[derive(Clone, Debug)]
pub struct SampleWindowSet {
    windows: HashMap<String, SampleWindow>,
    clock_ms: Option<i64>,
    params: WindowParams,
}

impl SampleWindowSet {
    pub fn new(params: WindowParams) -> Self {
        SampleWindowSet {
            windows: HashMap::new(),
            clock_ms: None,
            params,
        }
    }

    /// 记录一个测量
    pub fn record(&mut self, measurement: &Measurement) {
        self.advance(measurement.timestamp_ms);
        let params = self.params;
        self.windows
            .entry(measurement.beacon_id.clone())
            .or_insert_with(|| SampleWindow::new(params))
            .record(measurement.rssi, measurement.timestamp_ms);
    }

    /// 推进共享时钟，不记录样本
    pub fn advance(&mut self, now_ms: i64) {
        let clock = self.clock_ms.map_or(now_ms, |c| c.max(now_ms));
        self.clock_ms = Some(clock);
    }

    /// 按共享时钟清理过期样本，返回当前可见信标的观测向量
    pub fn snapshot(&mut self) -> ObservationVector {
        if let Some(clock) = self.clock_ms {
            for window in self.windows.values_mut() {
                window.expire(clock);
            }
        }
        self.windows.retain(|_, window| !window.is_empty());

        let mut observation = ObservationVector::new();
        for (id, window) in &self.windows {
            if let Some(value) = window.current_value() {
                observation.insert(id.clone(), value);
            }
        }
        observation
    }

    /// 获取某个信标的窗口
    pub fn window(&self, beacon_id: &str) -> Option<&SampleWindow> {
        self.windows.get(beacon_id)
    }

    /// 共享时钟
    pub fn clock_ms(&self) -> Option<i64> {
        self.clock_ms
    }

    /// 有样本的信标数
    pub fn beacon_count(&self) -> usize {
        self.windows.len()
    }

    pub fn params(&self) -> WindowParams {
        self.params
    }

    /// 清空全部窗口，时钟保留
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

impl Default for SampleWindowSet {
    fn default() -> Self {
        Self::new(WindowParams::default())
    }
}
