//! 信号测量与观测向量
//!
//! 扫描层解析出的 (rssi, id, 时间戳) 元组，以及分类时使用的
//! 信标 -> 代表 RSSI 映射

use std::collections::HashMap;

use chrono::Utc;
use regex::Regex;

use crate::config::{LocalizationConfig, MAX_VALID_RSSI, MIN_VALID_RSSI};
use crate::error::{LocalizationError, Result};

// ============================================================================
// 信号测量数据结构
// ============================================================================

/// 单个信号测量
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Measurement {
    /// 信标 ID
    pub beacon_id: String,
    /// RSSI 值 (dBm)
    pub rssi: i32,
    /// 时间戳（毫秒）
    pub timestamp_ms: i64,
}

impl Measurement {
    /// 创建测量，时间戳为 None 时使用当前时间
    pub fn new(beacon_id: impl Into<String>, rssi: i32, timestamp_ms: Option<i64>) -> Self {
        Measurement {
            beacon_id: beacon_id.into(),
            rssi,
            timestamp_ms: timestamp_ms.unwrap_or_else(now_ms),
        }
    }

    /// RSSI 是否在有效范围 [-127, 0) 内
    pub fn has_valid_rssi(&self) -> bool {
        (MIN_VALID_RSSI..MAX_VALID_RSSI).contains(&self.rssi)
    }
}

/// 当前墙钟时间（毫秒）
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 测量准入检查：RSSI 范围与信标 ID 过滤
#[derive(Clone, Debug, Default)]
pub struct MeasurementFilter {
    beacon_filter: Option<Regex>,
}

impl MeasurementFilter {
    pub fn new(beacon_filter: Option<Regex>) -> Self {
        MeasurementFilter { beacon_filter }
    }

    pub fn from_config(config: &LocalizationConfig) -> Result<Self> {
        Ok(Self::new(config.compile_beacon_filter()?))
    }

    /// 检查测量是否可用
    pub fn check(&self, measurement: &Measurement) -> Result<()> {
        if !measurement.has_valid_rssi() {
            return Err(LocalizationError::InvalidMeasurement {
                beacon_id: measurement.beacon_id.clone(),
                rssi: measurement.rssi,
            });
        }
        if let Some(pattern) = &self.beacon_filter {
            if !pattern.is_match(&measurement.beacon_id) {
                return Err(LocalizationError::BeaconFiltered {
                    beacon_id: measurement.beacon_id.clone(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// 观测向量
// ============================================================================

/// 观测向量：信标 ID -> 代表 RSSI
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservationVector {
    values: HashMap<String, f64>,
}

impl ObservationVector {
    /// 创建空观测
    pub fn new() -> Self {
        ObservationVector {
            values: HashMap::new(),
        }
    }

    /// 从 (beacon_id, rssi) 对创建
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut observation = ObservationVector::new();
        for (id, rssi) in pairs {
            observation.insert(id, rssi);
        }
        observation
    }

    /// 添加/覆盖一个信标的值
    pub fn insert(&mut self, beacon_id: impl Into<String>, rssi: f64) {
        self.values.insert(beacon_id.into(), rssi);
    }

    /// 获取 RSSI
    pub fn get(&self, beacon_id: &str) -> Option<f64> {
        self.values.get(beacon_id).copied()
    }

    /// 是否包含信标
    pub fn contains(&self, beacon_id: &str) -> bool {
        self.values.contains_key(beacon_id)
    }

    /// 迭代 (信标, RSSI)
    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.values.iter()
    }

    /// 信标数量
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
