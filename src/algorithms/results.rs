//! 定位结果数据结构
//!
//! 跟踪循环每次分类后向回调投递的位置更新

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::algorithms::Classification;

/// 位置更新
#[derive(Clone, Debug, PartialEq)]
pub struct LocationUpdate {
    /// 匹配所在的 sphere，未匹配时为 None
    pub sphere_id: Option<String>,
    /// 匹配的位置，未匹配时为 None
    pub location_id: Option<String>,
    /// 置信度 (0.0 ~ 1.0)，未匹配时为 0
    pub confidence: f64,
    /// 参与比较的信标数量
    pub beacon_count: usize,
    /// 产生该结果的窗口时钟（毫秒）
    pub timestamp_ms: i64,
}

impl LocationUpdate {
    /// 由分类结果创建
    pub fn matched(sphere_id: impl Into<String>, classification: Classification, timestamp_ms: i64) -> Self {
        LocationUpdate {
            sphere_id: Some(sphere_id.into()),
            location_id: Some(classification.location_id),
            confidence: classification.confidence.clamp(0.0, 1.0),
            beacon_count: classification.beacon_count,
            timestamp_ms,
        }
    }

    /// 未知位置
    pub fn no_match(beacon_count: usize, timestamp_ms: i64) -> Self {
        LocationUpdate {
            sphere_id: None,
            location_id: None,
            confidence: 0.0,
            beacon_count,
            timestamp_ms,
        }
    }

    /// 是否匹配到位置
    pub fn is_match(&self) -> bool {
        self.location_id.is_some()
    }

    /// 时间戳转为 UTC 时间
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }

    /// 是否是高置信度结果（置信度 > 0.7）
    pub fn is_high_confidence(&self) -> bool {
        self.confidence > 0.7
    }
}

impl fmt::Display for LocationUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.sphere_id, &self.location_id) {
            (Some(sphere), Some(location)) => write!(
                f,
                "{}/{} [{:.1}%, {} 信标]",
                sphere,
                location,
                self.confidence * 100.0,
                self.beacon_count
            ),
            _ => write!(f, "未知位置 [{} 信标]", self.beacon_count),
        }
    }
}
