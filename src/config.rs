//! 定位引擎配置
//!
//! 所有参数都带有适合 BLE 信标的默认值，可从 JSON 加载

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LocalizationError, Result};

/// RSSI 有效范围下限 (dBm)
pub const MIN_VALID_RSSI: i32 = -127;
/// RSSI 有效范围上限（不含），0 dBm 表示扫描器未给出读数
pub const MAX_VALID_RSSI: i32 = 0;

/// 定位引擎配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    /// 采样窗口时间跨度（毫秒），更早的样本过期
    pub window_horizon_ms: i64,
    /// 采样窗口的时间衰减半衰期（毫秒）
    pub window_half_life_ms: i64,
    /// 窗口给出代表值所需的最少存活样本数
    pub window_min_samples: usize,
    /// 固化后每个信标至少需要的样本点数，不足的信标被剔除
    pub min_samples_per_beacon: u32,
    /// 固化一个指纹至少需要的采样点数
    pub min_fingerprint_samples: u32,
    /// 单侧缺失信标的固定惩罚
    pub missing_beacon_penalty: f64,
    /// 方差下限 (dBm²)，避免单样本信标的方差为零
    pub variance_floor: f64,
    /// 低于该置信度的分类结果按“未匹配”上报
    pub min_confidence: f64,
    /// 信标 ID 过滤正则（None = 接受全部）
    pub beacon_filter: Option<String>,
    /// 跟踪队列容量，队列满时新测量被丢弃
    pub tracking_queue_capacity: usize,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        LocalizationConfig {
            window_horizon_ms: 10_000,
            window_half_life_ms: 2_000,
            window_min_samples: 1,
            min_samples_per_beacon: 1,
            min_fingerprint_samples: 1,
            missing_beacon_penalty: 9.0,
            variance_floor: 4.0,
            min_confidence: 0.0,
            beacon_filter: None,
            tracking_queue_capacity: 1024,
        }
    }
}

impl LocalizationConfig {
    /// 从 JSON 字符串加载配置，缺省字段使用默认值
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LocalizationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置的合理性
    pub fn validate(&self) -> Result<()> {
        if self.window_horizon_ms <= 0 {
            return Err(config_error("window_horizon_ms", "must be positive"));
        }
        if self.window_half_life_ms <= 0 {
            return Err(config_error("window_half_life_ms", "must be positive"));
        }
        if self.window_min_samples == 0 {
            return Err(config_error("window_min_samples", "must be at least 1"));
        }
        if self.min_samples_per_beacon == 0 {
            return Err(config_error("min_samples_per_beacon", "must be at least 1"));
        }
        if self.min_fingerprint_samples == 0 {
            return Err(config_error("min_fingerprint_samples", "must be at least 1"));
        }
        if !(self.missing_beacon_penalty.is_finite() && self.missing_beacon_penalty >= 0.0) {
            return Err(config_error(
                "missing_beacon_penalty",
                "must be a finite non-negative number",
            ));
        }
        if !(self.variance_floor.is_finite() && self.variance_floor > 0.0) {
            return Err(config_error("variance_floor", "must be a finite positive number"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(config_error("min_confidence", "must lie in [0, 1]"));
        }
        if self.tracking_queue_capacity == 0 {
            return Err(config_error("tracking_queue_capacity", "must be at least 1"));
        }
        self.compile_beacon_filter()?;
        Ok(())
    }

    /// 编译信标过滤正则
    pub fn compile_beacon_filter(&self) -> Result<Option<Regex>> {
        match &self.beacon_filter {
            Some(pattern) => Ok(Some(Regex::new(pattern)?)),
            None => Ok(None),
        }
    }
}

fn config_error(field: &'static str, message: &str) -> LocalizationError {
    LocalizationError::Config {
        field,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LocalizationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            LocalizationConfig::from_json_str(r#"{"window_horizon_ms": 4000, "beacon_filter": "^RFstar_"}"#)
                .unwrap();
        assert_eq!(config.window_horizon_ms, 4000);
        assert_eq!(config.window_half_life_ms, 2000);
        assert!(config.compile_beacon_filter().unwrap().unwrap().is_match("RFstar_C5D6"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = LocalizationConfig {
            variance_floor: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LocalizationError::Config { field: "variance_floor", .. })
        ));

        let config = LocalizationConfig {
            beacon_filter: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LocalizationError::BeaconFilter(_))));
    }
}
