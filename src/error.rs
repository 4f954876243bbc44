//! 定位引擎错误定义
//!
//! 按来源分类：会话状态 / 指纹校验 / 测量输入 / 编码 / 配置

use thiserror::Error;

/// 统一错误类型
#[derive(Debug, Error)]
pub enum LocalizationError {
    // ===== 会话状态 =====
    /// 没有进行中的采集会话，且调用方未显式指定指纹
    #[error("invalid state: {operation} requires an active fingerprint session or an explicit fingerprint")]
    InvalidState { operation: &'static str },

    // ===== 指纹校验 =====
    /// 指纹样本不足，无法固化
    #[error("fingerprint validation failed: {message}")]
    ValidationFailure { message: String },

    /// 试图修改已固化的指纹
    #[error("fingerprint is finalized and can no longer accept samples")]
    FingerprintFinalized,

    // ===== 测量输入 =====
    /// RSSI 超出有效范围
    #[error("invalid measurement for beacon '{beacon_id}': rssi {rssi} dBm out of range")]
    InvalidMeasurement { beacon_id: String, rssi: i32 },

    /// 信标 ID 被过滤规则拒绝
    #[error("beacon '{beacon_id}' rejected by beacon filter")]
    BeaconFiltered { beacon_id: String },

    // ===== 编码 =====
    /// 指纹或配置的 JSON 编解码失败
    #[error("json encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    // ===== 配置 =====
    /// 配置校验失败
    #[error("config validation error at '{field}': {message}")]
    Config { field: &'static str, message: String },

    /// 信标过滤正则无效
    #[error("invalid beacon filter: {0}")]
    BeaconFilter(#[from] regex::Error),

    // ===== 运行时 =====
    /// 不在 tokio 运行时中创建引擎
    #[error("localization engine must be created inside a tokio runtime")]
    NoRuntime,
}

impl LocalizationError {
    /// 是否为可重试的校验失败（继续采样后可再次固化）
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, LocalizationError::ValidationFailure { .. })
    }

    /// 是否为会话状态错误
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, LocalizationError::InvalidState { .. })
    }
}

/// 结果别名
pub type Result<T> = std::result::Result<T, LocalizationError>;
