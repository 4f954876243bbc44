//! 蓝牙信标指纹室内定位
//!
//! 支持的功能：
//! - 按信标的滚动采样窗口与时间衰减平滑
//! - 位置指纹的采集、固化与字符串编码
//! - 按 sphere / location 管理训练集
//! - 实时测量流的异步分类与位置回调

pub mod algorithms;
pub mod collector;
pub mod config;
pub mod error;
pub mod localization;
pub mod store;
pub mod tracking;

pub use algorithms::{
    BeaconStatistic, Classification, Fingerprint, FingerprintState, LocationUpdate, Measurement,
    ObservationVector,
};
pub use collector::CollectionState;
pub use config::LocalizationConfig;
pub use error::{LocalizationError, Result};
pub use localization::Localization;
pub use tracking::LocalizationCallback;
