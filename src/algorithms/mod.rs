//! 指纹定位算法模块
//!
//! 该模块提供指纹定位的核心算法：
//! - 按信标划分的滚动采样窗口
//! - 指纹的增量统计与固化
//! - 基于加权距离的指纹分类
//! - 定位结果结构

pub mod measurement;
pub mod sample_window;
pub mod fingerprint;
pub mod classifier;
pub mod results;

pub use measurement::*;
pub use sample_window::*;
pub use fingerprint::*;
pub use classifier::*;
pub use results::*;
