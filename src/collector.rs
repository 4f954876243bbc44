//! 指纹采集状态机
//!
//! Idle -> Collecting -> {Finalized, Aborted}。同一时间最多一个采集会话；
//! 所有操作都可以显式指定目标指纹，未指定时使用会话指纹，两者都没有时报
//! `InvalidState`，不会隐式开启会话。

use tracing::debug;

use crate::algorithms::{Fingerprint, Measurement, WindowParams};
use crate::config::LocalizationConfig;
use crate::error::{LocalizationError, Result};

/// 采集状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionState {
    Idle,
    Collecting,
}

/// 指纹采集器
#[derive(Debug)]
pub struct FingerprintCollector {
    active: Option<Fingerprint>,
    window_params: WindowParams,
    min_samples_per_beacon: u32,
    min_fingerprint_samples: u32,
}

impl FingerprintCollector {
    pub fn new(config: &LocalizationConfig) -> Self {
        FingerprintCollector {
            active: None,
            window_params: WindowParams::from_config(config),
            min_samples_per_beacon: config.min_samples_per_beacon,
            min_fingerprint_samples: config.min_fingerprint_samples,
        }
    }

    pub fn state(&self) -> CollectionState {
        if self.active.is_some() {
            CollectionState::Collecting
        } else {
            CollectionState::Idle
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.active.is_some()
    }

    /// 当前会话指纹
    pub fn active(&self) -> Option<&Fingerprint> {
        self.active.as_ref()
    }

    /// 开始采集；已在采集中时返回 false，原会话不变
    pub fn start(&mut self) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.active = Some(Fingerprint::with_window_params(self.window_params));
        true
    }

    /// 放弃当前会话；没有会话时返回 false
    pub fn abort(&mut self) -> bool {
        self.active.take().is_some()
    }

    /// 送入一个测量
    pub fn feed(&mut self, measurement: &Measurement, fingerprint: Option<&mut Fingerprint>) -> Result<()> {
        let target = select_target(&mut self.active, fingerprint, self.window_params, "feed_measurement")?;
        target.record(measurement)
    }

    /// 创建一个采样点，返回贡献的信标数
    pub fn create_sample(&mut self, fingerprint: Option<&mut Fingerprint>) -> Result<usize> {
        let target = select_target(
            &mut self.active,
            fingerprint,
            self.window_params,
            "create_fingerprint_sample",
        )?;
        let contributed = target.create_sample()?;
        debug!(
            beacons = contributed,
            samples = target.sample_count(),
            "fingerprint sample created"
        );
        Ok(contributed)
    }

    /// 校验并返回固化后的指纹
    ///
    /// 使用会话指纹且成功时会话结束；校验失败时会话保持采集状态。
    /// 显式指定的指纹不会被修改，也不影响会话。
    pub fn finalize(&mut self, fingerprint: Option<&Fingerprint>) -> Result<Fingerprint> {
        match fingerprint {
            Some(explicit) => {
                explicit.finalized_copy(self.min_samples_per_beacon, self.min_fingerprint_samples)
            }
            None => {
                let active = self.active.as_ref().ok_or(LocalizationError::InvalidState {
                    operation: "finalize_fingerprint",
                })?;
                let finalized =
                    active.finalized_copy(self.min_samples_per_beacon, self.min_fingerprint_samples)?;
                self.active = None;
                Ok(finalized)
            }
        }
    }

    /// 导入前的校验：无论是否已固化，都按本采集器的阈值检查统计量并剔除信标
    pub fn prepare_import(&self, mut fingerprint: Fingerprint) -> Result<Fingerprint> {
        fingerprint.finalize(self.min_samples_per_beacon, self.min_fingerprint_samples)?;
        Ok(fingerprint)
    }
}

fn select_target<'a>(
    active: &'a mut Option<Fingerprint>,
    explicit: Option<&'a mut Fingerprint>,
    window_params: WindowParams,
    operation: &'static str,
) -> Result<&'a mut Fingerprint> {
    match explicit {
        Some(fingerprint) => {
            fingerprint.adopt_window_params(window_params);
            Ok(fingerprint)
        }
        None => active
            .as_mut()
            .ok_or(LocalizationError::InvalidState { operation }),
    }
}
