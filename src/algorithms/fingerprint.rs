//! 位置指纹
//!
//! 指纹是某个位置的 RSSI 统计特征：信标 ID -> 运行均值/方差。
//! 采集阶段可变（持有自己的采样窗口），固化后只用于匹配。
//! 指纹本身没有身份，身份由存储时的 (sphere, location) 键决定。

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::algorithms::{Measurement, ObservationVector, SampleWindowSet, WindowParams};
use crate::error::{LocalizationError, Result};

/// 单个信标的统计量（Welford 在线均值/方差）
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconStatistic {
    mean: f64,
    m2: f64,
    count: u32,
}

impl BeaconStatistic {
    /// 累加一个采样点
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// 均值 (dBm)
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// 样本方差 (dBm²)，少于两个样本时为 0
    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 贡献的采样点数
    pub fn count(&self) -> u32 {
        self.count
    }

    /// 统计量是否自洽：至少一个样本，均值有限，M2 非负
    pub fn is_well_formed(&self) -> bool {
        self.count > 0 && self.mean.is_finite() && self.m2.is_finite() && self.m2 >= 0.0
    }
}

/// 指纹生命周期
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintState {
    /// 采集中，接受样本
    Collecting,
    /// 已固化，只读
    Finalized,
}

/// 位置指纹
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fingerprint {
    state: FingerprintState,
    /// 已创建的采样点数
    sample_count: u32,
    beacons: BTreeMap<String, BeaconStatistic>,
    #[serde(skip)]
    windows: SampleWindowSet,
}

impl Fingerprint {
    /// 创建新的可变指纹（默认窗口参数）
    pub fn new() -> Self {
        Self::with_window_params(WindowParams::default())
    }

    /// 使用指定窗口参数创建可变指纹
    pub fn with_window_params(params: WindowParams) -> Self {
        Fingerprint {
            state: FingerprintState::Collecting,
            sample_count: 0,
            beacons: BTreeMap::new(),
            windows: SampleWindowSet::new(params),
        }
    }

    pub fn state(&self) -> FingerprintState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == FingerprintState::Finalized
    }

    /// 已创建的采样点数
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// 获取信标统计
    pub fn beacon(&self, beacon_id: &str) -> Option<&BeaconStatistic> {
        self.beacons.get(beacon_id)
    }

    /// 获取信标均值
    pub fn mean(&self, beacon_id: &str) -> Option<f64> {
        self.beacons.get(beacon_id).map(BeaconStatistic::mean)
    }

    /// 迭代全部信标统计（按 ID 排序）
    pub fn beacons(&self) -> impl Iterator<Item = (&String, &BeaconStatistic)> {
        self.beacons.iter()
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }

    /// 采集窗口（仅采集阶段有内容）
    pub fn windows(&self) -> &SampleWindowSet {
        &self.windows
    }

    /// 窗口为空时改用给定的窗口参数，已有样本时保持不变
    ///
    /// 调用方自建的指纹和解码得到的指纹都带默认参数，送入引擎前由采集器统一。
    pub fn adopt_window_params(&mut self, params: WindowParams) {
        if self.is_finalized() || self.windows.beacon_count() > 0 || self.windows.params() == params {
            return;
        }
        self.windows = SampleWindowSet::new(params);
    }

    /// 把测量送入该指纹的采集窗口
    pub fn record(&mut self, measurement: &Measurement) -> Result<()> {
        self.ensure_collecting()?;
        self.windows.record(measurement);
        Ok(())
    }

    /// 把窗口当前代表值作为一个采样点累加进统计，然后清空窗口
    ///
    /// 返回本次贡献的信标数；没有可见信标时不计采样点。
    pub fn create_sample(&mut self) -> Result<usize> {
        self.ensure_collecting()?;
        let observation = self.windows.snapshot();
        self.windows.clear();
        self.add_observation(&observation)?;
        Ok(observation.len())
    }

    /// 直接累加一个观测向量作为采样点
    pub fn add_observation(&mut self, observation: &ObservationVector) -> Result<()> {
        self.ensure_collecting()?;
        if observation.is_empty() {
            return Ok(());
        }
        for (id, value) in observation.iter() {
            self.beacons.entry(id.clone()).or_default().add(*value);
        }
        self.sample_count += 1;
        Ok(())
    }

    /// 校验并固化
    ///
    /// 少于 `min_samples_per_beacon` 个采样点的信标被剔除。校验失败时指纹保持不变，
    /// 调用方可以继续采样。已固化的指纹（例如解码得到的）按同样的阈值重新校验。
    pub fn finalize(&mut self, min_samples_per_beacon: u32, min_fingerprint_samples: u32) -> Result<()> {
        self.check_statistics()?;
        if self.sample_count < min_fingerprint_samples {
            return Err(LocalizationError::ValidationFailure {
                message: format!(
                    "{} sample points collected, at least {} required",
                    self.sample_count, min_fingerprint_samples
                ),
            });
        }

        let retained: BTreeMap<String, BeaconStatistic> = self
            .beacons
            .iter()
            .filter(|(_, stat)| stat.count >= min_samples_per_beacon)
            .map(|(id, stat)| (id.clone(), *stat))
            .collect();
        if retained.is_empty() {
            return Err(LocalizationError::ValidationFailure {
                message: format!(
                    "no beacon reached {} sample points",
                    min_samples_per_beacon
                ),
            });
        }

        self.beacons = retained;
        self.state = FingerprintState::Finalized;
        self.windows.clear();
        Ok(())
    }

    /// 返回固化后的副本，自身不变
    pub fn finalized_copy(&self, min_samples_per_beacon: u32, min_fingerprint_samples: u32) -> Result<Fingerprint> {
        let mut copy = self.clone();
        copy.finalize(min_samples_per_beacon, min_fingerprint_samples)?;
        Ok(copy)
    }

    /// 编码为稳定的 JSON 字符串，供调用方持久化
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 从 JSON 字符串解码，统计量不自洽时报 `ValidationFailure`
    pub fn from_json(json: &str) -> Result<Self> {
        let fingerprint: Fingerprint = serde_json::from_str(json)?;
        fingerprint.check_statistics()?;
        Ok(fingerprint)
    }

    /// 检查每个信标的统计量，以及信标样本数不超过采样点数
    pub fn check_statistics(&self) -> Result<()> {
        for (id, stat) in &self.beacons {
            if !stat.is_well_formed() || stat.count > self.sample_count {
                return Err(LocalizationError::ValidationFailure {
                    message: format!(
                        "malformed statistic for beacon {id}: mean {}, m2 {}, count {} of {} samples",
                        stat.mean, stat.m2, stat.count, self.sample_count
                    ),
                });
            }
        }
        Ok(())
    }

    fn ensure_collecting(&self) -> Result<()> {
        match self.state {
            FingerprintState::Collecting => Ok(()),
            FingerprintState::Finalized => Err(LocalizationError::FingerprintFinalized),
        }
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

/// 比较统计内容，不比较采集窗口
impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
            && self.sample_count == other.sample_count
            && self.beacons == other.beacons
    }
}

impl FromStr for Fingerprint {
    type Err = LocalizationError;

    fn from_str(s: &str) -> Result<Self> {
        Fingerprint::from_json(s)
    }
}
