//! 指纹分类器
//!
//! 把实时观测向量与某个 sphere 下的全部指纹比较，给出距离最小的位置。
//!
//! 距离定义（在两侧信标 ID 的并集上取平均）：
//! - 两侧都有：(observed - mean)² / (variance + variance_floor)
//! - 只有一侧有：固定惩罚 `missing_beacon_penalty`
//!
//! 置信度 = 1 / (1 + distance)，取值 (0, 1]，单调递减，不是校准后的概率。

use std::collections::HashMap;

use crate::algorithms::{Fingerprint, ObservationVector};
use crate::config::LocalizationConfig;

/// 打分参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoringParams {
    pub missing_beacon_penalty: f64,
    pub variance_floor: f64,
}

impl ScoringParams {
    pub fn from_config(config: &LocalizationConfig) -> Self {
        ScoringParams {
            missing_beacon_penalty: config.missing_beacon_penalty,
            variance_floor: config.variance_floor,
        }
    }
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self::from_config(&LocalizationConfig::default())
    }
}

/// 距离转置信度；非有限距离（包括 NaN）的置信度为 0
pub fn confidence_from_distance(distance: f64) -> f64 {
    if !distance.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}

/// 单次分类结果
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// 匹配的位置
    pub location_id: String,
    /// 置信度 (0, 1]
    pub confidence: f64,
    /// 平均加权距离
    pub distance: f64,
    /// 参与比较的信标数（并集大小）
    pub beacon_count: usize,
}

/// 预计算的候选：信标 -> (均值, 1 / (方差 + 下限))
#[derive(Clone, Debug)]
struct Candidate {
    location_id: String,
    revision: u64,
    beacons: HashMap<String, (f64, f64)>,
}

impl Candidate {
    fn build(location_id: &str, fingerprint: &Fingerprint, revision: u64, params: &ScoringParams) -> Self {
        let beacons = fingerprint
            .beacons()
            .map(|(id, stat)| {
                (
                    id.clone(),
                    (stat.mean(), 1.0 / (stat.variance().max(0.0) + params.variance_floor)),
                )
            })
            .collect();
        Candidate {
            location_id: location_id.to_string(),
            revision,
            beacons,
        }
    }

    /// 返回 (平均距离, 并集大小)
    fn distance(&self, observed: &ObservationVector, params: &ScoringParams) -> (f64, usize) {
        let mut total = 0.0;
        let mut union = 0usize;

        for (id, (mean, inv_weight)) in &self.beacons {
            union += 1;
            total += match observed.get(id) {
                Some(value) => {
                    let diff = value - mean;
                    diff * diff * inv_weight
                }
                None => params.missing_beacon_penalty,
            };
        }
        for (id, _) in observed.iter() {
            if !self.beacons.contains_key(id) {
                union += 1;
                total += params.missing_beacon_penalty;
            }
        }

        if union == 0 {
            return (f64::INFINITY, 0);
        }
        (total / union as f64, union)
    }
}

/// 分类器的派生索引：每个 sphere 一组预计算候选，随存储写入增量修补
#[derive(Clone, Debug)]
pub struct Classifier {
    params: ScoringParams,
    spheres: HashMap<String, Vec<Candidate>>,
}

impl Classifier {
    pub fn new(params: ScoringParams) -> Self {
        Classifier {
            params,
            spheres: HashMap::new(),
        }
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    /// 插入或替换一个候选
    pub fn upsert(&mut self, sphere_id: &str, location_id: &str, fingerprint: &Fingerprint, revision: u64) {
        let candidate = Candidate::build(location_id, fingerprint, revision, &self.params);
        let candidates = self.spheres.entry(sphere_id.to_string()).or_default();
        match candidates.iter_mut().find(|c| c.location_id == location_id) {
            Some(existing) => *existing = candidate,
            None => candidates.push(candidate),
        }
    }

    /// 移除一个候选
    pub fn remove(&mut self, sphere_id: &str, location_id: &str) {
        if let Some(candidates) = self.spheres.get_mut(sphere_id) {
            candidates.retain(|c| c.location_id != location_id);
            if candidates.is_empty() {
                self.spheres.remove(sphere_id);
            }
        }
    }

    /// 移除一个 sphere 的全部候选
    pub fn remove_sphere(&mut self, sphere_id: &str) {
        self.spheres.remove(sphere_id);
    }

    pub fn clear(&mut self) {
        self.spheres.clear();
    }

    /// 某个 sphere 的候选数
    pub fn candidate_count(&self, sphere_id: &str) -> usize {
        self.spheres.get(sphere_id).map_or(0, Vec::len)
    }

    /// 已建立索引的 sphere
    pub fn spheres(&self) -> impl Iterator<Item = &String> {
        self.spheres.keys()
    }

    /// 分类
    ///
    /// 没有候选或观测为空时返回 None（未知位置）。距离相同时选择最近写入的指纹；
    /// 距离不是有限值的候选不参与比较。
    pub fn classify(&self, sphere_id: &str, observed: &ObservationVector) -> Option<Classification> {
        if observed.is_empty() {
            return None;
        }
        let candidates = self.spheres.get(sphere_id)?;

        let mut best: Option<(&Candidate, f64, usize)> = None;
        for candidate in candidates {
            let (distance, union) = candidate.distance(observed, &self.params);
            if !distance.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, best_distance, _)) => {
                    distance < best_distance
                        || (distance == best_distance && candidate.revision > current.revision)
                }
            };
            if better {
                best = Some((candidate, distance, union));
            }
        }

        best.map(|(candidate, distance, beacon_count)| Classification {
            location_id: candidate.location_id.clone(),
            confidence: confidence_from_distance(distance),
            distance,
            beacon_count,
        })
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ScoringParams::default())
    }
}
