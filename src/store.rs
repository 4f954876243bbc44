//! 指纹存储
//!
//! (sphere, location) -> 已固化指纹。每次写入分配递增的 revision，
//! 分类器用它在距离相同时选择最近写入的指纹。

use std::collections::{BTreeMap, HashMap};

use crate::algorithms::{Classifier, Fingerprint, ScoringParams};

/// 存储中的一条指纹
#[derive(Clone, Debug)]
pub struct StoredFingerprint {
    fingerprint: Fingerprint,
    revision: u64,
}

impl StoredFingerprint {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// 指纹存储
#[derive(Clone, Debug, Default)]
pub struct FingerprintStore {
    spheres: HashMap<String, BTreeMap<String, StoredFingerprint>>,
    next_revision: u64,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换，返回新条目的 revision
    pub fn insert(&mut self, sphere_id: &str, location_id: &str, fingerprint: Fingerprint) -> u64 {
        self.next_revision += 1;
        let revision = self.next_revision;
        self.spheres
            .entry(sphere_id.to_string())
            .or_default()
            .insert(location_id.to_string(), StoredFingerprint { fingerprint, revision });
        revision
    }

    /// 查找
    pub fn get(&self, sphere_id: &str, location_id: &str) -> Option<&StoredFingerprint> {
        self.spheres.get(sphere_id)?.get(location_id)
    }

    /// 删除一条，不存在时返回 None
    pub fn remove(&mut self, sphere_id: &str, location_id: &str) -> Option<Fingerprint> {
        let locations = self.spheres.get_mut(sphere_id)?;
        let removed = locations.remove(location_id);
        if locations.is_empty() {
            self.spheres.remove(sphere_id);
        }
        removed.map(|stored| stored.fingerprint)
    }

    /// 删除一个 sphere 的全部指纹，返回删除数量
    pub fn remove_sphere(&mut self, sphere_id: &str) -> usize {
        self.spheres.remove(sphere_id).map_or(0, |locations| locations.len())
    }

    /// 清空，返回删除数量
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.spheres.clear();
        count
    }

    /// 一个 sphere 的全部条目（按 location 排序）
    pub fn sphere_entries(&self, sphere_id: &str) -> impl Iterator<Item = (&String, &StoredFingerprint)> {
        self.spheres.get(sphere_id).into_iter().flat_map(|locations| locations.iter())
    }

    /// 全部 sphere（排序）
    pub fn spheres(&self) -> Vec<String> {
        let mut spheres: Vec<String> = self.spheres.keys().cloned().collect();
        spheres.sort();
        spheres
    }

    /// 一个 sphere 下的全部 location（排序）
    pub fn locations(&self, sphere_id: &str) -> Vec<String> {
        self.sphere_entries(sphere_id).map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.spheres.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spheres.is_empty()
    }
}

/// 训练集：存储与分类器索引，二者总是在同一次写操作内一起更新
#[derive(Clone, Debug)]
pub struct TrainedSet {
    store: FingerprintStore,
    classifier: Classifier,
}

impl TrainedSet {
    pub fn new(params: ScoringParams) -> Self {
        TrainedSet {
            store: FingerprintStore::new(),
            classifier: Classifier::new(params),
        }
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// 写入已固化的指纹并修补该 sphere 的索引
    pub fn insert(&mut self, sphere_id: &str, location_id: &str, fingerprint: Fingerprint) {
        debug_assert!(fingerprint.is_finalized());
        let revision = self.store.insert(sphere_id, location_id, fingerprint);
        if let Some(stored) = self.store.get(sphere_id, location_id) {
            self.classifier
                .upsert(sphere_id, location_id, stored.fingerprint(), revision);
        }
    }

    pub fn remove(&mut self, sphere_id: &str, location_id: &str) -> bool {
        self.classifier.remove(sphere_id, location_id);
        self.store.remove(sphere_id, location_id).is_some()
    }

    pub fn remove_sphere(&mut self, sphere_id: &str) -> usize {
        self.classifier.remove_sphere(sphere_id);
        self.store.remove_sphere(sphere_id)
    }

    pub fn clear(&mut self) -> usize {
        self.classifier.clear();
        self.store.clear()
    }
}

impl Default for TrainedSet {
    fn default() -> Self {
        Self::new(ScoringParams::default())
    }
}
