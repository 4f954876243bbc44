//! 指纹定位引擎
//!
//! 对外接口：采集指纹、管理训练集、实时跟踪定位。
//!
//! 采集状态机与跟踪循环彼此独立，只共享训练集（读写锁保护的存储 + 分类器索引）。
//! 必须在 tokio 运行时内创建。

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::algorithms::{
    Classification, Fingerprint, Measurement, MeasurementFilter, ObservationVector, ScoringParams, WindowParams,
};
use crate::collector::{CollectionState, FingerprintCollector};
use crate::config::LocalizationConfig;
use crate::error::Result;
use crate::store::TrainedSet;
use crate::tracking::{LocalizationCallback, TrackingLoop};

/// 指纹定位引擎
pub struct Localization {
    config: LocalizationConfig,
    filter: MeasurementFilter,
    trained: Arc<RwLock<TrainedSet>>,
    collector: Mutex<FingerprintCollector>,
    tracking: TrackingLoop,
}

impl Localization {
    /// 使用给定配置创建引擎
    pub fn new(config: LocalizationConfig) -> Result<Self> {
        config.validate()?;
        let trained = Arc::new(RwLock::new(TrainedSet::new(ScoringParams::from_config(&config))));
        let tracking = TrackingLoop::spawn(&config, Arc::clone(&trained))?;

        Ok(Localization {
            filter: MeasurementFilter::from_config(&config)?,
            collector: Mutex::new(FingerprintCollector::new(&config)),
            trained,
            tracking,
            config,
        })
    }

    /// 使用默认配置创建引擎
    pub fn with_defaults() -> Result<Self> {
        Self::new(LocalizationConfig::default())
    }

    pub fn config(&self) -> &LocalizationConfig {
        &self.config
    }

    // ========================================================================
    // 跟踪
    // ========================================================================

    /// 开始接受实时测量，位置更新通过回调投递；已启动时只替换回调
    #[instrument(skip_all)]
    pub fn start_localization(&self, callback: impl LocalizationCallback) {
        let already_active = self.tracking.is_active();
        self.tracking.start(Box::new(callback));
        info!(already_active, "localization started");
    }

    /// 停止定位；返回后不会再有新的回调开始执行
    #[instrument(skip_all)]
    pub fn stop_localization(&self) {
        self.tracking.stop();
        info!("localization stopped");
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_active()
    }

    /// 限定跟踪时参与分类的 sphere；None 时在全部 sphere 中取最佳
    pub fn set_active_sphere(&self, sphere_id: Option<&str>) {
        self.tracking.set_active_sphere(sphere_id.map(str::to_string));
    }

    pub fn active_sphere(&self) -> Option<String> {
        self.tracking.active_sphere()
    }

    /// 送入一个实时测量，时间戳为 None 时使用当前时间
    ///
    /// 未启动定位时测量被忽略。返回测量是否进入跟踪队列。
    pub fn track(&self, rssi: i32, id: &str, timestamp_ms: Option<i64>) -> bool {
        self.tracking.track(Measurement::new(id, rssi, timestamp_ms))
    }

    // ========================================================================
    // 指纹采集
    // ========================================================================

    /// 开始采集指纹；已在采集中时返回 false
    #[instrument(skip(self))]
    pub fn start_fingerprint(&self) -> bool {
        let started = self.collector.lock().start();
        debug!(started, "start fingerprint");
        started
    }

    /// 放弃当前采集，不写入训练集；没有采集时返回 false
    #[instrument(skip(self))]
    pub fn abort_fingerprint(&self) -> bool {
        let aborted = self.collector.lock().abort();
        debug!(aborted, "abort fingerprint");
        aborted
    }

    pub fn collection_state(&self) -> CollectionState {
        self.collector.lock().state()
    }

    pub fn is_collecting(&self) -> bool {
        self.collector.lock().is_collecting()
    }

    /// 创建一个使用本引擎窗口参数的空指纹，可作为采集操作的显式目标
    pub fn new_fingerprint(&self) -> Fingerprint {
        Fingerprint::with_window_params(WindowParams::from_config(&self.config))
    }

    /// 送入采集测量
    ///
    /// `fingerprint` 为 None 时送入当前采集会话；没有会话时返回 `InvalidState`。
    /// 显式指定且窗口为空的指纹改用本引擎的窗口参数。
    pub fn feed_measurement(
        &self,
        rssi: i32,
        id: &str,
        timestamp_ms: Option<i64>,
        fingerprint: Option<&mut Fingerprint>,
    ) -> Result<()> {
        let measurement = Measurement::new(id, rssi, timestamp_ms);
        self.filter.check(&measurement)?;
        self.collector.lock().feed(&measurement, fingerprint)
    }

    /// 以当前窗口值创建一个采样点，返回贡献的信标数
    pub fn create_fingerprint_sample(&self, fingerprint: Option<&mut Fingerprint>) -> Result<usize> {
        self.collector.lock().create_sample(fingerprint)
    }

    /// 固化指纹并写入训练集，替换同键的旧指纹
    ///
    /// 样本不足时返回 `ValidationFailure`，采集会话保持，可继续采样后重试。
    #[instrument(skip(self, fingerprint))]
    pub fn finalize_fingerprint(
        &self,
        sphere_id: &str,
        location_id: &str,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<()> {
        let finalized = self.collector.lock().finalize(fingerprint)?;
        let beacons = finalized.beacon_count();
        let samples = finalized.sample_count();
        self.trained.write().insert(sphere_id, location_id, finalized);
        info!(beacons, samples, "fingerprint finalized");
        Ok(())
    }

    // ========================================================================
    // 训练集管理
    // ========================================================================

    /// 获取已训练的指纹副本
    pub fn get_fingerprint(&self, sphere_id: &str, location_id: &str) -> Option<Fingerprint> {
        self.trained
            .read()
            .store()
            .get(sphere_id, location_id)
            .map(|stored| stored.fingerprint().clone())
    }

    /// 导入外部指纹（如调用方持久化后恢复的），替换同键的旧指纹
    ///
    /// 已固化的指纹同样按本引擎的阈值重新校验；统计量不自洽或没有信标达标时返回
    /// `ValidationFailure`，训练集不变。
    #[instrument(skip(self, fingerprint))]
    pub fn import_fingerprint(&self, sphere_id: &str, location_id: &str, fingerprint: Fingerprint) -> Result<()> {
        let prepared = self.collector.lock().prepare_import(fingerprint)?;
        let beacons = prepared.beacon_count();
        self.trained.write().insert(sphere_id, location_id, prepared);
        info!(beacons, "fingerprint imported");
        Ok(())
    }

    /// 删除一个指纹；不存在时什么也不做
    #[instrument(skip(self))]
    pub fn remove_fingerprint(&self, sphere_id: &str, location_id: &str) {
        let removed = self.trained.write().remove(sphere_id, location_id);
        debug!(removed, "remove fingerprint");
    }

    /// 删除一个 sphere 的全部指纹
    #[instrument(skip(self))]
    pub fn remove_fingerprints(&self, sphere_id: &str) {
        let removed = self.trained.write().remove_sphere(sphere_id);
        info!(removed, "sphere fingerprints removed");
    }

    /// 清空全部指纹
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let removed = self.trained.write().clear();
        info!(removed, "all fingerprints cleared");
    }

    /// 已训练的 sphere
    pub fn spheres(&self) -> Vec<String> {
        self.trained.read().store().spheres()
    }

    /// 某个 sphere 下已训练的 location
    pub fn locations(&self, sphere_id: &str) -> Vec<String> {
        self.trained.read().store().locations(sphere_id)
    }

    /// 直接对一个观测向量分类，不经过跟踪循环
    pub fn classify(&self, sphere_id: &str, observation: &ObservationVector) -> Option<Classification> {
        self.trained.read().classifier().classify(sphere_id, observation)
    }
}
