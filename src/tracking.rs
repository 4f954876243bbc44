//! 实时跟踪循环
//!
//! `track()` 只把测量放入队列；独立的 tokio 任务持有实时采样窗口，
//! 每收到一个测量就对当前窗口快照分类一次，并把结果交给回调。
//!
//! - 回调在工作任务上按队列顺序调用，结果时间戳取窗口时钟，单调不减
//! - 连续的“未匹配”只上报第一次
//! - `stop()` 返回后不会再有回调开始执行；停止前入队的测量被丢弃
//! - 回调内调用 `start()` / `stop()` 时，回调的替换或释放在本次回调返回后生效

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::algorithms::{
    Classification, LocationUpdate, Measurement, MeasurementFilter, ObservationVector, SampleWindowSet,
    WindowParams,
};
use crate::config::LocalizationConfig;
use crate::error::{LocalizationError, Result};
use crate::store::TrainedSet;

/// 位置更新回调
///
/// 在跟踪任务上调用。回调内可以调用 `start_localization` / `stop_localization`，
/// 新回调从下一次更新开始生效。
pub trait LocalizationCallback: Send + 'static {
    fn on_location_update(&mut self, update: LocationUpdate);
}

impl<F> LocalizationCallback for F
where
    F: FnMut(LocationUpdate) + Send + 'static,
{
    fn on_location_update(&mut self, update: LocationUpdate) {
        self(update)
    }
}

#[derive(Debug)]
struct TrackedMeasurement {
    generation: u64,
    measurement: Measurement,
}

struct TrackingShared {
    callback: Mutex<Option<Box<dyn LocalizationCallback>>>,
    /// 回调内调用 `start()` 时登记的新回调，由工作任务在回调返回后换入
    replacement: Mutex<Option<Box<dyn LocalizationCallback>>>,
    active: AtomicBool,
    /// 每次停止递增，旧代的测量与窗口作废
    generation: AtomicU64,
    active_sphere: RwLock<Option<String>>,
}

thread_local! {
    /// 当前线程正在执行的回调所属的 `TrackingShared` 地址，0 表示没有
    static CALLBACK_OWNER: Cell<usize> = const { Cell::new(0) };
}

impl TrackingShared {
    fn address(&self) -> usize {
        self as *const TrackingShared as usize
    }

    /// 是否在本跟踪循环自己的回调中
    fn in_own_callback(&self) -> bool {
        CALLBACK_OWNER.with(|owner| owner.get() == self.address())
    }
}

/// 回调执行期间登记所属的跟踪循环，离开作用域时恢复
struct CallbackScope {
    previous: usize,
}

impl CallbackScope {
    fn enter(shared: &TrackingShared) -> Self {
        let previous = CALLBACK_OWNER.with(|owner| owner.replace(shared.address()));
        CallbackScope { previous }
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_OWNER.with(|owner| owner.set(self.previous));
    }
}

/// 跟踪循环句柄
pub struct TrackingLoop {
    tx: mpsc::Sender<TrackedMeasurement>,
    shared: Arc<TrackingShared>,
    filter: MeasurementFilter,
    worker: JoinHandle<()>,
}

impl TrackingLoop {
    /// 在当前 tokio 运行时上启动工作任务
    pub fn spawn(config: &LocalizationConfig, trained: Arc<RwLock<TrainedSet>>) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| LocalizationError::NoRuntime)?;
        let filter = MeasurementFilter::from_config(config)?;
        let (tx, rx) = mpsc::channel(config.tracking_queue_capacity);
        let shared = Arc::new(TrackingShared {
            callback: Mutex::new(None),
            replacement: Mutex::new(None),
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            active_sphere: RwLock::new(None),
        });

        let worker = handle.spawn(tracking_worker(
            rx,
            Arc::clone(&shared),
            trained,
            WindowParams::from_config(config),
            config.min_confidence,
        ));

        Ok(TrackingLoop {
            tx,
            shared,
            filter,
            worker,
        })
    }

    /// 启动跟踪；已启动时只替换回调
    pub fn start(&self, callback: Box<dyn LocalizationCallback>) {
        if self.shared.in_own_callback() {
            *self.shared.replacement.lock() = Some(callback);
        } else {
            let mut slot = self.shared.callback.lock();
            *slot = Some(callback);
            self.shared.replacement.lock().take();
        }
        self.shared.active.store(true, Ordering::Release);
    }

    /// 停止跟踪
    pub fn stop(&self) {
        self.shared.active.store(false, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.replacement.lock().take();
        // 等待正在执行的回调结束；在自己的回调中时由工作任务在返回后释放
        if !self.shared.in_own_callback() {
            self.shared.callback.lock().take();
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// 限定分类的 sphere；None 表示在全部 sphere 中取最佳
    pub fn set_active_sphere(&self, sphere_id: Option<String>) {
        *self.shared.active_sphere.write() = sphere_id;
    }

    pub fn active_sphere(&self) -> Option<String> {
        self.shared.active_sphere.read().clone()
    }

    /// 送入一个实时测量；未启动、被过滤或队列已满时返回 false
    pub fn track(&self, measurement: Measurement) -> bool {
        if !self.is_active() {
            trace!(beacon = %measurement.beacon_id, "tracking inactive, measurement ignored");
            return false;
        }
        if let Err(err) = self.filter.check(&measurement) {
            debug!(error = %err, "tracking measurement rejected");
            return false;
        }

        let tracked = TrackedMeasurement {
            generation: self.shared.generation.load(Ordering::Acquire),
            measurement,
        };
        match self.tx.try_send(tracked) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(beacon = %dropped.measurement.beacon_id, "tracking queue full, measurement dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("tracking worker has stopped");
                false
            }
        }
    }
}

impl Drop for TrackingLoop {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn tracking_worker(
    mut rx: mpsc::Receiver<TrackedMeasurement>,
    shared: Arc<TrackingShared>,
    trained: Arc<RwLock<TrainedSet>>,
    params: WindowParams,
    min_confidence: f64,
) {
    debug!("tracking worker started");

    let mut windows = SampleWindowSet::new(params);
    let mut windows_generation = 0u64;
    let mut last_was_no_match = false;

    while let Some(tracked) = rx.recv().await {
        let generation = shared.generation.load(Ordering::Acquire);
        if generation != windows_generation {
            windows = SampleWindowSet::new(params);
            windows_generation = generation;
            last_was_no_match = false;
        }
        if tracked.generation != generation {
            continue;
        }

        windows.record(&tracked.measurement);
        let observation = windows.snapshot();
        let timestamp_ms = windows
            .clock_ms()
            .unwrap_or(tracked.measurement.timestamp_ms);
        let sphere = shared.active_sphere.read().clone();

        let update = {
            let trained = trained.read();
            classify_observation(&trained, sphere.as_deref(), &observation, min_confidence, timestamp_ms)
        };

        if !update.is_match() && last_was_no_match {
            continue;
        }

        let mut slot = shared.callback.lock();
        if !shared.active.load(Ordering::Acquire) || shared.generation.load(Ordering::Acquire) != generation {
            continue;
        }
        if let Some(callback) = slot.as_mut() {
            last_was_no_match = !update.is_match();
            trace!(%update, "delivering location update");
            let _scope = CallbackScope::enter(&shared);
            callback.on_location_update(update);
        }

        // 回调内的 start / stop
        if let Some(replacement) = shared.replacement.lock().take() {
            *slot = Some(replacement);
        } else if !shared.active.load(Ordering::Acquire) {
            *slot = None;
        }
    }

    debug!("tracking worker stopped");
}

/// 对观测分类：指定 sphere 时只在该 sphere 内分类，否则取全部 sphere 中置信度最高者
pub fn classify_observation(
    trained: &TrainedSet,
    sphere_id: Option<&str>,
    observation: &ObservationVector,
    min_confidence: f64,
    timestamp_ms: i64,
) -> LocationUpdate {
    let classifier = trained.classifier();
    let best = match sphere_id {
        Some(sphere) => classifier
            .classify(sphere, observation)
            .map(|classification| (sphere.to_string(), classification)),
        None => {
            let mut spheres: Vec<&String> = classifier.spheres().collect();
            spheres.sort();

            let mut best: Option<(String, Classification)> = None;
            for sphere in spheres {
                if let Some(classification) = classifier.classify(sphere, observation) {
                    let better = match &best {
                        None => true,
                        Some((_, current)) => classification.confidence > current.confidence,
                    };
                    if better {
                        best = Some((sphere.clone(), classification));
                    }
                }
            }
            best
        }
    };

    match best {
        Some((sphere, classification)) if classification.confidence >= min_confidence => {
            LocationUpdate::matched(sphere, classification, timestamp_ms)
        }
        _ => LocationUpdate::no_match(observation.len(), timestamp_ms),
    }
}
