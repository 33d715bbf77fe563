// src/engine.rs
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};

use crate::telemetry::{
    analyze, CorrectionFilter, MeterError, QualityMode, SampleBuffer, SampleSource,
    MIN_ANALYSIS_SAMPLES,
};
use crate::types::{PipelineEvent, PipelineState};

pub type SubscriptionId = u64;

/// Receiving end handed to a consumer by `subscribe`.
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: Receiver<PipelineEvent>,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: SubscriptionId,
    senders: Vec<(SubscriptionId, Sender<PipelineEvent>)>,
}

impl ObserverRegistry {
    pub(crate) fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.senders.push((id, tx));
        Subscription { id, receiver: rx }
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sid, _)| *sid != id);
        self.senders.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }

    /// Delivers to every live receiver and forgets the dropped ones.
    pub(crate) fn publish(&mut self, event: &PipelineEvent) {
        self.senders.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

/// State touched by both the controller and the generation thread.
pub(crate) struct SharedState {
    // written only while the pipeline's control lock is held
    state: RwLock<PipelineState>,
    buffer: RwLock<SampleBuffer>,
    last_update: Mutex<Option<NaiveDateTime>>,
    observers: Mutex<ObserverRegistry>,
}

impl SharedState {
    pub(crate) fn new(buffer: SampleBuffer) -> Self {
        Self {
            state: RwLock::new(PipelineState::Disconnected),
            buffer: RwLock::new(buffer),
            last_update: Mutex::new(None),
            observers: Mutex::new(ObserverRegistry::default()),
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, next: PipelineState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub(crate) fn read_buffer(&self) -> RwLockReadGuard<'_, SampleBuffer> {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_buffer(&self) -> RwLockWriteGuard<'_, SampleBuffer> {
        self.buffer.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn observers(&self) -> MutexGuard<'_, ObserverRegistry> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, event: PipelineEvent) {
        self.observers().publish(&event);
    }

    pub(crate) fn last_update(&self) -> Option<NaiveDateTime> {
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn touch(&self, at: NaiveDateTime) {
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }
}

/// Per-run settings captured when measurement starts.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LoopSettings {
    pub interval: Duration,
    pub filter: CorrectionFilter,
    pub analysis_on_tick: bool,
    pub quality_mode: QualityMode,
}

/// Sample source owned by the pipeline or its running loop.
pub type BoxedSource = Box<dyn SampleSource + Send>;

/// Handle to a running generation thread.
pub(crate) struct MeasurementRunner {
    stop_tx: Sender<()>,
    handle: JoinHandle<BoxedSource>,
}

impl MeasurementRunner {
    /// Wakes the loop out of its wait and blocks until it has exited.
    ///
    /// Hands the source back unless the thread panicked.
    pub(crate) fn stop(self) -> Option<BoxedSource> {
        self.stop_tx.send(()).ok();
        match self.handle.join() {
            Ok(source) => Some(source),
            Err(_) => {
                error!("measurement thread panicked; sample source dropped");
                None
            }
        }
    }
}

pub(crate) fn spawn_measurement_loop(
    shared: Arc<SharedState>,
    source: BoxedSource,
    settings: LoopSettings,
) -> Result<MeasurementRunner, MeterError> {
    let (stop_tx, stop_rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("measurement-loop".into())
        .spawn(move || run_loop(&shared, source, settings, stop_rx))?;
    Ok(MeasurementRunner { stop_tx, handle })
}

fn run_loop(
    shared: &SharedState,
    mut source: BoxedSource,
    settings: LoopSettings,
    stop_rx: Receiver<()>,
) -> BoxedSource {
    info!("measurement loop started, interval {:?}", settings.interval);
    loop {
        // 等待一个采样周期，stop 信号可以随时打断
        match stop_rx.recv_timeout(settings.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Err(err) = tick(shared, source.as_mut(), &settings) {
            warn!("measurement tick failed: {err}");
        }
    }
    info!("measurement loop stopped");
    source
}

/// One generation step: sample, append, correct, check, publish.
pub(crate) fn tick(
    shared: &SharedState,
    source: &mut (dyn SampleSource + Send),
    settings: &LoopSettings,
) -> Result<(), MeterError> {
    let Some(sample) = source.next_sample()? else {
        return Ok(());
    };
    let timestamp = sample.timestamp;
    let (published, retained) = {
        let mut buffer = shared.write_buffer();
        buffer.append(sample);
        settings.filter.apply(&mut buffer);
        (buffer.latest().cloned(), buffer.len())
    };
    shared.touch(timestamp);
    if let Some(sample) = published {
        debug!(
            "sample #{retained}: I={:.3e} A, V={:.6} V",
            sample.current, sample.voltage
        );
        shared.publish(PipelineEvent::Sample(sample));
    }
    if settings.analysis_on_tick && retained >= MIN_ANALYSIS_SAMPLES {
        let samples = shared.read_buffer().all();
        let report = analyze(&samples, settings.quality_mode)?;
        if report.total_anomalies() > 0 {
            warn!(
                "detected {} anomalous current and {} anomalous voltage readings",
                report.current.anomaly_count, report.voltage.anomaly_count
            );
            shared.publish(PipelineEvent::AnomaliesDetected {
                current: report.current.anomaly_count,
                voltage: report.voltage.anomaly_count,
            });
        }
    }
    Ok(())
}
