use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use log::info;

use crate::config::{sampling_interval, PipelineConfig, RECENT_PLOT_WINDOW};
use crate::engine::{
    spawn_measurement_loop, BoxedSource, LoopSettings, MeasurementRunner, SharedState,
    Subscription, SubscriptionId,
};
use crate::recorder;
use crate::telemetry::error::MeterError;
use crate::telemetry::plot::{render_window_png, PlotStyle};
use crate::telemetry::quality::{analyze, QualityReport};
use crate::telemetry::source::{
    generate_demo_dataset, SimulatedInstrument, SimulationProfile,
};
use crate::telemetry::{CorrectionFilter, SampleBuffer};
use crate::types::{PipelineEvent, PipelineState, PipelineStatus, Sample};

/// Longest a control call may wait for another transition to finish.
pub const CONTROL_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
// State itself lives in `SharedState` so queries never wait on this lock.
struct Control {
    runner: Option<MeasurementRunner>,
    // Parked here while no loop is running.
    source: Option<BoxedSource>,
}
/// Owns the buffer, filter settings and generation loop; every presentation
/// layer talks to one shared instance.
pub struct MeasurementPipeline {
    config: PipelineConfig,
    shared: Arc<SharedState>,
    control: Mutex<Control>,
}
impl MeasurementPipeline {
    /// Pipeline fed by the simulated instrument.
    pub fn new(config: PipelineConfig) -> Result<Self, MeterError> {
        let source = simulated_source(&config)?;
        Self::with_source(config, source)
    }
    pub fn with_source(config: PipelineConfig, source: BoxedSource) -> Result<Self, MeterError> {
        config.validate()?;
        let buffer = SampleBuffer::with_capacity(config.capacity);
        Ok(Self {
            shared: Arc::new(SharedState::new(buffer)),
            control: Mutex::new(Control {
                runner: None,
                source: Some(source),
            }),
            config,
        })
    }
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
    /// Reads the current state without waiting on an in-flight transition.
    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }
    pub fn connect(&self) {
        let _control = self.lock_control();
        if self.state() != PipelineState::Disconnected {
            return;
        }
        self.shared.touch(Local::now().naive_local());
        self.transition(PipelineState::Connected);
    }
    /// Stops any running measurement, then drops the connection.
    pub fn disconnect(&self) {
        let mut control = self.lock_control();
        if self.state() == PipelineState::Disconnected {
            return;
        }
        Self::halt(&mut control);
        self.transition(PipelineState::Disconnected);
    }
    /// Clears the buffer and runs the generation loop at `sampling_rate_hz`.
    ///
    /// Restarts the loop when a measurement is already running.
    pub fn start(&self, sampling_rate_hz: f64) -> Result<(), MeterError> {
        let interval = sampling_interval(sampling_rate_hz)?;
        let mut control = self.lock_control();
        if self.state() == PipelineState::Disconnected {
            return Err(MeterError::NotConnected);
        }
        Self::halt(&mut control);
        self.shared.write_buffer().reset(self.config.capacity);
        let settings = LoopSettings {
            interval,
            filter: CorrectionFilter::new(
                self.config.correction_window,
                self.config.correction_enabled,
            ),
            analysis_on_tick: self.config.analysis_on_tick,
            quality_mode: self.config.quality_mode,
        };
        let spawned = match control.source.take() {
            Some(source) => Ok(source),
            None => simulated_source(&self.config),
        }
        .and_then(|source| spawn_measurement_loop(Arc::clone(&self.shared), source, settings));
        let runner = match spawned {
            Ok(runner) => runner,
            Err(err) => {
                if self.state() == PipelineState::Measuring {
                    self.transition(PipelineState::Connected);
                }
                return Err(err);
            }
        };
        control.runner = Some(runner);
        info!("measurement started at {sampling_rate_hz} Hz");
        if self.state() != PipelineState::Measuring {
            self.transition(PipelineState::Measuring);
        }
        Ok(())
    }
    /// Cancels the loop; retained samples stay available for export.
    pub fn stop(&self) {
        let mut control = self.lock_control();
        if self.state() != PipelineState::Measuring {
            return;
        }
        Self::halt(&mut control);
        self.transition(PipelineState::Connected);
    }
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.state(),
            data_point_count: self.shared.read_buffer().len(),
            last_update: self.shared.last_update(),
        }
    }
    pub fn window(&self, n: usize) -> Vec<Sample> {
        self.shared.read_buffer().window(n)
    }
    /// The last 100 samples, as shown by live plots.
    pub fn recent(&self) -> Vec<Sample> {
        self.window(RECENT_PLOT_WINDOW)
    }
    pub fn all(&self) -> Vec<Sample> {
        self.shared.read_buffer().all()
    }
    pub fn analyze(&self) -> Result<QualityReport, MeterError> {
        let samples = self.all();
        analyze(&samples, self.config.quality_mode)
    }
    /// Replaces the buffer with the file's rows; on error nothing changes.
    ///
    /// The file is parsed before the control lock is taken, so a slow read
    /// never stalls other control calls.
    pub fn load_from_file(&self, path: &Path) -> Result<usize, MeterError> {
        let samples = recorder::load_csv(path)?;
        let count = self.install(samples)?;
        info!("loaded {count} data points from {}", path.display());
        Ok(count)
    }
    /// Installs a freshly generated demo dataset, like a file load.
    pub fn load_demo_dataset(&self, count: usize) -> Result<usize, MeterError> {
        let samples = generate_demo_dataset(count, self.config.simulation_seed)?;
        let count = self.install(samples)?;
        info!("generated {count} demo data points");
        Ok(count)
    }
    pub fn export_to_file(&self, path: &Path) -> Result<usize, MeterError> {
        let samples = self.all();
        if samples.is_empty() {
            return Err(MeterError::NoData);
        }
        recorder::save_csv(path, &samples)?;
        info!("exported {} data points to {}", samples.len(), path.display());
        Ok(samples.len())
    }
    /// Exports under the timestamped file name and returns the path used.
    pub fn export_to_dir(&self, dir: &Path) -> Result<PathBuf, MeterError> {
        let path = recorder::export_path_in(dir);
        self.export_to_file(&path)?;
        Ok(path)
    }
    pub fn export_plot_png(&self, path: &Path, n: usize, style: &PlotStyle) -> Result<(), MeterError> {
        let png = render_window_png(&self.window(n), style)?;
        std::fs::write(path, png)?;
        Ok(())
    }
    pub fn subscribe(&self) -> Subscription {
        self.shared.observers().subscribe()
    }
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers().unsubscribe(id)
    }
    fn install(&self, samples: Vec<Sample>) -> Result<usize, MeterError> {
        let _control = self.lock_control();
        if self.state() == PipelineState::Measuring {
            return Err(MeterError::MeasurementActive);
        }
        let count = samples.len();
        *self.shared.write_buffer() = SampleBuffer::unbounded(samples);
        self.shared.touch(Local::now().naive_local());
        self.shared.publish(PipelineEvent::Loaded { count });
        Ok(count)
    }
    fn halt(control: &mut Control) {
        if let Some(runner) = control.runner.take() {
            if let Some(source) = runner.stop() {
                control.source = Some(source);
            }
        }
    }
    // Callers hold the control lock.
    fn transition(&self, next: PipelineState) {
        info!("pipeline {:?} -> {:?}", self.state(), next);
        self.shared.set_state(next);
        self.shared.publish(PipelineEvent::StateChanged(next));
    }
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        let deadline = Instant::now() + CONTROL_LOCK_TIMEOUT;
        loop {
            match self.control.try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        panic!(
                            "pipeline control lock not acquired within {CONTROL_LOCK_TIMEOUT:?}"
                        );
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}
impl Drop for MeasurementPipeline {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        Self::halt(control);
    }
}
fn simulated_source(config: &PipelineConfig) -> Result<BoxedSource, MeterError> {
    let instrument = match config.simulation_seed {
        Some(seed) => SimulatedInstrument::seeded(SimulationProfile::Continuous, seed)?,
        None => SimulatedInstrument::new(SimulationProfile::Continuous)?,
    };
    Ok(Box::new(instrument))
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{ReplaySource, SampleSource};
    use std::sync::mpsc::Receiver;
    fn test_config() -> PipelineConfig {
        PipelineConfig {
            simulation_seed: Some(11),
            sample_file: None,
            ..PipelineConfig::default()
        }
    }
    fn temp_path(name: &str) -> PathBuf {
        let nanos = Local::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir().join(format!("quantum_meter_{name}_{}_{nanos}", std::process::id()))
    }
    fn wait_for_samples(rx: &Receiver<PipelineEvent>, count: usize) -> Vec<Sample> {
        let mut seen = Vec::new();
        while seen.len() < count {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(PipelineEvent::Sample(s)) => seen.push(s),
                Ok(_) => {}
                Err(err) => panic!("timed out waiting for samples: {err}"),
            }
        }
        seen
    }
    #[test]
    fn start_requires_connection() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        assert!(matches!(pipeline.start(100.0), Err(MeterError::NotConnected)));
        assert_eq!(pipeline.state(), PipelineState::Disconnected);
    }
    #[test]
    fn start_rejects_bad_rate() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        pipeline.connect();
        assert!(matches!(pipeline.start(0.0), Err(MeterError::InvalidSamplingRate)));
        // finite and positive, but the interval would overflow
        assert!(matches!(pipeline.start(1e-30), Err(MeterError::InvalidSamplingRate)));
        assert_eq!(pipeline.state(), PipelineState::Connected);
    }
    struct CountingSource {
        next: f64,
    }
    impl SampleSource for CountingSource {
        fn next_sample(&mut self) -> Result<Option<Sample>, MeterError> {
            let sample = Sample::new(Local::now().naive_local(), self.next, 1.0, 23.0);
            self.next += 1.0;
            Ok(Some(sample))
        }
    }
    #[test]
    fn start_while_measuring_restarts_the_loop() {
        let source = CountingSource { next: 1.0 };
        let pipeline = MeasurementPipeline::with_source(test_config(), Box::new(source)).unwrap();
        pipeline.connect();
        pipeline.start(500.0).unwrap();
        let first = pipeline.subscribe();
        let before = wait_for_samples(&first.receiver, 5);
        // slow restart: no tick lands before the buffer is checked
        pipeline.start(1.0).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Measuring);
        assert!(pipeline.all().is_empty());
        pipeline.start(500.0).unwrap();
        let second = pipeline.subscribe();
        wait_for_samples(&second.receiver, 5);
        pipeline.stop();
        let stored: Vec<f64> = pipeline.all().iter().map(|s| s.current).collect();
        assert!(stored.len() >= 5);
        // one loop, driving the source handed back by the previous run
        assert!(stored[0] > before[4].current);
        assert!(stored.windows(2).all(|w| w[1] - w[0] == 1.0));
    }
    #[cfg(unix)]
    #[test]
    fn status_answers_while_a_load_is_blocked() {
        let path = temp_path("fifo.csv");
        let made = std::process::Command::new("mkfifo").arg(&path).status().unwrap();
        assert!(made.success());
        let pipeline = Arc::new(MeasurementPipeline::new(test_config()).unwrap());
        let loader = {
            let pipeline = Arc::clone(&pipeline);
            let path = path.clone();
            thread::spawn(move || pipeline.load_from_file(&path))
        };
        // opening a fifo blocks until a writer shows up
        thread::sleep(Duration::from_millis(50));
        let asked = Instant::now();
        let status = pipeline.status();
        pipeline.connect();
        assert!(asked.elapsed() < Duration::from_secs(1));
        assert_eq!(status.state, PipelineState::Disconnected);
        assert_eq!(status.data_point_count, 0);
        assert_eq!(pipeline.state(), PipelineState::Connected);
        std::fs::write(
            &path,
            "timestamp,current,voltage,resistance,temperature\n\
             2024-01-01T00:00:00,1e-9,1.0,1e9,23.0\n",
        )
        .unwrap();
        let loaded = loader.join().unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.unwrap(), 1);
        assert_eq!(pipeline.status().data_point_count, 1);
    }
    #[test]
    fn full_lifecycle_keeps_data_until_next_start() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        let sub = pipeline.subscribe();
        pipeline.connect();
        pipeline.connect();
        assert_eq!(pipeline.state(), PipelineState::Connected);
        pipeline.start(500.0).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Measuring);
        wait_for_samples(&sub.receiver, 12);
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Connected);
        let kept = pipeline.all();
        assert!(kept.len() >= 12);
        // no straggler appends after stop
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pipeline.all().len(), kept.len());
        assert!(pipeline.analyze().is_ok());
        pipeline.disconnect();
        assert_eq!(pipeline.state(), PipelineState::Disconnected);
        assert_eq!(pipeline.all(), kept);
        pipeline.connect();
        pipeline.start(1.0).unwrap();
        assert!(pipeline.all().is_empty());
        pipeline.disconnect();
        assert_eq!(pipeline.state(), PipelineState::Disconnected);
        let states: Vec<PipelineState> = sub
            .receiver
            .try_iter()
            .filter_map(|e| match e {
                PipelineEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(states.last(), Some(&PipelineState::Disconnected));
    }
    #[test]
    fn samples_arrive_in_generation_order_with_correction() {
        let t = Local::now().naive_local();
        let source = ReplaySource::new(
            [1.0, 2.0, 3.0, 4.0, 5.0]
                .into_iter()
                .map(|c| Sample::new(t, c, 1.0, 23.0)),
        );
        let pipeline = MeasurementPipeline::with_source(test_config(), Box::new(source)).unwrap();
        let sub = pipeline.subscribe();
        pipeline.connect();
        pipeline.start(1000.0).unwrap();
        let seen = wait_for_samples(&sub.receiver, 5);
        pipeline.stop();
        let raw: Vec<f64> = seen.iter().map(|s| s.current).collect();
        assert_eq!(raw, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let stored = pipeline.all();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored[4].effective_current(), 3.0);
        assert!(stored[..4].iter().all(|s| s.corrected_current.is_none()));
    }
    #[test]
    fn capacity_bounds_live_capture() {
        let config = PipelineConfig {
            capacity: 8,
            ..test_config()
        };
        let pipeline = MeasurementPipeline::new(config).unwrap();
        let sub = pipeline.subscribe();
        pipeline.connect();
        pipeline.start(1000.0).unwrap();
        let mut seen = wait_for_samples(&sub.receiver, 20);
        pipeline.stop();
        // the loop has exited, so every appended sample is already queued
        seen.extend(sub.receiver.try_iter().filter_map(|e| match e {
            PipelineEvent::Sample(s) => Some(s),
            _ => None,
        }));
        let stored = pipeline.all();
        assert_eq!(stored.len(), 8);
        assert_eq!(pipeline.window(8), stored);
        assert_eq!(stored.last().map(|s| s.current), seen.last().map(|s| s.current));
    }
    #[test]
    fn unsubscribed_consumer_gets_nothing_more() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        let sub = pipeline.subscribe();
        assert!(pipeline.unsubscribe(sub.id));
        pipeline.connect();
        assert!(sub.receiver.try_recv().is_err());
    }
    #[test]
    fn export_then_load_round_trips() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        pipeline.load_demo_dataset(40).unwrap();
        let before = pipeline.all();
        let path = temp_path("roundtrip.csv");
        assert_eq!(pipeline.export_to_file(&path).unwrap(), 40);
        let other = MeasurementPipeline::new(test_config()).unwrap();
        assert_eq!(other.load_from_file(&path).unwrap(), 40);
        let after = other.all();
        std::fs::remove_file(&path).ok();
        assert_eq!(after.len(), before.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.current, b.current);
            assert_eq!(a.voltage, b.voltage);
            assert_eq!(a.resistance, b.resistance);
            assert_eq!(a.temperature, b.temperature);
        }
        assert_eq!(other.status().data_point_count, 40);
        assert!(other.status().last_update.is_some());
    }
    #[test]
    fn failed_load_leaves_buffer_untouched() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        pipeline.load_demo_dataset(15).unwrap();
        let before = pipeline.all();
        let path = temp_path("broken.csv");
        std::fs::write(
            &path,
            "timestamp,current,voltage,resistance,temperature\n\
             2024-01-01T00:00:00,1e-9,1.0,1e9,23.0\n\
             not-a-time,1e-9,1.0,1e9,23.0\n",
        )
        .unwrap();
        let result = pipeline.load_from_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(MeterError::InvalidFormat(_))));
        assert_eq!(pipeline.all(), before);
        let missing = pipeline.load_from_file(&temp_path("does_not_exist.csv"));
        assert!(matches!(missing, Err(MeterError::Io(_))));
        assert_eq!(pipeline.all(), before);
    }
    #[test]
    fn loaded_dataset_is_unbounded_until_capture() {
        let config = PipelineConfig {
            capacity: 10,
            ..test_config()
        };
        let pipeline = MeasurementPipeline::new(config).unwrap();
        assert_eq!(pipeline.load_demo_dataset(25).unwrap(), 25);
        assert_eq!(pipeline.all().len(), 25);
        assert_eq!(pipeline.recent().len(), 25);
        pipeline.connect();
        pipeline.start(1.0).unwrap();
        assert!(pipeline.all().is_empty());
        assert!(matches!(
            pipeline.load_demo_dataset(5),
            Err(MeterError::MeasurementActive)
        ));
    }
    #[test]
    fn empty_pipeline_reads_and_exports() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        assert!(pipeline.window(10).is_empty());
        assert!(pipeline.all().is_empty());
        assert!(matches!(
            pipeline.analyze(),
            Err(MeterError::InsufficientData { actual: 0, .. })
        ));
        let status = pipeline.status();
        assert_eq!(status.state, PipelineState::Disconnected);
        assert_eq!(status.data_point_count, 0);
        assert!(status.last_update.is_none());
        assert!(matches!(
            pipeline.export_to_dir(&std::env::temp_dir()),
            Err(MeterError::NoData)
        ));
    }
    #[test]
    fn export_to_dir_uses_timestamped_name() {
        let pipeline = MeasurementPipeline::new(test_config()).unwrap();
        pipeline.load_demo_dataset(12).unwrap();
        let dir = temp_path("export_dir");
        std::fs::create_dir_all(&dir).unwrap();
        let path = pipeline.export_to_dir(&dir).unwrap();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap().to_owned();
        std::fs::remove_dir_all(&dir).ok();
        assert!(name.starts_with("quantum_measurements_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "quantum_measurements_YYYYMMDD_HHMMSS.csv".len());
    }
}
