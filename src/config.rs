use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::telemetry::{MeterError, QualityMode, DEFAULT_CAPACITY, DEFAULT_CORRECTION_WINDOW};

/// Samples shown by live plots and the "current measurements" query.
pub const RECENT_PLOT_WINDOW: usize = 100;
/// Rows shown by the data table.
pub const RECENT_TABLE_WINDOW: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capacity: usize,
    /// Ticks per second of the generation loop.
    pub sampling_rate_hz: f64,
    pub correction_enabled: bool,
    pub correction_window: usize,
    /// Run the anomaly check after every appended sample.
    pub analysis_on_tick: bool,
    pub quality_mode: QualityMode,
    pub simulation_seed: Option<u64>,
    pub sample_file: Option<PathBuf>,
    pub demo_points: usize,
    pub export_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // Desktop build starts at 10 Hz.
        Self {
            capacity: DEFAULT_CAPACITY,
            sampling_rate_hz: 10.0,
            correction_enabled: true,
            correction_window: DEFAULT_CORRECTION_WINDOW,
            analysis_on_tick: true,
            quality_mode: QualityMode::Combined,
            simulation_seed: None,
            sample_file: Some(PathBuf::from("data/sample_quantum_data.csv")),
            demo_points: 50,
            export_dir: PathBuf::from("."),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, MeterError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, MeterError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), MeterError> {
        if self.capacity == 0 {
            return Err(MeterError::Config("capacity must be at least 1".into()));
        }
        if self.correction_window == 0 {
            return Err(MeterError::Config("correction_window must be at least 1".into()));
        }
        sampling_interval(self.sampling_rate_hz)?;
        Ok(())
    }
}

/// Wait between ticks for a rate in Hz.
pub fn sampling_interval(sampling_rate_hz: f64) -> Result<Duration, MeterError> {
    if !(sampling_rate_hz.is_finite() && sampling_rate_hz > 0.0) {
        return Err(MeterError::InvalidSamplingRate);
    }
    // very small rates overflow Duration
    Duration::try_from_secs_f64(1.0 / sampling_rate_hz).map_err(|_| MeterError::InvalidSamplingRate)
}
