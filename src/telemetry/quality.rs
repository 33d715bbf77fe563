//! Batch 3-sigma quality check over a window of samples.
//!
//! Statistics are population-style (divide by `n`) and recomputed from the
//! window passed in on every call; nothing is cached between calls.
use serde::{Deserialize, Serialize};

use crate::telemetry::MeterError;
use crate::types::Sample;
/// Fewest samples the analyzer will look at.
pub const MIN_ANALYSIS_SAMPLES: usize = 10;
/// Multiple of the standard deviation beyond which a value is anomalous.
pub const SIGMA_LIMIT: f64 = 3.0;
/// Which channels feed the quality score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    /// Mean of current and voltage stability.
    #[default]
    Combined,
    /// Current stability alone.
    CurrentOnly,
}
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub anomaly_count: usize,
    /// `1 - std/mean`, or 0 when the mean is zero.
    pub stability: f64,
}
impl ChannelStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                anomaly_count: 0,
                stability: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values
            .iter()
            .map(|v| {
                let delta = v - mean;
                delta * delta
            })
            .sum::<f64>()
            / n;
        let std = variance.sqrt();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let anomaly_count = values
            .iter()
            .filter(|&&v| is_anomalous(v, mean, std))
            .count();
        let stability = if mean == 0.0 { 0.0 } else { 1.0 - std / mean };
        Self {
            mean,
            std,
            min,
            max,
            anomaly_count,
            stability,
        }
    }
}
/// A value sitting at or beyond three deviations from the mean.
///
/// A flat channel (`std == 0`) never has anomalies.
pub fn is_anomalous(value: f64, mean: f64, std: f64) -> bool {
    std > 0.0 && (value - mean).abs() >= SIGMA_LIMIT * std
}
/// Advisory report derived from one window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QualityReport {
    pub sample_count: usize,
    pub current: ChannelStats,
    pub voltage: ChannelStats,
    pub mode: QualityMode,
    pub quality_score: f64,
}
impl QualityReport {
    pub fn total_anomalies(&self) -> usize {
        self.current.anomaly_count + self.voltage.anomaly_count
    }
    pub fn grade(&self) -> QualityGrade {
        QualityGrade::from_score(self.quality_score)
    }
}
/// Coarse banding used by the dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum QualityGrade {
    Excellent,
    Good,
    NeedsAttention,
}
impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score > 0.95 {
            QualityGrade::Excellent
        } else if score > 0.9 {
            QualityGrade::Good
        } else {
            QualityGrade::NeedsAttention
        }
    }
}
pub fn analyze(samples: &[Sample], mode: QualityMode) -> Result<QualityReport, MeterError> {
    if samples.len() < MIN_ANALYSIS_SAMPLES {
        return Err(MeterError::InsufficientData {
            required: MIN_ANALYSIS_SAMPLES,
            actual: samples.len(),
        });
    }
    let currents: Vec<f64> = samples.iter().map(|s| s.current).collect();
    let voltages: Vec<f64> = samples.iter().map(|s| s.voltage).collect();
    let current = ChannelStats::from_values(&currents);
    let voltage = ChannelStats::from_values(&voltages);
    let quality_score = match mode {
        QualityMode::Combined => (current.stability + voltage.stability) / 2.0,
        QualityMode::CurrentOnly => current.stability,
    };
    Ok(QualityReport {
        sample_count: samples.len(),
        current,
        voltage,
        mode,
        quality_score,
    })
}
