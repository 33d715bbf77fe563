// src/types.rs
use chrono::NaiveDateTime;
use serde::Serialize;

/// Resistance reported when the current reading is exactly zero.
pub const OPEN_CIRCUIT_RESISTANCE: f64 = 1e12;

/// One timestamped reading across the four instrument channels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    /// Raw current in amperes, never altered after capture.
    pub current: f64,
    pub voltage: f64,
    pub resistance: f64,
    pub temperature: f64,
    /// Moving-average current written by the correction filter.
    pub corrected_current: Option<f64>,
}

impl Sample {
    /// Builds a sample and derives the resistance from voltage and current.
    pub fn new(timestamp: NaiveDateTime, current: f64, voltage: f64, temperature: f64) -> Self {
        Self {
            timestamp,
            current,
            voltage,
            resistance: derive_resistance(voltage, current),
            temperature,
            corrected_current: None,
        }
    }

    /// Builds a sample from stored columns, keeping the recorded resistance.
    pub fn from_record(
        timestamp: NaiveDateTime,
        current: f64,
        voltage: f64,
        resistance: f64,
        temperature: f64,
    ) -> Self {
        Self {
            timestamp,
            current,
            voltage,
            resistance,
            temperature,
            corrected_current: None,
        }
    }

    pub fn effective_current(&self) -> f64 {
        self.corrected_current.unwrap_or(self.current)
    }
}

/// `voltage / current`, or the open-circuit sentinel when no current flows.
pub fn derive_resistance(voltage: f64, current: f64) -> f64 {
    if current == 0.0 {
        return OPEN_CIRCUIT_RESISTANCE;
    }
    let resistance = voltage / current;
    if resistance.is_finite() {
        resistance
    } else {
        OPEN_CIRCUIT_RESISTANCE
    }
}

// 连接状态
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize)]
pub enum PipelineState {
    Disconnected,
    Connected,
    Measuring,
}

/// Snapshot answered to `status()` polls.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub data_point_count: usize,
    pub last_update: Option<NaiveDateTime>,
}

// 后台发给订阅者的消息
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Sample(Sample),
    StateChanged(PipelineState),
    AnomaliesDetected { current: usize, voltage: usize },
    Loaded { count: usize },
}
