// src/telemetry/mod.rs
// 测量遥测流水线的各个子模块
pub mod buffer;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod plot;
pub mod quality;
pub mod source;
// 公开导出，方便外部调用
pub use buffer::{SampleBuffer, DEFAULT_CAPACITY};
pub use error::MeterError;
pub use filter::{CorrectionFilter, DEFAULT_CORRECTION_WINDOW};
pub use pipeline::{MeasurementPipeline, CONTROL_LOCK_TIMEOUT};
pub use plot::{render_window_png, PlotStyle};
pub use quality::{
    analyze, ChannelStats, QualityGrade, QualityMode, QualityReport, MIN_ANALYSIS_SAMPLES,
};
pub use source::{
    generate_demo_dataset, ReplaySource, SampleSource, SimulatedInstrument, SimulationProfile,
    BASE_CURRENT_AMPS,
};
