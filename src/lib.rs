//! Measurement telemetry pipeline for the simulated quantum meter: sample
//! generation, bounded buffering, correction, quality analysis and CSV/PNG
//! export. Presentation layers hold one [`MeasurementPipeline`] and poll it.
pub mod config;
pub mod engine;
pub mod recorder;
pub mod telemetry;
pub mod types;

pub use config::{PipelineConfig, RECENT_PLOT_WINDOW, RECENT_TABLE_WINDOW};
pub use engine::{BoxedSource, Subscription, SubscriptionId};
pub use telemetry::{
    MeasurementPipeline, MeterError, QualityMode, QualityReport, SampleSource,
};
pub use types::{PipelineEvent, PipelineState, PipelineStatus, Sample};
