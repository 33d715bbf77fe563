use thiserror::Error;
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("device not connected")]
    NotConnected,
    #[error("insufficient data for analysis: need {required} samples, have {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("invalid measurement file: {0}")]
    InvalidFormat(String),
    #[error("no measurement data to export")]
    NoData,
    #[error("sampling rate must be a positive number of ticks per second")]
    InvalidSamplingRate,
    #[error("cannot replace data while a measurement is running")]
    MeasurementActive,
    #[error("sample source fault: {0}")]
    Generator(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to render plot: {0}")]
    Plot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
impl From<csv::Error> for MeterError {
    fn from(value: csv::Error) -> Self {
        if !value.is_io_error() {
            return MeterError::InvalidFormat(value.to_string());
        }
        match value.into_kind() {
            csv::ErrorKind::Io(err) => MeterError::Io(err),
            other => MeterError::InvalidFormat(format!("{other:?}")),
        }
    }
}
impl From<serde_json::Error> for MeterError {
    fn from(value: serde_json::Error) -> Self {
        MeterError::Config(value.to_string())
    }
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for MeterError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        MeterError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for MeterError {
    fn from(value: image::ImageError) -> Self {
        MeterError::Plot(value.to_string())
    }
}
