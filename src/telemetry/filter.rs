use crate::telemetry::SampleBuffer;
/// Window used by the instrument software's smoothing step.
pub const DEFAULT_CORRECTION_WINDOW: usize = 5;
/// Causal moving average over the raw current channel.
///
/// Only the newest sample is amended, and only its `corrected_current`;
/// the raw reading stays in place so later averages never see blended data.
#[derive(Clone, Copy, Debug)]
pub struct CorrectionFilter {
    window: usize,
    enabled: bool,
}
impl CorrectionFilter {
    pub fn new(window: usize, enabled: bool) -> Self {
        Self {
            window: window.max(1),
            enabled,
        }
    }
    /// Returns the corrected value written, if any.
    pub fn apply(&self, buffer: &mut SampleBuffer) -> Option<f64> {
        if !self.enabled || buffer.len() < self.window {
            return None;
        }
        let sum: f64 = buffer
            .iter()
            .rev()
            .take(self.window)
            .map(|s| s.current)
            .sum();
        let average = sum / self.window as f64;
        let latest = buffer.latest_mut()?;
        latest.corrected_current = Some(average);
        Some(average)
    }
}
impl Default for CorrectionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CORRECTION_WINDOW, true)
    }
}
