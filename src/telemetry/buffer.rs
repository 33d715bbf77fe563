use std::collections::VecDeque;

use crate::types::Sample;
/// Default retention for continuous capture.
pub const DEFAULT_CAPACITY: usize = 1000;
/// Insertion-ordered sample store with FIFO eviction.
///
/// A `None` capacity keeps everything; file-loaded datasets use it until the
/// next capture resets the buffer.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: Option<usize>,
}
impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }
    pub fn unbounded(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            capacity: None,
        }
    }
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn append(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        if let Some(capacity) = self.capacity {
            while self.samples.len() > capacity {
                self.samples.pop_front();
            }
        }
    }
    /// Last `min(n, len)` samples, oldest first.
    pub fn window(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }
    pub fn all(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> + ExactSizeIterator {
        self.samples.iter()
    }
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }
    pub(crate) fn latest_mut(&mut self) -> Option<&mut Sample> {
        self.samples.back_mut()
    }
    pub fn clear(&mut self) {
        self.samples.clear();
    }
    /// Empties the buffer and puts a capacity limit back in force.
    pub fn reset(&mut self, capacity: usize) {
        self.clear();
        self.capacity = Some(capacity);
    }
}
