use std::collections::VecDeque;

use chrono::{Duration, Local, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use crate::telemetry::MeterError;
use crate::types::Sample;

/// Nominal instrument current (1 nA).
pub const BASE_CURRENT_AMPS: f64 = 1e-9;
/// Trait representing something that can yield one sample per tick.
///
/// `Ok(None)` means nothing is available this tick; the loop skips it.
pub trait SampleSource {
    fn next_sample(&mut self) -> Result<Option<Sample>, MeterError>;
}
/// Noise model of the simulated instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulationProfile {
    /// Flat 1 nA with 1% noise, as streamed during live capture.
    Continuous,
    /// 2% noise on a slow sinusoidal trend, voltage correlated with current.
    Demo,
}
/// Zero-mean noise per channel, built once rather than on every draw.
#[derive(Clone, Copy, Debug)]
struct ChannelNoise {
    current: Normal<f64>,
    voltage: Normal<f64>,
    temperature: Normal<f64>,
}
impl ChannelNoise {
    fn for_profile(profile: SimulationProfile) -> Result<Self, MeterError> {
        let (current, voltage, temperature) = match profile {
            SimulationProfile::Continuous => (BASE_CURRENT_AMPS * 0.01, 0.001, 0.1),
            SimulationProfile::Demo => (BASE_CURRENT_AMPS * 0.02, 0.001, 0.05),
        };
        Ok(Self {
            current: zero_mean(current)?,
            voltage: zero_mean(voltage)?,
            temperature: zero_mean(temperature)?,
        })
    }
}
fn zero_mean(std_dev: f64) -> Result<Normal<f64>, MeterError> {
    Normal::new(0.0, std_dev)
        .map_err(|err| MeterError::Generator(format!("noise sigma {std_dev}: {err}")))
}
/// Generative model standing in for the quantum measurement device.
pub struct SimulatedInstrument {
    rng: StdRng,
    profile: SimulationProfile,
    noise: ChannelNoise,
    tick: u64,
}
impl SimulatedInstrument {
    pub fn new(profile: SimulationProfile) -> Result<Self, MeterError> {
        Self::with_rng(profile, StdRng::from_entropy())
    }
    pub fn seeded(profile: SimulationProfile, seed: u64) -> Result<Self, MeterError> {
        Self::with_rng(profile, StdRng::seed_from_u64(seed))
    }
    fn with_rng(profile: SimulationProfile, rng: StdRng) -> Result<Self, MeterError> {
        Ok(Self {
            rng,
            profile,
            noise: ChannelNoise::for_profile(profile)?,
            tick: 0,
        })
    }
    /// Draws the reading for `timestamp` and advances the tick counter.
    pub fn sample_at(&mut self, timestamp: NaiveDateTime) -> Sample {
        let i = self.tick as f64;
        self.tick += 1;
        let noise = self.noise;
        let current_noise: f64 = self.rng.sample(noise.current);
        let voltage_noise: f64 = self.rng.sample(noise.voltage);
        let temperature_noise: f64 = self.rng.sample(noise.temperature);
        match self.profile {
            SimulationProfile::Continuous => Sample::new(
                timestamp,
                BASE_CURRENT_AMPS + current_noise,
                1.0 + voltage_noise,
                23.0 + temperature_noise,
            ),
            SimulationProfile::Demo => {
                let trend = 0.1 * (i * 0.2).sin();
                let current = BASE_CURRENT_AMPS * (1.0 + trend) + current_noise;
                let voltage = 1.0 + voltage_noise + (current - BASE_CURRENT_AMPS) * 1e6;
                let temperature = 23.0 + 0.1 * (i * 0.1).sin() + temperature_noise;
                Sample::new(timestamp, current, voltage, temperature)
            }
        }
    }
}
impl SampleSource for SimulatedInstrument {
    fn next_sample(&mut self) -> Result<Option<Sample>, MeterError> {
        Ok(Some(self.sample_at(Local::now().naive_local())))
    }
}
/// Samples spaced one second apart, the newest one stamped "now".
pub fn generate_demo_dataset(count: usize, seed: Option<u64>) -> Result<Vec<Sample>, MeterError> {
    let mut instrument = match seed {
        Some(seed) => SimulatedInstrument::seeded(SimulationProfile::Demo, seed)?,
        None => SimulatedInstrument::new(SimulationProfile::Demo)?,
    };
    let base_time = Local::now().naive_local() - Duration::seconds(count as i64);
    Ok((0..count)
        .map(|i| instrument.sample_at(base_time + Duration::seconds(i as i64 + 1)))
        .collect())
}
/// Replays recorded samples in order, useful for tests and file playback.
pub struct ReplaySource {
    queue: VecDeque<Sample>,
}
impl ReplaySource {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
        }
    }
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}
impl SampleSource for ReplaySource {
    fn next_sample(&mut self) -> Result<Option<Sample>, MeterError> {
        Ok(self.queue.pop_front())
    }
}
