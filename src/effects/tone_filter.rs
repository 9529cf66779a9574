// src/effects/tone_filter.rs

use serde::{Deserialize, Serialize};

use crate::error::{check_range, DeckError, Param, Result};

pub const MIN_CUTOFF_HZ: f32 = 20.0;
pub const MAX_CUTOFF_HZ: f32 = 20_000.0;
pub const MIN_RESONANCE: f32 = 0.3;
pub const MAX_RESONANCE: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    HighPass,
    LowPass,
}

impl FilterType {
    pub fn toggled(self) -> Self {
        match self {
            FilterType::HighPass => FilterType::LowPass,
            FilterType::LowPass => FilterType::HighPass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub filter_type: FilterType,
    pub cutoff: f32, // Hz
    pub resonance: f32, // Q
    pub active: bool,
}

impl Default for FilterParams {
    /// The deck dials' resting position: high-pass at 600 Hz, Q 2.0, bypassed.
    fn default() -> Self {
        Self {
            filter_type: FilterType::HighPass,
            cutoff: 600.0,
            resonance: 2.0,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl Coefficients {
    fn compute(cutoff: f32, resonance: f32, sample_rate: f64) -> Self {
        // Keep the prewarp away from tan()'s pole at Nyquist.
        let nyquist_guard = (sample_rate * 0.49) as f32;
        let cutoff = cutoff.min(nyquist_guard);

        let g = (std::f64::consts::PI * cutoff as f64 / sample_rate).tan() as f32;
        let k = 1.0 / resonance;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;
        Self { k, a1, a2, a3 }
    }
}

/// Integrator pair for one channel.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    ic1eq: f32,
    ic2eq: f32,
}

/// Second-order (12 dB/oct) topology-preserving state-variable filter,
/// one instance per deck.
///
/// Lifecycle: Unprepared -> `prepare` -> Prepared -> `release` -> Unprepared.
/// Parameter changes only mark the coefficients stale; they are recomputed
/// at the start of the next `process` call, and the integrator state is left
/// alone so sweeps stay click-free.
#[derive(Debug, Clone)]
pub struct ToneFilter {
    params: FilterParams,
    sample_rate: f64,
    channels: usize,
    state: Vec<ChannelState>,
    coeffs: Coefficients,
    coeffs_dirty: bool,
    prepared: bool,
}

impl ToneFilter {
    pub fn new(params: FilterParams) -> Self {
        Self {
            params: FilterParams {
                cutoff: clamp_cutoff(params.cutoff),
                resonance: clamp_resonance(params.resonance),
                ..params
            },
            sample_rate: 0.0,
            channels: 0,
            state: Vec::new(),
            coeffs: Coefficients::default(),
            coeffs_dirty: true,
            prepared: false,
        }
    }

    /// Allocates per-channel state. Call before the first `process` and
    /// again whenever the sample rate or channel count changes.
    pub fn prepare(&mut self, sample_rate: f64, max_block_frames: usize, channels: usize) -> Result<()> {
        check_range(Param::SampleRate, sample_rate, 1.0, f64::MAX)?;
        check_range(Param::Channels, channels as f64, 1.0, 64.0)?;
        check_range(Param::BlockSize, max_block_frames as f64, 1.0, f64::MAX)?;

        self.sample_rate = sample_rate;
        self.channels = channels;
        self.state.clear();
        self.state.resize(channels, ChannelState::default());
        self.coeffs_dirty = true;
        self.prepared = true;
        Ok(())
    }

    pub fn release(&mut self) {
        self.state = Vec::new();
        self.prepared = false;
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Zeroes the integrators so stale history can't pop on the next block.
    pub fn reset(&mut self) {
        self.state.fill(ChannelState::default());
    }

    pub fn params(&self) -> FilterParams {
        self.params
    }

    /// Returns the cutoff actually applied after clamping to 20 Hz..20 kHz.
    pub fn set_cutoff(&mut self, freq: f64) -> Result<f32> {
        let freq = finite(Param::Cutoff, freq, MIN_CUTOFF_HZ, MAX_CUTOFF_HZ)?;
        let cutoff = clamp_cutoff(freq as f32);
        if cutoff != self.params.cutoff {
            self.params.cutoff = cutoff;
            self.coeffs_dirty = true;
        }
        Ok(cutoff)
    }

    /// Returns the Q actually applied after clamping to 0.3..20.
    pub fn set_resonance(&mut self, q: f64) -> Result<f32> {
        let q = finite(Param::Resonance, q, MIN_RESONANCE, MAX_RESONANCE)?;
        let resonance = clamp_resonance(q as f32);
        if resonance != self.params.resonance {
            self.params.resonance = resonance;
            self.coeffs_dirty = true;
        }
        Ok(resonance)
    }

    pub fn set_type(&mut self, filter_type: FilterType) {
        self.params.filter_type = filter_type;
    }

    pub fn set_active(&mut self, active: bool) {
        self.params.active = active;
    }

    /// Filters an interleaved buffer in place.
    pub fn process(&mut self, buffer: &mut [f32]) -> Result<()> {
        if !self.prepared {
            return Err(DeckError::NotPrepared);
        }
        if !self.params.active {
            return Ok(());
        }
        if self.coeffs_dirty {
            self.coeffs =
                Coefficients::compute(self.params.cutoff, self.params.resonance, self.sample_rate);
            self.coeffs_dirty = false;
        }

        let Coefficients { k, a1, a2, a3 } = self.coeffs;
        let highpass = self.params.filter_type == FilterType::HighPass;

        for frame in buffer.chunks_exact_mut(self.channels) {
            for (sample, st) in frame.iter_mut().zip(self.state.iter_mut()) {
                let x = *sample;
                let v3 = x - st.ic2eq;
                let v1 = a1 * st.ic1eq + a2 * v3;
                let v2 = st.ic2eq + a2 * st.ic1eq + a3 * v3;
                st.ic1eq = 2.0 * v1 - st.ic1eq;
                st.ic2eq = 2.0 * v2 - st.ic2eq;

                let y = if highpass { x - k * v1 - v2 } else { v2 };
                // Denormal protection
                *sample = if y.abs() < 1e-20 { 0.0 } else { y };
            }
        }
        Ok(())
    }
}

fn finite(param: Param, value: f64, min: f32, max: f32) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DeckError::InvalidParameter {
            param,
            value,
            min: min as f64,
            max: max as f64,
        })
    }
}

fn clamp_cutoff(freq: f32) -> f32 {
    freq.clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ)
}

fn clamp_resonance(q: f32) -> f32 {
    q.clamp(MIN_RESONANCE, MAX_RESONANCE)
}
