// src/engine/metering.rs

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::CHANNELS;

/// The lock-free bridge for one deck. The audio thread writes after every
/// block and every applied command; UI timers read.
#[derive(Debug)]
pub struct DeckMeters {
    position_frames: AtomicU64,
    length_frames: AtomicU64,
    sample_rate: AtomicU32,
    loaded: AtomicBool,
    playing: AtomicBool,
    gain: AtomicU32,
    speed: AtomicU64,
    peak_l: AtomicU32,
    peak_r: AtomicU32,
    hold_l: AtomicU32,
    hold_r: AtomicU32,
}

/// Snapshot of a deck's level meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    pub peak_l: f32,
    pub peak_r: f32,
    pub hold_l: f32,
    pub hold_r: f32,
}

impl DeckMeters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            position_frames: AtomicU64::new(0),
            length_frames: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            loaded: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            gain: AtomicU32::new(1.0f32.to_bits()),
            speed: AtomicU64::new(1.0f64.to_bits()),
            peak_l: AtomicU32::new(0),
            peak_r: AtomicU32::new(0),
            hold_l: AtomicU32::new(0),
            hold_r: AtomicU32::new(0),
        })
    }

    pub(crate) fn publish_transport(
        &self,
        position_frames: usize,
        length_frames: usize,
        sample_rate: u32,
        loaded: bool,
        playing: bool,
    ) {
        self.position_frames.store(position_frames as u64, Ordering::Relaxed);
        self.length_frames.store(length_frames as u64, Ordering::Relaxed);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.loaded.store(loaded, Ordering::Relaxed);
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub(crate) fn publish_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn publish_speed(&self, speed: f64) {
        self.speed.store(speed.to_bits(), Ordering::Relaxed);
    }

    pub fn position_frames(&self) -> u64 {
        self.position_frames.load(Ordering::Relaxed)
    }

    pub fn length_frames(&self) -> u64 {
        self.length_frames.load(Ordering::Relaxed)
    }

    pub fn position_seconds(&self) -> f64 {
        match self.sample_rate.load(Ordering::Relaxed) {
            0 => 0.0,
            sr => self.position_frames() as f64 / sr as f64,
        }
    }

    pub fn length_seconds(&self) -> f64 {
        match self.sample_rate.load(Ordering::Relaxed) {
            0 => 0.0,
            sr => self.length_frames() as f64 / sr as f64,
        }
    }

    /// 0.0 for an unloaded or zero-length track, never NaN.
    pub fn position_relative(&self) -> f64 {
        let len = self.length_frames();
        if len == 0 {
            return 0.0;
        }
        (self.position_frames() as f64 / len as f64).clamp(0.0, 1.0)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Relaxed))
    }

    pub fn levels(&self) -> Levels {
        Levels {
            peak_l: f32::from_bits(self.peak_l.load(Ordering::Relaxed)),
            peak_r: f32::from_bits(self.peak_r.load(Ordering::Relaxed)),
            hold_l: f32::from_bits(self.hold_l.load(Ordering::Relaxed)),
            hold_r: f32::from_bits(self.hold_r.load(Ordering::Relaxed)),
        }
    }
}

/// Peak-hold calculator, owned by the audio thread.
#[derive(Debug)]
pub struct MeterState {
    decay_coeff: f32,
    stored_peak: [f32; CHANNELS],
    hold_frames: [usize; CHANNELS],
    hold_duration_frames: usize,
}

impl MeterState {
    pub fn new(sample_rate: f32) -> Self {
        let release_time_sec = 0.300;

        // Block-size independent decay coefficient
        let decay_coeff = (-1.0 / (release_time_sec * sample_rate)).exp();

        Self {
            decay_coeff,
            stored_peak: [0.0; CHANNELS],
            hold_frames: [0; CHANNELS],
            hold_duration_frames: (0.500 * sample_rate) as usize,
        }
    }

    pub fn process_block(&mut self, buffer: &[f32], meters: &DeckMeters) {
        let block_size = buffer.len() / CHANNELS;
        if block_size == 0 {
            return;
        }

        let mut max = [0.0f32; CHANNELS];
        for frame in buffer.chunks_exact(CHANNELS) {
            for (m, s) in max.iter_mut().zip(frame) {
                *m = m.max(s.abs());
            }
        }

        let block_decay = self.decay_coeff.powf(block_size as f32);

        for ch in 0..CHANNELS {
            if max[ch] > self.stored_peak[ch] {
                self.stored_peak[ch] = max[ch];
                self.hold_frames[ch] = self.hold_duration_frames;
            } else if self.hold_frames[ch] > 0 {
                self.hold_frames[ch] = self.hold_frames[ch].saturating_sub(block_size);
            } else {
                self.stored_peak[ch] *= block_decay;
                if self.stored_peak[ch] < 1e-20 {
                    self.stored_peak[ch] = 0.0;
                }
            }
        }

        meters.peak_l.store(max[0].to_bits(), Ordering::Relaxed);
        meters.peak_r.store(max[1].to_bits(), Ordering::Relaxed);
        meters.hold_l.store(self.stored_peak[0].to_bits(), Ordering::Relaxed);
        meters.hold_r.store(self.stored_peak[1].to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&mut self) {
        self.stored_peak = [0.0; CHANNELS];
        self.hold_frames = [0; CHANNELS];
    }
}

/// Engine-wide counters, plus the rate the engine is currently prepared for.
#[derive(Debug, Default)]
pub struct EngineStats {
    sample_rate: AtomicU32,
    pub blocks_rendered: AtomicU64,
    pub commands_applied: AtomicU64,
    /// Retired resources that had to be dropped on the audio thread because
    /// the retire queue was full.
    pub retire_overflows: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Output rate of the engine. Tracks should be decoded at this rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub(crate) fn set_sample_rate(&self, rate: u32) {
        self.sample_rate.store(rate, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unloaded_meters_read_zero() {
        let m = DeckMeters::new();
        assert_eq!(m.position_relative(), 0.0);
        assert_eq!(m.position_seconds(), 0.0);
        assert_eq!(m.gain(), 1.0);
        assert_eq!(m.speed(), 1.0);
    }

    #[test]
    fn peak_holds_then_decays() {
        let m = DeckMeters::new();
        let mut state = MeterState::new(1000.0);

        state.process_block(&[0.8, -0.4, 0.1, 0.1], &m);
        let l = m.levels();
        assert_eq!(l.peak_l, 0.8);
        assert_eq!(l.peak_r, 0.4);
        assert_eq!(l.hold_l, 0.8);

        // 500 ms hold at 1 kHz, then decay.
        let quiet = vec![0.0f32; 2 * 600];
        state.process_block(&quiet, &m);
        assert_eq!(m.levels().hold_l, 0.8);
        state.process_block(&quiet, &m);
        let held = m.levels().hold_l;
        assert!(held < 0.8 && held > 0.0);
        assert_eq!(m.levels().peak_l, 0.0);
    }
}
