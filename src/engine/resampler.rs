// src/engine/resampler.rs

use crate::engine::transport::Transport;
use crate::engine::CHANNELS;
use crate::error::{check_range_open_min, Param, Result};

pub const MAX_SPEED: f64 = 100.0;

type Frame = [f32; CHANNELS];

/// Variable-ratio linear interpolator that turns the transport's stream
/// into playback at `ratio` times normal speed.
///
/// Output frame `k` sits at fractional position `phase` between `prev` and
/// `next`; each step advances the phase by `ratio` and consumes a source
/// frame every time it crosses 1.0. The first output after a reset
/// consumes one frame, so a block of `n` frames at ratio 1 moves the
/// transport exactly `n` frames.
#[derive(Debug)]
pub struct SpeedResampler {
    ratio: f64,
    /// Source rate over output rate; 1.0 when the track matches the engine.
    rate_correction: f64,
    phase: f64,
    prev: Frame,
    next: Frame,
    scratch: Vec<f32>,
}

impl Default for SpeedResampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedResampler {
    pub fn new() -> Self {
        Self {
            ratio: 1.0,
            rate_correction: 1.0,
            phase: 1.0,
            prev: [0.0; CHANNELS],
            next: [0.0; CHANNELS],
            scratch: Vec::new(),
        }
    }

    /// Sizes the source scratch for blocks of up to `max_block_frames` at
    /// the maximum ratio, so `pull` never allocates.
    pub fn prepare(&mut self, max_block_frames: usize) {
        let frames = (max_block_frames as f64 * MAX_SPEED).ceil() as usize + 1;
        self.scratch = vec![0.0; frames * CHANNELS];
        self.reset();
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Accepts `(0, 100]`; anything else leaves the current ratio alone.
    pub fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        self.ratio = check_range_open_min(Param::Speed, ratio, 0.0, MAX_SPEED)?;
        Ok(())
    }

    /// Compensates for a source whose rate differs from the output rate.
    pub fn set_rate_correction(&mut self, source_rate: u32, output_rate: u32) {
        self.rate_correction = if source_rate == 0 || output_rate == 0 {
            1.0
        } else {
            source_rate as f64 / output_rate as f64
        };
    }

    fn step(&self) -> f64 {
        self.ratio * self.rate_correction
    }

    pub fn reset(&mut self) {
        self.phase = 1.0;
        self.prev = [0.0; CHANNELS];
        self.next = [0.0; CHANNELS];
    }

    /// Source frames the next `frames` outputs will consume.
    pub fn frames_needed(&self, frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }
        (self.phase + (frames - 1) as f64 * self.step()).floor() as usize
    }

    /// Produces exactly `out.len() / 2` frames, pulling what it needs from
    /// `transport`. Past the end of the track the transport supplies silence.
    pub fn pull(&mut self, transport: &mut Transport, out: &mut [f32]) {
        let frames = out.len() / CHANNELS;
        let capacity = self.scratch.len() / CHANNELS;
        let needed = self.frames_needed(frames).min(capacity);

        let src = &mut self.scratch[..needed * CHANNELS];
        transport.pull(src);

        let step = self.step();
        let mut cursor = 0usize;
        for frame in out.chunks_exact_mut(CHANNELS) {
            while self.phase >= 1.0 {
                self.prev = self.next;
                if cursor < needed {
                    let at = cursor * CHANNELS;
                    self.next = [self.scratch[at], self.scratch[at + 1]];
                    cursor += 1;
                }
                self.phase -= 1.0;
            }

            let t = self.phase as f32;
            for ch in 0..CHANNELS {
                frame[ch] = self.prev[ch] + (self.next[ch] - self.prev[ch]) * t;
            }
            self.phase += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedSource;

    fn playing_ramp(frames: usize) -> Transport {
        let samples = (0..frames).map(|i| i as f32).collect();
        let mut t = Transport::new();
        t.load(Box::new(DecodedSource::from_interleaved("ramp", samples, 1, 1000)));
        t.start();
        t
    }

    fn left(buf: &[f32]) -> Vec<f32> {
        buf.chunks_exact(2).map(|f| f[0]).collect()
    }

    #[test]
    fn ratio_validation_keeps_previous_value() {
        let mut r = SpeedResampler::new();
        r.set_ratio(2.0).unwrap();
        assert!(r.set_ratio(0.0).is_err());
        assert!(r.set_ratio(-1.0).is_err());
        assert!(r.set_ratio(100.5).is_err());
        assert!(r.set_ratio(f64::NAN).is_err());
        assert_eq!(r.ratio(), 2.0);
        assert!(r.set_ratio(100.0).is_ok());
    }

    #[test]
    fn unity_ratio_consumes_one_frame_per_output() {
        let mut t = playing_ramp(100);
        let mut r = SpeedResampler::new();
        r.prepare(16);

        let mut out = vec![0.0f32; 16 * 2];
        r.pull(&mut t, &mut out);
        assert_eq!(t.position_frames(), 16);
        // One frame of latency from the interpolation history.
        assert_eq!(left(&out)[..4], [0.0, 0.0, 1.0, 2.0]);

        r.pull(&mut t, &mut out);
        assert_eq!(t.position_frames(), 32);
    }

    #[test]
    fn double_speed_consumes_twice_as_fast() {
        let mut t = playing_ramp(1000);
        let mut r = SpeedResampler::new();
        r.prepare(64);
        r.set_ratio(2.0).unwrap();

        let mut out = vec![0.0f32; 64 * 2];
        for _ in 0..4 {
            r.pull(&mut t, &mut out);
        }
        // 256 outputs at ratio 2 -> 1 + 2 * 255 source frames.
        assert_eq!(t.position_frames(), 511);
        let l = left(&out);
        assert_eq!(l[1] - l[0], 2.0);
    }

    #[test]
    fn half_speed_interpolates_between_frames() {
        let mut t = playing_ramp(100);
        let mut r = SpeedResampler::new();
        r.prepare(8);
        r.set_ratio(0.5).unwrap();

        let mut out = vec![0.0f32; 8 * 2];
        r.pull(&mut t, &mut out);
        assert_eq!(left(&out), vec![0.0, 0.0, 0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
        assert_eq!(t.position_frames(), 4);
    }

    #[test]
    fn rate_correction_scales_consumption() {
        let mut t = playing_ramp(1000);
        let mut r = SpeedResampler::new();
        r.prepare(64);
        // A 48 kHz track on a 24 kHz output steps two source frames per output.
        r.set_rate_correction(48_000, 24_000);
        let mut out = vec![0.0f32; 64 * 2];
        r.pull(&mut t, &mut out);
        assert_eq!(t.position_frames(), 1 + 2 * 63);
        assert_eq!(r.ratio(), 1.0);

        r.set_rate_correction(0, 24_000);
        r.reset();
        assert_eq!(r.frames_needed(10), 10);
    }

    #[test]
    fn end_of_track_pads_with_silence() {
        let mut t = playing_ramp(4);
        let mut r = SpeedResampler::new();
        r.prepare(8);
        let mut out = vec![1.0f32; 8 * 2];
        r.pull(&mut t, &mut out);
        assert_eq!(left(&out), vec![0.0, 0.0, 1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
    }
}
