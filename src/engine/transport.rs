// src/engine/transport.rs

use crate::decoder::DecodedSource;
use crate::engine::CHANNELS;
use crate::error::{check_range, DeckError, Param, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Empty,
    Stopped,
    Playing,
}

/// Playhead and play/stop state over one decoded source.
#[derive(Debug, Default)]
pub struct Transport {
    source: Option<Box<DecodedSource>>,
    position: usize, // frames
    playing: bool,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a new source, rewinds and stops. The previous source is
    /// handed back so it can be dropped somewhere other than the audio thread.
    pub fn load(&mut self, source: Box<DecodedSource>) -> Option<Box<DecodedSource>> {
        self.position = 0;
        self.playing = false;
        self.source.replace(source)
    }

    pub fn unload(&mut self) -> Option<Box<DecodedSource>> {
        self.position = 0;
        self.playing = false;
        self.source.take()
    }

    pub fn source(&self) -> Option<&DecodedSource> {
        self.source.as_deref()
    }

    pub fn state(&self) -> TransportState {
        match (&self.source, self.playing) {
            (None, _) => TransportState::Empty,
            (Some(_), false) => TransportState::Stopped,
            (Some(_), true) => TransportState::Playing,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn start(&mut self) {
        if self.source.is_some() {
            self.playing = true;
        }
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn position_frames(&self) -> usize {
        self.position
    }

    pub fn length_frames(&self) -> usize {
        self.source.as_ref().map_or(0, |s| s.frames())
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.as_ref().map_or(0, |s| s.sample_rate())
    }

    pub fn position_seconds(&self) -> f64 {
        match self.sample_rate() {
            0 => 0.0,
            sr => self.position as f64 / sr as f64,
        }
    }

    pub fn length_seconds(&self) -> f64 {
        self.source.as_ref().map_or(0.0, |s| s.length_seconds())
    }

    /// Moves the playhead, clamped to `[0, length]`.
    pub fn set_position(&mut self, seconds: f64) -> Result<()> {
        let Some(source) = self.source.as_ref() else {
            return Err(DeckError::NoSourceLoaded);
        };
        if !seconds.is_finite() {
            return Err(DeckError::InvalidParameter {
                param: Param::Position,
                value: seconds,
                min: 0.0,
                max: source.length_seconds(),
            });
        }
        let frame = (seconds * source.sample_rate() as f64).round().max(0.0) as usize;
        self.position = frame.min(source.frames());
        Ok(())
    }

    pub fn set_position_relative(&mut self, pos: f64) -> Result<()> {
        let pos = check_range(Param::RelativePosition, pos, 0.0, 1.0)?;
        if self.source.is_none() {
            return Err(DeckError::NoSourceLoaded);
        }
        self.set_position(pos * self.length_seconds())
    }

    /// Playhead as a fraction of the track; 0.0 when nothing (or nothing
    /// with a length) is loaded.
    pub fn position_relative(&self) -> f64 {
        let len = self.length_frames();
        if len == 0 {
            return 0.0;
        }
        (self.position as f64 / len as f64).clamp(0.0, 1.0)
    }

    /// Fills `out` with the next frames. Stopped or empty transports emit
    /// silence without moving; the end of the track is zero-padded and
    /// stops playback. Returns the number of frames consumed.
    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        let Some(source) = self.source.as_ref() else {
            out.fill(0.0);
            return 0;
        };
        if !self.playing {
            out.fill(0.0);
            return 0;
        }

        let wanted = out.len() / CHANNELS;
        let available = source.frames().saturating_sub(self.position);
        let n = wanted.min(available);

        let start = self.position * CHANNELS;
        out[..n * CHANNELS].copy_from_slice(&source.samples()[start..start + n * CHANNELS]);
        out[n * CHANNELS..].fill(0.0);

        self.position += n;
        if n < wanted || self.position >= source.frames() {
            self.playing = false;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(frames: usize, rate: u32) -> Box<DecodedSource> {
        let samples = (0..frames).map(|i| i as f32).collect();
        Box::new(DecodedSource::from_interleaved("ramp", samples, 1, rate))
    }

    #[test]
    fn empty_transport_is_silent_and_reports_zero() {
        let mut t = Transport::new();
        let mut out = [1.0f32; 8];
        t.start();
        assert_eq!(t.pull(&mut out), 0);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(t.state(), TransportState::Empty);
        assert_eq!(t.position_relative(), 0.0);
        assert!(matches!(t.set_position(1.0), Err(DeckError::NoSourceLoaded)));
    }

    #[test]
    fn zero_length_source_never_divides_by_zero() {
        let mut t = Transport::new();
        t.load(Box::new(DecodedSource::from_interleaved("empty", Vec::new(), 2, 44100)));
        let rel = t.position_relative();
        assert_eq!(rel, 0.0);
        assert!(t.set_position_relative(0.5).is_ok());
        assert_eq!(t.position_relative(), 0.0);
    }

    #[test]
    fn stopped_transport_does_not_consume() {
        let mut t = Transport::new();
        t.load(ramp(16, 100));
        let mut out = [9.0f32; 8];
        assert_eq!(t.pull(&mut out), 0);
        assert_eq!(t.position_frames(), 0);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn pull_copies_then_pads_and_stops_at_end() {
        let mut t = Transport::new();
        t.load(ramp(3, 100));
        t.start();

        let mut out = [9.0f32; 8];
        assert_eq!(t.pull(&mut out), 3);
        assert_eq!(out, [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 0.0, 0.0]);
        assert!(!t.is_playing());

        // No looping: further pulls stay silent.
        t.start();
        assert_eq!(t.pull(&mut out), 0);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn positions_clamp_and_validate() {
        let mut t = Transport::new();
        t.load(ramp(1000, 100)); // 10 s

        t.set_position(4.0).unwrap();
        assert_eq!(t.position_frames(), 400);
        t.set_position(-3.0).unwrap();
        assert_eq!(t.position_frames(), 0);
        t.set_position(99.0).unwrap();
        assert_eq!(t.position_frames(), 1000);
        assert!(t.set_position(f64::NAN).is_err());

        t.set_position_relative(0.25).unwrap();
        assert_relative_eq!(t.position_relative(), 0.25);
        assert!(t.set_position_relative(1.5).is_err());
        assert!(t.set_position_relative(-0.1).is_err());
        assert_relative_eq!(t.position_relative(), 0.25);
    }

    #[test]
    fn load_rewinds_and_returns_previous() {
        let mut t = Transport::new();
        assert!(t.load(ramp(10, 100)).is_none());
        t.start();
        let mut out = [0.0f32; 8];
        t.pull(&mut out);
        assert_eq!(t.position_frames(), 4);

        let old = t.load(ramp(20, 100));
        assert_eq!(old.map(|s| s.frames()), Some(10));
        assert_eq!(t.position_frames(), 0);
        assert_eq!(t.state(), TransportState::Stopped);
    }
}
