// src/engine/deck.rs

use std::fmt;
use std::sync::Arc;

use crate::decoder::DecodedSource;
use crate::effects::{FilterParams, FilterType, ToneFilter};
use crate::engine::command::{DeckCommand, Retired};
use crate::engine::metering::{DeckMeters, MeterState};
use crate::engine::resampler::SpeedResampler;
use crate::engine::transport::Transport;
use crate::engine::CHANNELS;
use crate::error::{check_range, Param, Result};

/// Identifier for a deck.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeckId(pub u32);

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Decks read as A, B, C... on screen.
        match char::from_u32('A' as u32 + self.0) {
            Some(c) if self.0 < 26 => write!(f, "{c}"),
            _ => write!(f, "#{}", self.0),
        }
    }
}

/// One playback channel: transport -> speed resampler -> gain -> tone filter.
#[derive(Debug)]
pub struct Deck {
    pub id: DeckId,
    transport: Transport,
    resampler: SpeedResampler,
    filter: ToneFilter,
    gain: f32,
    sample_rate: u32,
    meter_state: MeterState,
    meters: Arc<DeckMeters>,
}

impl Deck {
    /// Builds and prepares a deck. Allocates, so call it off the audio thread.
    pub fn new(
        id: DeckId,
        sample_rate: u32,
        max_block_frames: usize,
        filter: FilterParams,
        meters: Arc<DeckMeters>,
    ) -> Result<Self> {
        let mut deck = Self {
            id,
            transport: Transport::new(),
            resampler: SpeedResampler::new(),
            filter: ToneFilter::new(filter),
            gain: 1.0,
            sample_rate,
            meter_state: MeterState::new(sample_rate as f32),
            meters,
        };
        deck.prepare(sample_rate, max_block_frames)?;
        Ok(deck)
    }

    /// (Re)allocates the resampler scratch and filter state for a new
    /// device configuration.
    pub fn prepare(&mut self, sample_rate: u32, max_block_frames: usize) -> Result<()> {
        self.filter
            .prepare(sample_rate as f64, max_block_frames, CHANNELS)?;
        self.resampler.prepare(max_block_frames);
        self.resampler
            .set_rate_correction(self.transport.sample_rate(), sample_rate);
        self.sample_rate = sample_rate;
        self.meter_state = MeterState::new(sample_rate as f32);
        self.publish();
        Ok(())
    }

    /// Output rate the deck is prepared for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn meters(&self) -> &Arc<DeckMeters> {
        &self.meters
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn filter_params(&self) -> FilterParams {
        self.filter.params()
    }

    /// Replaces the track. Playback stops and the playhead rewinds; the old
    /// source is returned for disposal.
    pub fn load(&mut self, source: Box<DecodedSource>) -> Option<Box<DecodedSource>> {
        let old = self.transport.load(source);
        self.resampler
            .set_rate_correction(self.transport.sample_rate(), self.sample_rate);
        self.clear_history();
        self.publish();
        old
    }

    pub fn unload(&mut self) -> Option<Box<DecodedSource>> {
        let old = self.transport.unload();
        self.clear_history();
        self.publish();
        old
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Accepts `[0, 1]`; out-of-range values leave the current gain in place.
    pub fn set_gain(&mut self, gain: f64) -> Result<()> {
        self.gain = check_range(Param::Gain, gain, 0.0, 1.0)? as f32;
        self.meters.publish_gain(self.gain);
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        self.resampler.ratio()
    }

    pub fn set_speed(&mut self, ratio: f64) -> Result<()> {
        self.resampler.set_ratio(ratio)?;
        self.meters.publish_speed(ratio);
        Ok(())
    }

    pub fn set_position(&mut self, seconds: f64) -> Result<()> {
        self.transport.set_position(seconds)?;
        self.clear_history();
        self.publish();
        Ok(())
    }

    pub fn set_position_relative(&mut self, pos: f64) -> Result<()> {
        self.transport.set_position_relative(pos)?;
        self.clear_history();
        self.publish();
        Ok(())
    }

    pub fn position_relative(&self) -> f64 {
        self.transport.position_relative()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn start(&mut self) {
        self.transport.start();
        self.publish();
    }

    /// Stops and drops the resampler and filter history so the next start
    /// doesn't replay a stale transient.
    pub fn stop(&mut self) {
        self.transport.stop();
        self.clear_history();
        self.publish();
    }

    /// Moves the tone dials and engages the filter. Cutoff and resonance
    /// are clamped to their ranges; non-finite values are rejected.
    pub fn update_filter(&mut self, cutoff: f64, resonance: f64) -> Result<()> {
        // Validate both before touching either.
        check_finite(Param::Cutoff, cutoff)?;
        check_finite(Param::Resonance, resonance)?;
        self.filter.set_cutoff(cutoff)?;
        self.filter.set_resonance(resonance)?;
        self.filter.set_active(true);
        Ok(())
    }

    pub fn set_filter_type(&mut self, filter_type: FilterType) {
        self.filter.set_type(filter_type);
    }

    pub fn set_filter_active(&mut self, active: bool) {
        if active && !self.filter.params().active {
            self.filter.reset();
        }
        self.filter.set_active(active);
    }

    /// Renders `out.len() / 2` frames: resample, apply gain, filter in place.
    pub fn pull(&mut self, out: &mut [f32]) {
        self.resampler.pull(&mut self.transport, out);

        if self.gain != 1.0 {
            for s in out.iter_mut() {
                *s *= self.gain;
            }
        }

        let filtered = self.filter.process(out);
        debug_assert!(filtered.is_ok(), "deck {} filter not prepared", self.id);

        self.meter_state.process_block(out, &self.meters);
        self.publish();
    }

    /// Applies one queued command. Returns whatever the deck let go of.
    pub fn apply(&mut self, command: DeckCommand) -> Option<Retired> {
        // Values were validated on the control side; a rejection here means
        // the deck state changed in between (e.g. a seek on an unloaded deck)
        // and the command is dropped.
        let _ = match command {
            DeckCommand::Load(source) => return self.load(source).map(Retired::Source),
            DeckCommand::Unload => return self.unload().map(Retired::Source),
            DeckCommand::Start => {
                self.start();
                Ok(())
            }
            DeckCommand::Stop => {
                self.stop();
                Ok(())
            }
            DeckCommand::SetGain(g) => self.set_gain(g),
            DeckCommand::SetSpeed(r) => self.set_speed(r),
            DeckCommand::SetPosition(s) => self.set_position(s),
            DeckCommand::SetPositionRelative(p) => self.set_position_relative(p),
            DeckCommand::UpdateFilter { cutoff, resonance } => {
                self.update_filter(cutoff, resonance)
            }
            DeckCommand::SetFilterType(t) => {
                self.set_filter_type(t);
                Ok(())
            }
            DeckCommand::SetFilterActive(a) => {
                self.set_filter_active(a);
                Ok(())
            }
        };
        None
    }

    fn clear_history(&mut self) {
        self.resampler.reset();
        self.filter.reset();
        self.meter_state.reset();
    }

    fn publish(&self) {
        let t = &self.transport;
        self.meters.publish_transport(
            t.position_frames(),
            t.length_frames(),
            t.sample_rate(),
            t.source().is_some(),
            t.is_playing(),
        );
    }
}

fn check_finite(param: Param, value: f64) -> Result<f64> {
    check_range(param, value, f64::MIN, f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeckError;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 44_100;

    fn deck() -> Deck {
        Deck::new(DeckId(0), SR, 512, FilterParams::default(), DeckMeters::new()).unwrap()
    }

    fn constant(value: f32, seconds: f64) -> Box<DecodedSource> {
        let frames = (seconds * SR as f64) as usize;
        Box::new(DecodedSource::from_interleaved("dc", vec![value; frames], 1, SR))
    }

    fn last_frame(buf: &[f32]) -> f32 {
        buf[buf.len() - 2]
    }

    #[test]
    fn deck_ids_display_as_letters() {
        assert_eq!(DeckId(0).to_string(), "A");
        assert_eq!(DeckId(1).to_string(), "B");
        assert_eq!(DeckId(30).to_string(), "#30");
    }

    #[test]
    fn fresh_deck_is_silent_and_positionless() {
        let mut d = deck();
        assert_eq!(d.position_relative(), 0.0);
        assert!(matches!(d.set_position(1.0), Err(DeckError::NoSourceLoaded)));

        d.start();
        let mut out = vec![1.0f32; 512];
        d.pull(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn gain_scales_output_linearly() {
        let mut d = deck();
        d.load(constant(0.8, 1.0));
        d.start();
        let mut out = vec![0.0f32; 512];
        d.pull(&mut out);
        assert_abs_diff_eq!(last_frame(&out), 0.8, epsilon = 1e-6);

        d.set_gain(0.25).unwrap();
        d.pull(&mut out);
        assert_abs_diff_eq!(last_frame(&out), 0.2, epsilon = 1e-6);
    }

    #[test]
    fn rejected_gain_keeps_previous() {
        let mut d = deck();
        d.set_gain(0.5).unwrap();
        assert!(d.set_gain(-0.1).is_err());
        assert!(d.set_gain(1.1).is_err());
        assert!(d.set_gain(f64::NAN).is_err());
        assert_eq!(d.gain(), 0.5);
        assert_eq!(d.meters().gain(), 0.5);
    }

    #[test]
    fn stop_resets_filter_history() {
        let mut d = deck();
        d.load(constant(1.0, 1.0));
        d.update_filter(200.0, 1.0).unwrap();
        d.set_filter_type(FilterType::LowPass);
        d.start();
        let mut out = vec![0.0f32; 512];
        d.pull(&mut out);
        d.stop();

        // Stopped: transport gives silence and the filter has no memory to ring out.
        d.pull(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn update_filter_rejects_non_finite_without_partial_update() {
        let mut d = deck();
        d.update_filter(1000.0, 1.0).unwrap();
        assert!(d.update_filter(500.0, f64::NAN).is_err());
        let p = d.filter_params();
        assert_eq!(p.cutoff, 1000.0);
        assert_eq!(p.resonance, 1.0);
    }

    #[test]
    fn off_rate_tracks_play_at_their_own_speed() {
        // A 22.05 kHz track on a 44.1 kHz deck: one second of output is one
        // second of track, not two.
        let mut d = deck();
        let half_rate = SR / 2;
        d.load(Box::new(DecodedSource::from_interleaved(
            "low",
            vec![0.3; half_rate as usize * 4],
            1,
            half_rate,
        )));
        d.start();
        let mut out = vec![0.0f32; 441 * 2];
        for _ in 0..100 {
            d.pull(&mut out);
        }
        assert_abs_diff_eq!(d.meters().position_seconds(), 1.0, epsilon = 1e-3);

        // Re-preparing for another output rate keeps the track at pitch.
        d.prepare(22_050, 512).unwrap();
        assert_eq!(d.sample_rate(), 22_050);
        for _ in 0..50 {
            d.pull(&mut out);
        }
        assert_abs_diff_eq!(d.meters().position_seconds(), 2.0, epsilon = 1e-3);
    }

    #[test]
    fn commands_apply_and_retire_old_sources() {
        let mut d = deck();
        assert!(d.apply(DeckCommand::Load(constant(0.1, 0.5))).is_none());
        let retired = d.apply(DeckCommand::Load(constant(0.2, 0.5)));
        assert!(matches!(retired, Some(Retired::Source(s)) if s.frames() == SR as usize / 2));

        d.apply(DeckCommand::SetPositionRelative(0.5));
        assert_abs_diff_eq!(d.meters().position_relative(), 0.5, epsilon = 1e-4);

        d.apply(DeckCommand::Start);
        assert!(d.meters().is_playing());
        d.apply(DeckCommand::Stop);
        assert!(!d.meters().is_playing());
    }
}
