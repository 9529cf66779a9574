// src/console.rs

//! Control-thread side of the engine: creates decks, decodes tracks and
//! forwards validated parameter changes to the audio thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::config::EngineConfig;
use crate::decoder::SourceDecoder;
use crate::effects::tone_filter::{MAX_CUTOFF_HZ, MAX_RESONANCE, MIN_CUTOFF_HZ, MIN_RESONANCE};
use crate::effects::{FilterParams, FilterType};
use crate::engine::command::{CommandProducer, RetireConsumer};
use crate::engine::{
    Deck, DeckCommand, DeckId, DeckMeters, Engine, EngineCommand, EngineStats, Levels, Retired,
    MAX_SPEED,
};
use crate::error::{check_range, check_range_open_min, DeckError, Param, Result};

type SharedProducer = Arc<Mutex<CommandProducer>>;

fn send(queue: &SharedProducer, cmd: EngineCommand) -> Result<()> {
    let mut producer = queue.lock().unwrap_or_else(|e| e.into_inner());
    producer.try_push(cmd).map_err(|_| DeckError::QueueFull)
}

/// Queues every command or none of them.
fn send_all<const N: usize>(queue: &SharedProducer, cmds: [EngineCommand; N]) -> Result<()> {
    let mut producer = queue.lock().unwrap_or_else(|e| e.into_inner());
    if producer.vacant_len() < N {
        return Err(DeckError::QueueFull);
    }
    for cmd in cmds {
        producer.try_push(cmd).map_err(|_| DeckError::QueueFull)?;
    }
    Ok(())
}

/// What `DeckHandle::load` hands back once a track is queued.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub name: String,
    pub length_seconds: f64,
    pub sample_rate: u32,
}

/// Last accepted control values, mirrored on the control side so reads
/// don't wait for the audio thread.
#[derive(Debug)]
struct ControlState {
    loaded: AtomicBool,
    gain: AtomicU32,
    speed: AtomicU64,
    filter: Mutex<FilterParams>,
}

/// Cloneable remote for one deck.
#[derive(Clone)]
pub struct DeckHandle {
    id: DeckId,
    queue: SharedProducer,
    decoder: Arc<dyn SourceDecoder>,
    meters: Arc<DeckMeters>,
    control: Arc<ControlState>,
    stats: Arc<EngineStats>,
}

impl std::fmt::Debug for DeckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeckHandle")
            .field("id", &self.id)
            .field("sample_rate", &self.stats.sample_rate())
            .finish_non_exhaustive()
    }
}

impl DeckHandle {
    pub fn id(&self) -> DeckId {
        self.id
    }

    fn send(&self, command: DeckCommand) -> Result<()> {
        send(&self.queue, EngineCommand::Deck { id: self.id, command })
    }

    /// Logs a rejected control value and passes the error on.
    fn reject<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            log::warn!("deck {}: {}", self.id, e);
        }
        result
    }

    /// Decodes `location` on the calling thread at the engine's current
    /// rate, then queues the swap. On failure the current track stays
    /// loaded and the error is returned.
    pub fn load(&self, location: &str) -> Result<TrackInfo> {
        let source = match self.decoder.decode(location, self.stats.sample_rate()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("deck {}: {}", self.id, e);
                return Err(e);
            }
        };
        let info = TrackInfo {
            name: source.name().to_string(),
            length_seconds: source.length_seconds(),
            sample_rate: source.sample_rate(),
        };
        self.send(DeckCommand::Load(Box::new(source)))?;
        self.control.loaded.store(true, Ordering::Relaxed);
        log::info!("deck {}: loaded '{}' ({:.1}s)", self.id, info.name, info.length_seconds);
        Ok(info)
    }

    pub fn unload(&self) -> Result<()> {
        self.send(DeckCommand::Unload)?;
        self.control.loaded.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_gain(&self, gain: f64) -> Result<()> {
        let gain = self.reject(check_range(Param::Gain, gain, 0.0, 1.0))?;
        self.send(DeckCommand::SetGain(gain))?;
        self.control.gain.store((gain as f32).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn set_speed(&self, ratio: f64) -> Result<()> {
        let ratio = self.reject(check_range_open_min(Param::Speed, ratio, 0.0, MAX_SPEED))?;
        self.send(DeckCommand::SetSpeed(ratio))?;
        self.control.speed.store(ratio.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn set_position(&self, seconds: f64) -> Result<()> {
        self.require_loaded()?;
        let seconds = self.reject(check_range(Param::Position, seconds, f64::MIN, f64::MAX))?;
        self.send(DeckCommand::SetPosition(seconds))
    }

    pub fn set_position_relative(&self, pos: f64) -> Result<()> {
        let pos = self.reject(check_range(Param::RelativePosition, pos, 0.0, 1.0))?;
        self.require_loaded()?;
        self.send(DeckCommand::SetPositionRelative(pos))
    }

    pub fn start(&self) -> Result<()> {
        self.send(DeckCommand::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(DeckCommand::Stop)
    }

    /// Sets cutoff and resonance (clamped) and engages the filter.
    pub fn update_filter(&self, cutoff: f64, resonance: f64) -> Result<()> {
        let cutoff = self.reject(check_range(Param::Cutoff, cutoff, f64::MIN, f64::MAX))?;
        let resonance =
            self.reject(check_range(Param::Resonance, resonance, f64::MIN, f64::MAX))?;
        self.send(DeckCommand::UpdateFilter { cutoff, resonance })?;

        let mut filter = self.control.filter.lock().unwrap_or_else(|e| e.into_inner());
        filter.cutoff = (cutoff as f32).clamp(MIN_CUTOFF_HZ, MAX_CUTOFF_HZ);
        filter.resonance = (resonance as f32).clamp(MIN_RESONANCE, MAX_RESONANCE);
        filter.active = true;
        Ok(())
    }

    pub fn set_filter_type(&self, filter_type: FilterType) -> Result<()> {
        self.send(DeckCommand::SetFilterType(filter_type))?;
        self.control.filter.lock().unwrap_or_else(|e| e.into_inner()).filter_type = filter_type;
        Ok(())
    }

    pub fn set_filter_active(&self, active: bool) -> Result<()> {
        self.send(DeckCommand::SetFilterActive(active))?;
        self.control.filter.lock().unwrap_or_else(|e| e.into_inner()).active = active;
        Ok(())
    }

    pub fn filter(&self) -> FilterParams {
        *self.control.filter.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.control.gain.load(Ordering::Relaxed))
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.control.speed.load(Ordering::Relaxed))
    }

    /// Position reads come from the audio thread and lag by up to one block.
    pub fn position_relative(&self) -> f64 {
        self.meters.position_relative()
    }

    pub fn position_seconds(&self) -> f64 {
        self.meters.position_seconds()
    }

    pub fn length_seconds(&self) -> f64 {
        self.meters.length_seconds()
    }

    pub fn is_loaded(&self) -> bool {
        self.control.loaded.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.meters.is_playing()
    }

    pub fn levels(&self) -> Levels {
        self.meters.levels()
    }

    fn require_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            self.reject(Err(DeckError::NoSourceLoaded))
        }
    }
}

/// Owns the control ends of the engine queues and the deck roster.
pub struct Console {
    config: EngineConfig,
    queue: SharedProducer,
    retired: RetireConsumer,
    decoder: Arc<dyn SourceDecoder>,
    decks: Vec<DeckHandle>,
    registered: Vec<DeckId>,
    next_id: u32,
    stats: Arc<EngineStats>,
}

impl Console {
    /// Builds both halves. The `Engine` goes to the audio callback; the
    /// configured number of decks is created and registered up front.
    pub fn new(config: EngineConfig, decoder: Arc<dyn SourceDecoder>) -> Result<(Self, Engine)> {
        config.validate()?;

        let (tx, rx) = HeapRb::<EngineCommand>::new(config.command_capacity).split();
        let (rtx, rrx) = HeapRb::<Retired>::new(config.command_capacity).split();
        let stats = EngineStats::new();

        let engine = Engine::new(
            config.sample_rate,
            config.max_block_frames,
            config.max_decks,
            rx,
            rtx,
            stats.clone(),
        );

        let mut console = Self {
            queue: Arc::new(Mutex::new(tx)),
            retired: rrx,
            decoder,
            decks: Vec::with_capacity(config.max_decks),
            registered: Vec::with_capacity(config.max_decks),
            next_id: 0,
            stats,
            config,
        };
        for _ in 0..console.config.decks {
            console.add_deck()?;
        }
        Ok((console, engine))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Creates a deck, prepares it here, and hands it to the audio thread
    /// already registered with the mixer.
    pub fn add_deck(&mut self) -> Result<DeckHandle> {
        if self.decks.len() >= self.config.max_decks {
            return Err(DeckError::DeckLimit(self.config.max_decks));
        }
        let id = DeckId(self.next_id);

        let meters = DeckMeters::new();
        let deck = Deck::new(
            id,
            self.stats.sample_rate(),
            self.config.max_block_frames,
            self.config.filter,
            meters.clone(),
        )?;
        send_all(
            &self.queue,
            [EngineCommand::InstallDeck(Box::new(deck)), EngineCommand::Register(id)],
        )?;
        self.next_id += 1;

        let handle = DeckHandle {
            id,
            queue: self.queue.clone(),
            decoder: self.decoder.clone(),
            meters,
            control: Arc::new(ControlState {
                loaded: AtomicBool::new(false),
                gain: AtomicU32::new(1.0f32.to_bits()),
                speed: AtomicU64::new(1.0f64.to_bits()),
                filter: Mutex::new(self.config.filter),
            }),
            stats: self.stats.clone(),
        };
        self.decks.push(handle.clone());
        self.registered.push(id);
        log::info!("deck {} added", id);
        Ok(handle)
    }

    /// Removes a deck entirely. Outstanding handles keep working but their
    /// commands are ignored.
    pub fn remove_deck(&mut self, id: DeckId) -> Result<()> {
        let Some(index) = self.decks.iter().position(|d| d.id == id) else {
            return Err(DeckError::UnknownDeck(id));
        };
        send(&self.queue, EngineCommand::RemoveDeck(id))?;
        self.decks.remove(index);
        self.registered.retain(|d| *d != id);
        log::info!("deck {} removed", id);
        Ok(())
    }

    /// Makes an existing deck audible in the mix.
    pub fn register(&mut self, id: DeckId) -> Result<()> {
        if !self.decks.iter().any(|d| d.id == id) {
            return Err(DeckError::UnknownDeck(id));
        }
        if self.registered.contains(&id) {
            return Err(DeckError::DuplicateDeck(id));
        }
        send(&self.queue, EngineCommand::Register(id))?;
        self.registered.push(id);
        Ok(())
    }

    /// Takes a deck out of the mix. Returns whether it was registered.
    pub fn unregister(&mut self, id: DeckId) -> Result<bool> {
        if !self.decks.iter().any(|d| d.id == id) {
            return Err(DeckError::UnknownDeck(id));
        }
        let Some(index) = self.registered.iter().position(|d| *d == id) else {
            return Ok(false);
        };
        send(&self.queue, EngineCommand::Unregister(id))?;
        self.registered.remove(index);
        Ok(true)
    }

    pub fn is_registered(&self, id: DeckId) -> bool {
        self.registered.contains(&id)
    }

    pub fn deck(&self, id: DeckId) -> Option<&DeckHandle> {
        self.decks.iter().find(|d| d.id == id)
    }

    pub fn decks(&self) -> &[DeckHandle] {
        &self.decks
    }

    /// Frees whatever the audio thread has released. Returns how many
    /// items were dropped.
    pub fn collect_garbage(&mut self) -> usize {
        let mut freed = 0;
        while let Some(item) = self.retired.try_pop() {
            match &item {
                Retired::Source(s) => log::debug!("freeing source '{}'", s.name()),
                Retired::Deck(d) => log::debug!("freeing deck {}", d.id),
            }
            drop(item);
            freed += 1;
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedSource;
    use approx::assert_abs_diff_eq;

    /// Serves a one-second DC track for any location except "missing".
    struct DcDecoder;

    impl SourceDecoder for DcDecoder {
        fn decode(&self, location: &str, target_rate: u32) -> Result<DecodedSource> {
            if location == "missing" {
                return Err(DeckError::source_load(location, "not found"));
            }
            Ok(DecodedSource::from_interleaved(
                location,
                vec![0.5; target_rate as usize],
                1,
                target_rate,
            ))
        }
    }

    fn console() -> (Console, Engine) {
        let config = EngineConfig {
            sample_rate: 8000,
            max_block_frames: 100,
            ..EngineConfig::default()
        };
        Console::new(config, Arc::new(DcDecoder)).unwrap()
    }

    #[test]
    fn handles_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeckHandle>();
    }

    #[test]
    fn rejected_values_are_not_queued() {
        let (console, mut engine) = console();
        let deck = console.decks()[0].clone();

        deck.set_gain(0.4).unwrap();
        assert!(matches!(deck.set_gain(2.0), Err(DeckError::InvalidParameter { .. })));
        assert!(deck.set_speed(0.0).is_err());
        assert!(deck.set_speed(-1.0).is_err());
        assert_eq!(deck.gain(), 0.4);
        assert_eq!(deck.speed(), 1.0);

        let mut out = vec![0.0f32; 200];
        engine.render(&mut out);
        assert_eq!(deck.meters.gain(), 0.4);
        assert_eq!(deck.meters.speed(), 1.0);
    }

    #[test]
    fn seek_requires_a_track() {
        let (console, _engine) = console();
        let deck = &console.decks()[0];
        assert!(matches!(deck.set_position(1.0), Err(DeckError::NoSourceLoaded)));
        assert!(matches!(deck.set_position_relative(0.5), Err(DeckError::NoSourceLoaded)));
        assert_eq!(deck.position_relative(), 0.0);
    }

    #[test]
    fn failed_load_keeps_current_track() {
        let (mut console, mut engine) = console();
        let deck = console.decks()[0].clone();
        deck.load("first").unwrap();
        deck.start().unwrap();
        let mut out = vec![0.0f32; 200];
        engine.render(&mut out);

        assert!(matches!(deck.load("missing"), Err(DeckError::SourceLoad { .. })));
        engine.render(&mut out);
        assert!(deck.is_playing());
        assert_abs_diff_eq!(deck.position_seconds(), 200.0 / 8000.0, epsilon = 1e-9);
        assert_eq!(console.collect_garbage(), 0);
    }

    #[test]
    fn reload_retires_previous_source() {
        let (mut console, mut engine) = console();
        let deck = console.decks()[0].clone();
        let info = deck.load("a").unwrap();
        assert_eq!(info.length_seconds, 1.0);
        deck.load("b").unwrap();
        let mut out = vec![0.0f32; 200];
        engine.render(&mut out);
        assert_eq!(console.collect_garbage(), 1);
    }

    #[test]
    fn loads_follow_the_prepared_engine_rate() {
        let config = EngineConfig {
            sample_rate: 44_100,
            max_block_frames: 512,
            ..EngineConfig::default()
        };
        let (console, mut engine) = Console::new(config, Arc::new(DcDecoder)).unwrap();
        let early = console.decks()[0].clone();
        let late = console.decks()[1].clone();

        // Decoded at 44.1 kHz, then the device comes up at 48 kHz.
        assert_eq!(early.load("early").unwrap().sample_rate, 44_100);
        engine.prepare(48_000, 512).unwrap();
        assert_eq!(console.stats().sample_rate(), 48_000);
        assert_eq!(late.load("late").unwrap().sample_rate, 48_000);

        early.start().unwrap();
        late.start().unwrap();
        let mut out = vec![0.0f32; 24_000 * 2];
        engine.render(&mut out);
        // Half a second of output is half of each one-second track.
        assert_abs_diff_eq!(early.position_seconds(), 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(late.position_seconds(), 0.5, epsilon = 1e-3);
    }

    #[test]
    fn stale_handles_hand_tracks_back() {
        let (mut console, mut engine) = console();
        let stale = console.decks()[0].clone();
        console.remove_deck(stale.id()).unwrap();
        let mut out = vec![0.0f32; 20];
        engine.render(&mut out);
        assert_eq!(console.collect_garbage(), 1);

        stale.load("orphan").unwrap();
        engine.render(&mut out);
        assert_eq!(console.collect_garbage(), 1);
        assert_eq!(engine.stats().retire_overflows.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn full_queue_adds_no_deck() {
        let config = EngineConfig {
            sample_rate: 8000,
            max_block_frames: 100,
            command_capacity: 16,
            ..EngineConfig::default()
        };
        let (mut console, mut engine) = Console::new(config, Arc::new(DcDecoder)).unwrap();
        let a = console.decks()[0].clone();
        let mut out = vec![0.0f32; 200];
        engine.render(&mut out);

        // One slot left: room for the install but not the registration.
        for _ in 0..15 {
            a.set_gain(0.5).unwrap();
        }
        assert!(matches!(console.add_deck(), Err(DeckError::QueueFull)));
        assert_eq!(console.decks().len(), 2);

        engine.render(&mut out);
        let c = console.add_deck().unwrap();
        assert_eq!(c.id(), DeckId(2));
        c.load("c").unwrap();
        c.start().unwrap();
        engine.render(&mut out);
        assert!(c.is_playing());
        assert_abs_diff_eq!(c.position_seconds(), 100.0 / 8000.0, epsilon = 1e-9);
        assert_eq!(c.levels().peak_l, 0.5);
    }

    #[test]
    fn deck_roster_rules() {
        let (mut console, mut engine) = console();
        assert_eq!(console.decks().len(), 2);
        let a = console.decks()[0].id();

        assert!(matches!(console.register(a), Err(DeckError::DuplicateDeck(_))));
        assert!(console.unregister(a).unwrap());
        assert!(!console.unregister(a).unwrap());
        assert!(matches!(console.register(DeckId(99)), Err(DeckError::UnknownDeck(_))));

        for _ in 2..console.config().max_decks {
            console.add_deck().unwrap();
        }
        assert!(matches!(console.add_deck(), Err(DeckError::DeckLimit(_))));

        console.remove_deck(a).unwrap();
        let mut out = vec![0.0f32; 20];
        engine.render(&mut out);
        assert_eq!(console.collect_garbage(), 1);
        assert!(console.deck(a).is_none());
    }
}
