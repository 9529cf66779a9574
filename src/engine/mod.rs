// src/engine/mod.rs

pub mod command;
pub mod deck;
pub mod metering;
pub mod mixer;
pub mod resampler;
pub mod transport;

pub use command::{DeckCommand, EngineCommand, Retired};
pub use deck::{Deck, DeckId};
pub use metering::{DeckMeters, EngineStats, Levels};
pub use mixer::Mixer;
pub use resampler::{SpeedResampler, MAX_SPEED};
pub use transport::{Transport, TransportState};

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer};

use command::{CommandConsumer, RetireProducer};
use crate::error::Result;

/// Interleaved channel count of every buffer in the engine.
pub const CHANNELS: usize = 2;

/// The audio-thread half of the system. Lives inside the device callback
/// (or an offline render loop) and is only reached through its queues.
pub struct Engine {
    sample_rate: u32,
    max_block_frames: usize,
    decks: Vec<Box<Deck>>,
    mixer: Mixer,
    commands: CommandConsumer,
    retired: RetireProducer,
    stats: Arc<EngineStats>,
}

impl Engine {
    pub(crate) fn new(
        sample_rate: u32,
        max_block_frames: usize,
        max_decks: usize,
        commands: CommandConsumer,
        retired: RetireProducer,
        stats: Arc<EngineStats>,
    ) -> Self {
        let mut mixer = Mixer::new(CHANNELS, max_decks);
        mixer.prepare(max_block_frames);
        stats.set_sample_rate(sample_rate);
        Self {
            sample_rate,
            max_block_frames,
            decks: Vec::with_capacity(max_decks),
            mixer,
            commands,
            retired,
            stats,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        CHANNELS
    }

    pub fn max_block_frames(&self) -> usize {
        self.max_block_frames
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Re-prepares every deck for a new device configuration. Allocates;
    /// call before the engine is moved into the callback.
    ///
    /// Pending commands are applied first so decks still in the queue are
    /// prepared too. Handles decode later loads at the new rate.
    pub fn prepare(&mut self, sample_rate: u32, max_block_frames: usize) -> Result<()> {
        self.process_commands();
        self.sample_rate = sample_rate;
        self.stats.set_sample_rate(sample_rate);
        self.max_block_frames = max_block_frames;
        self.mixer.prepare(max_block_frames);
        for deck in &mut self.decks {
            deck.prepare(sample_rate, max_block_frames)?;
        }
        log::info!(
            "engine prepared: {} Hz, {} frame blocks, {} decks",
            sample_rate,
            max_block_frames,
            self.decks.len()
        );
        Ok(())
    }

    /// Applies queued commands, then fills `out` (interleaved stereo) with
    /// the mix. Blocks longer than the prepared size are rendered in pieces.
    pub fn render(&mut self, out: &mut [f32]) {
        self.process_commands();

        let chunk = self.max_block_frames.max(1) * CHANNELS;
        for block in out.chunks_mut(chunk) {
            self.mixer.pull(&mut self.decks, block);
        }
        self.stats.blocks_rendered.fetch_add(1, Ordering::Relaxed);
    }

    fn process_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            self.stats.commands_applied.fetch_add(1, Ordering::Relaxed);
            let retired = match cmd {
                EngineCommand::Deck { id, command } => {
                    match self.decks.iter_mut().find(|d| d.id == id) {
                        Some(deck) => deck.apply(command),
                        // Deck already removed: hand a pending track back
                        // rather than freeing it here.
                        None => match command {
                            DeckCommand::Load(source) => Some(Retired::Source(source)),
                            _ => None,
                        },
                    }
                }
                EngineCommand::InstallDeck(deck) => {
                    if self.decks.len() < self.decks.capacity() {
                        self.decks.push(deck);
                        None
                    } else {
                        Some(Retired::Deck(deck))
                    }
                }
                EngineCommand::RemoveDeck(id) => {
                    self.mixer.remove_deck(id);
                    self.decks
                        .iter()
                        .position(|d| d.id == id)
                        .map(|i| Retired::Deck(self.decks.swap_remove(i)))
                }
                EngineCommand::Register(id) => {
                    if self.decks.iter().any(|d| d.id == id) {
                        let _ = self.mixer.add_deck(id);
                    }
                    None
                }
                EngineCommand::Unregister(id) => {
                    self.mixer.remove_deck(id);
                    None
                }
            };
            if let Some(item) = retired {
                self.retire(item);
            }
        }
    }

    fn retire(&mut self, item: Retired) {
        if let Err(item) = self.retired.try_push(item) {
            // Queue full: nothing left but to free it here.
            self.stats.retire_overflows.fetch_add(1, Ordering::Relaxed);
            drop(item);
        }
    }
}
