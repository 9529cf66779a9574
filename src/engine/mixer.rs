// src/engine/mixer.rs

use super::deck::{Deck, DeckId};
use crate::error::{DeckError, Result};

/// Sums the registered decks into one stereo stream.
///
/// Registration only decides who is audible; the decks themselves live in
/// the engine. There is no limiter, so two full-scale decks can sum past 1.0.
#[derive(Debug)]
pub struct Mixer {
    channels: usize,
    registered: Vec<DeckId>,
    max_decks: usize,
    scratch_buffer: Vec<f32>,
}

impl Mixer {
    pub fn new(channels: usize, max_decks: usize) -> Self {
        Self {
            channels,
            registered: Vec::with_capacity(max_decks),
            max_decks,
            scratch_buffer: Vec::new(),
        }
    }

    /// Sizes the scratch buffer for blocks of up to `max_block_frames`.
    pub fn prepare(&mut self, max_block_frames: usize) {
        self.scratch_buffer = vec![0.0; max_block_frames * self.channels];
    }

    pub fn add_deck(&mut self, id: DeckId) -> Result<()> {
        if self.registered.contains(&id) {
            return Err(DeckError::DuplicateDeck(id));
        }
        if self.registered.len() >= self.max_decks {
            return Err(DeckError::DeckLimit(self.max_decks));
        }
        self.registered.push(id);
        Ok(())
    }

    /// Returns whether the deck was registered.
    pub fn remove_deck(&mut self, id: DeckId) -> bool {
        match self.registered.iter().position(|d| *d == id) {
            Some(i) => {
                self.registered.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: DeckId) -> bool {
        self.registered.contains(&id)
    }

    pub fn registered(&self) -> &[DeckId] {
        &self.registered
    }

    /// Fills `out` with the sum of every registered deck. Decks that are
    /// not registered are not pulled and do not advance.
    pub fn pull(&mut self, decks: &mut [Box<Deck>], out: &mut [f32]) {
        out.fill(0.0);

        let needed = out.len();
        debug_assert!(needed <= self.scratch_buffer.len(), "block larger than prepared");
        let needed = needed.min(self.scratch_buffer.len());
        let scratch = &mut self.scratch_buffer[..needed];

        for id in &self.registered {
            let Some(deck) = decks.iter_mut().find(|d| d.id == *id) else {
                continue;
            };
            deck.pull(scratch);
            for (o, s) in out.iter_mut().zip(scratch.iter()) {
                *o += *s;
            }
        }
    }
}
