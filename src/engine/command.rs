// src/engine/command.rs

//! Messages from the control thread to the audio thread, and back.
//!
//! Everything the audio thread needs travels by value through a
//! single-producer/single-consumer ring buffer and is applied at the start
//! of the next block. Anything the audio thread lets go of (a replaced
//! source, a removed deck) goes back the same way so it is freed on the
//! control thread.

use ringbuf::wrap::caching::Caching;
use ringbuf::storage::Heap;
use ringbuf::SharedRb;
use std::sync::Arc;

use crate::decoder::DecodedSource;
use crate::effects::FilterType;
use crate::engine::deck::{Deck, DeckId};

pub type CommandProducer = Caching<Arc<SharedRb<Heap<EngineCommand>>>, true, false>;
pub type CommandConsumer = Caching<Arc<SharedRb<Heap<EngineCommand>>>, false, true>;
pub type RetireProducer = Caching<Arc<SharedRb<Heap<Retired>>>, true, false>;
pub type RetireConsumer = Caching<Arc<SharedRb<Heap<Retired>>>, false, true>;

/// Operations on one deck. Values have already been range-checked by the
/// sender.
#[derive(Debug)]
pub enum DeckCommand {
    Load(Box<DecodedSource>),
    Unload,
    Start,
    Stop,
    SetGain(f64),
    SetSpeed(f64),
    SetPosition(f64),
    SetPositionRelative(f64),
    UpdateFilter { cutoff: f64, resonance: f64 },
    SetFilterType(FilterType),
    SetFilterActive(bool),
}

#[derive(Debug)]
pub enum EngineCommand {
    Deck { id: DeckId, command: DeckCommand },
    /// A deck built and prepared on the control thread.
    InstallDeck(Box<Deck>),
    RemoveDeck(DeckId),
    Register(DeckId),
    Unregister(DeckId),
}

/// Resources the audio thread has released.
#[derive(Debug)]
pub enum Retired {
    Source(Box<DecodedSource>),
    Deck(Box<Deck>),
}
