// src/lib.rs

pub mod audio;
pub mod config;
pub mod console;
pub mod decoder;
pub mod effects;
pub mod engine;
pub mod error;
pub mod export;

pub use config::EngineConfig;
pub use console::{Console, DeckHandle, TrackInfo};
pub use decoder::{DecodedSource, SourceDecoder, SymphoniaDecoder};
pub use effects::{FilterParams, FilterType, ToneFilter};
pub use engine::{DeckId, Engine};
pub use error::{DeckError, Result};
