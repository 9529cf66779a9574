// src/error.rs

use std::fmt;

use thiserror::Error;

use crate::engine::DeckId;

/// Which control a rejected value was meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Gain,
    Speed,
    Position,
    RelativePosition,
    Cutoff,
    Resonance,
    SampleRate,
    Channels,
    BlockSize,
    QueueCapacity,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Param::Gain => "gain",
            Param::Speed => "speed",
            Param::Position => "position",
            Param::RelativePosition => "relative position",
            Param::Cutoff => "cutoff frequency",
            Param::Resonance => "resonance",
            Param::SampleRate => "sample rate",
            Param::Channels => "channel count",
            Param::BlockSize => "block size",
            Param::QueueCapacity => "command queue capacity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DeckError {
    /// The value was rejected; whatever was set before stays in effect.
    #[error("{param} must be within [{min}, {max}], got {value}")]
    InvalidParameter {
        param: Param,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("failed to load '{location}': {source}")]
    SourceLoad {
        location: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("no track loaded")]
    NoSourceLoaded,

    #[error("tone filter used before prepare()")]
    NotPrepared,

    #[error("deck {0} is already registered")]
    DuplicateDeck(DeckId),

    #[error("unknown deck {0}")]
    UnknownDeck(DeckId),

    #[error("deck limit of {0} reached")]
    DeckLimit(usize),

    #[error("engine command queue is full")]
    QueueFull,
}

impl DeckError {
    pub fn source_load(
        location: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        DeckError::SourceLoad {
            location: location.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeckError>;

/// Accepts `value` if it is finite and inside `[min, max]`.
pub(crate) fn check_range(param: Param, value: f64, min: f64, max: f64) -> Result<f64> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(DeckError::InvalidParameter { param, value, min, max })
    }
}

/// Like [`check_range`] but with an open lower bound: `(min, max]`.
pub(crate) fn check_range_open_min(param: Param, value: f64, min: f64, max: f64) -> Result<f64> {
    if value.is_finite() && value > min && value <= max {
        Ok(value)
    } else {
        Err(DeckError::InvalidParameter { param, value, min, max })
    }
}
