// src/config.rs

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::effects::FilterParams;
use crate::error::{DeckError, Param, Result};

/// Engine settings. Every field has a default, so a config file only needs
/// the keys it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Used when no device is open (offline rendering) or as the preferred
    /// device rate.
    pub sample_rate: u32,
    pub max_block_frames: usize,
    pub command_capacity: usize,
    pub max_decks: usize,
    /// Decks created at startup.
    pub decks: usize,
    /// Resting position of each new deck's tone dials.
    pub filter: FilterParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            max_block_frames: 4096,
            command_capacity: 256,
            max_decks: 8,
            decks: 2,
            filter: FilterParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_from_disk(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |param, value: usize, min: usize, max: usize| DeckError::InvalidParameter {
            param,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        };

        if !(8_000..=384_000).contains(&self.sample_rate) {
            return Err(invalid(Param::SampleRate, self.sample_rate as usize, 8_000, 384_000));
        }
        if !(1..=65_536).contains(&self.max_block_frames) {
            return Err(invalid(Param::BlockSize, self.max_block_frames, 1, 65_536));
        }
        if self.max_decks == 0 || self.decks > self.max_decks {
            return Err(DeckError::DeckLimit(self.max_decks));
        }
        // Each deck costs two commands at startup.
        let min_capacity = (self.max_decks * 2).max(16);
        if self.command_capacity < min_capacity {
            return Err(DeckError::InvalidParameter {
                param: Param::QueueCapacity,
                value: self.command_capacity as f64,
                min: min_capacity as f64,
                max: f64::INFINITY,
            });
        }
        Ok(())
    }
}
