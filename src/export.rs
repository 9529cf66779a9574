// src/export.rs

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

use crate::engine::{Engine, CHANNELS};

/// Renders `seconds` of the mix to a 32-bit float stereo WAV, faster than
/// real time. The sum is written unclipped. Returns frames written.
pub fn bounce_to_wav(
    engine: &mut Engine,
    path: impl AsRef<Path>,
    seconds: f64,
    block_frames: usize,
) -> Result<u64> {
    anyhow::ensure!(
        seconds.is_finite() && seconds >= 0.0,
        "render length must be a non-negative number of seconds, got {seconds}"
    );
    anyhow::ensure!(block_frames > 0, "block size must be at least one frame");

    let spec = WavSpec {
        channels: CHANNELS as u16,
        sample_rate: engine.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path.as_ref(), spec)?;

    let total_frames = (seconds * engine.sample_rate() as f64).round() as u64;
    let mut buffer = vec![0.0f32; block_frames * CHANNELS];
    let mut written = 0u64;

    while written < total_frames {
        let frames = (total_frames - written).min(block_frames as u64) as usize;
        let block = &mut buffer[..frames * CHANNELS];
        engine.render(block);
        for &sample in block.iter() {
            writer.write_sample(sample)?;
        }
        written += frames as u64;
    }

    writer.finalize()?;
    log::info!(
        "bounced {:.2}s ({} frames) to {}",
        seconds,
        written,
        path.as_ref().display()
    );
    Ok(written)
}
