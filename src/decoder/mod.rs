// src/decoder/mod.rs

pub mod dsp;
pub mod resample;

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::engine::CHANNELS;
use crate::error::{DeckError, Result};

/// A fully decoded track, stereo interleaved at the engine sample rate.
///
/// Decks only ever read from it, so once it is handed to the audio thread
/// nothing needs to allocate or decode again.
#[derive(Debug, Clone)]
pub struct DecodedSource {
    name: String,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl DecodedSource {
    /// Wraps already-decoded samples, up/down-mixing them to stereo.
    pub fn from_interleaved(
        name: impl Into<String>,
        samples: Vec<f32>,
        channels: usize,
        sample_rate: u32,
    ) -> Self {
        let samples = if channels == CHANNELS {
            samples
        } else {
            dsp::updown_mix_interleaved(&samples, channels.max(1), CHANNELS)
        };
        Self {
            name: name.into(),
            sample_rate,
            samples,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    pub fn length_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Turns a path or URL into decoded audio. Injected into the console so
/// tests and tools can supply sources without touching the filesystem.
pub trait SourceDecoder: Send + Sync {
    fn decode(&self, location: &str, target_rate: u32) -> Result<DecodedSource>;
}

/// Local files and `file://` URLs, decoded with symphonia and converted to
/// the engine rate with rubato.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SourceDecoder for SymphoniaDecoder {
    fn decode(&self, location: &str, target_rate: u32) -> Result<DecodedSource> {
        let path = resolve_location(location)?;
        let (samples, source_rate, channels) =
            decode_to_vec(&path).map_err(|e| DeckError::source_load(location, e))?;

        if samples.is_empty() {
            return Err(DeckError::source_load(location, "no audio frames decoded"));
        }

        let stereo = dsp::updown_mix_interleaved(&samples, channels, CHANNELS);
        let converted = resample::convert_rate(&stereo, CHANNELS, source_rate, target_rate)
            .map_err(|e| DeckError::source_load(location, e))?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| location.to_string());

        log::info!(
            "decoded '{}': {} Hz {} ch -> {} Hz, {:.2}s",
            name,
            source_rate,
            channels,
            target_rate,
            converted.len() as f64 / CHANNELS as f64 / target_rate as f64
        );

        Ok(DecodedSource {
            name,
            sample_rate: target_rate,
            samples: converted,
        })
    }
}

/// Accepts plain paths and `file://` URLs.
pub fn resolve_location(location: &str) -> Result<PathBuf> {
    if let Some(rest) = location.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if let Some((scheme, _)) = location.split_once("://") {
        return Err(DeckError::source_load(
            location,
            format!("unsupported URL scheme '{scheme}'"),
        ));
    }
    Ok(PathBuf::from(location))
}

/// Decodes the default track of `path` into interleaved f32.
/// Returns `(samples, sample_rate, channels)`.
pub fn decode_to_vec(
    path: &Path,
) -> std::result::Result<(Vec<f32>, u32, usize), Box<dyn std::error::Error + Send + Sync>> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or("no default audio track")?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs().make(&codec_params, &DecoderOptions::default())?;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut out = Vec::<f32>::new();

    let mut sample_rate = codec_params.sample_rate.unwrap_or(44100);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let mut format_locked = false;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("skipping corrupt packet: {e}");
                continue;
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let current_channels = spec.channels.count();

        if !format_locked {
            if decoded.frames() == 0 {
                continue;
            }
            sample_rate = spec.rate;
            channels = current_channels;
            format_locked = true;
        }

        let needs_new = sample_buf
            .as_ref()
            .map_or(true, |b| b.capacity() < decoded.capacity());
        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        let new_samples = buf.samples();

        if current_channels == channels {
            out.extend_from_slice(new_samples);
        } else {
            out.extend(dsp::updown_mix_interleaved(new_samples, current_channels, channels));
        }
    }

    Ok((out, sample_rate, channels.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_urls_resolve_to_paths() {
        let p = resolve_location("file:///tmp/track.wav").unwrap();
        assert_eq!(p, PathBuf::from("/tmp/track.wav"));

        let p = resolve_location("music/track.flac").unwrap();
        assert_eq!(p, PathBuf::from("music/track.flac"));
    }

    #[test]
    fn remote_urls_are_rejected() {
        let err = resolve_location("https://example.com/a.mp3").unwrap_err();
        assert!(matches!(err, DeckError::SourceLoad { .. }));
    }

    #[test]
    fn missing_file_reports_source_load() {
        let err = SymphoniaDecoder
            .decode("/definitely/not/here.wav", 44100)
            .unwrap_err();
        assert!(matches!(err, DeckError::SourceLoad { .. }));
    }

    #[test]
    fn mono_sources_are_duplicated_to_stereo() {
        let src = DecodedSource::from_interleaved("tone", vec![0.1, 0.2, 0.3], 1, 44100);
        assert_eq!(src.frames(), 3);
        assert_eq!(src.samples(), &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn zero_rate_source_has_zero_length() {
        let src = DecodedSource::from_interleaved("odd", vec![0.0; 8], 2, 0);
        assert_eq!(src.length_seconds(), 0.0);
    }
}
