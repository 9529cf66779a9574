// src/audio.rs

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use crate::engine::{Engine, CHANNELS};

/// Helper struct to hold output device info
pub struct OutputConfig {
    pub device: Device,
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    pub output_channels: usize,
    pub output_sample_rate: u32,
}

/// Finds the default audio output device and its config. Uses
/// `preferred_rate` when the device supports it in its default format.
pub fn setup_output_device(preferred_rate: Option<u32>) -> anyhow::Result<OutputConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;
    let default_config = device.default_output_config()?;

    let supported_config = preferred_rate
        .and_then(|rate| {
            device.supported_output_configs().ok()?.find_map(|range| {
                let fits = range.sample_format() == default_config.sample_format()
                    && range.channels() == default_config.channels()
                    && range.min_sample_rate().0 <= rate
                    && rate <= range.max_sample_rate().0;
                fits.then(|| range.with_sample_rate(SampleRate(rate)))
            })
        })
        .unwrap_or(default_config);

    let sample_format = supported_config.sample_format();
    let config = supported_config.config();
    let output_channels = config.channels as usize;
    let output_sample_rate = config.sample_rate.0;

    log::info!(
        "output device '{}': {} ch, {} Hz, {:?}",
        device.name().unwrap_or_else(|_| "unknown".into()),
        output_channels,
        output_sample_rate,
        sample_format
    );

    Ok(OutputConfig {
        device,
        config,
        sample_format,
        output_channels,
        output_sample_rate,
    })
}

/// Copies stereo frames onto a device buffer with `out_channels` channels.
/// Mono devices get the L/R average; channels past the second are silent.
pub fn write_frames<T>(stereo: &[f32], out: &mut [T], out_channels: usize)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    for (frame, src) in out.chunks_exact_mut(out_channels).zip(stereo.chunks_exact(CHANNELS)) {
        if out_channels == 1 {
            frame[0] = T::from_sample((src[0] + src[1]) * 0.5);
            continue;
        }
        for (ch, sample) in frame.iter_mut().enumerate() {
            let s = if ch < CHANNELS { src[ch] } else { 0.0 };
            *sample = T::from_sample(s);
        }
    }
}

/// Build CPAL output stream that renders `engine` on the device thread.
pub fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut engine: Engine,
    err_fn: fn(cpal::StreamError),
) -> anyhow::Result<Stream>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
{
    let out_channels = config.channels as usize;
    let max_block = engine.max_block_frames();
    let mut scratch = vec![0.0f32; max_block * CHANNELS];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(max_block * out_channels) {
                    let frames = chunk.len() / out_channels;
                    let stereo = &mut scratch[..frames * CHANNELS];
                    engine.render(stereo);
                    write_frames(stereo, chunk, out_channels);
                }
            },
            err_fn,
            None,
        )
        .map_err(Into::into)
}

/// Prepares `engine` for the device, builds the stream for its sample
/// format and starts it.
pub fn start_output(output: OutputConfig, mut engine: Engine) -> anyhow::Result<Stream> {
    let err_fn = |err| log::error!("output stream error: {err}");
    engine.prepare(output.output_sample_rate, engine.max_block_frames())?;

    let OutputConfig {
        device,
        config,
        sample_format,
        ..
    } = output;

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, engine, err_fn)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, engine, err_fn)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, engine, err_fn)?,
        _ => anyhow::bail!("Unsupported sample format: {:?}", sample_format),
    };

    stream.play()?;
    Ok(stream)
}
