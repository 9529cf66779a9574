// src/decoder/resample.rs

use anyhow::Result;
use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::decoder::dsp;

const CHUNK_FRAMES: usize = 1024;

/// Sample-rate converter for load time. `None` when no conversion is needed.
pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 256usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let r = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, channels)?;
    Ok(Some(r))
}

/// Runs one full chunk through the resampler if enough input is staged.
pub fn try_process_exact(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Option<Vec<Vec<f32>>>> {
    let need = resampler.input_frames_next();
    if dsp::planar_len(stage_planar) < need {
        return Ok(None);
    }
    let in_block = dsp::take_from_planar(stage_planar, need);
    Ok(Some(resampler.process(&in_block, None)?))
}

/// Converts a whole interleaved buffer from `src_rate` to `dst_rate`.
///
/// The sinc filter's group delay is trimmed and the result is cut to
/// `round(frames * dst / src)` frames, so durations survive the conversion.
pub fn convert_rate(
    interleaved: &[f32],
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
) -> Result<Vec<f32>> {
    if src_rate == 0 || dst_rate == 0 {
        anyhow::bail!("cannot convert between {src_rate} Hz and {dst_rate} Hz");
    }
    let Some(mut resampler) = build_resampler(src_rate, dst_rate, channels)? else {
        return Ok(interleaved.to_vec());
    };

    let in_frames = interleaved.len() / channels;
    let expected =
        ((in_frames as u64 * dst_rate as u64 + src_rate as u64 / 2) / src_rate as u64) as usize;
    let delay = resampler.output_delay();

    let mut stage_planar: Vec<Vec<f32>> = vec![Vec::with_capacity(in_frames); channels];
    dsp::append_interleaved_to_planar(interleaved, &mut stage_planar);

    let mut out = Vec::with_capacity((expected + delay) * channels);
    while let Some(block) = try_process_exact(&mut resampler, &mut stage_planar)? {
        dsp::interleave_into(&block, &mut out);
    }

    let remaining = dsp::planar_len(&stage_planar);
    if remaining > 0 {
        let tail = dsp::take_from_planar(&mut stage_planar, remaining);
        let block = resampler.process_partial(Some(tail.as_slice()), None)?;
        dsp::interleave_into(&block, &mut out);
    }

    // Flush the filter tail until the delayed signal is fully out.
    let mut flushes = 0;
    while out.len() / channels < expected + delay && flushes < 8 {
        let block = resampler.process_partial::<Vec<f32>>(None, None)?;
        dsp::interleave_into(&block, &mut out);
        flushes += 1;
    }

    let start = (delay * channels).min(out.len());
    let mut trimmed = out.split_off(start);
    trimmed.resize(expected * channels, 0.0);
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_passthrough() {
        let input = vec![0.25f32; 64];
        let out = convert_rate(&input, 2, 44100, 44100).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn conversion_preserves_duration() {
        // 0.5 s of stereo at 48 kHz -> 44.1 kHz
        let frames = 24_000;
        let input: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5;
                [s, s]
            })
            .collect();
        let out = convert_rate(&input, 2, 48_000, 44_100).unwrap();
        assert_eq!(out.len() / 2, 22_050);

        // Steady-state amplitude survives the conversion.
        let peak = out[4000..20000].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak = {peak}");
    }

    #[test]
    fn zero_rate_is_an_error() {
        assert!(convert_rate(&[0.0; 4], 2, 0, 44100).is_err());
    }
}
