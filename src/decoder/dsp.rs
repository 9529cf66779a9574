// src/decoder/dsp.rs

/// Splits interleaved frames onto the end of per-channel staging vectors.
pub fn append_interleaved_to_planar(interleaved: &[f32], planar: &mut [Vec<f32>]) {
    let channels = planar.len();
    if channels == 0 {
        return;
    }
    for frame in interleaved.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            planar[ch].push(s);
        }
    }
}

pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

/// Removes the first `frames` frames from every channel and returns them.
pub fn take_from_planar(planar: &mut [Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    planar
        .iter_mut()
        .map(|ch| {
            let n = frames.min(ch.len());
            let tail = ch.split_off(n);
            std::mem::replace(ch, tail)
        })
        .collect()
}

/// Appends planar channels to `out` as interleaved frames.
pub fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planar_len(planar);
    out.reserve(frames * planar.len());
    for f in 0..frames {
        for ch in planar {
            out.push(ch[f]);
        }
    }
}

pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch || in_ch == 0 || out_ch == 0 {
        return input.to_vec();
    }
    let frames = input.len() / in_ch;
    let mut out = vec![0.0f32; frames * out_ch];

    match (in_ch, out_ch) {
        (1, 2) => {
            for f in 0..frames {
                let m = input[f];
                out[f * 2] = m;
                out[f * 2 + 1] = m;
            }
        }
        (2, 1) => {
            for f in 0..frames {
                out[f] = 0.5 * (input[f * 2] + input[f * 2 + 1]);
            }
        }
        _ if out_ch < in_ch => {
            // Average groups of adjacent input channels into each output channel.
            let factor = in_ch as f32 / out_ch as f32;
            for f in 0..frames {
                for oc in 0..out_ch {
                    let start = (oc as f32 * factor).floor() as usize;
                    let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                    let group = &input[f * in_ch + start..f * in_ch + end];
                    out[f * out_ch + oc] = if group.is_empty() {
                        0.0
                    } else {
                        group.iter().sum::<f32>() / group.len() as f32
                    };
                }
            }
        }
        _ => {
            for f in 0..frames {
                for oc in 0..out_ch {
                    out[f * out_ch + oc] = input[f * in_ch + oc % in_ch];
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_staging_preserves_order() {
        let mut planar = vec![Vec::new(), Vec::new()];
        append_interleaved_to_planar(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], &mut planar);
        assert_eq!(planar_len(&planar), 3);

        let head = take_from_planar(&mut planar, 2);
        assert_eq!(head, vec![vec![1.0, 2.0], vec![-1.0, -2.0]]);
        assert_eq!(planar, vec![vec![3.0], vec![-3.0]]);

        let mut out = Vec::new();
        interleave_into(&head, &mut out);
        assert_eq!(out, vec![1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn surround_folds_down_to_stereo() {
        // 4 channels -> 2: (c0 + c1) / 2, (c2 + c3) / 2
        let out = updown_mix_interleaved(&[1.0, 0.0, 0.5, 0.5], 4, 2);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn stereo_downmix_averages() {
        let out = updown_mix_interleaved(&[1.0, 0.0, 0.2, 0.4], 2, 1);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 0.3).abs() < 1e-6);
    }
}
