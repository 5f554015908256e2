//! N -> M channel mixing and sample-format conversion for the driver's
//! wire buffers (§4.9).

use crate::settings::SampleFormat;

/// Mix `input_channels` channel buffers (each `frames` long) down or up to
/// `output_channels` buffers, per the fixed policy:
/// - `1 -> M`: broadcast the single channel to every output.
/// - `N -> 1`: average all input channels.
/// - `N == M`: pass through unchanged (channel order preserved).
/// - anything else: zero every output channel. The policy is left
///   implementation-defined there; zeroing is the conservative choice so a
///   misconfigured driver gets silence rather than garbage.
pub fn mix_channels(inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
    let n = inputs.len();
    let m = outputs.len();

    if n == m {
        for (src, dst) in inputs.iter().zip(outputs.iter_mut()) {
            dst[..frames].copy_from_slice(&src[..frames]);
        }
    } else if n == 1 {
        for dst in outputs.iter_mut() {
            dst[..frames].copy_from_slice(&inputs[0][..frames]);
        }
    } else if m == 1 {
        let dst = &mut outputs[0][..frames];
        dst.fill(0.0);
        for src in inputs {
            for (d, s) in dst.iter_mut().zip(src[..frames].iter()) {
                *d += *s;
            }
        }
        let scale = 1.0 / n as f32;
        for d in dst.iter_mut() {
            *d *= scale;
        }
    } else {
        for dst in outputs.iter_mut() {
            dst[..frames].fill(0.0);
        }
    }
}

/// Convert `frames` interleaved samples of `channels` planar `f32` buffers
/// into the driver's wire format, interleaved. Only `Float32` is
/// implemented; other formats are reserved for a future driver shim.
pub fn convert_and_interleave(
    channels: &[&[f32]],
    frames: usize,
    format: SampleFormat,
    out: &mut [u8],
) {
    match format {
        SampleFormat::Float32 => {
            let out_samples: &mut [f32] = bytemuck::cast_slice_mut(out);
            for frame in 0..frames {
                for (ch, channel) in channels.iter().enumerate() {
                    out_samples[frame * channels.len() + ch] = channel[frame];
                }
            }
        }
    }
}

/// The inverse of [`convert_and_interleave`]: deinterleave the driver's
/// input wire buffer into planar `f32` channel buffers.
pub fn deinterleave_and_convert(
    input: &[u8],
    frames: usize,
    channel_count: usize,
    format: SampleFormat,
    out: &mut [&mut [f32]],
) {
    match format {
        SampleFormat::Float32 => {
            let in_samples: &[f32] = bytemuck::cast_slice(input);
            for frame in 0..frames {
                for (ch, channel) in out.iter_mut().enumerate() {
                    channel[frame] = in_samples[frame * channel_count + ch];
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn broadcast_one_to_many() {
        let input = vec![0.5f32; 4];
        let mut a = vec![0.0f32; 4];
        let mut b = vec![0.0f32; 4];
        let mut c = vec![0.0f32; 4];
        mix_channels(&[&input], &mut [&mut a, &mut b, &mut c], 4);
        assert_eq!(a, vec![0.5; 4]);
        assert_eq!(b, vec![0.5; 4]);
        assert_eq!(c, vec![0.5; 4]);
    }

    #[test]
    fn average_many_to_one() {
        let ch0 = vec![1.0f32; 2];
        let ch1 = vec![3.0f32; 2];
        let mut out = vec![0.0f32; 2];
        mix_channels(&[&ch0, &ch1], &mut [&mut out], 2);
        assert_eq!(out, vec![2.0; 2]);
    }

    #[test]
    fn passthrough_when_equal() {
        let ch0 = vec![1.0f32, 2.0];
        let ch1 = vec![3.0f32, 4.0];
        let mut o0 = vec![0.0f32; 2];
        let mut o1 = vec![0.0f32; 2];
        mix_channels(&[&ch0, &ch1], &mut [&mut o0, &mut o1], 2);
        assert_eq!(o0, ch0);
        assert_eq!(o1, ch1);
    }

    #[test]
    fn zeroes_when_neither_one_nor_equal() {
        let ch0 = vec![1.0f32; 2];
        let ch1 = vec![2.0f32; 2];
        let ch2 = vec![3.0f32; 2];
        let mut o0 = vec![9.0f32; 2];
        let mut o1 = vec![9.0f32; 2];
        mix_channels(&[&ch0, &ch1, &ch2], &mut [&mut o0, &mut o1], 2);
        assert_eq!(o0, vec![0.0; 2]);
        assert_eq!(o1, vec![0.0; 2]);
    }

    #[test]
    fn interleave_round_trips_through_deinterleave() {
        let planar: Vec<Vec<f32>> = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let refs: Vec<&[f32]> = planar.iter().map(|v| v.as_slice()).collect();
        let mut wire = vec![0u8; 3 * 2 * 4];
        convert_and_interleave(&refs, 3, SampleFormat::Float32, &mut wire);

        let mut back = vec![vec![0.0f32; 3]; 2];
        let mut back_refs: Vec<&mut [f32]> = back.iter_mut().map(|v| v.as_mut_slice()).collect();
        deinterleave_and_convert(&wire, 3, 2, SampleFormat::Float32, &mut back_refs);

        assert_eq!(back[0], planar[0]);
        assert_eq!(back[1], planar[1]);
    }
}
