//! Pure PCM16 audio utility functions (`spec.md` §4.10).
//!
//! All operations here are pure and allocation-light, mirroring the style of
//! the teacher's `AudioFormat`/crossfade utilities: `#[inline]`, saturating
//! arithmetic, and `#[cfg(test)]` coverage per numeric edge case rather than
//! one giant round-trip test.

/// Bytes per PCM16 sample (fixed: this protocol is always 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// RMS energy below this threshold (over the full int16 range) counts as
/// silence (`spec.md` §4.6).
pub const SILENCE_THRESHOLD: f64 = 50.0;

/// Bytes-per-millisecond for 16 kHz mono PCM16 (`spec.md` §4.6 worked example).
#[must_use]
#[inline]
pub const fn bytes_per_ms(sample_rate_hz: u32, channels: u16) -> u32 {
    sample_rate_hz / 1000 * channels as u32 * BYTES_PER_SAMPLE as u32
}

/// Duration in whole milliseconds represented by `byte_count` bytes of PCM16
/// audio at the given format. Rounds down so buffered data is never
/// overstated (`spec.md` §4.10).
#[must_use]
#[inline]
pub fn duration_ms(byte_count: usize, sample_rate_hz: u32, channels: u16) -> u64 {
    let bpm = bytes_per_ms(sample_rate_hz, channels).max(1) as u64;
    byte_count as u64 / bpm
}

/// Interprets `bytes` as little-endian i16 samples. Returns an empty slice
/// view via `Vec` if the byte count is odd (the trailing byte is dropped).
#[must_use]
pub fn pcm16_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// RMS energy of interleaved PCM16 samples, over the full int16 range
/// (i.e. a full-scale sine wave has RMS approaching 23170, not 1.0).
#[must_use]
pub fn rms_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Whether a buffer of PCM16 samples counts as silence per `spec.md` §4.6.
#[must_use]
pub fn is_silence(samples: &[i16]) -> bool {
    rms_energy(samples) < SILENCE_THRESHOLD
}

/// Clamps a float sample to `[-1.0, 1.0]` then scales and saturates to
/// PCM16 range (`spec.md` §4.10 numeric rules).
#[must_use]
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    // Asymmetric scale matches pcm16_to_float's asymmetric divisor so the
    // two functions are exact inverses at the range endpoints.
    let scale = if clamped < 0.0 {
        -(f32::from(i16::MIN))
    } else {
        f32::from(i16::MAX)
    };
    let scaled = (clamped * scale).round();
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Inverse of [`float_to_pcm16`].
#[must_use]
#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        f32::from(sample) / -(f32::from(i16::MIN))
    } else {
        f32::from(sample) / f32::from(i16::MAX)
    }
}

/// Packs i16 samples back into little-endian bytes (inverse of
/// [`pcm16_samples`]).
#[must_use]
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Duplicates a mono PCM16 buffer into interleaved stereo.
#[must_use]
pub fn mono_to_stereo(mono: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(mono.len() * 2);
    for &s in mono {
        out.push(s);
        out.push(s);
    }
    out
}

/// Averages interleaved stereo PCM16 down to mono. Samples that don't form a
/// complete stereo pair are dropped.
#[must_use]
pub fn stereo_to_mono(stereo: &[i16]) -> Vec<i16> {
    stereo
        .chunks_exact(2)
        .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16)
        .collect()
}

/// Linear-interpolation resampling of a mono PCM16 buffer from
/// `from_hz` to `to_hz` (`spec.md` §4.10: used when the provider's sample
/// rate differs from the session output rate).
#[must_use]
pub fn resample_linear(samples: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    if samples.is_empty() || from_hz == 0 || to_hz == 0 || from_hz == to_hz {
        return samples.to_vec();
    }
    let ratio = f64::from(to_hz) / f64::from(from_hz);
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = src_pos - idx as f64;
        let s0 = samples.get(idx).copied().unwrap_or(0) as f64;
        let s1 = samples.get(idx + 1).copied().unwrap_or(s0 as i16) as f64;
        let interpolated = s0 + (s1 - s0) * frac;
        out.push(interpolated.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration_and_bytes {
        use super::*;

        #[test]
        fn bytes_per_ms_matches_16khz_mono_spec_example() {
            assert_eq!(bytes_per_ms(16_000, 1), 32);
        }

        #[test]
        fn duration_ms_rounds_down() {
            // 50 bytes at 32 bytes/ms = 1.5625ms, must floor to 1.
            assert_eq!(duration_ms(50, 16_000, 1), 1);
        }

        #[test]
        fn duration_ms_zero_bytes_is_zero() {
            assert_eq!(duration_ms(0, 16_000, 1), 0);
        }
    }

    mod rms {
        use super::*;

        #[test]
        fn silence_is_all_zero_samples() {
            let samples = vec![0i16; 320];
            assert_eq!(rms_energy(&samples), 0.0);
            assert!(is_silence(&samples));
        }

        #[test]
        fn loud_constant_tone_is_not_silence() {
            let samples = vec![10_000i16; 320];
            assert!(!is_silence(&samples));
        }

        #[test]
        fn empty_buffer_has_zero_rms() {
            assert_eq!(rms_energy(&[]), 0.0);
        }
    }

    mod pcm16_roundtrip {
        use super::*;

        #[test]
        fn zero_roundtrips_exactly() {
            assert_eq!(float_to_pcm16(pcm16_to_float(0)), 0);
        }

        #[test]
        fn max_roundtrips_exactly() {
            assert_eq!(float_to_pcm16(pcm16_to_float(i16::MAX)), i16::MAX);
        }

        #[test]
        fn min_roundtrips_exactly() {
            assert_eq!(float_to_pcm16(pcm16_to_float(i16::MIN)), i16::MIN);
        }

        #[test]
        fn out_of_range_float_saturates() {
            assert_eq!(float_to_pcm16(2.0), i16::MAX);
            assert_eq!(float_to_pcm16(-2.0), i16::MIN);
        }
    }

    mod byte_packing {
        use super::*;

        #[test]
        fn pcm16_to_bytes_is_inverse_of_pcm16_samples() {
            let bytes = vec![1, 0, 255, 255, 0, 128];
            let samples = pcm16_samples(&bytes);
            assert_eq!(pcm16_to_bytes(&samples), bytes);
        }
    }

    mod channel_conversion {
        use super::*;

        #[test]
        fn mono_to_stereo_duplicates_each_sample() {
            assert_eq!(mono_to_stereo(&[1, 2, 3]), vec![1, 1, 2, 2, 3, 3]);
        }

        #[test]
        fn stereo_to_mono_averages_pairs() {
            assert_eq!(stereo_to_mono(&[0, 10, 4, 4]), vec![5, 4]);
        }

        #[test]
        fn stereo_to_mono_drops_incomplete_trailing_pair() {
            assert_eq!(stereo_to_mono(&[1, 2, 3]), vec![1]);
        }
    }

    mod resample {
        use super::*;

        #[test]
        fn same_rate_is_identity() {
            let samples = vec![1, 2, 3, 4];
            assert_eq!(resample_linear(&samples, 16_000, 16_000), samples);
        }

        #[test]
        fn upsampling_doubles_length_for_2x_ratio() {
            let samples = vec![0, 100, 0, 100];
            let out = resample_linear(&samples, 8_000, 16_000);
            assert_eq!(out.len(), 8);
        }

        #[test]
        fn downsampling_halves_length_for_half_ratio() {
            let samples = vec![0; 100];
            let out = resample_linear(&samples, 16_000, 8_000);
            assert_eq!(out.len(), 50);
        }

        #[test]
        fn empty_input_stays_empty() {
            assert!(resample_linear(&[], 16_000, 8_000).is_empty());
        }
    }
}
