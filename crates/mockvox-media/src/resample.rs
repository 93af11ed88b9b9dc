//! Sample-rate conversion for 16-bit PCM.

/// Resample mono PCM by linear interpolation.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let last = samples.len() - 1;

    (0..new_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx0 = (src.floor() as usize).min(last);
            let idx1 = (idx0 + 1).min(last);
            let frac = src - idx0 as f64;
            let value = samples[idx0] as f64 * (1.0 - frac) + samples[idx1] as f64 * frac;
            value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![1, 2, 3, -4];
        assert_eq!(resample_linear(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn test_downsample_24k_to_16k_length() {
        let samples = vec![0i16; 24_000];
        assert_eq!(resample_linear(&samples, 24_000, 16_000).len(), 16_000);
    }

    #[test]
    fn test_interpolates_between_neighbours() {
        let out = resample_linear(&[0, 100], 8_000, 16_000);
        assert_eq!(out, vec![0, 50, 100, 100]);
    }

    #[test]
    fn test_constant_signal_preserved() {
        let out = resample_linear(&[1000; 300], 24_000, 16_000);
        assert!(out.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_empty_input() {
        assert!(resample_linear(&[], 24_000, 16_000).is_empty());
    }
}
