//! Synthetic spectral scenes for mock exposures.

/// LCG with glibc constants, for cheap reproducible per-sample noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Evenly spaced wavelength axis from `first_nm` to `last_nm` inclusive.
pub fn wavelength_axis(first_nm: f64, last_nm: f64, channels: usize) -> Vec<f64> {
    match channels {
        0 => Vec::new(),
        1 => vec![first_nm],
        n => {
            let step = (last_nm - first_nm) / (n - 1) as f64;
            (0..n).map(|i| first_nm + step * i as f64).collect()
        }
    }
}

/// Generate a band-interleaved cube of a synthetic scene.
///
/// The scene is three vertical material stripes, each with a Gaussian
/// reflectance peak at a different wavelength, lit uniformly. Signal scales
/// linearly with `integration_ms * gain`. With `dither` set, a small
/// frame-dependent dither is added so consecutive frames differ.
///
/// # Arguments
/// * `width`, `height` - Spatial size in pixels
/// * `wavelengths_nm` - Spectral axis; its length is the channel count
/// * `frame_num` - Frame counter, seeds the dither
pub fn spectral_scene(
    width: u32,
    height: u32,
    wavelengths_nm: &[f64],
    frame_num: u64,
    integration_ms: f64,
    gain: f64,
    dither: bool,
) -> Vec<f32> {
    let channels = wavelengths_nm.len();
    let w = width as usize;
    let h = height as usize;
    let mut cube = vec![0f32; w * h * channels];
    if channels == 0 {
        return cube;
    }

    let (lo, hi) = (wavelengths_nm[0], wavelengths_nm[channels - 1]);
    let span = (hi - lo).abs().max(1.0);
    let peaks = [lo + 0.2 * span, lo + 0.5 * span, lo + 0.8 * span];
    let sigma = span / 8.0;
    let exposure = (integration_ms * gain).max(0.0);

    for y in 0..h {
        for x in 0..w {
            let stripe = (x * peaks.len() / w.max(1)).min(peaks.len() - 1);
            let base = ((y * w + x) * channels) as u64;
            for (c, &lambda) in wavelengths_nm.iter().enumerate() {
                let d = (lambda - peaks[stripe]) / sigma;
                let reflectance = 0.1 + 0.9 * (-0.5 * d * d).exp();
                let mut value = reflectance * exposure * 100.0;
                if dither {
                    let r = prng(base + c as u64 ^ frame_num.wrapping_mul(0x9E37_79B9));
                    value += (r % 7) as f64 - 3.0;
                }
                cube[(y * w + x) * channels + c] = value.max(0.0) as f32;
            }
        }
    }
    cube
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wavelength_axis() {
        assert_eq!(wavelength_axis(400.0, 700.0, 4), vec![400.0, 500.0, 600.0, 700.0]);
        assert_eq!(wavelength_axis(500.0, 900.0, 1), vec![500.0]);
        assert!(wavelength_axis(500.0, 900.0, 0).is_empty());
    }

    #[test]
    fn test_scene_size_and_determinism() {
        let wl = wavelength_axis(450.0, 850.0, 8);
        let a = spectral_scene(6, 4, &wl, 3, 10.0, 1.0, true);
        let b = spectral_scene(6, 4, &wl, 3, 10.0, 1.0, true);
        assert_eq!(a.len(), 6 * 4 * 8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_signal_scales_with_exposure() {
        let wl = wavelength_axis(450.0, 850.0, 4);
        let short = spectral_scene(3, 1, &wl, 0, 5.0, 1.0, false);
        let long = spectral_scene(3, 1, &wl, 0, 10.0, 1.0, false);
        for (s, l) in short.iter().zip(&long) {
            assert!((l - 2.0 * s).abs() < 1e-3);
        }
    }

    #[test]
    fn test_stripes_peak_at_different_bands() {
        let wl = wavelength_axis(400.0, 800.0, 9);
        let cube = spectral_scene(3, 1, &wl, 0, 1.0, 1.0, false);
        let argmax = |x: usize| {
            (0..9)
                .max_by(|&a, &b| cube[x * 9 + a].total_cmp(&cube[x * 9 + b]))
                .unwrap()
        };
        assert!(argmax(0) < argmax(1));
        assert!(argmax(1) < argmax(2));
    }
}
