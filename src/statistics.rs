//! Per-pixel sample statistics accumulation.
//!
//! Converts a stream of `(pixel, RGB sample, weight)` observations into the
//! denoiser's inputs: weighted mean color, bias-corrected sample covariance,
//! and a piecewise-linear color histogram per pixel. Accumulation is purely
//! additive, so partial per-thread accumulators merge losslessly through
//! [`SamplesAccumulator::add_accumulator`]; a per-pixel-locked variant is
//! provided for renderers that insist on sharing one accumulator.

use num_traits::Float;
use std::sync::Mutex;

use crate::covariance::{
    COV_XX, COV_XY, COV_XZ, COV_YY, COV_YZ, COV_ZZ, NB_OF_COVARIANCE_COMPONENTS,
};
use crate::float_trait::DenoiseFloat;
use crate::image::Image;

/// Number of color channels in every sample and statistics buffer.
pub const NB_OF_COLOR_CHANNELS: usize = 3;

/// Default number of histogram bins per channel.
const DEFAULT_NB_OF_BINS: usize = 20;

/// Default gamma compression exponent applied before binning.
const DEFAULT_GAMMA: f64 = 2.2;

/// Default saturation level: gamma-compressed values above this land in the
/// dedicated saturation bins.
const DEFAULT_MAX_VALUE: f64 = 2.5;

/// Shape of the per-channel color histograms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramParameters<F> {
    /// Bins per channel, the last two reserved for the saturation ramp.
    pub nb_of_bins: usize,
    /// Gamma compression exponent; values are raised to `1/gamma` when
    /// `gamma > 1`.
    pub gamma: F,
    /// Normalization ceiling; also the end of the saturation ramp.
    pub max_value: F,
}

impl<F: DenoiseFloat> Default for HistogramParameters<F> {
    fn default() -> Self {
        Self {
            nb_of_bins: DEFAULT_NB_OF_BINS,
            gamma: F::from_f64_c(DEFAULT_GAMMA),
            max_value: F::from_f64_c(DEFAULT_MAX_VALUE),
        }
    }
}

impl<F: DenoiseFloat> HistogramParameters<F> {
    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.nb_of_bins < 3 {
            return Err("nb_of_bins must be >= 3".to_string());
        }
        if self.gamma <= F::zero() {
            return Err("gamma must be > 0".to_string());
        }
        if self.max_value <= F::one() {
            return Err("max_value must be > 1".to_string());
        }
        Ok(())
    }
}

/// The four co-located statistics buffers of one pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplesStatistics<F> {
    /// Per-pixel weight sum (sample count for unit weights), 1 channel.
    pub nb_of_samples: Image<F>,
    /// Per-pixel mean color, 3 channels.
    pub mean: Image<F>,
    /// Per-pixel sample covariance, 6 packed channels (xx,yy,zz,yz,xz,xy).
    pub covariance: Image<F>,
    /// Per-pixel color histograms, `3 * nb_of_bins` channels,
    /// channel-major (all red bins, then green, then blue).
    pub histograms: Image<F>,
}

impl<F: DenoiseFloat> SamplesStatistics<F> {
    pub fn new(width: usize, height: usize, nb_of_bins: usize) -> Self {
        Self {
            nb_of_samples: Image::new(width, height, 1),
            mean: Image::new(width, height, NB_OF_COLOR_CHANNELS),
            covariance: Image::new(width, height, NB_OF_COVARIANCE_COMPONENTS),
            histograms: Image::new(width, height, NB_OF_COLOR_CHANNELS * nb_of_bins),
        }
    }

    fn reset(&mut self) {
        self.nb_of_samples.fill(F::zero());
        self.mean.fill(F::zero());
        self.covariance.fill(F::zero());
        self.histograms.fill(F::zero());
    }
}

/// Split a color value over two adjacent histogram bins.
///
/// Returns `(floor_bin, floor_weight, ceil_weight)`; the second touched bin
/// is always `floor_bin + 1` and the two weights sum to one. Values at or
/// above the normalization ceiling take the saturation ramp into the last
/// two bins.
fn histogram_bin_split<F: DenoiseFloat>(
    params: &HistogramParameters<F>,
    value: F,
) -> (usize, F, F) {
    let mut v = Float::max(value, F::zero());
    if params.gamma > F::one() {
        v = Float::powf(v, F::one() / params.gamma);
    }
    v /= params.max_value;

    let spread = F::usize_as(params.nb_of_bins - 2);
    let bin_float_index = v * spread;

    if bin_float_index < spread {
        let floor_f = Float::floor(bin_float_index);
        let floor_bin = num_traits::cast::<F, usize>(floor_f).unwrap_or(0);
        let ceil_weight = bin_float_index - floor_f;
        (floor_bin, F::one() - ceil_weight, ceil_weight)
    } else {
        // Saturated: ramp from the next-to-last into the last bin.
        let over = (v - F::one()) / (params.max_value - F::one());
        let ceil_weight = Float::min(over, F::one());
        (params.nb_of_bins - 2, F::one() - ceil_weight, ceil_weight)
    }
}

/// Online accumulator for one pixel grid.
///
/// Holds raw weighted sums while samples stream in; the statistics are
/// finalized (mean division, covariance centering and Bessel correction) on
/// [`SamplesAccumulator::samples_statistics`] or
/// [`SamplesAccumulator::extract_statistics`]. Extraction consumes the
/// accumulator, so a finalized buffer can never be accumulated into again.
#[derive(Debug, Clone)]
pub struct SamplesAccumulator<F> {
    width: usize,
    height: usize,
    histogram_parameters: HistogramParameters<F>,
    sums: SamplesStatistics<F>,
    squared_weight_sums: Image<F>,
}

impl<F: DenoiseFloat> SamplesAccumulator<F> {
    pub fn new(width: usize, height: usize, histogram_parameters: HistogramParameters<F>) -> Self {
        Self {
            width,
            height,
            histogram_parameters,
            sums: SamplesStatistics::new(width, height, histogram_parameters.nb_of_bins),
            squared_weight_sums: Image::new(width, height, 1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn histogram_parameters(&self) -> &HistogramParameters<F> {
        &self.histogram_parameters
    }

    /// Accumulate one unit-weight sample.
    pub fn add_sample(&mut self, row: usize, col: usize, r: F, g: F, b: F) {
        self.add_sample_weighted(row, col, r, g, b, F::one());
    }

    /// Accumulate one weighted sample into the owning pixel's raw sums.
    pub fn add_sample_weighted(&mut self, row: usize, col: usize, r: F, g: F, b: F, weight: F) {
        *self.sums.nb_of_samples.get_mut(row, col, 0) += weight;
        *self.squared_weight_sums.get_mut(row, col, 0) += weight * weight;

        *self.sums.mean.get_mut(row, col, 0) += weight * r;
        *self.sums.mean.get_mut(row, col, 1) += weight * g;
        *self.sums.mean.get_mut(row, col, 2) += weight * b;

        *self.sums.covariance.get_mut(row, col, COV_XX) += weight * r * r;
        *self.sums.covariance.get_mut(row, col, COV_YY) += weight * g * g;
        *self.sums.covariance.get_mut(row, col, COV_ZZ) += weight * b * b;
        *self.sums.covariance.get_mut(row, col, COV_YZ) += weight * g * b;
        *self.sums.covariance.get_mut(row, col, COV_XZ) += weight * r * b;
        *self.sums.covariance.get_mut(row, col, COV_XY) += weight * r * g;

        let color = [r, g, b];
        let nb_of_bins = self.histogram_parameters.nb_of_bins;
        for (channel, &value) in color.iter().enumerate() {
            let (floor_bin, floor_weight, ceil_weight) =
                histogram_bin_split(&self.histogram_parameters, value);
            let base = channel * nb_of_bins;
            *self.sums.histograms.get_mut(row, col, base + floor_bin) += weight * floor_weight;
            *self.sums.histograms.get_mut(row, col, base + floor_bin + 1) += weight * ceil_weight;
        }
    }

    /// Merge another accumulator's raw sums into this one.
    ///
    /// Both accumulators must share geometry and histogram parameters; this
    /// is the merge point for partial per-thread sample collection.
    pub fn add_accumulator(&mut self, other: &SamplesAccumulator<F>) -> Result<(), String> {
        if self.width != other.width || self.height != other.height {
            return Err(format!(
                "accumulator geometry mismatch: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            ));
        }
        if self.histogram_parameters != other.histogram_parameters {
            return Err("accumulator histogram parameters mismatch".to_string());
        }

        self.sums.nb_of_samples += &other.sums.nb_of_samples;
        self.sums.mean += &other.sums.mean;
        self.sums.covariance += &other.sums.covariance;
        self.sums.histograms += &other.sums.histograms;
        self.squared_weight_sums += &other.squared_weight_sums;
        Ok(())
    }

    /// Clear all raw sums to zero.
    pub fn reset(&mut self) {
        self.sums.reset();
        self.squared_weight_sums.fill(F::zero());
    }

    /// Finalized statistics, leaving the accumulator usable.
    pub fn samples_statistics(&self) -> SamplesStatistics<F> {
        Self::finalize(self.sums.clone(), &self.squared_weight_sums)
    }

    /// Finalized statistics, consuming the accumulator.
    pub fn extract_statistics(self) -> SamplesStatistics<F> {
        Self::finalize(self.sums, &self.squared_weight_sums)
    }

    /// Turn raw sums into mean and bias-corrected covariance in place.
    ///
    /// Covariance is `E[c c^T] - mean mean^T` divided by the weighted Bessel
    /// factor `1 - sum(w^2) / (sum w)^2` (which is `(N-1)/N` for unit
    /// weights). Pixels without samples are the caller's contract violation;
    /// pixels with a single sample carry no variance information and keep a
    /// zero covariance.
    fn finalize(
        mut sums: SamplesStatistics<F>,
        squared_weight_sums: &Image<F>,
    ) -> SamplesStatistics<F> {
        let width = sums.nb_of_samples.width();
        let height = sums.nb_of_samples.height();

        for row in 0..height {
            for col in 0..width {
                let weight_sum = sums.nb_of_samples.get(row, col, 0);
                debug_assert!(weight_sum > F::zero(), "pixel without any sample");
                let inv_weight_sum = F::one() / weight_sum;

                let mut mean = [F::zero(); NB_OF_COLOR_CHANNELS];
                for (channel, m) in mean.iter_mut().enumerate() {
                    let value = sums.mean.get(row, col, channel) * inv_weight_sum;
                    sums.mean.set(row, col, channel, value);
                    *m = value;
                }

                let centered = [
                    (COV_XX, mean[0] * mean[0]),
                    (COV_YY, mean[1] * mean[1]),
                    (COV_ZZ, mean[2] * mean[2]),
                    (COV_YZ, mean[1] * mean[2]),
                    (COV_XZ, mean[0] * mean[2]),
                    (COV_XY, mean[0] * mean[1]),
                ];

                let squared = squared_weight_sums.get(row, col, 0);
                let bias = F::one() - squared * inv_weight_sum * inv_weight_sum;

                for (component, mean_product) in centered {
                    let second_moment = sums.covariance.get(row, col, component) * inv_weight_sum;
                    let biased = second_moment - mean_product;
                    let corrected = if bias > F::zero() {
                        biased / bias
                    } else {
                        F::zero()
                    };
                    sums.covariance.set(row, col, component, corrected);
                }
            }
        }

        sums
    }
}

/// Raw sums of one pixel, the unit of locking in
/// [`ThreadSafeSamplesAccumulator`].
#[derive(Debug)]
struct PixelSums<F> {
    weight_sum: F,
    squared_weight_sum: F,
    color_sums: [F; NB_OF_COLOR_CHANNELS],
    covariance_sums: [F; NB_OF_COVARIANCE_COMPONENTS],
    histogram: Vec<F>,
}

impl<F: DenoiseFloat> PixelSums<F> {
    fn new(nb_of_bins: usize) -> Self {
        Self {
            weight_sum: F::zero(),
            squared_weight_sum: F::zero(),
            color_sums: [F::zero(); NB_OF_COLOR_CHANNELS],
            covariance_sums: [F::zero(); NB_OF_COVARIANCE_COMPONENTS],
            histogram: vec![F::zero(); NB_OF_COLOR_CHANNELS * nb_of_bins],
        }
    }
}

/// Accumulator shareable across sampling threads, one mutex per pixel.
///
/// Two threads only contend when they land on the same pixel; the common
/// case (disjoint pixels) never blocks. Prefer per-thread
/// [`SamplesAccumulator`]s merged with `add_accumulator` when the sampler
/// can partition work instead.
#[derive(Debug)]
pub struct ThreadSafeSamplesAccumulator<F> {
    width: usize,
    height: usize,
    histogram_parameters: HistogramParameters<F>,
    pixels: Vec<Mutex<PixelSums<F>>>,
}

impl<F: DenoiseFloat> ThreadSafeSamplesAccumulator<F> {
    pub fn new(width: usize, height: usize, histogram_parameters: HistogramParameters<F>) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        pixels.resize_with(width * height, || {
            Mutex::new(PixelSums::new(histogram_parameters.nb_of_bins))
        });
        Self {
            width,
            height,
            histogram_parameters,
            pixels,
        }
    }

    pub fn add_sample(&self, row: usize, col: usize, r: F, g: F, b: F) {
        self.add_sample_weighted(row, col, r, g, b, F::one());
    }

    pub fn add_sample_weighted(&self, row: usize, col: usize, r: F, g: F, b: F, weight: F) {
        debug_assert!(row < self.height && col < self.width);
        let mut pixel = self.pixels[row * self.width + col]
            .lock()
            .expect("pixel lock poisoned");

        pixel.weight_sum += weight;
        pixel.squared_weight_sum += weight * weight;

        pixel.color_sums[0] += weight * r;
        pixel.color_sums[1] += weight * g;
        pixel.color_sums[2] += weight * b;

        pixel.covariance_sums[COV_XX] += weight * r * r;
        pixel.covariance_sums[COV_YY] += weight * g * g;
        pixel.covariance_sums[COV_ZZ] += weight * b * b;
        pixel.covariance_sums[COV_YZ] += weight * g * b;
        pixel.covariance_sums[COV_XZ] += weight * r * b;
        pixel.covariance_sums[COV_XY] += weight * r * g;

        let nb_of_bins = self.histogram_parameters.nb_of_bins;
        for (channel, &value) in [r, g, b].iter().enumerate() {
            let (floor_bin, floor_weight, ceil_weight) =
                histogram_bin_split(&self.histogram_parameters, value);
            let base = channel * nb_of_bins;
            pixel.histogram[base + floor_bin] += weight * floor_weight;
            pixel.histogram[base + floor_bin + 1] += weight * ceil_weight;
        }
    }

    /// Drain the per-pixel sums into a plain accumulator.
    pub fn into_accumulator(self) -> SamplesAccumulator<F> {
        let mut accumulator =
            SamplesAccumulator::new(self.width, self.height, self.histogram_parameters);
        for (offset, pixel) in self.pixels.into_iter().enumerate() {
            let pixel = pixel.into_inner().expect("pixel lock poisoned");
            let row = offset / self.width;
            let col = offset % self.width;

            accumulator
                .sums
                .nb_of_samples
                .set(row, col, 0, pixel.weight_sum);
            accumulator
                .squared_weight_sums
                .set(row, col, 0, pixel.squared_weight_sum);
            for (channel, &sum) in pixel.color_sums.iter().enumerate() {
                accumulator.sums.mean.set(row, col, channel, sum);
            }
            for (component, &sum) in pixel.covariance_sums.iter().enumerate() {
                accumulator.sums.covariance.set(row, col, component, sum);
            }
            for (bin, &sum) in pixel.histogram.iter().enumerate() {
                accumulator.sums.histograms.set(row, col, bin, sum);
            }
        }
        accumulator
    }

    /// Finalized statistics, consuming the accumulator.
    pub fn extract_statistics(self) -> SamplesStatistics<F> {
        self.into_accumulator().extract_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    fn unit_params() -> HistogramParameters<f64> {
        HistogramParameters {
            nb_of_bins: 12,
            gamma: 1.0,
            max_value: 2.5,
        }
    }

    // ==================== Parameter Tests ====================

    #[test]
    fn test_default_parameters_are_valid() {
        let params: HistogramParameters<f32> = HistogramParameters::default();
        assert_eq!(params.nb_of_bins, 20);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_parameter_validation_rejects_degenerate() {
        let mut params: HistogramParameters<f64> = HistogramParameters::default();
        params.nb_of_bins = 2;
        assert!(params.validate().is_err());

        let mut params: HistogramParameters<f64> = HistogramParameters::default();
        params.gamma = 0.0;
        assert!(params.validate().is_err());

        let mut params: HistogramParameters<f64> = HistogramParameters::default();
        params.max_value = 1.0;
        assert!(params.validate().is_err());
    }

    // ==================== Histogram Binning Tests ====================

    #[test]
    fn test_histogram_mass_conservation() {
        // The two touched bins receive weights summing exactly to the
        // sample's weight, for in-range and saturated values alike.
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        accumulator.add_sample_weighted(0, 0, 0.4, 1.3, 100.0, 2.5);

        let nb_of_bins = 12;
        for channel in 0..NB_OF_COLOR_CHANNELS {
            let mass: f64 = (0..nb_of_bins)
                .map(|bin| {
                    accumulator
                        .sums
                        .histograms
                        .get(0, 0, channel * nb_of_bins + bin)
                })
                .sum();
            assert!(
                approx_eq(mass, 2.5, 1e-12),
                "channel {} mass {} != weight",
                channel,
                mass
            );
        }
    }

    #[test]
    fn test_histogram_split_between_adjacent_bins() {
        // gamma = 1, max_value = 2.5, 12 bins: value 0.375 normalizes to
        // 0.15, bin float index 1.5 -> half in bin 1, half in bin 2.
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        accumulator.add_sample(0, 0, 0.375, 0.0, 0.0);

        let histograms = &accumulator.sums.histograms;
        assert!(approx_eq(histograms.get(0, 0, 1), 0.5, 1e-12));
        assert!(approx_eq(histograms.get(0, 0, 2), 0.5, 1e-12));
    }

    #[test]
    fn test_histogram_saturation_ramp() {
        // Normalized value far above the ceiling: all mass in the last bin.
        let params = unit_params();
        let nb_of_bins = params.nb_of_bins;
        let mut accumulator = SamplesAccumulator::new(1, 1, params);
        accumulator.add_sample(0, 0, 1000.0, 0.0, 0.0);

        let last = accumulator.sums.histograms.get(0, 0, nb_of_bins - 1);
        assert!(approx_eq(last, 1.0, 1e-12));

        // Exactly at the ceiling: all mass in the next-to-last bin.
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        accumulator.add_sample(0, 0, 2.5, 0.0, 0.0);
        let next_to_last = accumulator.sums.histograms.get(0, 0, nb_of_bins - 2);
        assert!(approx_eq(next_to_last, 1.0, 1e-12));
    }

    #[test]
    fn test_histogram_negative_values_clamp_to_zero_bin() {
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        accumulator.add_sample(0, 0, -3.0, 0.0, 0.0);
        assert!(approx_eq(accumulator.sums.histograms.get(0, 0, 0), 1.0, 1e-12));
    }

    // ==================== Finalization Tests ====================

    #[test]
    fn test_two_sample_bessel_correction_exact() {
        // Two unit-weight samples 0 and 1: unbiased variance is 0.5.
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        accumulator.add_sample(0, 0, 0.0, 0.0, 0.0);
        accumulator.add_sample(0, 0, 1.0, 0.0, 0.0);

        let stats = accumulator.extract_statistics();
        assert!(approx_eq(stats.mean.get(0, 0, 0), 0.5, 1e-12));
        assert!(approx_eq(stats.covariance.get(0, 0, COV_XX), 0.5, 1e-12));
        assert!(approx_eq(stats.covariance.get(0, 0, COV_YY), 0.0, 1e-12));
        assert_eq!(stats.nb_of_samples.get(0, 0, 0), 2.0);
    }

    #[test]
    fn test_bias_corrected_statistics_converge() {
        // Independent uniform [0,1) channels: mean 0.5, variance 1/12,
        // zero cross-covariance.
        let mut rng = StdRng::seed_from_u64(42);
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        let n = 20_000;
        for _ in 0..n {
            accumulator.add_sample(0, 0, rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
        }

        let stats = accumulator.extract_statistics();
        assert!(approx_eq(stats.mean.get(0, 0, 0), 0.5, 0.02));
        assert!(approx_eq(stats.covariance.get(0, 0, COV_XX), 1.0 / 12.0, 0.01));
        assert!(approx_eq(stats.covariance.get(0, 0, COV_XY), 0.0, 0.01));
    }

    #[test]
    fn test_single_sample_pixel_has_zero_covariance() {
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        accumulator.add_sample(0, 0, 0.7, 0.2, 0.1);

        let stats = accumulator.extract_statistics();
        assert!(approx_eq(stats.mean.get(0, 0, 0), 0.7, 1e-12));
        for component in 0..NB_OF_COVARIANCE_COMPONENTS {
            assert_eq!(stats.covariance.get(0, 0, component), 0.0);
        }
    }

    #[test]
    fn test_copy_and_extract_agree() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut accumulator = SamplesAccumulator::new(2, 2, unit_params());
        for row in 0..2 {
            for col in 0..2 {
                for _ in 0..8 {
                    accumulator.add_sample(row, col, rng.gen(), rng.gen(), rng.gen());
                }
            }
        }

        let copied = accumulator.samples_statistics();
        let extracted = accumulator.extract_statistics();
        assert_eq!(copied, extracted);
    }

    // ==================== Merge / Reset Tests ====================

    #[test]
    fn test_add_accumulator_equals_joint_accumulation() {
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<[f64; 3]> = (0..64).map(|_| [rng.gen(), rng.gen(), rng.gen()]).collect();

        let mut joint = SamplesAccumulator::new(1, 1, unit_params());
        let mut first = SamplesAccumulator::new(1, 1, unit_params());
        let mut second = SamplesAccumulator::new(1, 1, unit_params());
        for (i, s) in samples.iter().enumerate() {
            joint.add_sample(0, 0, s[0], s[1], s[2]);
            if i % 2 == 0 {
                first.add_sample(0, 0, s[0], s[1], s[2]);
            } else {
                second.add_sample(0, 0, s[0], s[1], s[2]);
            }
        }

        first.add_accumulator(&second).unwrap();
        let merged = first.extract_statistics();
        let reference = joint.extract_statistics();

        assert!(approx_eq(
            merged.mean.get(0, 0, 1),
            reference.mean.get(0, 0, 1),
            1e-12
        ));
        assert!(approx_eq(
            merged.covariance.get(0, 0, COV_XX),
            reference.covariance.get(0, 0, COV_XX),
            1e-12
        ));
    }

    #[test]
    fn test_add_accumulator_rejects_mismatched_geometry() {
        let mut a = SamplesAccumulator::<f64>::new(2, 2, unit_params());
        let b = SamplesAccumulator::<f64>::new(3, 2, unit_params());
        assert!(a.add_accumulator(&b).is_err());
    }

    #[test]
    fn test_reset_clears_all_sums() {
        let mut accumulator = SamplesAccumulator::new(1, 1, unit_params());
        accumulator.add_sample(0, 0, 0.5, 0.5, 0.5);
        accumulator.reset();

        assert_eq!(accumulator.sums.nb_of_samples.get(0, 0, 0), 0.0);
        assert_eq!(accumulator.squared_weight_sums.get(0, 0, 0), 0.0);
        let mass: f64 = accumulator.sums.histograms.pixel(0, 0).iter().sum();
        assert_eq!(mass, 0.0);
    }

    // ==================== Thread-Safe Variant Tests ====================

    #[test]
    fn test_thread_safe_matches_sequential() {
        let shared = ThreadSafeSamplesAccumulator::new(4, 4, unit_params());
        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let shared = &shared;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t);
                    for _ in 0..200 {
                        let row = rng.gen_range(0..4);
                        let col = rng.gen_range(0..4);
                        shared.add_sample(row, col, rng.gen(), rng.gen(), rng.gen());
                    }
                });
            }
        });

        let mut sequential = SamplesAccumulator::new(4, 4, unit_params());
        for t in 0..4u64 {
            let mut rng = StdRng::seed_from_u64(t);
            for _ in 0..200 {
                let row = rng.gen_range(0..4);
                let col = rng.gen_range(0..4);
                sequential.add_sample(row, col, rng.gen(), rng.gen(), rng.gen());
            }
        }

        let concurrent_stats = shared.extract_statistics();
        let sequential_stats = sequential.extract_statistics();
        for row in 0..4 {
            for col in 0..4 {
                assert!(approx_eq(
                    concurrent_stats.mean.get(row, col, 0),
                    sequential_stats.mean.get(row, col, 0),
                    1e-9
                ));
                assert!(approx_eq(
                    concurrent_stats.covariance.get(row, col, COV_XY),
                    sequential_stats.covariance.get(row, col, COV_XY),
                    1e-9
                ));
            }
        }
    }
}
