//! Single-scale denoising pipeline.
//!
//! Validates the statistics images, derives the per-pixel noise covariance,
//! schedules main-patch centers across a worker pool, and reduces the
//! workers' private accumulators into the denoised color image. Workers
//! share nothing mutable but the relaxed-atomic flag image and two progress
//! counters; accumulation happens in per-worker buffers merged once at the
//! end.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::covariance::NB_OF_COVARIANCE_COMPONENTS;
use crate::denoising_unit::{DenoisingUnit, KernelConfig, KernelInputs, SimilarityMode};
use crate::float_trait::DenoiseFloat;
use crate::image::{FlagImage, Image, PixelPosition};
use crate::statistics::NB_OF_COLOR_CHANNELS;

// =============================================================================
// Constants
// =============================================================================

/// Default cutoff on the normalized histogram distance.
const DEFAULT_HISTOGRAM_DISTANCE_THRESHOLD: f64 = 1.0;

/// Default patch half-size.
const DEFAULT_PATCH_RADIUS: usize = 1;

/// Default search window half-size.
const DEFAULT_SEARCH_WINDOW_RADIUS: usize = 6;

/// Default eigenvalue floor for covariance inversion.
const DEFAULT_MIN_EIGEN_VALUE: f64 = 1e-8;

/// Default probability of skipping an already-denoised main patch.
const DEFAULT_MARKED_PIXELS_SKIPPING_PROBABILITY: f64 = 1.0;

/// Multiplier decorrelating per-worker RNG streams from one base seed.
const WORKER_SEED_STRIDE: u64 = 0x9e37_79b9_7f4a_7c15;

// =============================================================================
// Types
// =============================================================================

/// Borrowed statistics images feeding one denoising pass.
///
/// All four images must share the color image's resolution.
#[derive(Debug, Clone, Copy)]
pub struct DenoiserInputs<'a, F> {
    /// Mean color, 3 channels.
    pub colors: &'a Image<F>,
    /// Per-pixel sample (weight) counts, 1 channel.
    pub nb_of_samples: &'a Image<F>,
    /// Per-channel histograms, `3 * nb_of_bins` channels.
    pub histograms: &'a Image<F>,
    /// Finalized per-pixel sample covariance, 6 packed channels.
    pub sample_covariances: &'a Image<F>,
}

/// Tuning knobs of one denoising pass.
#[derive(Debug, Clone)]
pub struct DenoiserParameters<F> {
    /// Similarity cutoff on the normalized histogram distance. Default: 1.0
    pub histogram_distance_threshold: F,
    /// Patch half-size. Default: 1
    pub patch_radius: usize,
    /// Search window half-size. Default: 6
    pub search_window_radius: usize,
    /// Eigenvalue floor when inverting the total covariance. Default: 1e-8
    pub min_eigen_value: F,
    /// Shuffle main-patch centers instead of strip interleaving. Default: true
    pub use_random_pixel_order: bool,
    /// Probability of skipping an already-denoised main patch, in [0, 1].
    /// Default: 1.0
    pub marked_pixels_skipping_probability: F,
    /// Worker count; 0 uses the ambient rayon pool. Default: 0
    pub nb_of_cores: usize,
    /// Similarity search strategy. Default: scalar
    pub similarity_mode: SimilarityMode,
    /// Base seed for shuffling and skip draws; None draws one from entropy.
    pub rng_seed: Option<u64>,
}

impl<F: DenoiseFloat> Default for DenoiserParameters<F> {
    fn default() -> Self {
        Self {
            histogram_distance_threshold: F::from_f64_c(DEFAULT_HISTOGRAM_DISTANCE_THRESHOLD),
            patch_radius: DEFAULT_PATCH_RADIUS,
            search_window_radius: DEFAULT_SEARCH_WINDOW_RADIUS,
            min_eigen_value: F::from_f64_c(DEFAULT_MIN_EIGEN_VALUE),
            use_random_pixel_order: true,
            marked_pixels_skipping_probability: F::from_f64_c(
                DEFAULT_MARKED_PIXELS_SKIPPING_PROBABILITY,
            ),
            nb_of_cores: 0,
            similarity_mode: SimilarityMode::default(),
            rng_seed: None,
        }
    }
}

impl<F: DenoiseFloat> DenoiserParameters<F> {
    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.search_window_radius == 0 {
            return Err("search_window_radius must be > 0".to_string());
        }
        if self.histogram_distance_threshold < F::zero() {
            return Err("histogram_distance_threshold must be >= 0".to_string());
        }
        if self.min_eigen_value <= F::zero() {
            return Err("min_eigen_value must be > 0".to_string());
        }
        if self.marked_pixels_skipping_probability < F::zero()
            || self.marked_pixels_skipping_probability > F::one()
        {
            return Err("marked_pixels_skipping_probability must be in [0, 1]".to_string());
        }
        Ok(())
    }

    fn kernel_config(&self) -> KernelConfig<F> {
        KernelConfig {
            patch_radius: self.patch_radius,
            search_window_radius: self.search_window_radius,
            histogram_distance_threshold: self.histogram_distance_threshold,
            min_eigen_value: self.min_eigen_value,
            marked_pixels_skipping_probability: self.marked_pixels_skipping_probability,
            similarity_mode: self.similarity_mode,
        }
    }
}

/// Completion observer, called with a fraction in [0, 1] at integer-percent
/// granularity.
pub type ProgressCallback<'a> = &'a (dyn Fn(f32) + Send + Sync);

// =============================================================================
// Validation and Preprocessing
// =============================================================================

fn validate_inputs<F: DenoiseFloat>(
    inputs: &DenoiserInputs<'_, F>,
    parameters: &DenoiserParameters<F>,
) -> Result<(), String> {
    if inputs.colors.is_empty() {
        return Err("input images must not be empty".to_string());
    }
    if inputs.colors.depth() != NB_OF_COLOR_CHANNELS {
        return Err(format!(
            "color image must have {} channels, got {}",
            NB_OF_COLOR_CHANNELS,
            inputs.colors.depth()
        ));
    }
    if inputs.nb_of_samples.depth() != 1 {
        return Err(format!(
            "sample count image must have 1 channel, got {}",
            inputs.nb_of_samples.depth()
        ));
    }
    if inputs.sample_covariances.depth() != NB_OF_COVARIANCE_COMPONENTS {
        return Err(format!(
            "covariance image must have {} channels, got {}",
            NB_OF_COVARIANCE_COMPONENTS,
            inputs.sample_covariances.depth()
        ));
    }
    if inputs.histograms.depth() == 0 || inputs.histograms.depth() % NB_OF_COLOR_CHANNELS != 0 {
        return Err(format!(
            "histogram image depth must be a positive multiple of {}, got {}",
            NB_OF_COLOR_CHANNELS,
            inputs.histograms.depth()
        ));
    }

    for (name, image) in [
        ("sample count", inputs.nb_of_samples),
        ("histogram", inputs.histograms),
        ("covariance", inputs.sample_covariances),
    ] {
        if !inputs.colors.same_resolution(image) {
            return Err(format!(
                "{} image is {}x{} but the color image is {}x{}",
                name,
                image.width(),
                image.height(),
                inputs.colors.width(),
                inputs.colors.height()
            ));
        }
    }

    let patch_size = 2 * parameters.patch_radius + 1;
    if inputs.colors.width() < patch_size || inputs.colors.height() < patch_size {
        return Err(format!(
            "image size ({}, {}) is smaller than the patch size {}",
            inputs.colors.width(),
            inputs.colors.height(),
            patch_size
        ));
    }

    if inputs.nb_of_samples.pixels().any(|p| p[0] <= F::zero()) {
        return Err("every pixel needs at least one sample".to_string());
    }

    Ok(())
}

/// Covariance of the per-pixel mean estimator: the sample covariance divided
/// by that pixel's sample count.
fn compute_pixel_covariances<F: DenoiseFloat>(
    sample_covariances: &Image<F>,
    nb_of_samples: &Image<F>,
) -> Image<F> {
    let mut pixel_covariances = sample_covariances.clone();
    for row in 0..pixel_covariances.height() {
        for col in 0..pixel_covariances.width() {
            let inv_count = F::one() / nb_of_samples.get(row, col, 0);
            for component in 0..NB_OF_COVARIANCE_COMPONENTS {
                *pixel_covariances.get_mut(row, col, component) *= inv_count;
            }
        }
    }
    pixel_covariances
}

// =============================================================================
// Scheduling
// =============================================================================

/// Row-major list of pixels whose patch fits fully inside the image.
fn eligible_pixel_centers(width: usize, height: usize, patch_radius: usize) -> Vec<PixelPosition> {
    let mut centers = Vec::new();
    for row in patch_radius..height.saturating_sub(patch_radius) {
        for col in patch_radius..width.saturating_sub(patch_radius) {
            centers.push(PixelPosition::new(row as isize, col as isize));
        }
    }
    centers
}

/// Interleave strip-sized chunks so that consecutively scheduled chunks are
/// `jump` strips apart, keeping concurrently processed regions spatially
/// separated.
fn reorder_strip_interleave(
    centers: Vec<PixelPosition>,
    chunk_size: usize,
    nb_of_workers: usize,
) -> Vec<PixelPosition> {
    let nb_of_chunks = centers.len().div_ceil(chunk_size.max(1));
    let jump = nb_of_workers.min(nb_of_chunks);
    if jump <= 1 {
        return centers;
    }

    let mut reordered = Vec::with_capacity(centers.len());
    for offset in 0..jump {
        for chunk_index in (offset..nb_of_chunks).step_by(jump) {
            let start = chunk_index * chunk_size;
            let end = (start + chunk_size).min(centers.len());
            reordered.extend_from_slice(&centers[start..end]);
        }
    }
    reordered
}

// =============================================================================
// Main Entry Point
// =============================================================================

/// Denoise one scale.
///
/// Returns a freshly allocated color image of the input resolution, or a
/// diagnostic when validation fails. No partial output is ever produced.
pub fn denoise<F: DenoiseFloat>(
    inputs: &DenoiserInputs<'_, F>,
    parameters: &DenoiserParameters<F>,
    progress: Option<ProgressCallback<'_>>,
) -> Result<Image<F>, String> {
    parameters.validate().map_err(|message| {
        log::warn!("denoising aborted: {}", message);
        message
    })?;
    validate_inputs(inputs, parameters).map_err(|message| {
        log::warn!("denoising aborted: {}", message);
        message
    })?;

    let width = inputs.colors.width();
    let height = inputs.colors.height();

    let pixel_covariances =
        compute_pixel_covariances(inputs.sample_covariances, inputs.nb_of_samples);

    let nb_of_workers = if parameters.nb_of_cores == 0 {
        rayon::current_num_threads().max(1)
    } else {
        parameters.nb_of_cores
    };

    // Strip-sized chunks: one search-window height of eligible rows.
    let eligible_width = width - 2 * parameters.patch_radius;
    let strip_height = 2 * parameters.search_window_radius;
    let chunk_len = (eligible_width * strip_height).max(1);

    let base_seed = parameters
        .rng_seed
        .unwrap_or_else(|| rand::thread_rng().next_u64());

    let mut centers = eligible_pixel_centers(width, height, parameters.patch_radius);
    if parameters.use_random_pixel_order {
        centers.shuffle(&mut StdRng::seed_from_u64(base_seed));
    } else if nb_of_workers > 1 {
        centers = reorder_strip_interleave(centers, chunk_len, nb_of_workers);
    }
    let total = centers.len();
    log::debug!(
        "denoising {} main patches in chunks of {} on {} workers",
        total,
        chunk_len,
        nb_of_workers
    );

    let flags = FlagImage::new(width, height);
    let kernel_inputs = KernelInputs {
        colors: inputs.colors,
        nb_of_samples: inputs.nb_of_samples,
        histograms: inputs.histograms,
        pixel_covariances: &pixel_covariances,
        flags: &flags,
    };
    let kernel_config = parameters.kernel_config();

    let processed = AtomicUsize::new(0);
    let last_reported_percent = AtomicUsize::new(0);
    let worker_counter = AtomicU64::new(0);

    let run = || {
        centers
            .par_chunks(chunk_len)
            .fold(
                || None,
                |state: Option<DenoisingUnit<'_, F>>, chunk| {
                    let mut unit = state.unwrap_or_else(|| {
                        let worker_index = worker_counter.fetch_add(1, Ordering::Relaxed);
                        let worker_seed =
                            base_seed ^ (worker_index + 1).wrapping_mul(WORKER_SEED_STRIDE);
                        DenoisingUnit::new(kernel_inputs, kernel_config, worker_seed)
                    });
                    for &center in chunk {
                        unit.denoise_patch_and_similar_patches(center);
                    }

                    let done = processed.fetch_add(chunk.len(), Ordering::Relaxed) + chunk.len();
                    if let Some(report) = progress {
                        let percent = done * 100 / total;
                        let previous = last_reported_percent.fetch_max(percent, Ordering::Relaxed);
                        if percent > previous {
                            report(percent as f32 / 100.0);
                        }
                    }
                    Some(unit)
                },
            )
            .map(|state| state.map(DenoisingUnit::into_outputs))
            .reduce(
                || None,
                |left, right| match (left, right) {
                    (Some(mut merged), Some(other)) => {
                        merged.merge(&other);
                        Some(merged)
                    }
                    (left, None) => left,
                    (None, right) => right,
                },
            )
    };

    let reduced = if parameters.nb_of_cores == 0 {
        run()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parameters.nb_of_cores)
            .build()
            .map_err(|error| format!("failed to build worker pool: {}", error))?;
        pool.install(run)
    };
    let outputs = reduced.ok_or_else(|| "denoising covered no pixel".to_string())?;

    // Aggregation: every covered pixel's value is its estimate average. The
    // scheduling covers the full image, so counts are always positive.
    let mut denoised = Image::new(width, height, NB_OF_COLOR_CHANNELS);
    for row in 0..height {
        for col in 0..width {
            let count = outputs.estimate_counts.get(row, col, 0);
            debug_assert!(count > 0, "pixel ({}, {}) received no estimate", row, col);
            let inv_count = F::one() / F::usize_as(count as usize);
            for channel in 0..NB_OF_COLOR_CHANNELS {
                let value = outputs.summed_colors.get(row, col, channel) * inv_count;
                denoised.set(row, col, channel, value);
            }
        }
    }
    Ok(denoised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::{HistogramParameters, SamplesAccumulator, SamplesStatistics};
    use rand::Rng;
    use std::sync::Mutex;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    fn test_histogram_parameters() -> HistogramParameters<f64> {
        HistogramParameters {
            nb_of_bins: 8,
            gamma: 1.0,
            max_value: 2.5,
        }
    }

    fn flat_statistics(
        width: usize,
        height: usize,
        samples_per_pixel: usize,
    ) -> SamplesStatistics<f64> {
        let mut accumulator = SamplesAccumulator::new(width, height, test_histogram_parameters());
        for row in 0..height {
            for col in 0..width {
                for _ in 0..samples_per_pixel {
                    accumulator.add_sample(row, col, 0.5, 0.5, 0.5);
                }
            }
        }
        accumulator.extract_statistics()
    }

    fn random_statistics(width: usize, height: usize, seed: u64) -> SamplesStatistics<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut accumulator = SamplesAccumulator::new(width, height, test_histogram_parameters());
        for row in 0..height {
            for col in 0..width {
                for _ in 0..8 {
                    accumulator.add_sample(row, col, rng.gen(), rng.gen(), rng.gen());
                }
            }
        }
        accumulator.extract_statistics()
    }

    fn inputs_of(stats: &SamplesStatistics<f64>) -> DenoiserInputs<'_, f64> {
        DenoiserInputs {
            colors: &stats.mean,
            nb_of_samples: &stats.nb_of_samples,
            histograms: &stats.histograms,
            sample_covariances: &stats.covariance,
        }
    }

    fn test_parameters() -> DenoiserParameters<f64> {
        DenoiserParameters {
            search_window_radius: 1,
            use_random_pixel_order: false,
            marked_pixels_skipping_probability: 0.0,
            nb_of_cores: 1,
            rng_seed: Some(7),
            ..Default::default()
        }
    }

    // ==================== Parameter Tests ====================

    #[test]
    fn test_default_parameters_match_documented_values() {
        let parameters: DenoiserParameters<f32> = DenoiserParameters::default();
        assert_eq!(parameters.histogram_distance_threshold, 1.0);
        assert_eq!(parameters.patch_radius, 1);
        assert_eq!(parameters.search_window_radius, 6);
        assert_eq!(parameters.min_eigen_value, 1e-8);
        assert!(parameters.use_random_pixel_order);
        assert_eq!(parameters.marked_pixels_skipping_probability, 1.0);
        assert_eq!(parameters.nb_of_cores, 0);
        assert!(parameters.validate().is_ok());
    }

    #[test]
    fn test_parameter_validation_rejects_out_of_range() {
        let mut parameters: DenoiserParameters<f64> = DenoiserParameters::default();
        parameters.search_window_radius = 0;
        assert!(parameters.validate().is_err());

        let mut parameters: DenoiserParameters<f64> = DenoiserParameters::default();
        parameters.marked_pixels_skipping_probability = 1.5;
        assert!(parameters.validate().is_err());

        let mut parameters: DenoiserParameters<f64> = DenoiserParameters::default();
        parameters.min_eigen_value = 0.0;
        assert!(parameters.validate().is_err());
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_rejects_mismatched_resolutions() {
        let stats = flat_statistics(6, 6, 4);
        let wrong_counts = Image::<f64>::from_elem(5, 6, 1, 4.0);
        let inputs = DenoiserInputs {
            colors: &stats.mean,
            nb_of_samples: &wrong_counts,
            histograms: &stats.histograms,
            sample_covariances: &stats.covariance,
        };

        let result = denoise(&inputs, &test_parameters(), None);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("sample count image"));
    }

    #[test]
    fn test_rejects_wrong_channel_counts() {
        let stats = flat_statistics(6, 6, 4);
        let two_channel = Image::<f64>::new(6, 6, 2);
        let inputs = DenoiserInputs {
            colors: &two_channel,
            nb_of_samples: &stats.nb_of_samples,
            histograms: &stats.histograms,
            sample_covariances: &stats.covariance,
        };
        assert!(denoise(&inputs, &test_parameters(), None).is_err());
    }

    #[test]
    fn test_rejects_image_smaller_than_patch() {
        let stats = flat_statistics(2, 2, 4);
        let result = denoise(&inputs_of(&stats), &test_parameters(), None);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("smaller than the patch size"));
    }

    #[test]
    fn test_rejects_pixels_without_samples() {
        let stats = flat_statistics(6, 6, 4);
        let mut counts = stats.nb_of_samples.clone();
        counts.set(3, 3, 0, 0.0);
        let inputs = DenoiserInputs {
            colors: &stats.mean,
            nb_of_samples: &counts,
            histograms: &stats.histograms,
            sample_covariances: &stats.covariance,
        };
        let result = denoise(&inputs, &test_parameters(), None);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("at least one sample"));
    }

    // ==================== Preprocessing Tests ====================

    #[test]
    fn test_pixel_covariance_is_sample_covariance_over_count() {
        let mut sample_covariances = Image::<f64>::from_elem(2, 1, 6, 8.0);
        sample_covariances.set(0, 1, 0, 4.0);
        let mut counts = Image::<f64>::from_elem(2, 1, 1, 4.0);
        counts.set(0, 1, 0, 2.0);

        let pixel_covariances = compute_pixel_covariances(&sample_covariances, &counts);
        assert_eq!(pixel_covariances.get(0, 0, 0), 2.0);
        assert_eq!(pixel_covariances.get(0, 1, 0), 2.0);
        assert_eq!(pixel_covariances.get(0, 1, 5), 4.0);
    }

    // ==================== Scheduling Tests ====================

    #[test]
    fn test_eligible_centers_exclude_border() {
        let centers = eligible_pixel_centers(5, 4, 1);
        assert_eq!(centers.len(), 6);
        assert!(centers.contains(&PixelPosition::new(1, 1)));
        assert!(centers.contains(&PixelPosition::new(2, 3)));
        assert!(!centers.iter().any(|p| p.row == 0 || p.col == 0));
        assert!(!centers.iter().any(|p| p.row == 3 || p.col == 4));
    }

    #[test]
    fn test_strip_interleave_is_a_distant_permutation() {
        // 12 single-element chunks over 3 workers: visiting order jumps by 3.
        let centers: Vec<PixelPosition> =
            (0..12).map(|r| PixelPosition::new(r, 0)).collect();
        let reordered = reorder_strip_interleave(centers.clone(), 1, 3);

        let expected_rows = [0, 3, 6, 9, 1, 4, 7, 10, 2, 5, 8, 11];
        let rows: Vec<isize> = reordered.iter().map(|p| p.row).collect();
        assert_eq!(rows, expected_rows);

        let mut sorted = reordered.clone();
        sorted.sort_by_key(|p| p.row);
        assert_eq!(sorted, centers);
    }

    #[test]
    fn test_strip_interleave_single_worker_is_identity() {
        let centers: Vec<PixelPosition> = (0..9).map(|r| PixelPosition::new(r, 0)).collect();
        assert_eq!(reorder_strip_interleave(centers.clone(), 2, 1), centers);
    }

    // ==================== End-to-End Tests ====================

    #[test]
    fn test_flat_image_is_denoised_to_itself() {
        // The concrete identity scenario: 4x4 constant color, 64 samples per
        // pixel, zero covariance, patch radius 1, search radius 1.
        let stats = flat_statistics(4, 4, 64);
        let output = denoise(&inputs_of(&stats), &test_parameters(), None).unwrap();

        assert_eq!(output.width(), 4);
        assert_eq!(output.height(), 4);
        for row in 0..4 {
            for col in 0..4 {
                for channel in 0..NB_OF_COLOR_CHANNELS {
                    assert_eq!(
                        output.get(row, col, channel),
                        0.5,
                        "pixel ({}, {}) channel {}",
                        row,
                        col,
                        channel
                    );
                }
            }
        }
    }

    #[test]
    fn test_every_pixel_receives_estimates() {
        let stats = random_statistics(12, 10, 3);
        let mut parameters = test_parameters();
        parameters.search_window_radius = 2;

        let output = denoise(&inputs_of(&stats), &parameters, None).unwrap();
        assert!(output.pixels().all(|p| p.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_fallback_regime_estimate_count_totals() {
        // Threshold 0 keeps only exact self-matches, forcing the fallback
        // everywhere: each main patch contributes exactly patch-pixel-count
        // estimates, so the total is centers * 9.
        let stats = random_statistics(8, 8, 5);
        let flags = FlagImage::new(8, 8);
        let pixel_covariances =
            compute_pixel_covariances(&stats.covariance, &stats.nb_of_samples);
        let kernel_inputs = KernelInputs {
            colors: &stats.mean,
            nb_of_samples: &stats.nb_of_samples,
            histograms: &stats.histograms,
            pixel_covariances: &pixel_covariances,
            flags: &flags,
        };
        let mut parameters = test_parameters();
        parameters.histogram_distance_threshold = 0.0;
        let mut unit = DenoisingUnit::new(kernel_inputs, parameters.kernel_config(), 1);

        let centers = eligible_pixel_centers(8, 8, 1);
        for &center in &centers {
            unit.denoise_patch_and_similar_patches(center);
        }
        let outputs = unit.into_outputs();

        let mut total = 0u32;
        for row in 0..8 {
            for col in 0..8 {
                let count = outputs.estimate_counts.get(row, col, 0);
                assert!(count >= 1, "pixel ({}, {}) uncovered", row, col);
                total += count;
            }
        }
        assert_eq!(total as usize, centers.len() * 9);
    }

    #[test]
    fn test_pixel_order_does_not_change_result() {
        let stats = random_statistics(10, 10, 21);
        let mut random_order = test_parameters();
        random_order.use_random_pixel_order = true;
        let mut row_order = test_parameters();
        row_order.use_random_pixel_order = false;

        let a = denoise(&inputs_of(&stats), &random_order, None).unwrap();
        let b = denoise(&inputs_of(&stats), &row_order, None).unwrap();

        for (pa, pb) in a.pixels().zip(b.pixels()) {
            for (&va, &vb) in pa.iter().zip(pb.iter()) {
                assert!(approx_eq(va, vb, 1e-10));
            }
        }
    }

    #[test]
    fn test_progress_reports_are_monotone_and_complete() {
        let stats = random_statistics(10, 10, 13);
        let reports = Mutex::new(Vec::<f32>::new());
        let callback = |fraction: f32| reports.lock().unwrap().push(fraction);
        let callback: ProgressCallback<'_> = &callback;

        let parameters = test_parameters();
        denoise(&inputs_of(&stats), &parameters, Some(callback)).unwrap();

        let reports = reports.into_inner().unwrap();
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*reports.last().unwrap(), 1.0);
    }
}
