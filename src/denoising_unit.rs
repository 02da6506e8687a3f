//! Per-worker denoising kernel.
//!
//! A [`DenoisingUnit`] owns everything one worker touches while denoising
//! main patches: scratch buffers, a seeded RNG for skip draws, and a private
//! pair of output accumulators. The only shared mutable state it sees is the
//! relaxed-atomic flag image; all other inputs are read-only views, so no
//! lock is ever taken on the hot path.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::covariance::{
    clamp_to_positive_semidefinite, invert_regularized, BlockDiagonalCovariance, SymmetricMatrix3,
};
use crate::float_trait::DenoiseFloat;
use crate::image::{clamped_window, FlagImage, Image, PixelPosition};
use crate::statistics::NB_OF_COLOR_CHANNELS;

/// Bin pairs whose combined mass is below one sample are uninformative and
/// excluded from the histogram distance.
const MIN_BIN_PAIR_MASS: f64 = 1.0;

/// How the similarity search walks the search window.
///
/// Both paths share the same per-bin kernel and produce identical distances;
/// the batched path computes the whole window at once the way an
/// accelerator would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityMode {
    /// One patch-pair distance per candidate neighbor.
    #[default]
    Scalar,
    /// All window distances in one offset-major sweep.
    Batched,
}

/// Scalar knobs of the per-patch kernel, copied out of the orchestrator's
/// parameters.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig<F> {
    pub patch_radius: usize,
    pub search_window_radius: usize,
    pub histogram_distance_threshold: F,
    pub min_eigen_value: F,
    pub marked_pixels_skipping_probability: F,
    pub similarity_mode: SimilarityMode,
}

/// Read-only views shared by every worker, plus the atomic marker grid.
#[derive(Debug, Clone, Copy)]
pub struct KernelInputs<'a, F> {
    /// Mean color, 3 channels.
    pub colors: &'a Image<F>,
    /// Per-pixel weight sums, 1 channel.
    pub nb_of_samples: &'a Image<F>,
    /// Per-channel histograms, `3 * nb_of_bins` channels.
    pub histograms: &'a Image<F>,
    /// Covariance of the per-pixel mean estimator, 6 packed channels.
    pub pixel_covariances: &'a Image<F>,
    /// Shared "already denoised" markers.
    pub flags: &'a FlagImage,
}

/// One worker's private output accumulators.
#[derive(Debug, Clone)]
pub struct WorkerOutputs<F> {
    /// Sum of denoised color estimates per pixel, 3 channels.
    pub summed_colors: Image<F>,
    /// Number of estimates received per pixel, 1 channel.
    pub estimate_counts: Image<u32>,
}

impl<F: DenoiseFloat> WorkerOutputs<F> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            summed_colors: Image::new(width, height, NB_OF_COLOR_CHANNELS),
            estimate_counts: Image::new(width, height, 1),
        }
    }

    /// Fold another worker's accumulators into this one.
    pub fn merge(&mut self, other: &WorkerOutputs<F>) {
        self.summed_colors += &other.summed_colors;
        self.estimate_counts += &other.estimate_counts;
    }
}

/// Per-worker kernel: similarity search, covariance regularization, two-pass
/// MMSE filtering, aggregation into private buffers.
pub struct DenoisingUnit<'a, F: DenoiseFloat> {
    inputs: KernelInputs<'a, F>,
    config: KernelConfig<F>,
    width: usize,
    height: usize,
    patch_offsets: Vec<PixelPosition>,
    patch_pixel_count: usize,
    color_patch_dimension: usize,
    skip_probability: f64,
    rng: StdRng,
    similar_centers: Vec<PixelPosition>,
    window_positions: Vec<PixelPosition>,
    window_distances: Vec<F>,
    window_informative: Vec<usize>,
    outputs: WorkerOutputs<F>,
}

impl<'a, F: DenoiseFloat> DenoisingUnit<'a, F> {
    pub fn new(inputs: KernelInputs<'a, F>, config: KernelConfig<F>, rng_seed: u64) -> Self {
        let width = inputs.colors.width();
        let height = inputs.colors.height();
        let radius = config.patch_radius as isize;

        let mut patch_offsets = Vec::with_capacity((2 * config.patch_radius + 1).pow(2));
        for row in -radius..=radius {
            for col in -radius..=radius {
                patch_offsets.push(PixelPosition::new(row, col));
            }
        }
        let patch_pixel_count = patch_offsets.len();

        Self {
            inputs,
            config,
            width,
            height,
            patch_pixel_count,
            color_patch_dimension: NB_OF_COLOR_CHANNELS * patch_pixel_count,
            patch_offsets,
            skip_probability: config
                .marked_pixels_skipping_probability
                .to_f64()
                .unwrap_or(0.0),
            rng: StdRng::seed_from_u64(rng_seed),
            similar_centers: Vec::new(),
            window_positions: Vec::new(),
            window_distances: Vec::new(),
            window_informative: Vec::new(),
            outputs: WorkerOutputs::new(width, height),
        }
    }

    pub fn into_outputs(self) -> WorkerOutputs<F> {
        self.outputs
    }

    /// Denoise the main patch centered at `center` together with its similar
    /// patches, accumulating every produced estimate into the private
    /// buffers.
    pub fn denoise_patch_and_similar_patches(&mut self, center: PixelPosition) {
        if self.inputs.flags.is_marked(center) && self.draw_skip() {
            return;
        }

        match self.config.similarity_mode {
            SimilarityMode::Scalar => self.collect_similar_centers_scalar(center),
            SimilarityMode::Batched => self.collect_similar_centers_batched(center),
        }

        // A full covariance needs more patches than its dimension.
        if self.similar_centers.len() <= self.color_patch_dimension {
            self.denoise_only_main_patch(center);
        } else {
            self.denoise_selected_patches();
        }
    }

    fn draw_skip(&mut self) -> bool {
        if self.skip_probability <= 0.0 {
            return false;
        }
        if self.skip_probability >= 1.0 {
            return true;
        }
        self.rng.gen::<f64>() < self.skip_probability
    }

    fn search_window(&self, center: PixelPosition) -> (Vec<usize>, Vec<usize>) {
        let rows = clamped_window(
            center.row_index(),
            self.config.search_window_radius,
            self.config.patch_radius,
            self.height,
        );
        let cols = clamped_window(
            center.col_index(),
            self.config.search_window_radius,
            self.config.patch_radius,
            self.width,
        );
        (rows.collect(), cols.collect())
    }

    fn collect_similar_centers_scalar(&mut self, center: PixelPosition) {
        let (rows, cols) = self.search_window(center);
        self.similar_centers.clear();
        for &row in &rows {
            for &col in &cols {
                let candidate = PixelPosition::new(row as isize, col as isize);
                let distance = self.histogram_patch_distance(center, candidate);
                if distance <= self.config.histogram_distance_threshold {
                    self.similar_centers.push(candidate);
                }
            }
        }
    }

    /// Chi-square-like histogram distance between the patches centered at
    /// `a` and `b`, normalized by the number of informative bins.
    fn histogram_patch_distance(&self, a: PixelPosition, b: PixelPosition) -> F {
        let mass_floor = F::from_f64_c(MIN_BIN_PAIR_MASS);
        let mut sum = F::zero();
        let mut informative = 0usize;

        for &offset in &self.patch_offsets {
            let pa = a + offset;
            let pb = b + offset;
            let n1 = self.inputs.nb_of_samples.value_at(pa, 0);
            let n2 = self.inputs.nb_of_samples.value_at(pb, 0);
            let h1 = self.inputs.histograms.pixel_at(pa);
            let h2 = self.inputs.histograms.pixel_at(pb);

            for (&v1, &v2) in h1.iter().zip(h2.iter()) {
                let mass = v1 + v2;
                if mass < mass_floor {
                    continue;
                }
                let diff = n2 * v1 - n1 * v2;
                sum += diff * diff / (n1 * n2 * mass);
                informative += 1;
            }
        }

        if informative == 0 {
            F::zero()
        } else {
            sum / F::usize_as(informative)
        }
    }

    /// Offset-major sweep computing every window distance at once, the loop
    /// structure a batched accelerator uses. Per candidate, terms accumulate
    /// in the same order as the scalar path, so the results are identical.
    fn collect_similar_centers_batched(&mut self, center: PixelPosition) {
        let (rows, cols) = self.search_window(center);
        self.window_positions.clear();
        for &row in &rows {
            for &col in &cols {
                self.window_positions
                    .push(PixelPosition::new(row as isize, col as isize));
            }
        }

        let n = self.window_positions.len();
        self.window_distances.clear();
        self.window_distances.resize(n, F::zero());
        self.window_informative.clear();
        self.window_informative.resize(n, 0);

        let mass_floor = F::from_f64_c(MIN_BIN_PAIR_MASS);
        for &offset in &self.patch_offsets {
            let pa = center + offset;
            let n1 = self.inputs.nb_of_samples.value_at(pa, 0);
            let h1 = self.inputs.histograms.pixel_at(pa);

            for (index, &candidate) in self.window_positions.iter().enumerate() {
                let pb = candidate + offset;
                let n2 = self.inputs.nb_of_samples.value_at(pb, 0);
                let h2 = self.inputs.histograms.pixel_at(pb);

                for (&v1, &v2) in h1.iter().zip(h2.iter()) {
                    let mass = v1 + v2;
                    if mass < mass_floor {
                        continue;
                    }
                    let diff = n2 * v1 - n1 * v2;
                    self.window_distances[index] += diff * diff / (n1 * n2 * mass);
                    self.window_informative[index] += 1;
                }
            }
        }

        self.similar_centers.clear();
        for index in 0..n {
            let distance = if self.window_informative[index] == 0 {
                F::zero()
            } else {
                self.window_distances[index] / F::usize_as(self.window_informative[index])
            };
            if distance <= self.config.histogram_distance_threshold {
                self.similar_centers.push(self.window_positions[index]);
            }
        }
    }

    /// Fallback when the ensemble is too small for a full covariance: splat
    /// the unweighted mean of the similar patches into the main patch only.
    fn denoise_only_main_patch(&mut self, center: PixelPosition) {
        let inv_count = F::one() / F::usize_as(self.similar_centers.len());
        let mut mean_patch = vec![F::zero(); self.color_patch_dimension];

        for similar in &self.similar_centers {
            for (j, &offset) in self.patch_offsets.iter().enumerate() {
                let pixel = self.inputs.colors.pixel_at(*similar + offset);
                for (channel, &value) in pixel.iter().enumerate() {
                    mean_patch[NB_OF_COLOR_CHANNELS * j + channel] += value;
                }
            }
        }
        for value in mean_patch.iter_mut() {
            *value *= inv_count;
        }

        for (j, &offset) in self.patch_offsets.iter().enumerate() {
            let position = center + offset;
            let row = position.row_index();
            let col = position.col_index();
            for channel in 0..NB_OF_COLOR_CHANNELS {
                *self.outputs.summed_colors.get_mut(row, col, channel) +=
                    mean_patch[NB_OF_COLOR_CHANNELS * j + channel];
            }
            *self.outputs.estimate_counts.get_mut(row, col, 0) += 1;
            self.inputs.flags.mark(position);
        }
    }

    /// Two-pass collaborative MMSE filtering of the whole similar-patch
    /// ensemble.
    fn denoise_selected_patches(&mut self) {
        let k = self.similar_centers.len();
        let d = self.color_patch_dimension;

        // Noise covariance shared by the ensemble: per-position average of
        // the pixel covariance blocks across similar patches.
        let mut noise_covariance = BlockDiagonalCovariance::zeros(self.patch_pixel_count);
        for similar in &self.similar_centers {
            for (j, &offset) in self.patch_offsets.iter().enumerate() {
                let pixel = self.inputs.pixel_covariances.pixel_at(*similar + offset);
                *noise_covariance.block_mut(j) += &SymmetricMatrix3::from_pixel(pixel);
            }
        }
        noise_covariance *= F::one() / F::usize_as(k);

        // Flattened noisy patch ensemble, one column per similar patch.
        let mut noisy_patches = DMatrix::<F>::zeros(d, k);
        for (i, similar) in self.similar_centers.iter().enumerate() {
            for (j, &offset) in self.patch_offsets.iter().enumerate() {
                let pixel = self.inputs.colors.pixel_at(*similar + offset);
                for (channel, &value) in pixel.iter().enumerate() {
                    noisy_patches[(NB_OF_COLOR_CHANNELS * j + channel, i)] = value;
                }
            }
        }

        // Step 1: estimate the signal covariance from the noisy ensemble,
        // regularize it, and filter.
        let (mean, empirical_covariance) = empirical_mean_and_covariance(&noisy_patches);
        let mut signal_covariance = empirical_covariance;
        noise_covariance.subtract_from_dense(&mut signal_covariance);
        let mut total_covariance = clamp_to_positive_semidefinite(signal_covariance);
        noise_covariance.add_to_dense(&mut total_covariance);
        let inverse = invert_regularized(total_covariance, self.config.min_eigen_value);

        let mut step1_patches = DMatrix::<F>::zeros(d, k);
        apply_mmse_filter(
            &noisy_patches,
            &noisy_patches,
            &mean,
            &inverse,
            &noise_covariance,
            &mut step1_patches,
        );

        // Step 2: re-estimate from the step-1 output (the filter already
        // removed the noise) and re-filter the original noisy patches.
        let (step2_mean, step2_covariance) = empirical_mean_and_covariance(&step1_patches);
        let mut total_covariance = step2_covariance;
        noise_covariance.add_to_dense(&mut total_covariance);
        let inverse = invert_regularized(total_covariance, self.config.min_eigen_value);

        let mut denoised_patches = DMatrix::<F>::zeros(d, k);
        apply_mmse_filter(
            &noisy_patches,
            &noisy_patches,
            &step2_mean,
            &inverse,
            &noise_covariance,
            &mut denoised_patches,
        );

        // Aggregate every similar patch's estimate and mark covered pixels.
        for (i, similar) in self.similar_centers.iter().enumerate() {
            for (j, &offset) in self.patch_offsets.iter().enumerate() {
                let position = *similar + offset;
                let row = position.row_index();
                let col = position.col_index();
                for channel in 0..NB_OF_COLOR_CHANNELS {
                    *self.outputs.summed_colors.get_mut(row, col, channel) +=
                        denoised_patches[(NB_OF_COLOR_CHANNELS * j + channel, i)];
                }
                *self.outputs.estimate_counts.get_mut(row, col, 0) += 1;
                self.inputs.flags.mark(position);
            }
        }
    }
}

/// Mean column and (k-1)-normalized covariance of a column ensemble.
fn empirical_mean_and_covariance<F: DenoiseFloat>(
    patches: &DMatrix<F>,
) -> (DVector<F>, DMatrix<F>) {
    let (d, k) = patches.shape();
    debug_assert!(k >= 2);

    let mut mean = DVector::<F>::zeros(d);
    for i in 0..k {
        for r in 0..d {
            mean[r] += patches[(r, i)];
        }
    }
    mean *= F::one() / F::usize_as(k);

    let mut centered = patches.clone();
    for i in 0..k {
        for r in 0..d {
            centered[(r, i)] -= mean[r];
        }
    }
    let covariance = &centered * centered.transpose() * (F::one() / F::usize_as(k - 1));
    (mean, covariance)
}

/// `out_i = source_i - NoiseCov . TotalCovInv . (centered_i - mean)` for
/// every column, the linear MMSE estimate under the current covariance
/// model. `source` and `centered` coincide in both passes of this denoiser
/// but are kept separate for clarity of the formula.
fn apply_mmse_filter<F: DenoiseFloat>(
    source: &DMatrix<F>,
    centered: &DMatrix<F>,
    mean: &DVector<F>,
    total_covariance_inverse: &DMatrix<F>,
    noise_covariance: &BlockDiagonalCovariance<F>,
    out: &mut DMatrix<F>,
) {
    let (d, k) = source.shape();
    let mut difference = DVector::<F>::zeros(d);
    let mut filtered = DVector::<F>::zeros(d);
    let mut noise_term = DVector::<F>::zeros(d);

    for i in 0..k {
        for r in 0..d {
            difference[r] = centered[(r, i)] - mean[r];
        }
        filtered.gemv(F::one(), total_covariance_inverse, &difference, F::zero());
        noise_covariance.mul_vector(&filtered, &mut noise_term);
        for r in 0..d {
            out[(r, i)] = source[(r, i)] - noise_term[r];
        }
    }
}
