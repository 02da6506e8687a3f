//! Multiscale pyramid denoising.
//!
//! Wide, low-frequency noise survives a single-scale pass whose search
//! window is small compared to the noise wavelength. This module builds a
//! 2x2 pyramid of the statistics images, denoises every level independently
//! with the monoscale pipeline, and composites coarse-to-fine: the coarse
//! result provides the low band, the fine result keeps its high-frequency
//! residual.
//!
//! Downscaling is statistics-aware: sample counts and histograms sum,
//! colors average, and covariances are re-derived from summed first and
//! second moments rather than averaged, so every pyramid level is a valid
//! statistics set in its own right.

use crate::covariance::{
    COV_XX, COV_XY, COV_XZ, COV_YY, COV_YZ, COV_ZZ, NB_OF_COVARIANCE_COMPONENTS,
};
use crate::float_trait::DenoiseFloat;
use crate::image::Image;
use crate::monoscale::{self, DenoiserInputs, DenoiserParameters, ProgressCallback};
use crate::statistics::NB_OF_COLOR_CHANNELS;

// =============================================================================
// Constants
// =============================================================================

/// Default number of pyramid levels.
const DEFAULT_NB_OF_SCALES: usize = 3;

/// Smallest image dimension worth another pyramid level.
const MIN_SCALE_DIMENSION: usize = 16;

/// Cap on automatically chosen pyramid depth.
const MAX_NB_OF_SCALES: usize = 4;

/// Per-scale progress weight decay: one coarse level has a quarter of the
/// finer level's pixels.
const SCALE_PROGRESS_DECAY: f64 = 0.25;

// =============================================================================
// Types
// =============================================================================

/// How a coarse level's result is folded into the finer level's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Band-pass compositing: interpolated coarse low band plus the fine
    /// level's high-frequency residual.
    #[default]
    BandPass,
    /// Interpolate the coarse result and overwrite the fine one. Mostly a
    /// diagnostic mode.
    Overwrite,
}

/// Configuration of a multiscale pass.
#[derive(Debug, Clone)]
pub struct MultiscaleParameters<F> {
    /// Pyramid levels; 1 reduces to the monoscale pipeline. Default: 3
    pub nb_of_scales: usize,
    /// Coarse-to-fine compositing policy. Default: band-pass
    pub merge_policy: MergePolicy,
    /// Parameters applied at every level.
    pub monoscale: DenoiserParameters<F>,
}

impl<F: DenoiseFloat> Default for MultiscaleParameters<F> {
    fn default() -> Self {
        Self {
            nb_of_scales: DEFAULT_NB_OF_SCALES,
            merge_policy: MergePolicy::default(),
            monoscale: DenoiserParameters::default(),
        }
    }
}

impl<F: DenoiseFloat> MultiscaleParameters<F> {
    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.nb_of_scales == 0 {
            return Err("nb_of_scales must be >= 1".to_string());
        }
        self.monoscale.validate()
    }
}

/// Owned statistics images of one pyramid level below full resolution.
struct ScaleInputs<F> {
    colors: Image<F>,
    nb_of_samples: Image<F>,
    histograms: Image<F>,
    sample_covariances: Image<F>,
}

impl<F: DenoiseFloat> ScaleInputs<F> {
    fn as_denoiser_inputs(&self) -> DenoiserInputs<'_, F> {
        DenoiserInputs {
            colors: &self.colors,
            nb_of_samples: &self.nb_of_samples,
            histograms: &self.histograms,
            sample_covariances: &self.sample_covariances,
        }
    }
}

/// Pyramid depth for an image: one level per halving above
/// [`MIN_SCALE_DIMENSION`], capped at [`MAX_NB_OF_SCALES`].
pub fn compute_nb_of_scales(width: usize, height: usize) -> usize {
    let mut dimension = width.min(height);
    let mut scales = 1;
    while dimension >= 2 * MIN_SCALE_DIMENSION && scales < MAX_NB_OF_SCALES {
        dimension /= 2;
        scales += 1;
    }
    scales
}

// =============================================================================
// Downscaling
// =============================================================================

fn coarse_extent(fine: usize) -> usize {
    fine.div_ceil(2)
}

/// 2x2 block sum, used for sample counts and histograms.
pub fn downscale_sum<F: DenoiseFloat>(fine: &Image<F>) -> Image<F> {
    let depth = fine.depth();
    let coarse_width = coarse_extent(fine.width());
    let coarse_height = coarse_extent(fine.height());
    let mut coarse = Image::new(coarse_width, coarse_height, depth);

    for row in 0..coarse_height {
        for col in 0..coarse_width {
            for fine_row in (2 * row)..(2 * row + 2).min(fine.height()) {
                for fine_col in (2 * col)..(2 * col + 2).min(fine.width()) {
                    for channel in 0..depth {
                        *coarse.get_mut(row, col, channel) +=
                            fine.get(fine_row, fine_col, channel);
                    }
                }
            }
        }
    }
    coarse
}

/// 2x2 block average, used for colors.
pub fn downscale_average<F: DenoiseFloat>(fine: &Image<F>) -> Image<F> {
    let depth = fine.depth();
    let coarse_width = coarse_extent(fine.width());
    let coarse_height = coarse_extent(fine.height());
    let mut coarse = Image::new(coarse_width, coarse_height, depth);

    for row in 0..coarse_height {
        for col in 0..coarse_width {
            let mut block_size = 0usize;
            for fine_row in (2 * row)..(2 * row + 2).min(fine.height()) {
                for fine_col in (2 * col)..(2 * col + 2).min(fine.width()) {
                    block_size += 1;
                    for channel in 0..depth {
                        *coarse.get_mut(row, col, channel) +=
                            fine.get(fine_row, fine_col, channel);
                    }
                }
            }
            let inv = F::one() / F::usize_as(block_size);
            for channel in 0..depth {
                *coarse.get_mut(row, col, channel) *= inv;
            }
        }
    }
    coarse
}

/// Downscale per-pixel sample covariances by merging the block's sample
/// populations: reconstruct each fine pixel's first and second moments from
/// its count, mean and covariance, sum them, and re-center at the merged
/// mean. Directly averaging covariances would drop the between-pixel mean
/// variance and understate the coarse noise.
pub fn downscale_covariance<F: DenoiseFloat>(
    covariances: &Image<F>,
    means: &Image<F>,
    counts: &Image<F>,
) -> Image<F> {
    const COMPONENT_CHANNELS: [(usize, usize, usize); NB_OF_COVARIANCE_COMPONENTS] = [
        (COV_XX, 0, 0),
        (COV_YY, 1, 1),
        (COV_ZZ, 2, 2),
        (COV_YZ, 1, 2),
        (COV_XZ, 0, 2),
        (COV_XY, 0, 1),
    ];

    let coarse_width = coarse_extent(covariances.width());
    let coarse_height = coarse_extent(covariances.height());
    let mut coarse = Image::new(coarse_width, coarse_height, NB_OF_COVARIANCE_COMPONENTS);

    for row in 0..coarse_height {
        for col in 0..coarse_width {
            let mut count_sum = F::zero();
            let mut first_moments = [F::zero(); NB_OF_COLOR_CHANNELS];
            let mut second_moments = [F::zero(); NB_OF_COVARIANCE_COMPONENTS];

            for fine_row in (2 * row)..(2 * row + 2).min(covariances.height()) {
                for fine_col in (2 * col)..(2 * col + 2).min(covariances.width()) {
                    let count = counts.get(fine_row, fine_col, 0);
                    count_sum += count;
                    let mean = means.pixel(fine_row, fine_col);
                    for (channel, moment) in first_moments.iter_mut().enumerate() {
                        *moment += count * mean[channel];
                    }
                    for (component, a, b) in COMPONENT_CHANNELS {
                        second_moments[component] += count
                            * (covariances.get(fine_row, fine_col, component)
                                + mean[a] * mean[b]);
                    }
                }
            }

            debug_assert!(count_sum > F::zero());
            let inv_count = F::one() / count_sum;
            let merged_mean = [
                first_moments[0] * inv_count,
                first_moments[1] * inv_count,
                first_moments[2] * inv_count,
            ];
            for (component, a, b) in COMPONENT_CHANNELS {
                let value = second_moments[component] * inv_count - merged_mean[a] * merged_mean[b];
                coarse.set(row, col, component, value);
            }
        }
    }
    coarse
}

// =============================================================================
// Resampling
// =============================================================================

/// Bilinear upsampling of `coarse` to the given fine geometry.
pub fn interpolate<F: DenoiseFloat>(
    coarse: &Image<F>,
    fine_width: usize,
    fine_height: usize,
) -> Image<F> {
    let depth = coarse.depth();
    let mut fine = Image::new(fine_width, fine_height, depth);

    let row_scale = coarse.height() as f64 / fine_height as f64;
    let col_scale = coarse.width() as f64 / fine_width as f64;

    for row in 0..fine_height {
        let source_row = ((row as f64 + 0.5) * row_scale - 0.5)
            .clamp(0.0, (coarse.height() - 1) as f64);
        let row0 = source_row.floor() as usize;
        let row1 = (row0 + 1).min(coarse.height() - 1);
        let row_t = F::from_f64_c(source_row - row0 as f64);

        for col in 0..fine_width {
            let source_col = ((col as f64 + 0.5) * col_scale - 0.5)
                .clamp(0.0, (coarse.width() - 1) as f64);
            let col0 = source_col.floor() as usize;
            let col1 = (col0 + 1).min(coarse.width() - 1);
            let col_t = F::from_f64_c(source_col - col0 as f64);

            for channel in 0..depth {
                let top = coarse.get(row0, col0, channel)
                    + (coarse.get(row0, col1, channel) - coarse.get(row0, col0, channel)) * col_t;
                let bottom = coarse.get(row1, col0, channel)
                    + (coarse.get(row1, col1, channel) - coarse.get(row1, col0, channel)) * col_t;
                fine.set(row, col, channel, top + (bottom - top) * row_t);
            }
        }
    }
    fine
}

/// Low band of an image: downscale then interpolate back.
pub fn low_pass<F: DenoiseFloat>(image: &Image<F>) -> Image<F> {
    interpolate(
        &downscale_average(image),
        image.width(),
        image.height(),
    )
}

/// Round-trip a coarse image through the fine grid. Up to interpolation
/// error this is the identity, the counterpart of [`low_pass`] in the
/// band-pass merge identity.
pub fn interpolate_then_downscale<F: DenoiseFloat>(
    coarse: &Image<F>,
    fine_width: usize,
    fine_height: usize,
) -> Image<F> {
    downscale_average(&interpolate(coarse, fine_width, fine_height))
}

/// Composite one coarse result into the next finer one.
fn merge_scales<F: DenoiseFloat>(
    fine: &Image<F>,
    coarse: &Image<F>,
    policy: MergePolicy,
) -> Image<F> {
    let mut merged = interpolate(coarse, fine.width(), fine.height());
    match policy {
        MergePolicy::Overwrite => merged,
        MergePolicy::BandPass => {
            // merged = interpolate(coarse) + fine - low_pass(fine)
            merged += fine;
            merged -= &low_pass(fine);
            merged
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

/// Denoise through an image pyramid.
///
/// With `nb_of_scales == 1` this is exactly the monoscale pipeline. Deeper
/// pyramids downscale the statistics level by level, denoise each level, and
/// merge coarse-to-fine under the configured policy. Progress is reported
/// across all levels, weighted by each level's pixel share.
pub fn multiscale_denoise<F: DenoiseFloat>(
    inputs: &DenoiserInputs<'_, F>,
    parameters: &MultiscaleParameters<F>,
    progress: Option<ProgressCallback<'_>>,
) -> Result<Image<F>, String> {
    parameters.validate().map_err(|message| {
        log::warn!("multiscale denoising aborted: {}", message);
        message
    })?;

    let nb_of_scales = parameters.nb_of_scales;
    if nb_of_scales == 1 {
        return monoscale::denoise(inputs, &parameters.monoscale, progress);
    }

    // Build the statistics pyramid; level s is index s - 1.
    let mut pyramid: Vec<ScaleInputs<F>> = Vec::with_capacity(nb_of_scales - 1);
    for scale in 1..nb_of_scales {
        let next = if scale == 1 {
            downscale_inputs(
                inputs.colors,
                inputs.nb_of_samples,
                inputs.histograms,
                inputs.sample_covariances,
            )
        } else {
            let previous = pyramid.last().expect("pyramid is non-empty");
            downscale_inputs(
                &previous.colors,
                &previous.nb_of_samples,
                &previous.histograms,
                &previous.sample_covariances,
            )
        };
        pyramid.push(next);
    }

    // Denoise coarse to fine.
    let weight_norm: f64 = (0..nb_of_scales)
        .map(|scale| SCALE_PROGRESS_DECAY.powi(scale as i32))
        .sum();
    let mut outputs: Vec<Option<Image<F>>> = (0..nb_of_scales).map(|_| None).collect();
    let mut completed_fraction = 0.0f64;

    for scale in (0..nb_of_scales).rev() {
        let weight = SCALE_PROGRESS_DECAY.powi(scale as i32) / weight_norm;
        let base = completed_fraction;
        let scaled_callback = progress.map(|report| {
            move |fraction: f32| report((base + weight * fraction as f64) as f32)
        });
        let callback: Option<ProgressCallback<'_>> = scaled_callback
            .as_ref()
            .map(|callback| callback as &(dyn Fn(f32) + Send + Sync));

        let output = if scale == 0 {
            monoscale::denoise(inputs, &parameters.monoscale, callback)?
        } else {
            monoscale::denoise(
                &pyramid[scale - 1].as_denoiser_inputs(),
                &parameters.monoscale,
                callback,
            )?
        };
        outputs[scale] = Some(output);
        completed_fraction += weight;
    }

    // Merge coarse to fine.
    let mut merged = outputs[nb_of_scales - 1]
        .take()
        .expect("coarsest level was denoised");
    for scale in (0..nb_of_scales - 1).rev() {
        let fine = outputs[scale].take().expect("level was denoised");
        merged = merge_scales(&fine, &merged, parameters.merge_policy);
    }
    Ok(merged)
}

fn downscale_inputs<F: DenoiseFloat>(
    colors: &Image<F>,
    counts: &Image<F>,
    histograms: &Image<F>,
    covariances: &Image<F>,
) -> ScaleInputs<F> {
    ScaleInputs {
        sample_covariances: downscale_covariance(covariances, colors, counts),
        colors: downscale_average(colors),
        nb_of_samples: downscale_sum(counts),
        histograms: downscale_sum(histograms),
    }
}
