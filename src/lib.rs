//! Collaborative Denoising for Monte-Carlo Renderings
//!
//! Pure Rust implementation of patch-based collaborative denoising driven by
//! per-pixel sample statistics. A renderer streams its samples into a
//! [`SamplesAccumulator`]; the resulting mean, covariance and histogram
//! images feed a Wiener-type collaborative filter that separates signal from
//! the per-pixel noise covariance of the Monte-Carlo estimator.
//!
//! The crate contains the full pipeline: statistics accumulation, histogram
//! patch similarity search, covariance regularization via symmetric
//! eigendecomposition, two-pass MMSE filtering, lock-free parallel
//! aggregation, and multiscale pyramid fusion.

pub mod covariance;
pub mod denoising_unit;
pub mod float_trait;
pub mod image;
pub mod monoscale;
pub mod multiscale;
pub mod statistics;

// Re-export the public surface at the crate root.
pub use covariance::{BlockDiagonalCovariance, SymmetricMatrix3};
pub use denoising_unit::SimilarityMode;
pub use float_trait::DenoiseFloat;
pub use image::{FlagImage, Image, PixelPosition};
pub use monoscale::{denoise, DenoiserInputs, DenoiserParameters, ProgressCallback};
pub use multiscale::{
    compute_nb_of_scales, multiscale_denoise, MergePolicy, MultiscaleParameters,
};
pub use statistics::{
    HistogramParameters, SamplesAccumulator, SamplesStatistics, ThreadSafeSamplesAccumulator,
};
