//! Float trait abstraction for f32/f64 support.
//!
//! All numerical components of the denoiser are generic over this trait so
//! that callers can trade precision for memory. The `RealField` bound gives
//! access to nalgebra's dense symmetric eigensolver, which the covariance
//! regularization relies on.

use nalgebra::RealField;
use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for floating point types supported by the denoiser.
///
/// Combines the bounds needed across the crate:
/// - Basic float operations (Float, NumAssign)
/// - Dense symmetric eigendecomposition (RealField from nalgebra)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Debug printing
///
/// Note: `Float` and `RealField` overlap on method names (`sqrt`, `max`,
/// ...); generic code in this crate uses qualified `Float::` calls where the
/// two would be ambiguous.
pub trait DenoiseFloat:
    Float + RealField + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;
}

impl DenoiseFloat for f32 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }
}

impl DenoiseFloat for f64 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }
}
