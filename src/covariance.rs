//! Packed symmetric covariance storage and regularization helpers.
//!
//! Per-pixel color covariances are 3x3 symmetric matrices stored as 6
//! scalars; a patch's noise covariance is block-diagonal with one 3x3 block
//! per patch pixel (inter-pixel noise correlation is assumed zero). The
//! eigendecomposition helpers at the bottom are the only place the denoiser
//! touches dense linear algebra regularization.

use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView1;
use std::ops::{AddAssign, MulAssign};

use crate::float_trait::DenoiseFloat;

/// Number of scalars in a packed symmetric 3x3 matrix.
pub const NB_OF_COVARIANCE_COMPONENTS: usize = 6;

/// Packed component order: xx, yy, zz, yz, xz, xy.
pub const COV_XX: usize = 0;
pub const COV_YY: usize = 1;
pub const COV_ZZ: usize = 2;
pub const COV_YZ: usize = 3;
pub const COV_XZ: usize = 4;
pub const COV_XY: usize = 5;

/// Symmetric 3x3 matrix packed as 6 scalars (xx, yy, zz, yz, xz, xy).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricMatrix3<F> {
    data: [F; NB_OF_COVARIANCE_COMPONENTS],
}

impl<F: DenoiseFloat> Default for SymmetricMatrix3<F> {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<F: DenoiseFloat> SymmetricMatrix3<F> {
    pub fn zeros() -> Self {
        Self {
            data: [F::zero(); NB_OF_COVARIANCE_COMPONENTS],
        }
    }

    pub fn from_components(data: [F; NB_OF_COVARIANCE_COMPONENTS]) -> Self {
        Self { data }
    }

    /// Read the 6 packed components from an image pixel view.
    pub fn from_pixel(pixel: ArrayView1<'_, F>) -> Self {
        debug_assert_eq!(pixel.len(), NB_OF_COVARIANCE_COMPONENTS);
        let mut data = [F::zero(); NB_OF_COVARIANCE_COMPONENTS];
        for (dst, src) in data.iter_mut().zip(pixel.iter()) {
            *dst = *src;
        }
        Self { data }
    }

    pub fn components(&self) -> &[F; NB_OF_COVARIANCE_COMPONENTS] {
        &self.data
    }

    /// Full-matrix element `(i, j)` for `i, j` in `0..3`.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> F {
        match (i, j) {
            (0, 0) => self.data[COV_XX],
            (1, 1) => self.data[COV_YY],
            (2, 2) => self.data[COV_ZZ],
            (1, 2) | (2, 1) => self.data[COV_YZ],
            (0, 2) | (2, 0) => self.data[COV_XZ],
            (0, 1) | (1, 0) => self.data[COV_XY],
            _ => panic!("symmetric 3x3 index ({}, {}) out of range", i, j),
        }
    }

    /// Matrix-vector product with a 3-component color vector.
    #[inline]
    pub fn mul_vec3(&self, v: [F; 3]) -> [F; 3] {
        [
            self.data[COV_XX] * v[0] + self.data[COV_XY] * v[1] + self.data[COV_XZ] * v[2],
            self.data[COV_XY] * v[0] + self.data[COV_YY] * v[1] + self.data[COV_YZ] * v[2],
            self.data[COV_XZ] * v[0] + self.data[COV_YZ] * v[1] + self.data[COV_ZZ] * v[2],
        ]
    }
}

impl<F: DenoiseFloat> AddAssign<&SymmetricMatrix3<F>> for SymmetricMatrix3<F> {
    fn add_assign(&mut self, rhs: &SymmetricMatrix3<F>) {
        for (a, b) in self.data.iter_mut().zip(rhs.data.iter()) {
            *a += *b;
        }
    }
}

impl<F: DenoiseFloat> MulAssign<F> for SymmetricMatrix3<F> {
    fn mul_assign(&mut self, rhs: F) {
        for a in self.data.iter_mut() {
            *a *= rhs;
        }
    }
}

/// Block-diagonal covariance over a patch: one symmetric 3x3 block per patch
/// pixel, blocks in patch row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDiagonalCovariance<F> {
    blocks: Vec<SymmetricMatrix3<F>>,
}

impl<F: DenoiseFloat> BlockDiagonalCovariance<F> {
    pub fn zeros(nb_of_blocks: usize) -> Self {
        Self {
            blocks: vec![SymmetricMatrix3::zeros(); nb_of_blocks],
        }
    }

    pub fn nb_of_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Full dimension of the represented matrix (`3 * nb_of_blocks`).
    pub fn dimension(&self) -> usize {
        3 * self.blocks.len()
    }

    pub fn block(&self, index: usize) -> &SymmetricMatrix3<F> {
        &self.blocks[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut SymmetricMatrix3<F> {
        &mut self.blocks[index]
    }

    pub fn reset(&mut self) {
        for block in self.blocks.iter_mut() {
            *block = SymmetricMatrix3::zeros();
        }
    }

    /// `out = self * x` for a vector of length [`Self::dimension`].
    pub fn mul_vector(&self, x: &DVector<F>, out: &mut DVector<F>) {
        debug_assert_eq!(x.len(), self.dimension());
        debug_assert_eq!(out.len(), self.dimension());
        for (j, block) in self.blocks.iter().enumerate() {
            let base = 3 * j;
            let y = block.mul_vec3([x[base], x[base + 1], x[base + 2]]);
            out[base] = y[0];
            out[base + 1] = y[1];
            out[base + 2] = y[2];
        }
    }

    /// Add each block onto the matching diagonal 3x3 block of `dense`.
    pub fn add_to_dense(&self, dense: &mut DMatrix<F>) {
        debug_assert_eq!(dense.nrows(), self.dimension());
        debug_assert_eq!(dense.ncols(), self.dimension());
        for (j, block) in self.blocks.iter().enumerate() {
            let base = 3 * j;
            for r in 0..3 {
                for c in 0..3 {
                    dense[(base + r, base + c)] += block.at(r, c);
                }
            }
        }
    }

    /// Subtract each block from the matching diagonal 3x3 block of `dense`.
    pub fn subtract_from_dense(&self, dense: &mut DMatrix<F>) {
        debug_assert_eq!(dense.nrows(), self.dimension());
        debug_assert_eq!(dense.ncols(), self.dimension());
        for (j, block) in self.blocks.iter().enumerate() {
            let base = 3 * j;
            for r in 0..3 {
                for c in 0..3 {
                    dense[(base + r, base + c)] -= block.at(r, c);
                }
            }
        }
    }
}

impl<F: DenoiseFloat> AddAssign<&BlockDiagonalCovariance<F>> for BlockDiagonalCovariance<F> {
    fn add_assign(&mut self, rhs: &BlockDiagonalCovariance<F>) {
        debug_assert_eq!(self.blocks.len(), rhs.blocks.len());
        for (a, b) in self.blocks.iter_mut().zip(rhs.blocks.iter()) {
            *a += b;
        }
    }
}

impl<F: DenoiseFloat> MulAssign<F> for BlockDiagonalCovariance<F> {
    fn mul_assign(&mut self, rhs: F) {
        for block in self.blocks.iter_mut() {
            *block *= rhs;
        }
    }
}

// =============================================================================
// Eigendecomposition Helpers
// =============================================================================

/// Project a symmetric matrix onto the positive-semidefinite cone by
/// clamping negative eigenvalues to zero: `V . max(0, L) . V^T`.
pub fn clamp_to_positive_semidefinite<F: DenoiseFloat>(matrix: DMatrix<F>) -> DMatrix<F> {
    let mut eigen = matrix.symmetric_eigen();
    for value in eigen.eigenvalues.iter_mut() {
        if *value < F::zero() {
            *value = F::zero();
        }
    }
    eigen.recompose()
}

/// Invert a symmetric matrix through its eigendecomposition, flooring every
/// eigenvalue at `min_eigen_value` before taking reciprocals. The floor
/// regularizes the inversion of ill-conditioned covariances; it does not
/// modify the forward matrix.
pub fn invert_regularized<F: DenoiseFloat>(matrix: DMatrix<F>, min_eigen_value: F) -> DMatrix<F> {
    debug_assert!(min_eigen_value > F::zero());
    let mut eigen = matrix.symmetric_eigen();
    for value in eigen.eigenvalues.iter_mut() {
        let floored = if *value < min_eigen_value {
            min_eigen_value
        } else {
            *value
        };
        *value = F::one() / floored;
    }
    eigen.recompose()
}
