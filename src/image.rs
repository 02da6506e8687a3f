//! Multi-channel image storage and pixel addressing.
//!
//! Every buffer in the denoiser (colors, sample counts, histograms,
//! covariances, accumulators) is an [`Image<T>`]: a dense `height x width x
//! depth` array with bounds-checked access and a per-pixel channel view
//! iterator. The shared "already denoised" marker grid is a [`FlagImage`]
//! of relaxed atomics so workers can mark pixels without locks.

use ndarray::{s, Array3, ArrayView1, ArrayViewMut1, Axis, Zip};
use num_traits::Zero;
use std::ops::{Add, AddAssign, RangeInclusive, Sub, SubAssign};
use std::sync::atomic::{AtomicBool, Ordering};

/// Integer pixel coordinates, `(row, col)` in `[0, H) x [0, W)`.
///
/// Signed so that patch offsets (which can be negative) compose with
/// positions through plain `+`/`-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelPosition {
    pub row: isize,
    pub col: isize,
}

impl PixelPosition {
    pub fn new(row: isize, col: isize) -> Self {
        Self { row, col }
    }

    /// Row index as usize. Debug-asserts non-negativity.
    #[inline]
    pub fn row_index(&self) -> usize {
        debug_assert!(self.row >= 0);
        self.row as usize
    }

    /// Column index as usize. Debug-asserts non-negativity.
    #[inline]
    pub fn col_index(&self) -> usize {
        debug_assert!(self.col >= 0);
        self.col as usize
    }
}

impl Add for PixelPosition {
    type Output = PixelPosition;

    fn add(self, rhs: PixelPosition) -> PixelPosition {
        PixelPosition::new(self.row + rhs.row, self.col + rhs.col)
    }
}

impl Sub for PixelPosition {
    type Output = PixelPosition;

    fn sub(self, rhs: PixelPosition) -> PixelPosition {
        PixelPosition::new(self.row - rhs.row, self.col - rhs.col)
    }
}

/// Inclusive coordinate range of a window of half-size `radius` around
/// `center`, clamped so that a patch of half-size `border` centered anywhere
/// in the range still fits inside `[0, dim)`:
/// `max(border, center - radius) ..= min(dim - 1 - border, center + radius)`.
///
/// Returns an empty range when `dim < 2 * border + 1`.
pub fn clamped_window(
    center: usize,
    radius: usize,
    border: usize,
    dim: usize,
) -> RangeInclusive<usize> {
    let lo = center.saturating_sub(radius).max(border);
    let hi_limit = dim as isize - 1 - border as isize;
    if hi_limit < lo as isize {
        return 1..=0;
    }
    let hi = (center + radius).min(hi_limit as usize);
    lo..=hi
}

/// Dense `width x height x depth` scalar buffer, row-major, channel
/// innermost. Element access by `(row, col, channel)` is bounds-checked
/// (out-of-range indexing panics); [`Image::flat_index`] exposes the
/// index mapping for code that needs raw offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    data: Array3<T>,
}

impl<T: Clone + Zero> Image<T> {
    /// Zero-filled image of the given geometry.
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            data: Array3::zeros((height, width, depth)),
        }
    }

    /// Discard contents and adopt a new geometry, zero-filled.
    pub fn resize(&mut self, width: usize, height: usize, depth: usize) {
        if self.data.dim() != (height, width, depth) {
            self.data = Array3::zeros((height, width, depth));
        } else {
            self.fill(T::zero());
        }
    }
}

impl<T: Clone> Image<T> {
    /// Image filled with a single value.
    pub fn from_elem(width: usize, height: usize, depth: usize, value: T) -> Self {
        Self {
            data: Array3::from_elem((height, width, depth), value),
        }
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn depth(&self) -> usize {
        self.data.dim().2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when `other` covers the same pixel grid (depth may differ).
    pub fn same_resolution<U: Clone>(&self, other: &Image<U>) -> bool {
        self.width() == other.width() && self.height() == other.height()
    }

    /// Flat offset of `(row, col, channel)` in row-major,
    /// channel-innermost order. Panics when out of range.
    pub fn flat_index(&self, row: usize, col: usize, channel: usize) -> usize {
        let (h, w, d) = self.data.dim();
        assert!(
            row < h && col < w && channel < d,
            "image index ({}, {}, {}) out of bounds for {}x{}x{}",
            row,
            col,
            channel,
            h,
            w,
            d
        );
        (row * w + col) * d + channel
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize, channel: usize) -> T {
        self.data[[row, col, channel]].clone()
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, channel: usize, value: T) {
        self.data[[row, col, channel]] = value;
    }

    #[inline]
    pub fn get_mut(&mut self, row: usize, col: usize, channel: usize) -> &mut T {
        &mut self.data[[row, col, channel]]
    }

    /// One pixel's channels as a contiguous view.
    #[inline]
    pub fn pixel(&self, row: usize, col: usize) -> ArrayView1<'_, T> {
        self.data.slice(s![row, col, ..])
    }

    #[inline]
    pub fn pixel_mut(&mut self, row: usize, col: usize) -> ArrayViewMut1<'_, T> {
        self.data.slice_mut(s![row, col, ..])
    }

    /// Channel view addressed by a [`PixelPosition`].
    #[inline]
    pub fn pixel_at(&self, position: PixelPosition) -> ArrayView1<'_, T> {
        self.pixel(position.row_index(), position.col_index())
    }

    #[inline]
    pub fn value_at(&self, position: PixelPosition, channel: usize) -> T {
        self.get(position.row_index(), position.col_index(), channel)
    }

    /// Iterate pixels in row-major order, yielding one fixed-stride channel
    /// view per pixel.
    pub fn pixels(&self) -> impl Iterator<Item = ArrayView1<'_, T>> {
        self.data.lanes(Axis(2)).into_iter()
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T: Copy + AddAssign> AddAssign<&Image<T>> for Image<T> {
    /// Element-wise accumulate. Panics on geometry mismatch.
    fn add_assign(&mut self, rhs: &Image<T>) {
        assert_eq!(
            self.data.dim(),
            rhs.data.dim(),
            "image accumulate requires identical geometry"
        );
        Zip::from(&mut self.data)
            .and(&rhs.data)
            .for_each(|a, &b| *a += b);
    }
}

impl<T: Copy + SubAssign> SubAssign<&Image<T>> for Image<T> {
    /// Element-wise subtract. Panics on geometry mismatch.
    fn sub_assign(&mut self, rhs: &Image<T>) {
        assert_eq!(
            self.data.dim(),
            rhs.data.dim(),
            "image subtract requires identical geometry"
        );
        Zip::from(&mut self.data)
            .and(&rhs.data)
            .for_each(|a, &b| *a -= b);
    }
}

/// One boolean per pixel, written with relaxed atomics.
///
/// Used as the shared "already denoised" marker: concurrent workers only
/// ever set bits, so a racing reader at worst misses a freshly set mark and
/// skips one skip-opportunity.
#[derive(Debug)]
pub struct FlagImage {
    width: usize,
    height: usize,
    flags: Vec<AtomicBool>,
}

impl FlagImage {
    pub fn new(width: usize, height: usize) -> Self {
        let mut flags = Vec::with_capacity(width * height);
        flags.resize_with(width * height, || AtomicBool::new(false));
        Self {
            width,
            height,
            flags,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn offset(&self, position: PixelPosition) -> usize {
        let row = position.row_index();
        let col = position.col_index();
        debug_assert!(row < self.height && col < self.width);
        row * self.width + col
    }

    #[inline]
    pub fn mark(&self, position: PixelPosition) {
        self.flags[self.offset(position)].store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_marked(&self, position: PixelPosition) -> bool {
        self.flags[self.offset(position)].load(Ordering::Relaxed)
    }

    pub fn marked_count(&self) -> usize {
        self.flags
            .iter()
            .filter(|f| f.load(Ordering::Relaxed))
            .count()
    }
}
