//! L1: pixel array + tile view (spec.md §4.1).
//!
//! A [`Tile`] is pure geometry — an origin, per-axis extents, and the
//! parent's shape — so the same tile can drive a lock-step walk over several
//! co-shaped companion arrays (values, labels, sub-labels, per-pixel sky,
//! per-pixel sky-noise, optional mask) without re-deriving offsets for each
//! one. This mirrors how the teacher's `wcs.rs` treats an `ndarray::Array`
//! as the vehicle for batched coordinate math rather than looping
//! pixel-by-pixel: here the "batch" is a run of contiguous linear indices.

use crate::error::ContractError;

/// Element type tag for a [`PixelArray`], needed because the cropper must
/// accept any of the element types spec.md §3 lists without promoting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

/// Capability spec.md §9's "Design Notes" asks for instead of per-type
/// branches: a pixel element knows its own blank sentinel comparison.
pub trait PixelElement: Copy + Default + PartialEq + 'static {
    const ELEMENT_TYPE: ElementType;

    fn is_blank(self, blank: Option<Self>) -> bool;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_pixel_element_int {
    ($t:ty, $variant:ident) => {
        impl PixelElement for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn is_blank(self, blank: Option<Self>) -> bool {
                matches!(blank, Some(b) if b == self)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

macro_rules! impl_pixel_element_float {
    ($t:ty, $variant:ident) => {
        impl PixelElement for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn is_blank(self, blank: Option<Self>) -> bool {
                self.is_nan() || matches!(blank, Some(b) if b == self)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

impl_pixel_element_int!(i8, I8);
impl_pixel_element_int!(u8, U8);
impl_pixel_element_int!(i16, I16);
impl_pixel_element_int!(u16, U16);
impl_pixel_element_int!(i32, I32);
impl_pixel_element_int!(u32, U32);
impl_pixel_element_int!(i64, I64);
impl_pixel_element_int!(u64, U64);
impl_pixel_element_float!(f32, F32);
impl_pixel_element_float!(f64, F64);

/// A non-owning rectangular subview of a parent array's index space.
///
/// Invariant: the tile lies wholly inside `parent_shape` (checked at
/// construction, never re-checked afterwards — callers are trusted to not
/// mutate the shape underneath a live tile, since arrays are immutable for
/// the life of a measurement pass per spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    origin: Vec<usize>,
    extents: Vec<usize>,
    parent_shape: Vec<usize>,
}

impl Tile {
    /// `subview(array, origin, extents) -> tile`, requiring
    /// `origin[d] + extents[d] <= shape[d]` for every axis (spec.md §4.1).
    pub fn subview(
        parent_shape: &[usize],
        origin: &[usize],
        extents: &[usize],
    ) -> Result<Tile, ContractError> {
        if parent_shape.len() != origin.len() || parent_shape.len() != extents.len() {
            return Err(ContractError::ShapeMismatch {
                expected: parent_shape.to_vec(),
                got: origin.to_vec(),
            });
        }
        for d in 0..parent_shape.len() {
            if origin[d] + extents[d] > parent_shape[d] {
                return Err(ContractError::Other(format!(
                    "tile axis {d} out of bounds: origin {} + extent {} > shape {}",
                    origin[d], extents[d], parent_shape[d]
                )));
            }
        }
        Ok(Tile {
            origin: origin.to_vec(),
            extents: extents.to_vec(),
            parent_shape: parent_shape.to_vec(),
        })
    }

    /// The whole-array tile: covers every pixel of `parent_shape`.
    pub fn whole(parent_shape: &[usize]) -> Tile {
        Tile {
            origin: vec![0; parent_shape.len()],
            extents: parent_shape.to_vec(),
            parent_shape: parent_shape.to_vec(),
        }
    }

    /// A zero-extent tile at the origin — the "degenerate tile" spec.md
    /// §4.2 uses for labels kept under the `keep_integer_ids` policy.
    pub fn degenerate(parent_shape: &[usize]) -> Tile {
        Tile {
            origin: vec![0; parent_shape.len()],
            extents: vec![0; parent_shape.len()],
            parent_shape: parent_shape.to_vec(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.extents.len()
    }
    pub fn origin(&self) -> &[usize] {
        &self.origin
    }
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }
    pub fn parent_shape(&self) -> &[usize] {
        &self.parent_shape
    }

    pub fn volume(&self) -> usize {
        self.extents.iter().product()
    }

    pub fn is_degenerate(&self) -> bool {
        self.extents.iter().any(|&e| e == 0)
    }

    /// Row-major strides of the *parent* array (dimension 0 slowest, per
    /// spec.md §3's FITS C-indexing convention).
    fn parent_strides(&self) -> Vec<usize> {
        let n = self.parent_shape.len();
        let mut strides = vec![1usize; n];
        for d in (0..n.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.parent_shape[d + 1];
        }
        strides
    }

    /// Linear index, in the parent array's storage, of the tile's first
    /// element.
    pub fn origin_linear_index(&self) -> usize {
        let strides = self.parent_strides();
        self.origin
            .iter()
            .zip(strides.iter())
            .map(|(o, s)| o * s)
            .sum()
    }

    /// Number of contiguous runs in this tile (one per combination of all
    /// but the fastest axis).
    pub fn num_runs(&self) -> usize {
        if self.is_degenerate() {
            return 0;
        }
        self.extents[..self.extents.len() - 1]
            .iter()
            .product::<usize>()
            .max(1)
    }

    /// Length, in elements, of each contiguous run (the fastest-axis
    /// extent).
    pub fn run_length(&self) -> usize {
        *self.extents.last().unwrap_or(&0)
    }

    /// Linear start index, in the parent array's storage, of run number
    /// `run_number` (0-based, row-major over all but the fastest axis).
    fn run_start(&self, run_number: usize, strides: &[usize]) -> usize {
        let ndim = self.ndim();
        let mut rem = run_number;
        let mut coord = vec![0usize; ndim.saturating_sub(1)];
        for d in (0..ndim.saturating_sub(1)).rev() {
            let extent = self.extents[d];
            coord[d] = rem % extent;
            rem /= extent;
        }
        let mut start = if ndim == 0 {
            0
        } else {
            self.origin[ndim - 1] * strides[ndim - 1]
        };
        for d in 0..ndim.saturating_sub(1) {
            start += (self.origin[d] + coord[d]) * strides[d];
        }
        start
    }

    /// `increment_between_runs(tile, parent_shape, run_number)`: the
    /// linear-index delta from the start of run `run_number` to the start
    /// of run `run_number + 1`, expressed via parent strides (spec.md
    /// §4.1). Consumers walking companion arrays in lock-step advance their
    /// own pointers by this amount between runs instead of re-indexing.
    pub fn increment_between_runs(&self, run_number: usize) -> usize {
        if run_number + 1 >= self.num_runs() {
            return 0;
        }
        let strides = self.parent_strides();
        self.run_start(run_number + 1, &strides) - self.run_start(run_number, &strides)
    }

    /// Iterate the tile's contiguous runs in row-major order: each item is
    /// `(start_linear_index, run_length)` (spec.md §4.1).
    pub fn iter_runs(&self) -> RunIter<'_> {
        RunIter {
            tile: self,
            strides: self.parent_strides(),
            next_run: 0,
            total_runs: self.num_runs(),
        }
    }
}

pub struct RunIter<'a> {
    tile: &'a Tile,
    strides: Vec<usize>,
    next_run: usize,
    total_runs: usize,
}

impl<'a> Iterator for RunIter<'a> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_run >= self.total_runs {
            return None;
        }
        let start = self.tile.run_start(self.next_run, &self.strides);
        let run_len = self.tile.run_length();
        self.next_run += 1;
        Some((start, run_len))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_runs - self.next_run;
        (remaining, Some(remaining))
    }
}

/// N-D dense pixel array, immutable for the life of a measurement pass
/// (spec.md §3).
#[derive(Debug, Clone)]
pub struct PixelArray<T: PixelElement> {
    shape: Vec<usize>,
    data: Vec<T>,
    blank: Option<T>,
}

impl<T: PixelElement> PixelArray<T> {
    pub fn from_vec(shape: Vec<usize>, data: Vec<T>, blank: Option<T>) -> Result<Self, ContractError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ContractError::Other(format!(
                "data length {} does not match shape {:?} (expected {})",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(PixelArray { shape, data, blank })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let n: usize = shape.iter().product();
        PixelArray {
            shape,
            data: vec![T::default(); n],
            blank: None,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
    pub fn blank(&self) -> Option<T> {
        self.blank
    }
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
    pub fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    pub fn whole_tile(&self) -> Tile {
        Tile::whole(&self.shape)
    }

    pub fn subview(&self, origin: &[usize], extents: &[usize]) -> Result<Tile, ContractError> {
        Tile::subview(&self.shape, origin, extents)
    }

    /// Convert a per-axis coordinate to the storage-order linear index.
    pub fn linear_index(&self, coord: &[usize]) -> usize {
        let n = self.shape.len();
        let mut strides = vec![1usize; n];
        for d in (0..n.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.shape[d + 1];
        }
        coord.iter().zip(strides.iter()).map(|(c, s)| c * s).sum()
    }

    /// Inverse of [`PixelArray::linear_index`].
    pub fn coord_of(&self, mut linear: usize) -> Vec<usize> {
        let n = self.shape.len();
        let mut strides = vec![1usize; n];
        for d in (0..n.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.shape[d + 1];
        }
        let mut coord = vec![0usize; n];
        for d in 0..n {
            coord[d] = linear / strides[d];
            linear %= strides[d];
        }
        coord
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subview_rejects_out_of_bounds() {
        let err = Tile::subview(&[10, 10], &[5, 5], &[10, 1]).unwrap_err();
        assert!(matches!(err, ContractError::Other(_)));
    }

    #[test]
    fn whole_tile_runs_are_one_contiguous_block() {
        let t = Tile::whole(&[4, 5]);
        let runs: Vec<_> = t.iter_runs().collect();
        assert_eq!(runs.len(), 4);
        for (i, (start, len)) in runs.iter().enumerate() {
            assert_eq!(*start, i * 5);
            assert_eq!(*len, 5);
        }
    }

    #[test]
    fn subview_runs_match_manual_indices() {
        // 2-D parent 10x10, take rows 2..5, cols 3..6 (3x3 tile).
        let shape = [10usize, 10usize];
        let tile = Tile::subview(&shape, &[2, 3], &[3, 3]).unwrap();
        let runs: Vec<_> = tile.iter_runs().collect();
        assert_eq!(runs.len(), 3);
        let expected_starts = [2 * 10 + 3, 3 * 10 + 3, 4 * 10 + 3];
        for (got, expected) in runs.iter().zip(expected_starts.iter()) {
            assert_eq!(got.0, *expected);
            assert_eq!(got.1, 3);
        }
    }

    #[test]
    fn iter_runs_visits_every_pixel_exactly_once() {
        let shape = [6usize, 7usize, 5usize];
        let tile = Tile::subview(&shape, &[1, 2, 0], &[3, 4, 5]).unwrap();
        let mut visited = std::collections::HashSet::new();
        for (start, len) in tile.iter_runs() {
            for k in 0..len {
                assert!(visited.insert(start + k), "pixel visited twice");
            }
        }
        assert_eq!(visited.len(), tile.volume());
    }

    #[test]
    fn increment_between_runs_matches_consecutive_starts() {
        let shape = [6usize, 7usize, 5usize];
        let tile = Tile::subview(&shape, &[1, 2, 0], &[3, 4, 5]).unwrap();
        let starts: Vec<_> = tile.iter_runs().map(|(s, _)| s).collect();
        for i in 0..starts.len() - 1 {
            assert_eq!(tile.increment_between_runs(i), starts[i + 1] - starts[i]);
        }
        assert_eq!(tile.increment_between_runs(starts.len() - 1), 0);
    }

    #[test]
    fn pixel_array_round_trips_linear_index() {
        let arr = PixelArray::<f32>::zeros(vec![3, 4, 5]);
        for lin in 0..60 {
            let coord = arr.coord_of(lin);
            assert_eq!(arr.linear_index(&coord), lin);
        }
    }

    #[test]
    fn blank_sentinel_semantics() {
        assert!(f32::NAN.is_blank(None));
        assert!(!0.0f32.is_blank(None));
        assert!((-999i32).is_blank(Some(-999)));
        assert!(!(-998i32).is_blank(Some(-999)));
    }
}
