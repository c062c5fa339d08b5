//! The raw-measurement vector and its need-flags (spec.md §3, §9).
//!
//! spec.md §9 asks for "a boolean-vector-of-fixed-width indexed by a named
//! enumeration of slots" in place of the source's bit-flag arrays indexed by
//! raw column codes. [`NeedFlags`] is that boolean vector, expressed as a
//! small set of named bits (one per accumulation category, not one per
//! individual float — a category is the unit of work pass 1 can skip).
//! [`RawMeasurement`] is the fixed-width accumulator itself, one per label,
//! with named `f64` fields rather than an index-addressed array: the fields
//! map 1:1 onto spec.md §3's slot list, and naming them directly is more
//! idiomatic than indexing a flat array by an enum discriminant once the
//! need-gating is factored out into `NeedFlags`.

use std::fmt;

bitflags::bitflags! {
    /// Which categories of slots at least one requested column needs
    /// (spec.md §3: "A raw-measurement slot is read by the column driver
    /// only if its need-flag is set by at least one requested column").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NeedFlags: u16 {
        const AREA            = 1 << 0;
        const POSITION        = 1 << 1;
        const BRIGHTNESS      = 1 << 2;
        const SKY             = 1 << 3;
        const SECOND_MOMENTS  = 1 << 4;
        const RIVER           = 1 << 5;
        const SIGMA_CLIP      = 1 << 6;
        const MEDIAN          = 1 << 7;
        const UPPER_LIMIT     = 1 << 8;
        const SPECTRUM        = 1 << 9;
    }
}

/// Running extremum with the position it occurred at, per axis (spec.md
/// §3: "value-min/max per axis with their positions").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtremumWithPosition {
    pub value: f64,
    pub position: [usize; 3],
}

impl ExtremumWithPosition {
    fn none(seed: f64) -> Self {
        ExtremumWithPosition { value: seed, position: [0; 3] }
    }
}

/// One label's raw-measurement vector (spec.md §3). Object and sub-label
/// rows share this shape; the column driver decides which fields are
/// meaningful for which kind of row.
#[derive(Debug, Clone)]
pub struct RawMeasurement {
    pub numall: u64,
    pub numall_xy: u64,
    pub num: u64,
    pub num_xy: u64,

    pub sum: f64,
    pub sum_sq: f64,
    pub sum_sky: f64,
    pub num_sky: u64,
    pub sum_var: f64,
    pub sum_value_plus_var: f64,

    pub numwht: u64,
    pub sumwht: f64,
    /// Weighted first moment per axis, `Σ v·coord[d]`.
    pub v_axis: [f64; 3],

    /// Shifted second moments (spec.md §9's "shift trick"); meaningful only
    /// when [`NeedFlags::SECOND_MOMENTS`] is set.
    pub vxx: f64,
    pub vyy: f64,
    pub vxy: f64,
    pub shift: [f64; 3],

    pub min_val: ExtremumWithPosition,
    pub max_val: ExtremumWithPosition,
    pub min_coord: [i64; 3],
    pub max_coord: [i64; 3],

    /// River-adjacency sums (clumps only): `Σ` over river-pixel neighbors.
    pub river_sum: f64,
    pub river_num: u64,
}

impl Default for RawMeasurement {
    fn default() -> Self {
        RawMeasurement {
            numall: 0,
            numall_xy: 0,
            num: 0,
            num_xy: 0,
            sum: 0.0,
            sum_sq: 0.0,
            sum_sky: 0.0,
            num_sky: 0,
            sum_var: 0.0,
            sum_value_plus_var: 0.0,
            numwht: 0,
            sumwht: 0.0,
            v_axis: [0.0; 3],
            vxx: 0.0,
            vyy: 0.0,
            vxy: 0.0,
            shift: [0.0; 3],
            min_val: ExtremumWithPosition::none(f64::INFINITY),
            max_val: ExtremumWithPosition::none(f64::NEG_INFINITY),
            min_coord: [i64::MAX; 3],
            max_coord: [i64::MIN; 3],
            river_sum: 0.0,
            river_num: 0,
        }
    }
}

impl RawMeasurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flux-weighted center along axis `d`, falling back to the geometric
    /// center when `sumwht == 0` (spec.md §4.9). Returns a 0-based pixel
    /// coordinate; callers add 1 for FITS output convention.
    pub fn center(&self, d: usize) -> f64 {
        if self.sumwht > 0.0 {
            self.v_axis[d] / self.sumwht
        } else if self.numall > 0 {
            // Geometric center has no running sum in the raw vector beyond
            // the coordinate extrema; approximate from the bounding tile
            // midpoint, which is exact for a rectangular footprint and the
            // conventional fallback for an irregular one.
            (self.min_coord[d] + self.max_coord[d]) as f64 / 2.0
        } else {
            f64::NAN
        }
    }

    /// Second-order morphology from the shifted moments (spec.md §4.9):
    /// `(xx, yy, xy)` each as `Σv(x−s)²/Σv − (x̄−s)²`.
    pub fn central_second_moments(&self) -> (f64, f64, f64) {
        if self.sumwht <= 0.0 {
            return (f64::NAN, f64::NAN, f64::NAN);
        }
        let xbar_shifted = self.v_axis[1] / self.sumwht - self.shift[1];
        let ybar_shifted = self.v_axis[0] / self.sumwht - self.shift[0];
        let xx = self.vxx / self.sumwht - xbar_shifted * xbar_shifted;
        let yy = self.vyy / self.sumwht - ybar_shifted * ybar_shifted;
        let xy = self.vxy / self.sumwht - xbar_shifted * ybar_shifted;
        (xx, yy, xy)
    }
}

impl fmt::Display for RawMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawMeasurement(numall={}, num={}, sum={})", self.numall, self.num, self.sum)
    }
}
