//! L9: column driver (spec.md §4.9).
//!
//! Maps requested output columns to the raw-measurement need-flags they
//! consume, and turns a pass-1/pass-2/pass-8 measurement set into final
//! column values — including the second-order morphology and magnitude
//! derivations and the batched WCS coordinate emission.

use ndarray::Array2;

use crate::error::CoreError;
use crate::measure::{NeedFlags, RawMeasurement, SigmaClipResult};
use crate::upperlimit::UpperLimitResult;
use crate::wcs::WcsTransform;

/// One requested output column (spec.md §3 "Column set").
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Identifier(IdentifierColumn),
    Area(AreaColumn),
    Center { axis: usize },
    WorldCoordinate { axis: usize },
    Brightness,
    BrightnessError,
    Magnitude { zeropoint: f64 },
    MagnitudeError,
    SignalToNoise,
    SemiMajorAxis,
    SemiMinorAxis,
    PositionAngle,
    /// Surface-brightness limit column (SPEC_FULL.md §C.3).
    SurfaceBrightnessLimit { nsigma: f64, area_pixels: f64, zeropoint: f64 },
    UpperLimitBrightness,
    UpperLimitSigmaClipped,
    SigmaClippedMedian,
    SigmaClippedMean,
    SigmaClippedStd,
    /// Number of spectrum-table rows (one per slice) built for this label's
    /// Pass 3 spectrum (spec.md §3 Column set, `spectrum-slice`). The table
    /// itself rides on `CatalogOutput::spectra`; this column is the
    /// pointer/summary value a flat row can carry.
    SpectrumSlice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierColumn {
    Label,
    HostObjectId,
    SubLabelWithinObject,
    NumSubLabels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaColumn {
    NumAll,
    Num,
    NumAllXy,
    NumXy,
    MinCoord { axis: usize },
    MaxCoord { axis: usize },
}

impl ColumnKind {
    /// The raw-measurement categories this column reads (spec.md §3
    /// invariant: "a raw-measurement slot is read by the column driver only
    /// if its need-flag is set by at least one requested column").
    pub fn need_flags(&self) -> NeedFlags {
        match self {
            ColumnKind::Identifier(_) => NeedFlags::empty(),
            ColumnKind::Area(_) => NeedFlags::AREA,
            ColumnKind::Center { .. } | ColumnKind::WorldCoordinate { .. } => NeedFlags::POSITION,
            ColumnKind::Brightness | ColumnKind::BrightnessError | ColumnKind::Magnitude { .. } | ColumnKind::MagnitudeError => {
                NeedFlags::BRIGHTNESS | NeedFlags::SKY
            }
            ColumnKind::SignalToNoise => NeedFlags::BRIGHTNESS | NeedFlags::SKY | NeedFlags::RIVER,
            ColumnKind::SemiMajorAxis | ColumnKind::SemiMinorAxis | ColumnKind::PositionAngle => {
                NeedFlags::SECOND_MOMENTS
            }
            ColumnKind::SurfaceBrightnessLimit { .. } => NeedFlags::SKY,
            ColumnKind::UpperLimitBrightness | ColumnKind::UpperLimitSigmaClipped => NeedFlags::UPPER_LIMIT,
            ColumnKind::SigmaClippedMedian | ColumnKind::SigmaClippedMean | ColumnKind::SigmaClippedStd => {
                NeedFlags::SIGMA_CLIP
            }
            ColumnKind::SpectrumSlice => NeedFlags::SPECTRUM,
        }
    }
}

/// Folds every requested column's need-flags into one bitset (spec.md
/// §4.9 "Before measurement").
pub fn required_flags(columns: &[ColumnKind]) -> NeedFlags {
    columns.iter().fold(NeedFlags::empty(), |acc, c| acc | c.need_flags())
}

/// One output row's context: its raw measurement plus whatever sibling
/// data the column set asked for.
#[derive(Debug, Clone)]
pub struct RowContext<'a> {
    pub label: i64,
    pub host_object_id: i64,
    pub sub_label_within_object: i64,
    pub num_sub_labels: i64,
    pub raw: &'a RawMeasurement,
    pub river_sum: f64,
    pub river_num: u64,
    pub sigma_clip: Option<&'a SigmaClipResult>,
    pub upper_limit: Option<&'a UpperLimitResult>,
    pub cps_corr: f64,
    pub sky_noise_per_pixel: f64,
    /// Row count of this label's Pass 3 spectrum table, 0 when the pass
    /// didn't run for this row (not 3-D, `--spectrum` unset, or a clump row).
    pub spectrum_slice_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Int(i64),
    Float(f64),
}

/// `cps_corr = min(1, minimum_sky_noise)` unless a caller-supplied override
/// is present (SPEC_FULL.md §C.2).
pub fn cps_correction(minimum_sky_noise: f64, override_value: Option<f64>) -> f64 {
    override_value.unwrap_or_else(|| minimum_sky_noise.min(1.0))
}

fn brightness(ctx: &RowContext) -> f64 {
    if ctx.river_num > 0 {
        let river_mean = ctx.river_sum / ctx.river_num as f64;
        ctx.raw.sum - river_mean * ctx.raw.num as f64
    } else {
        ctx.raw.sum
    }
}

fn brightness_variance(ctx: &RowContext) -> f64 {
    let mut var = ctx.raw.sum_var;
    if ctx.river_num > 0 {
        let river_mean = ctx.river_sum / ctx.river_num as f64;
        let river_var_per_pixel = river_mean.abs();
        var += river_var_per_pixel * (ctx.raw.num as f64 * ctx.raw.num as f64) / ctx.river_num as f64;
    }
    var
}

fn magnitude(sum: f64, zeropoint: f64) -> f64 {
    if sum > 0.0 {
        -2.5 * sum.log10() + zeropoint
    } else {
        f64::NAN
    }
}

/// Materializes every non-coordinate column for one row (spec.md §4.9
/// "After measurement"). World-coordinate columns are handled separately by
/// [`emit_world_coordinates`] since they batch across rows.
pub fn materialize_cell(kind: &ColumnKind, ctx: &RowContext) -> CellValue {
    match kind {
        ColumnKind::Identifier(IdentifierColumn::Label) => CellValue::Int(ctx.label),
        ColumnKind::Identifier(IdentifierColumn::HostObjectId) => CellValue::Int(ctx.host_object_id),
        ColumnKind::Identifier(IdentifierColumn::SubLabelWithinObject) => CellValue::Int(ctx.sub_label_within_object),
        ColumnKind::Identifier(IdentifierColumn::NumSubLabels) => CellValue::Int(ctx.num_sub_labels),

        ColumnKind::Area(AreaColumn::NumAll) => CellValue::Int(ctx.raw.numall as i64),
        ColumnKind::Area(AreaColumn::Num) => CellValue::Int(ctx.raw.num as i64),
        ColumnKind::Area(AreaColumn::NumAllXy) => CellValue::Int(ctx.raw.numall_xy as i64),
        ColumnKind::Area(AreaColumn::NumXy) => CellValue::Int(ctx.raw.num_xy as i64),
        ColumnKind::Area(AreaColumn::MinCoord { axis }) => CellValue::Int(ctx.raw.min_coord[*axis] + 1),
        ColumnKind::Area(AreaColumn::MaxCoord { axis }) => CellValue::Int(ctx.raw.max_coord[*axis] + 1),

        ColumnKind::Center { axis } => CellValue::Float(ctx.raw.center(*axis) + 1.0),
        ColumnKind::WorldCoordinate { .. } => {
            CellValue::Float(f64::NAN) // filled in by emit_world_coordinates
        }

        ColumnKind::Brightness => CellValue::Float(brightness(ctx)),
        ColumnKind::BrightnessError => CellValue::Float(brightness_variance(ctx).sqrt()),
        ColumnKind::Magnitude { zeropoint } => CellValue::Float(magnitude(brightness(ctx), *zeropoint)),
        ColumnKind::MagnitudeError => {
            let sn = signal_to_noise(ctx);
            CellValue::Float(2.5 / (sn * std::f64::consts::LN_10))
        }
        ColumnKind::SignalToNoise => CellValue::Float(signal_to_noise(ctx)),

        ColumnKind::SemiMajorAxis => CellValue::Float(semi_axes(ctx).0),
        ColumnKind::SemiMinorAxis => CellValue::Float(semi_axes(ctx).1),
        ColumnKind::PositionAngle => CellValue::Float(position_angle(ctx)),

        ColumnKind::SurfaceBrightnessLimit { nsigma, area_pixels, zeropoint } => {
            let limit_sum = nsigma * ctx.sky_noise_per_pixel * area_pixels.sqrt();
            CellValue::Float(magnitude(limit_sum, *zeropoint))
        }

        ColumnKind::UpperLimitBrightness => {
            CellValue::Float(ctx.upper_limit.map(|u| u.upper_limit_brightness).unwrap_or(f64::NAN))
        }
        ColumnKind::UpperLimitSigmaClipped => {
            CellValue::Float(ctx.upper_limit.map(|u| u.sigma_clipped).unwrap_or(f64::NAN))
        }
        ColumnKind::SigmaClippedMedian => CellValue::Float(ctx.sigma_clip.map(|s| s.median).unwrap_or(f64::NAN)),
        ColumnKind::SigmaClippedMean => CellValue::Float(ctx.sigma_clip.map(|s| s.mean).unwrap_or(f64::NAN)),
        ColumnKind::SigmaClippedStd => CellValue::Float(ctx.sigma_clip.map(|s| s.std).unwrap_or(f64::NAN)),
        ColumnKind::SpectrumSlice => CellValue::Int(ctx.spectrum_slice_count),
    }
}

/// S/N = `sqrt(1/cps_corr) · (I − O) / sqrt(brightness_variance)` (spec.md
/// §4.9), `I` the object's mean value and `O` the mean river value (0 when
/// there are no rivers).
fn signal_to_noise(ctx: &RowContext) -> f64 {
    if ctx.raw.num == 0 {
        return f64::NAN;
    }
    let mean_in = ctx.raw.sum / ctx.raw.num as f64;
    let mean_river = if ctx.river_num > 0 { ctx.river_sum / ctx.river_num as f64 } else { 0.0 };
    (1.0 / ctx.cps_corr).sqrt() * (mean_in - mean_river) / brightness_variance(ctx).sqrt()
}

/// Semi-major/minor axes from the shifted second moments (spec.md §4.9).
fn semi_axes(ctx: &RowContext) -> (f64, f64) {
    let (xx, yy, xy) = ctx.raw.central_second_moments();
    let mean = (xx + yy) / 2.0;
    let disc = (((xx - yy) / 2.0).powi(2) + xy * xy).sqrt();
    ((mean + disc).sqrt(), (mean - disc).sqrt())
}

fn position_angle(ctx: &RowContext) -> f64 {
    let (xx, yy, xy) = ctx.raw.central_second_moments();
    0.5 * (2.0 * xy).atan2(xx - yy) * 180.0 / std::f64::consts::PI
}

/// Batches every row's staged `(x, y[, z])` coordinates through a single
/// WCS call (spec.md §4.9: "stage all per-row (X,Y[,Z]) values in a single
/// vector, then call the external WCS transform in one batched invocation
/// per column group").
pub fn emit_world_coordinates(
    wcs: &dyn WcsTransform,
    staged_xy: &[(f64, f64)],
) -> Result<Vec<(f64, f64)>, CoreError> {
    let n = staged_xy.len();
    let mut pixels = Array2::<f64>::zeros((n, 2));
    for (i, &(x, y)) in staged_xy.iter().enumerate() {
        pixels[[i, 0]] = x;
        pixels[[i, 1]] = y;
    }
    let world = wcs.img_to_world(&pixels)?;
    Ok((0..n).map(|i| (world[[i, 0]], world[[i, 1]])).collect())
}

/// Sub-label output sorting: `(host_object_id asc, sub_label_within_object
/// asc)`, unless the caller requests unsorted output (spec.md §4.9 "Output
/// sorting").
pub fn sort_permutation(rows: &[(i64, i64)], sorted: bool) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..rows.len()).collect();
    if sorted {
        idx.sort_by_key(|&i| rows[i]);
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::ExtremumWithPosition;
    use crate::wcs::AffineTangentWcs;
    use crate::geometry::SkyPoint;

    fn raw_with_flux() -> RawMeasurement {
        let mut m = RawMeasurement::new();
        m.num = 9;
        m.numall = 9;
        m.sum = 90.0;
        m.sum_var = 9.0;
        m.sumwht = 90.0;
        m.v_axis = [450.0, 450.0, 0.0];
        m.min_val = ExtremumWithPosition { value: 8.0, position: [0, 0, 0] };
        m.max_val = ExtremumWithPosition { value: 12.0, position: [0, 0, 0] };
        m.min_coord = [0, 0, 0];
        m.max_coord = [8, 8, 0];
        m.shift = [5.0, 5.0, 0.0];
        m.vxx = 900.0;
        m.vyy = 900.0;
        m.vxy = 0.0;
        m
    }

    fn ctx(raw: &RawMeasurement) -> RowContext {
        RowContext {
            label: 1,
            host_object_id: 1,
            sub_label_within_object: 0,
            num_sub_labels: 0,
            raw,
            river_sum: 0.0,
            river_num: 0,
            sigma_clip: None,
            upper_limit: None,
            cps_corr: 1.0,
            sky_noise_per_pixel: 0.1,
            spectrum_slice_count: 0,
        }
    }

    #[test]
    fn required_flags_union_multiple_columns() {
        let cols = vec![ColumnKind::Area(AreaColumn::Num), ColumnKind::Brightness];
        let flags = required_flags(&cols);
        assert!(flags.contains(NeedFlags::AREA));
        assert!(flags.contains(NeedFlags::BRIGHTNESS));
    }

    #[test]
    fn brightness_with_no_rivers_is_the_raw_sum() {
        let raw = raw_with_flux();
        let c = ctx(&raw);
        assert_eq!(brightness(&c), 90.0);
    }

    #[test]
    fn magnitude_is_nan_for_nonpositive_brightness() {
        assert!(magnitude(-5.0, 25.0).is_nan());
        assert!(magnitude(0.0, 25.0).is_nan());
        assert!(magnitude(100.0, 25.0).is_finite());
    }

    #[test]
    fn cps_corr_prefers_override_over_derived_value() {
        assert_eq!(cps_correction(0.3, Some(0.9)), 0.9);
        assert_eq!(cps_correction(0.3, None), 0.3);
        assert_eq!(cps_correction(2.0, None), 1.0);
    }

    #[test]
    fn world_coordinates_batch_through_a_single_call() {
        let wcs = AffineTangentWcs::new((0.0, 0.0), SkyPoint { ra_deg: 10.0, dec_deg: 0.0 }, 1.0 / 3600.0);
        let staged = vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let world = emit_world_coordinates(&wcs, &staged).unwrap();
        assert_eq!(world.len(), 3);
        assert!((world[0].0 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sort_permutation_orders_by_host_then_sub_label() {
        let rows = vec![(2, 1), (1, 2), (1, 1)];
        let perm = sort_permutation(&rows, true);
        let ordered: Vec<_> = perm.iter().map(|&i| rows[i]).collect();
        assert_eq!(ordered, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn sort_permutation_is_identity_when_unsorted_requested() {
        let rows = vec![(2, 1), (1, 2), (1, 1)];
        let perm = sort_permutation(&rows, false);
        assert_eq!(perm, vec![0, 1, 2]);
    }
}
