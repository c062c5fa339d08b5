//! CatalogBuilder: the user-visible pipeline spec.md §2 calls "thin glue
//! over L1,L2,L5,L7,L8,L9" — builds the label index, dispatches the
//! per-label measurement passes across the worker pool, samples upper
//! limits, and materializes the requested output columns.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::array::{PixelArray, PixelElement, Tile};
use crate::columns::{
    self, required_flags, CellValue, ColumnKind, RowContext,
};
use crate::dispatch::{self, WorkerScratch};
use crate::error::{ContractError, CoreError};
use crate::labelindex::{build_label_index, EmptyLabelPolicy, RelabelTable};
use crate::measure::{
    accumulate_label, build_spectrum, collect_finite_values, sigma_clip, AccumulateOptions, NeedFlags,
    RawMeasurement, SigmaClipMode, SigmaClipParams, SigmaClipResult, SkyField, SpectrumRow,
};
use crate::upperlimit::{label_seed, sample_label, UpperLimitParams, UpperLimitResult};
use crate::wcs::WcsTransform;

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub clumps: bool,
    pub no_clump_sort: bool,
    pub zeropoint: f64,
    pub sigma_clip_nsigma: f64,
    pub sigma_clip_tolerance: f64,
    pub upper_limit: Option<UpperLimitParams>,
    pub subtract_sky: bool,
    pub variance_is_given: bool,
    pub spectrum: bool,
    /// §4.2's `keep_integer_ids` policy, restored as `--inbetweenints`
    /// (SPEC_FULL.md §C.1): emit a padded row for a label with zero pixels.
    pub in_between_ints: bool,
    pub surface_brightness_nsigma: f64,
    pub surface_brightness_area_pixels: f64,
    /// SPEC_FULL.md §C.2: override for `cps_corr` instead of deriving it
    /// from the minimum sky noise.
    pub cps_corr_override: Option<f64>,
    pub master_seed: u64,
    pub columns: Vec<ColumnKind>,
}

pub struct CatalogInputs<'a, V: PixelElement> {
    pub values: &'a PixelArray<V>,
    pub labels: &'a PixelArray<i32>,
    pub sub_labels: Option<&'a PixelArray<i32>>,
    pub sky: Option<&'a SkyField>,
    pub sky_noise: Option<&'a SkyField>,
    pub mask: Option<&'a PixelArray<i32>>,
    pub wcs: Option<&'a dyn WcsTransform>,
    /// One world-coordinate value per slice of a 3-D cube, indexed by
    /// absolute slice number (spec.md §4.9: "Slice WCS is computed once at
    /// pipeline start ... shared across labels"). The core's
    /// [`WcsTransform`] contract only models the two spatial axes, so
    /// deriving a cube's spectral axis coordinates is left to the caller;
    /// `None` or a short slice yields `NaN` slice coordinates (spec.md §3's
    /// `Spectrum` row still carries slice_index either way).
    pub slice_wcs: Option<&'a [f64]>,
}

#[derive(Debug, Clone)]
pub struct CatalogRow {
    pub label: i64,
    pub host_object_id: i64,
    pub sub_label_within_object: i64,
    pub cells: Vec<CellValue>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogOutput {
    pub object_rows: Vec<CatalogRow>,
    pub clump_rows: Vec<CatalogRow>,
    /// Per-object spectrum tables (spec.md §4.7 Pass 3), present only when
    /// `CatalogOptions::spectrum` is set and the input is 3-D. Sorted by
    /// label.
    pub spectra: Vec<(i64, Vec<SpectrumRow>)>,
}

struct LabelMeasurement {
    object: RawMeasurement,
    clumps: Vec<RawMeasurement>,
}

/// Runs the full catalog-building pipeline over one values/labels pair
/// (spec.md §2, §4.7–§4.9).
pub fn build_catalog<V: PixelElement>(
    inputs: &CatalogInputs<V>,
    options: &CatalogOptions,
) -> Result<CatalogOutput, CoreError> {
    let policy = if options.in_between_ints { EmptyLabelPolicy::KeepIntegerIds } else { EmptyLabelPolicy::Drop };
    let index = build_label_index(inputs.labels, policy, None)?;

    let relabel = if options.clumps {
        inputs.sub_labels.map(|subs| RelabelTable::build(inputs.labels, subs))
    } else {
        None
    };

    let need = required_flags(&options.columns);
    info!(labels = index.len(), need = ?need, "starting measurement pass");

    let labels: Vec<i64> = index.tiles_in_index_order().map(|(l, _)| l).collect();
    let num_workers = dispatch::default_pool_size();

    let accumulate_opts = AccumulateOptions { zero_is_not_blank: false, variance_is_given: options.variance_is_given };

    let (mut results, err) = dispatch::dispatch(&labels, num_workers, |label, _scratch: &mut WorkerScratch| {
        let tile = index.tile(label).ok_or_else(|| {
            CoreError::Internal(crate::error::InternalError {
                message: "label missing from index during dispatch".into(),
                label: Some(label),
            })
        })?;

        let num_sub = relabel.as_ref().map(|r| r.count_for(label) as usize).unwrap_or(0);
        let compact = |sv: i64| relabel.as_ref().and_then(|r| r.compact(label, sv)).map(|c| c as usize - 1);

        let (object, clumps) = accumulate_label(
            inputs.values,
            inputs.labels,
            if options.clumps { inputs.sub_labels } else { None },
            inputs.sky,
            inputs.sky_noise,
            tile,
            label,
            need,
            num_sub,
            compact,
            &accumulate_opts,
        );

        Ok(LabelMeasurement { object, clumps })
    });

    if let Some(e) = err {
        return Err(e);
    }
    results.sort_by_key(|(l, _)| *l);

    let sigma_clip_results: HashMap<i64, SigmaClipResult> = if need.contains(NeedFlags::SIGMA_CLIP) || need.contains(NeedFlags::MEDIAN) {
        debug!("running order-statistics pass");
        results
            .iter()
            .map(|(label, _)| {
                let tile = index.tile(*label).expect("label present in index");
                let mut values = collect_finite_values(inputs.values, inputs.labels, tile, *label);
                let clip = sigma_clip(
                    &values,
                    &SigmaClipParams { nsigma: options.sigma_clip_nsigma, mode: SigmaClipMode::Tolerance(options.sigma_clip_tolerance) },
                );
                values.clear();
                (*label, clip)
            })
            .collect()
    } else {
        HashMap::new()
    };

    let upper_limit_results: HashMap<i64, UpperLimitResult> = if let Some(params) = &options.upper_limit {
        if need.contains(NeedFlags::UPPER_LIMIT) {
            debug!("running upper-limit sampler pass");
            if params.num_samples < 20 {
                return Err(ContractError::TooFewSamples(params.num_samples as usize).into());
            }
            results
                .iter()
                .map(|(label, m)| {
                    let tile = index.tile(*label).expect("label present in index");
                    let seed = label_seed(options.master_seed, *label as u64);
                    let (result, _debug) = sample_label(
                        inputs.values,
                        inputs.labels,
                        inputs.mask,
                        tile,
                        *label,
                        m.object.sum,
                        seed,
                        params,
                        false,
                    );
                    (*label, result)
                })
                .collect()
        } else {
            HashMap::new()
        }
    } else {
        HashMap::new()
    };

    let spectra: HashMap<i64, Vec<SpectrumRow>> = if options.spectrum && inputs.values.ndim() == 3 {
        if need.contains(NeedFlags::SPECTRUM) {
            debug!("running spectrum pass");
            let slice_wcs = inputs.slice_wcs.unwrap_or(&[]);
            let (mut rows, err) =
                dispatch::dispatch(&labels, num_workers, |label, scratch: &mut WorkerScratch| {
                    let tile = index.tile(label).ok_or_else(|| {
                        CoreError::Internal(crate::error::InternalError {
                            message: "label missing from index during dispatch".into(),
                            label: Some(label),
                        })
                    })?;
                    Ok(build_spectrum(
                        inputs.values,
                        inputs.labels,
                        inputs.sky_noise,
                        tile,
                        label,
                        slice_wcs,
                        options.variance_is_given,
                        &mut scratch.spectrum_buffer,
                    ))
                });
            if let Some(e) = err {
                return Err(e);
            }
            rows.sort_by_key(|(l, _)| *l);
            rows.into_iter().collect()
        } else {
            HashMap::new()
        }
    } else {
        HashMap::new()
    };

    let minimum_sky_noise = inputs
        .sky_noise
        .map(|f| f.value_at(&[0; 3][..inputs.values.ndim()]))
        .unwrap_or(1.0);
    let cps_corr = columns::cps_correction(minimum_sky_noise, options.cps_corr_override);

    let mut object_rows = Vec::with_capacity(results.len());
    let mut clump_rows = Vec::new();
    let mut staged_centers: Vec<(f64, f64)> = Vec::new();
    let mut center_column_axes: Vec<usize> = Vec::new();

    for kind in &options.columns {
        if let ColumnKind::WorldCoordinate { axis } = kind {
            center_column_axes.push(*axis);
        }
    }

    for (label, m) in &results {
        let ctx = RowContext {
            label: *label,
            host_object_id: *label,
            sub_label_within_object: 0,
            num_sub_labels: m.clumps.len() as i64,
            raw: &m.object,
            river_sum: 0.0,
            river_num: 0,
            sigma_clip: sigma_clip_results.get(label),
            upper_limit: upper_limit_results.get(label),
            cps_corr,
            sky_noise_per_pixel: minimum_sky_noise,
            spectrum_slice_count: spectra.get(label).map(|rows| rows.len() as i64).unwrap_or(0),
        };
        let cells: Vec<CellValue> = options.columns.iter().map(|k| columns::materialize_cell(k, &ctx)).collect();
        if !center_column_axes.is_empty() {
            // Staged as (x, y): axis 1 is the fastest-varying (column/RA)
            // axis, axis 0 the slowest (row/Dec), per spec.md §3's FITS
            // C-indexing convention.
            staged_centers.push((m.object.center(1) + 1.0, m.object.center(0) + 1.0));
        }
        object_rows.push(CatalogRow { label: *label, host_object_id: *label, sub_label_within_object: 0, cells });

        if options.clumps {
            for (i, clump) in m.clumps.iter().enumerate() {
                let clump_ctx = RowContext {
                    label: *label,
                    host_object_id: *label,
                    sub_label_within_object: (i + 1) as i64,
                    num_sub_labels: m.clumps.len() as i64,
                    raw: clump,
                    river_sum: clump.river_sum,
                    river_num: clump.river_num,
                    sigma_clip: None,
                    upper_limit: None,
                    cps_corr,
                    sky_noise_per_pixel: minimum_sky_noise,
                    spectrum_slice_count: 0,
                };
                let clump_cells: Vec<CellValue> =
                    options.columns.iter().map(|k| columns::materialize_cell(k, &clump_ctx)).collect();
                clump_rows.push(CatalogRow {
                    label: *label,
                    host_object_id: *label,
                    sub_label_within_object: (i + 1) as i64,
                    cells: clump_cells,
                });
            }
        }
    }

    if let Some(wcs) = inputs.wcs {
        if !staged_centers.is_empty() {
            let world = columns::emit_world_coordinates(wcs, &staged_centers)?;
            for (col_idx, kind) in options.columns.iter().enumerate() {
                if let ColumnKind::WorldCoordinate { axis } = kind {
                    for (row, (ra, dec)) in object_rows.iter_mut().zip(world.iter()) {
                        row.cells[col_idx] = CellValue::Float(if *axis == 0 { *ra } else { *dec });
                    }
                }
            }
        }
    }

    if options.clumps && !options.no_clump_sort {
        let keys: Vec<(i64, i64)> = clump_rows.iter().map(|r| (r.host_object_id, r.sub_label_within_object)).collect();
        let perm = columns::sort_permutation(&keys, true);
        let sorted: Vec<CatalogRow> = perm.into_iter().map(|i| clump_rows[i].clone()).collect();
        clump_rows = sorted;
    }

    if options.master_seed == 0 {
        warn!("master_seed is 0; upper-limit PRNG streams are still reproducible but trivially guessable");
    }

    let mut spectra: Vec<(i64, Vec<SpectrumRow>)> = spectra.into_iter().collect();
    spectra.sort_by_key(|(l, _)| *l);

    Ok(CatalogOutput { object_rows, clump_rows, spectra })
}
