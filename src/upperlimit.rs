//! L8: upper-limit sampler (spec.md §4.8).
//!
//! For each label, place its footprint at random positions across the
//! image, discard placements that overlap another label/mask/blank pixel,
//! and summarize the accepted sums with the same iterative sigma-clip pass
//! 2 uses.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::array::{PixelArray, PixelElement, Tile};
use crate::measure::{sigma_clip, SigmaClipMode, SigmaClipParams};

/// Named PRNG family recorded in the output headers (spec.md §4.8 step 1:
/// "the seed and family are emitted to the output table headers").
pub const PRNG_FAMILY: &str = "ChaCha8";

#[derive(Debug, Clone, Copy)]
pub struct UpperLimitParams {
    pub num_samples: u32,
    pub placement_range: Option<Vec<usize>>,
    pub nsigma: f64,
    pub clip_nsigma: f64,
    pub clip_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpperLimitResult {
    pub sigma_clipped: f64,
    pub upper_limit_brightness: f64,
    pub own_sum_quantile: f64,
    pub skewness: f64,
    pub accepted: u32,
}

impl UpperLimitResult {
    fn nan(accepted: u32) -> Self {
        UpperLimitResult {
            sigma_clipped: f64::NAN,
            upper_limit_brightness: f64::NAN,
            own_sum_quantile: f64::NAN,
            skewness: f64::NAN,
            accepted,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugSample {
    pub first_pixel: Vec<usize>,
    /// `NaN` when the placement was rejected.
    pub sum: f64,
}

/// Per-label seed derivation (spec.md §4.8 step 1). Sub-labels use a
/// distinct stream keyed by the flattened id `num_objects + num_clumps *
/// object_id + sub_index` the caller computes; this function only folds
/// that key with the master seed.
pub fn label_seed(master_seed: u64, label_key: u64) -> u64 {
    master_seed ^ label_key.wrapping_mul(0x9E3779B97F4A7C15)
}

/// Base per-axis range `[lo, hi]` (inclusive) for a footprint's first pixel
/// (spec.md §4.8 step 2), optionally narrowed to a window of width `r[d]`
/// centered on the label's own first-pixel coordinate.
fn placement_range(
    image_shape: &[usize],
    tile_shape: &[usize],
    tile_origin: &[usize],
    restrict: Option<&[usize]>,
) -> Vec<(usize, usize)> {
    let ndim = image_shape.len();
    (0..ndim)
        .map(|d| {
            let base_hi = image_shape[d].saturating_sub(tile_shape[d]);
            match restrict {
                Some(r) if r[d] > 0 => {
                    let half = (r[d] / 2) as i64;
                    let mut lo = tile_origin[d] as i64 - half;
                    let mut hi = lo + r[d] as i64 - 1;
                    if lo < 0 {
                        hi -= lo;
                        lo = 0;
                    }
                    if hi > base_hi as i64 {
                        let overflow = hi - base_hi as i64;
                        lo = (lo - overflow).max(0);
                        hi = base_hi as i64;
                    }
                    (lo as usize, hi as usize)
                }
                _ => (0, base_hi),
            }
        })
        .collect()
}

/// Sums the values under a footprint placed with its first pixel at
/// `placement`, rejecting if any covered pixel is blank, masked, or
/// labeled with an object other than `label`. Sky (label 0) is valid
/// landing ground — only a *different* object rejects the placement
/// (spec.md §4.8 step 3c).
fn try_place<V: PixelElement>(
    values: &PixelArray<V>,
    labels: &PixelArray<i32>,
    mask: Option<&PixelArray<i32>>,
    tile_shape: &[usize],
    placement: &[usize],
    label: i64,
) -> Option<f64> {
    let placement_tile = Tile::subview(values.shape(), placement, tile_shape).ok()?;
    let mut sum = 0.0;
    for (run_start, run_len) in placement_tile.iter_runs() {
        for k in 0..run_len {
            let lin = run_start + k;
            let v = values.as_slice()[lin];
            if v.is_blank(values.blank()) {
                return None;
            }
            let l = labels.as_slice()[lin] as i64;
            if l != 0 && l != label {
                return None;
            }
            if let Some(m) = mask {
                if m.as_slice()[lin] != 0 {
                    return None;
                }
            }
            sum += v.to_f64();
        }
    }
    Some(sum)
}

/// Runs the per-label random-placement loop (spec.md §4.8).
pub fn sample_label<V: PixelElement>(
    values: &PixelArray<V>,
    labels: &PixelArray<i32>,
    mask: Option<&PixelArray<i32>>,
    tile: &Tile,
    label: i64,
    own_sum: f64,
    seed: u64,
    params: &UpperLimitParams,
    record_debug: bool,
) -> (UpperLimitResult, Option<Vec<DebugSample>>) {
    let n = params.num_samples.max(20);
    let max_failures = n as u64 * 10;

    let range = placement_range(
        values.shape(),
        tile.extents(),
        tile.origin(),
        params.placement_range.as_deref(),
    );

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut accepted_sums: Vec<f64> = Vec::with_capacity(n as usize);
    let mut debug = if record_debug { Some(Vec::new()) } else { None };
    let mut failures = 0u64;

    while accepted_sums.len() < n as usize && failures < max_failures {
        let placement: Vec<usize> = range.iter().map(|&(lo, hi)| rng.gen_range(lo..=hi)).collect();
        let sum = try_place(values, labels, mask, tile.extents(), &placement, label);
        match sum {
            Some(s) => {
                accepted_sums.push(s);
                if let Some(d) = debug.as_mut() {
                    d.push(DebugSample { first_pixel: placement, sum: s });
                }
            }
            None => {
                failures += 1;
                if let Some(d) = debug.as_mut() {
                    d.push(DebugSample { first_pixel: placement, sum: f64::NAN });
                }
            }
        }
    }

    if accepted_sums.len() < n as usize {
        return (UpperLimitResult::nan(accepted_sums.len() as u32), debug);
    }

    let clip = sigma_clip(
        &accepted_sums,
        &SigmaClipParams { nsigma: params.clip_nsigma, mode: SigmaClipMode::Tolerance(params.clip_tolerance) },
    );

    let mut sorted = accepted_sums.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite values only"));
    let rank = sorted.partition_point(|&v| v <= own_sum);
    let quantile = rank as f64 / sorted.len() as f64;

    let skewness = if clip.std > 0.0 { (clip.mean - clip.median) / clip.std } else { f64::NAN };

    let result = UpperLimitResult {
        sigma_clipped: clip.std,
        upper_limit_brightness: params.nsigma * clip.std,
        own_sum_quantile: quantile,
        skewness,
        accepted: accepted_sums.len() as u32,
    };
    (result, debug)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_field(shape: Vec<usize>, label_region: (usize, usize, usize, usize), label: i32) -> (PixelArray<i32>, PixelArray<f32>) {
        let n: usize = shape.iter().product();
        let mut labels = vec![0i32; n];
        let mut values = vec![1.0f32; n];
        let (y0, y1, x0, x1) = label_region;
        let w = shape[1];
        for y in y0..y1 {
            for x in x0..x1 {
                labels[y * w + x] = label;
                values[y * w + x] = 2.0;
            }
        }
        (
            PixelArray::from_vec(shape.clone(), labels, Some(0)).unwrap(),
            PixelArray::from_vec(shape, values, None).unwrap(),
        )
    }

    #[test]
    fn enough_open_space_yields_full_sample_count() {
        // 50x50 image, single 3x3 label near center, surrounded by open sky
        // (label 0): plenty of room to place the footprint elsewhere without
        // overlapping the label itself, a foreign object, or the mask. Sky
        // is valid landing ground (spec.md §4.8 step 3c), so this should
        // accept every sample.
        let (labels, values) = uniform_field(vec![50, 50], (20, 23, 20, 23), 1);
        let tile = Tile::subview(&[50, 50], &[20, 20], &[3, 3]).unwrap();
        let params = UpperLimitParams {
            num_samples: 20,
            placement_range: None,
            nsigma: 3.0,
            clip_nsigma: 3.0,
            clip_tolerance: 0.01,
        };
        let (result, _) = sample_label(&values, &labels, None, &tile, 1, 18.0, 42, &params, false);
        assert_eq!(result.accepted, 20);
        assert!(result.sigma_clipped.is_finite());
    }

    #[test]
    fn placement_overlapping_a_foreign_object_is_rejected() {
        // 3x3 image, tile covers the whole image so there is exactly one
        // possible placement (the label's own position). The label's own
        // bounding box has a foreign-object corner (label 2), so even that
        // single placement is rejected every time: sky is valid ground, but
        // a different object always is not.
        let shape = vec![3, 3];
        let mut labels = vec![1i32; 9];
        labels[2] = 2; // (row 0, col 2) belongs to a different object.
        let values = vec![2.0f32; 9];
        let labels = PixelArray::from_vec(shape.clone(), labels, Some(0)).unwrap();
        let values = PixelArray::from_vec(shape, values, None).unwrap();
        let tile = Tile::subview(&[3, 3], &[0, 0], &[3, 3]).unwrap();
        let params = UpperLimitParams {
            num_samples: 20,
            placement_range: None,
            nsigma: 3.0,
            clip_nsigma: 3.0,
            clip_tolerance: 0.01,
        };
        let (result, _) = sample_label(&values, &labels, None, &tile, 1, 18.0, 5, &params, false);
        assert!(result.sigma_clipped.is_nan());
        assert_eq!(result.accepted, 0);
    }

    #[test]
    fn fully_labeled_image_accepts_every_placement() {
        // Entire image is label 1: every placement is accepted.
        let shape = vec![30, 30];
        let labels = PixelArray::<i32>::from_vec(shape.clone(), vec![1i32; 900], Some(0)).unwrap();
        let values = PixelArray::<f32>::from_vec(shape, vec![2.0f32; 900], None).unwrap();
        let tile = Tile::subview(&[30, 30], &[10, 10], &[3, 3]).unwrap();
        let params = UpperLimitParams {
            num_samples: 25,
            placement_range: None,
            nsigma: 3.0,
            clip_nsigma: 3.0,
            clip_tolerance: 0.01,
        };
        let (result, _) = sample_label(&values, &labels, None, &tile, 1, 18.0, 7, &params, false);
        assert_eq!(result.accepted, 25);
        assert!(result.sigma_clipped.is_finite());
        assert_eq!(result.upper_limit_brightness, params.nsigma * result.sigma_clipped);
    }

    #[test]
    fn debug_table_records_every_drawn_position() {
        let shape = vec![30, 30];
        let labels = PixelArray::<i32>::from_vec(shape.clone(), vec![1i32; 900], Some(0)).unwrap();
        let values = PixelArray::<f32>::from_vec(shape, vec![2.0f32; 900], None).unwrap();
        let tile = Tile::subview(&[30, 30], &[10, 10], &[3, 3]).unwrap();
        let params = UpperLimitParams {
            num_samples: 20,
            placement_range: None,
            nsigma: 3.0,
            clip_nsigma: 3.0,
            clip_tolerance: 0.01,
        };
        let (result, debug) = sample_label(&values, &labels, None, &tile, 1, 18.0, 3, &params, true);
        let debug = debug.unwrap();
        assert_eq!(debug.len() as u32, result.accepted);
        assert!(debug.iter().all(|d| d.sum.is_finite()));
    }

    #[test]
    fn placement_range_narrows_to_requested_window() {
        let range = placement_range(&[100, 100], &[3, 3], &[50, 50], Some(&[10, 10]));
        for (lo, hi) in range {
            assert!(hi - lo + 1 <= 10);
        }
    }
}
