//! Pass 1 — per-label single-pass accumulation (spec.md §4.7).

use std::collections::HashSet;

use crate::array::{PixelArray, PixelElement, Tile};
use crate::measure::slots::{NeedFlags, RawMeasurement};
use crate::measure::sky::SkyField;

#[derive(Debug, Clone, Copy)]
pub struct AccumulateOptions {
    /// Treat `0.0` in float inputs as a real value rather than deferring to
    /// the type's usual blank test (spec.md §6 `zero_is_not_blank`). Our
    /// blank test is NaN-only for floats (`array.rs`'s `PixelElement`), so
    /// this flag is a no-op placeholder kept for interface parity with the
    /// CLI option; it matters once a caller registers `0.0` as a type's
    /// blank sentinel explicitly.
    pub zero_is_not_blank: bool,
    /// Whether the sky-noise dataset already stores variance rather than
    /// noise (needs squaring).
    pub variance_is_given: bool,
}

impl Default for AccumulateOptions {
    fn default() -> Self {
        AccumulateOptions { zero_is_not_blank: false, variance_is_given: false }
    }
}

fn coord_arr3(coord: &[usize]) -> [usize; 3] {
    let mut out = [0usize; 3];
    for d in 0..coord.len().min(3) {
        out[d] = coord[d];
    }
    out
}

/// `accumulate_label` walks `label`'s bounding tile once (spec.md §4.7) and
/// returns the object's raw measurement plus one entry per compact
/// sub-label (`compact_sub_label` maps a raw sub-label id, valid only where
/// the pixel's own label matches `label`, to a dense `0..num_sub_labels`
/// index — see [`crate::labelindex::RelabelTable`]).
pub fn accumulate_label<V: PixelElement>(
    values: &PixelArray<V>,
    labels: &PixelArray<i32>,
    sub_labels: Option<&PixelArray<i32>>,
    sky: Option<&SkyField>,
    sky_noise: Option<&SkyField>,
    tile: &Tile,
    label: i64,
    need: NeedFlags,
    num_sub_labels: usize,
    compact_sub_label: impl Fn(i64) -> Option<usize>,
    options: &AccumulateOptions,
) -> (RawMeasurement, Vec<RawMeasurement>) {
    let ndim = tile.ndim();
    let mut shift = [0.0f64; 3];
    for d in 0..ndim {
        shift[d] = tile.origin()[d] as f64 + 1.0;
    }

    let mut obj = RawMeasurement::new();
    obj.shift = shift;
    let mut clumps: Vec<RawMeasurement> = (0..num_sub_labels)
        .map(|_| {
            let mut c = RawMeasurement::new();
            c.shift = shift;
            c
        })
        .collect();

    let want_second_moments = need.contains(NeedFlags::SECOND_MOMENTS);
    let mut seen_xy: HashSet<usize> = HashSet::new();

    for (run_start, run_len) in tile.iter_runs() {
        let base_coord = values.coord_of(run_start);
        for k in 0..run_len {
            let lin = run_start + k;
            if labels.as_slice()[lin] as i64 != label {
                continue;
            }

            let mut coord = base_coord.clone();
            coord[ndim - 1] += k;

            obj.numall += 1;
            let first_seen_xy = if ndim <= 2 {
                true
            } else {
                seen_xy.insert(coord[1] * 1_000_000 + coord[2])
            };
            if first_seen_xy {
                obj.numall_xy += 1;
            }

            for d in 0..ndim {
                let c = coord[d] as i64;
                obj.min_coord[d] = obj.min_coord[d].min(c);
                obj.max_coord[d] = obj.max_coord[d].max(c);
            }

            let v = values.as_slice()[lin];
            let blank = v.is_blank(values.blank()) && !(options.zero_is_not_blank && v.to_f64() == 0.0);

            if !blank {
                let fv = v.to_f64();
                obj.num += 1;
                obj.sum += fv;
                obj.sum_sq += fv * fv;

                if fv < obj.min_val.value {
                    obj.min_val.value = fv;
                    obj.min_val.position = coord_arr3(&coord);
                }
                if fv > obj.max_val.value {
                    obj.max_val.value = fv;
                    obj.max_val.position = coord_arr3(&coord);
                }

                if fv > 0.0 {
                    obj.numwht += 1;
                    obj.sumwht += fv;
                    if first_seen_xy {
                        obj.num_xy += 1;
                    }
                    for d in 0..ndim {
                        obj.v_axis[d] += fv * coord[d] as f64;
                    }
                    if want_second_moments {
                        let xs = coord[ndim - 1] as f64 + 1.0 - shift[ndim - 1];
                        let ys = coord[0] as f64 + 1.0 - shift[0];
                        obj.vxx += fv * xs * xs;
                        obj.vyy += fv * ys * ys;
                        obj.vxy += fv * xs * ys;
                    }
                }

                if let Some(sky_field) = sky {
                    obj.sum_sky += sky_field.value_at(&coord);
                    obj.num_sky += 1;
                }
                if let Some(noise_field) = sky_noise {
                    let raw = noise_field.value_at(&coord);
                    let var = if options.variance_is_given { raw } else { raw * raw };
                    obj.sum_var += var;
                    obj.sum_value_plus_var += fv + var;
                }
            }

            if let Some(subs) = sub_labels {
                let sv = subs.as_slice()[lin] as i64;
                if sv > 0 {
                    if let Some(idx) = compact_sub_label(sv) {
                        let c = &mut clumps[idx];
                        c.numall += 1;
                        for d in 0..ndim {
                            let cc = coord[d] as i64;
                            c.min_coord[d] = c.min_coord[d].min(cc);
                            c.max_coord[d] = c.max_coord[d].max(cc);
                        }
                        if !blank {
                            let fv = v.to_f64();
                            c.num += 1;
                            c.sum += fv;
                            c.sum_sq += fv * fv;
                            if fv > 0.0 {
                                c.numwht += 1;
                                c.sumwht += fv;
                                for d in 0..ndim {
                                    c.v_axis[d] += fv * coord[d] as f64;
                                }
                                if want_second_moments {
                                    let xs = coord[ndim - 1] as f64 + 1.0 - shift[ndim - 1];
                                    let ys = coord[0] as f64 + 1.0 - shift[0];
                                    c.vxx += fv * xs * xs;
                                    c.vyy += fv * ys * ys;
                                    c.vxy += fv * xs * ys;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    if need.contains(NeedFlags::RIVER) {
        if let Some(subs) = sub_labels {
            accumulate_river_sums(values, labels, subs, tile, label, &compact_sub_label, &mut clumps);
        }
    }

    (obj, clumps)
}

/// For each river pixel (negative sub-label) belonging to `label`, inspects
/// its `2·ndim`-connected neighbors; every distinct positive sub-label
/// touched gets this pixel's value added to its river sum exactly once
/// (spec.md §4.7, §8 scenario 4).
fn accumulate_river_sums<V: PixelElement>(
    values: &PixelArray<V>,
    labels: &PixelArray<i32>,
    sub_labels: &PixelArray<i32>,
    tile: &Tile,
    label: i64,
    compact_sub_label: &impl Fn(i64) -> Option<usize>,
    clumps: &mut [RawMeasurement],
) {
    let ndim = tile.ndim();
    let shape = values.shape();

    for (run_start, run_len) in tile.iter_runs() {
        let base_coord = values.coord_of(run_start);
        for k in 0..run_len {
            let lin = run_start + k;
            if labels.as_slice()[lin] as i64 != label {
                continue;
            }
            if sub_labels.as_slice()[lin] as i64 >= 0 {
                continue;
            }

            let mut coord = base_coord.clone();
            coord[ndim - 1] += k;

            let mut touched: HashSet<usize> = HashSet::new();
            for d in 0..ndim {
                for delta in [-1i64, 1i64] {
                    let nc = coord[d] as i64 + delta;
                    if nc < 0 || nc >= shape[d] as i64 {
                        continue;
                    }
                    let mut neighbor = coord.clone();
                    neighbor[d] = nc as usize;
                    let nlin = values.linear_index(&neighbor);
                    if labels.as_slice()[nlin] as i64 != label {
                        continue;
                    }
                    let nsv = sub_labels.as_slice()[nlin] as i64;
                    if nsv > 0 {
                        if let Some(idx) = compact_sub_label(nsv) {
                            touched.insert(idx);
                        }
                    }
                }
            }

            let v = values.as_slice()[lin];
            if v.is_blank(values.blank()) {
                continue;
            }
            let fv = v.to_f64();
            for idx in touched {
                clumps[idx].river_sum += fv;
                clumps[idx].river_num += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labelindex::{build_label_index, EmptyLabelPolicy, RelabelTable};

    fn two_objects() -> (PixelArray<i32>, PixelArray<f32>) {
        // 10x10: label 1 on x+y<=3, label 2 on x+y>=15, else 0. Values uniform 1.0.
        let n = 100;
        let mut labels = vec![0i32; n];
        let mut values = vec![1.0f32; n];
        for y in 0..10 {
            for x in 0..10 {
                let idx = y * 10 + x;
                if x + y <= 3 {
                    labels[idx] = 1;
                } else if x + y >= 15 {
                    labels[idx] = 2;
                }
                values[idx] = 1.0;
            }
        }
        (
            PixelArray::from_vec(vec![10, 10], labels, Some(0)).unwrap(),
            PixelArray::from_vec(vec![10, 10], values, None).unwrap(),
        )
    }

    #[test]
    fn area_matches_pixel_count_for_all_pixels_kind_column() {
        let (labels, values) = two_objects();
        let idx = build_label_index(&labels, EmptyLabelPolicy::Drop, None).unwrap();
        let tile1 = idx.tile(1).unwrap();
        let (obj, _) = accumulate_label(
            &values,
            &labels,
            None,
            None,
            None,
            tile1,
            1,
            NeedFlags::AREA,
            0,
            |_| None,
            &AccumulateOptions::default(),
        );
        // x+y<=3 inside a 10x10 grid: (0,0)..(0,3),(1,0)..(1,2),(2,0)..(2,1),(3,0) = 4+3+2+1=10
        assert_eq!(obj.num, 10);
        assert!(obj.num <= obj.numall);
    }

    #[test]
    fn flux_weighted_center_lands_inside_bounding_tile() {
        let (labels, values) = two_objects();
        let idx = build_label_index(&labels, EmptyLabelPolicy::Drop, None).unwrap();
        let tile1 = idx.tile(1).unwrap();
        let (obj, _) = accumulate_label(
            &values,
            &labels,
            None,
            None,
            None,
            tile1,
            1,
            NeedFlags::POSITION,
            0,
            |_| None,
            &AccumulateOptions::default(),
        );
        let cy = obj.center(0);
        let cx = obj.center(1);
        let origin = tile1.origin();
        let extents = tile1.extents();
        assert!(cy >= origin[0] as f64 && cy <= (origin[0] + extents[0] - 1) as f64);
        assert!(cx >= origin[1] as f64 && cx <= (origin[1] + extents[1] - 1) as f64);
    }

    #[test]
    fn clump_river_sum_counts_only_adjacent_river_pixels() {
        // Single object covering 10x10; two 4x4 clumps separated by one
        // row of river, values uniform 5.0 (spec.md §8 scenario 4).
        let labels = vec![1i32; 100];
        let mut subs = vec![0i32; 100];
        let values = vec![5.0f32; 100];
        for y in 0..4 {
            for x in 0..4 {
                subs[y * 10 + x] = 1;
            }
        }
        for y in 5..9 {
            for x in 0..4 {
                subs[y * 10 + x] = 2;
            }
        }
        for x in 0..4 {
            subs[4 * 10 + x] = -1;
        }
        let labels_arr = PixelArray::from_vec(vec![10, 10], labels.clone(), Some(0)).unwrap();
        let subs_arr = PixelArray::from_vec(vec![10, 10], subs, Some(0)).unwrap();
        let values_arr = PixelArray::from_vec(vec![10, 10], values, None).unwrap();

        let relabel = RelabelTable::build(&labels_arr, &subs_arr);

        let tile = Tile::whole(&[10, 10]);
        let (_, clumps) = accumulate_label(
            &values_arr,
            &labels_arr,
            Some(&subs_arr),
            None,
            None,
            &tile,
            1,
            NeedFlags::RIVER,
            relabel.count_for(1) as usize,
            |sv| relabel.compact(1, sv).map(|c| c as usize - 1),
            &AccumulateOptions::default(),
        );

        // Only clump 1's adjacent river row (4 pixels) contributes.
        assert_eq!(clumps[0].river_num, 4);
        assert_eq!(clumps[0].river_sum, 20.0);
    }
}
