//! Pass 3 — spectrum table for 3-D labels (spec.md §4.7 Pass 3, §3
//! "Spectrum").

use crate::array::{PixelArray, PixelElement, Tile};
use crate::measure::sky::SkyField;

/// One row of a label's spectrum table, one per slowest-axis slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumRow {
    pub slice_index: usize,
    pub slice_wcs: f64,
    pub count_in_label: u64,
    pub sum_in_label: f64,
    pub err_sum_in_label: f64,
    pub projected_sum: f64,
    pub projected_err: f64,
    pub other_count: u64,
    pub other_sum: f64,
    pub other_err: f64,
}

impl SpectrumRow {
    fn new(slice_index: usize, slice_wcs: f64) -> Self {
        SpectrumRow {
            slice_index,
            slice_wcs,
            count_in_label: 0,
            sum_in_label: 0.0,
            err_sum_in_label: 0.0,
            projected_sum: 0.0,
            projected_err: 0.0,
            other_count: 0,
            other_sum: 0.0,
            other_err: 0.0,
        }
    }
}

/// Builds the nine-column spectrum table for a 3-D label (spec.md §4.7 Pass
/// 3). `slice_wcs` holds one world-coordinate value per slice of the whole
/// image (computed once at pipeline start and shared across labels);
/// indexed here by the tile's absolute slice offset. `projection_scratch` is
/// the worker's reusable dense projection buffer (spec.md §9): one byte per
/// `(y, x)` position in the tile's 2-D footprint, cleared and resized here
/// rather than reallocating a fresh set for every label.
///
/// The label's 2-D projection is the OR-fold, over every slice the tile
/// spans, of which `(y, x)` positions ever belong to `label` — not just the
/// footprint within a single slice.
pub fn build_spectrum<V: PixelElement>(
    values: &PixelArray<V>,
    labels: &PixelArray<i32>,
    sky_noise: Option<&SkyField>,
    tile: &Tile,
    label: i64,
    slice_wcs: &[f64],
    variance_is_given: bool,
    projection_scratch: &mut Vec<u8>,
) -> Vec<SpectrumRow> {
    assert_eq!(tile.ndim(), 3, "spectrum pass is 3-D only");

    let slice_origin = tile.origin()[0];
    let num_slices = tile.extents()[0];
    let y0 = tile.origin()[1];
    let x0 = tile.origin()[2];
    let ny = tile.extents()[1];
    let nx = tile.extents()[2];

    projection_scratch.clear();
    projection_scratch.resize(ny * nx, 0);

    for (run_start, run_len) in tile.iter_runs() {
        let base = labels.coord_of(run_start);
        for k in 0..run_len {
            let lin = run_start + k;
            if labels.as_slice()[lin] as i64 == label {
                let y = base[1];
                let x = base[2] + k;
                projection_scratch[(y - y0) * nx + (x - x0)] = 1;
            }
        }
    }

    let mut rows: Vec<SpectrumRow> = (0..num_slices)
        .map(|i| SpectrumRow::new(slice_origin + i, slice_wcs.get(slice_origin + i).copied().unwrap_or(f64::NAN)))
        .collect();

    for si in 0..num_slices {
        let slice = slice_origin + si;
        let row = &mut rows[si];
        for (idx, &flag) in projection_scratch.iter().enumerate() {
            if flag == 0 {
                continue;
            }
            let y = y0 + idx / nx;
            let x = x0 + idx % nx;
            let coord = [slice, y, x];
            let lin = values.linear_index(&coord);
            let v = values.as_slice()[lin];
            if v.is_blank(values.blank()) {
                continue;
            }
            let fv = v.to_f64();
            let var = sky_noise
                .map(|f| {
                    let raw = f.value_at(&coord);
                    if variance_is_given { raw } else { raw * raw }
                })
                .unwrap_or(0.0);

            row.projected_sum += fv;
            row.projected_err += var;

            let lbl = labels.as_slice()[lin] as i64;
            if lbl == label {
                row.count_in_label += 1;
                row.sum_in_label += fv;
                row.err_sum_in_label += var;
            } else if lbl > 0 {
                row.other_count += 1;
                row.other_sum += fv;
                row.other_err += var;
            }
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_unions_footprints_across_slices() {
        // 2 slices x 3x3: label 1 occupies (0,0) in slice 0 and (1,1) in
        // slice 1. Its 2-D projection is the union, {(0,0), (1,1)}.
        let shape = vec![2, 3, 3];
        let mut labels_data = vec![0i32; 18];
        labels_data[0 * 9 + 0] = 1; // slice 0, (0,0)
        labels_data[1 * 9 + 4] = 1; // slice 1, (1,1)
        let labels = PixelArray::<i32>::from_vec(shape.clone(), labels_data, Some(0)).unwrap();
        let values = PixelArray::<f32>::from_vec(shape, vec![1.0; 18], None).unwrap();
        let tile = Tile::whole(&[2, 3, 3]);
        let slice_wcs = [100.0, 200.0];

        let mut scratch = Vec::new();
        let rows = build_spectrum(&values, &labels, None, &tile, 1, &slice_wcs, false, &mut scratch);
        assert_eq!(rows.len(), 2);
        // Each slice's projected footprint has 2 pixels (the union), one of
        // which belongs to the label in that slice and one of which doesn't.
        assert_eq!(rows[0].count_in_label, 1);
        assert_eq!(rows[0].other_count, 0);
        assert_eq!(rows[0].projected_sum, 2.0);
        assert_eq!(rows[1].count_in_label, 1);
        assert_eq!(rows[1].projected_sum, 2.0);
        assert_eq!(rows[0].slice_wcs, 100.0);
        assert_eq!(rows[1].slice_wcs, 200.0);
    }

    #[test]
    fn other_label_pixels_are_tallied_separately() {
        let shape = vec![1, 2, 2];
        let labels = PixelArray::<i32>::from_vec(shape.clone(), vec![1, 2, 0, 0], Some(0)).unwrap();
        let values = PixelArray::<f32>::from_vec(shape, vec![10.0, 20.0, 0.0, 0.0], None).unwrap();
        let tile = Tile::whole(&[1, 2, 2]);
        let slice_wcs = [0.0];
        let mut scratch = Vec::new();
        let rows = build_spectrum(&values, &labels, None, &tile, 1, &slice_wcs, false, &mut scratch);
        assert_eq!(rows[0].count_in_label, 1);
        assert_eq!(rows[0].sum_in_label, 10.0);
        assert_eq!(rows[0].other_count, 0);
        // The projection for label 1 is only {(0,0)} since label 2 never
        // shares a footprint with label 1 here.
        assert_eq!(rows[0].projected_sum, 10.0);
    }

    #[test]
    fn scratch_buffer_is_reused_across_differently_shaped_tiles() {
        // A shared scratch buffer must give correct results whether the next
        // label's tile is smaller or larger than the previous one's.
        let shape = vec![2, 4, 4];
        let mut labels_data = vec![0i32; 32];
        labels_data[0 * 16 + 0] = 1; // slice 0, (0,0)
        labels_data[1 * 16 + 15] = 2; // slice 1, (3,3)
        let labels = PixelArray::<i32>::from_vec(shape.clone(), labels_data, Some(0)).unwrap();
        let values = PixelArray::<f32>::from_vec(shape, vec![1.0; 32], None).unwrap();
        let slice_wcs = [10.0, 20.0];
        let mut scratch = Vec::new();

        let small_tile = Tile::subview(&[2, 4, 4], &[0, 0, 0], &[2, 1, 1]).unwrap();
        let small_rows = build_spectrum(&values, &labels, None, &small_tile, 1, &slice_wcs, false, &mut scratch);
        assert_eq!(small_rows[0].count_in_label, 1);

        let big_tile = Tile::whole(&[2, 4, 4]);
        let big_rows = build_spectrum(&values, &labels, None, &big_tile, 2, &slice_wcs, false, &mut scratch);
        assert_eq!(big_rows[1].count_in_label, 1);
    }
}
