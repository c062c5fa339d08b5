//! L2: label index (spec.md §4.2).
//!
//! One pass over the label image builds a minimum bounding [`Tile`] per
//! label. Sparse nested sub-labels additionally get a dense relabel table,
//! compressing them to `1..=n` within each parent in first-seen order.

use std::collections::HashMap;

use crate::array::{PixelArray, Tile};
use crate::error::ContractError;

/// Policy for labels with an empty footprint (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyLabelPolicy {
    Drop,
    KeepIntegerIds,
}

#[derive(Debug, Clone)]
pub struct LabelIndex {
    /// `entries[label - 1]` is `Some(tile)` when the label has a non-empty
    /// footprint, `None` otherwise (dropped or padded per policy).
    entries: Vec<Option<Tile>>,
    max_label: i64,
}

impl LabelIndex {
    pub fn max_label(&self) -> i64 {
        self.max_label
    }

    /// Tile for `label` (1-based). Returns `None` if the label was dropped.
    pub fn tile(&self, label: i64) -> Option<&Tile> {
        if label < 1 {
            return None;
        }
        self.entries.get(label as usize - 1).and_then(|e| e.as_ref())
    }

    /// Labels in ascending order, paired with their tile, skipping dropped
    /// ones (spec.md §4.2: `tiles_in_index_order`).
    pub fn tiles_in_index_order(&self) -> impl Iterator<Item = (i64, &Tile)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (i as i64 + 1, t)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `build_label_index(labels) -> LabelIndex` (spec.md §4.2).
///
/// `num_labels_hint`, when `Some`, is trusted the way spec.md §6 trusts a
/// present `num_labels` metadata entry; when `None`, the maximum label
/// value actually present is used, and a label image with no positive
/// pixels is a [`ContractError::ZeroObjects`] (spec.md §9, open question:
/// "zero objects" is a ContractError).
pub fn build_label_index(
    labels: &PixelArray<i32>,
    policy: EmptyLabelPolicy,
    num_labels_hint: Option<i64>,
) -> Result<LabelIndex, ContractError> {
    let shape = labels.shape();
    let ndim = shape.len();
    let mut min_coord: HashMap<i64, Vec<usize>> = HashMap::new();
    let mut max_coord: HashMap<i64, Vec<usize>> = HashMap::new();
    let mut observed_max: i64 = 0;

    for (lin, &v) in labels.as_slice().iter().enumerate() {
        let v = v as i64;
        if v <= 0 {
            continue;
        }
        observed_max = observed_max.max(v);
        let coord = labels.coord_of(lin);
        min_coord
            .entry(v)
            .and_modify(|m| {
                for d in 0..ndim {
                    m[d] = m[d].min(coord[d]);
                }
            })
            .or_insert_with(|| coord.clone());
        max_coord
            .entry(v)
            .and_modify(|m| {
                for d in 0..ndim {
                    m[d] = m[d].max(coord[d]);
                }
            })
            .or_insert(coord);
    }

    if observed_max == 0 && num_labels_hint.is_none() {
        return Err(ContractError::ZeroObjects);
    }

    let max_label = num_labels_hint.unwrap_or(observed_max);
    let mut entries = Vec::with_capacity(max_label.max(0) as usize);

    for label in 1..=max_label {
        match (min_coord.get(&label), max_coord.get(&label)) {
            (Some(lo), Some(hi)) => {
                let extents: Vec<usize> = (0..ndim).map(|d| hi[d] - lo[d] + 1).collect();
                let tile = Tile::subview(shape, lo, &extents)?;
                entries.push(Some(tile));
            }
            _ => match policy {
                EmptyLabelPolicy::Drop => entries.push(None),
                EmptyLabelPolicy::KeepIntegerIds => entries.push(Some(Tile::degenerate(shape))),
            },
        }
    }

    Ok(LabelIndex { entries, max_label })
}

/// Per-parent dense relabel table for sparse nested sub-labels (spec.md
/// §4.2): renumbers sub-label ids to `1..=n` within each parent, preserving
/// first-seen order.
#[derive(Debug, Clone, Default)]
pub struct RelabelTable {
    /// `(object_label, original_sub_label) -> compact_sub_label (1-based)`.
    map: HashMap<(i64, i64), i64>,
    /// Number of compact sub-labels seen per object.
    counts: HashMap<i64, i64>,
}

impl RelabelTable {
    pub fn build(object_labels: &PixelArray<i32>, sub_labels: &PixelArray<i32>) -> RelabelTable {
        let mut map = HashMap::new();
        let mut counts: HashMap<i64, i64> = HashMap::new();

        for (obj, sub) in object_labels
            .as_slice()
            .iter()
            .zip(sub_labels.as_slice().iter())
        {
            let obj = *obj as i64;
            let sub = *sub as i64;
            if obj <= 0 || sub <= 0 {
                continue;
            }
            map.entry((obj, sub)).or_insert_with(|| {
                let next = counts.entry(obj).or_insert(0);
                *next += 1;
                *next
            });
        }

        RelabelTable { map, counts }
    }

    pub fn compact(&self, object: i64, sub_label: i64) -> Option<i64> {
        self.map.get(&(object, sub_label)).copied()
    }

    pub fn count_for(&self, object: i64) -> i64 {
        self.counts.get(&object).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_2x2_two_objects() -> PixelArray<i32> {
        // 4x4 grid: label 1 top-left 2x2 block, label 2 bottom-right 2x2 block.
        let mut data = vec![0i32; 16];
        for y in 0..2 {
            for x in 0..2 {
                data[y * 4 + x] = 1;
            }
        }
        for y in 2..4 {
            for x in 2..4 {
                data[y * 4 + x] = 2;
            }
        }
        PixelArray::from_vec(vec![4, 4], data, Some(0)).unwrap()
    }

    #[test]
    fn builds_tight_bounding_tiles() {
        let labels = labels_2x2_two_objects();
        let idx = build_label_index(&labels, EmptyLabelPolicy::Drop, None).unwrap();
        assert_eq!(idx.max_label(), 2);
        let t1 = idx.tile(1).unwrap();
        assert_eq!(t1.origin(), &[0, 0]);
        assert_eq!(t1.extents(), &[2, 2]);
        let t2 = idx.tile(2).unwrap();
        assert_eq!(t2.origin(), &[2, 2]);
        assert_eq!(t2.extents(), &[2, 2]);
    }

    #[test]
    fn empty_label_dropped_by_default() {
        let labels = labels_2x2_two_objects();
        // Pretend there are 3 labels total (3 never appears).
        let idx = build_label_index(&labels, EmptyLabelPolicy::Drop, Some(3)).unwrap();
        assert!(idx.tile(3).is_none());
        assert_eq!(idx.tiles_in_index_order().count(), 2);
    }

    #[test]
    fn empty_label_kept_as_degenerate_when_requested() {
        let labels = labels_2x2_two_objects();
        let idx = build_label_index(&labels, EmptyLabelPolicy::KeepIntegerIds, Some(3)).unwrap();
        let t3 = idx.tile(3).unwrap();
        assert!(t3.is_degenerate());
        assert_eq!(t3.volume(), 0);
    }

    #[test]
    fn zero_objects_is_contract_error() {
        let labels = PixelArray::from_vec(vec![2, 2], vec![0i32; 4], Some(0)).unwrap();
        let err = build_label_index(&labels, EmptyLabelPolicy::Drop, None).unwrap_err();
        assert!(matches!(err, ContractError::ZeroObjects));
    }

    #[test]
    fn relabel_table_compacts_in_first_seen_order() {
        // object 1 has sub-labels 5 then 9 (first-seen order); object 2 has
        // sub-label 5 only.
        let obj = PixelArray::from_vec(vec![1, 4], vec![1, 1, 1, 2], Some(0)).unwrap();
        let sub = PixelArray::from_vec(vec![1, 4], vec![5, 5, 9, 5], Some(0)).unwrap();
        let table = RelabelTable::build(&obj, &sub);
        assert_eq!(table.compact(1, 5), Some(1));
        assert_eq!(table.compact(1, 9), Some(2));
        assert_eq!(table.compact(2, 5), Some(1));
        assert_eq!(table.count_for(1), 2);
        assert_eq!(table.count_for(2), 1);
    }
}
