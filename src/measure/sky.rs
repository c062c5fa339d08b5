//! Sky and sky-noise datasets (spec.md §6): scalar, per-pixel, or a
//! tile-mosaic whose element count equals a tessellation's tile count.

use crate::array::PixelArray;

#[derive(Debug, Clone)]
pub enum SkyField {
    Scalar(f64),
    PerPixel(PixelArray<f32>),
    /// A coarse mosaic: `data` has one value per mosaic cell, and
    /// `tile_shape[d]` is the number of image pixels each cell covers along
    /// axis `d`.
    PerTile { data: PixelArray<f32>, tile_shape: Vec<usize> },
}

impl SkyField {
    pub fn value_at(&self, coord: &[usize]) -> f64 {
        match self {
            SkyField::Scalar(v) => *v,
            SkyField::PerPixel(arr) => {
                let lin = arr.linear_index(coord);
                arr.as_slice()[lin] as f64
            }
            SkyField::PerTile { data, tile_shape } => {
                let mosaic_coord: Vec<usize> = coord.iter().zip(tile_shape.iter()).map(|(c, t)| c / t.max(&1)).collect();
                let lin = data.linear_index(&mosaic_coord);
                data.as_slice()[lin] as f64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_field_is_constant_everywhere() {
        let f = SkyField::Scalar(3.5);
        assert_eq!(f.value_at(&[0, 0]), 3.5);
        assert_eq!(f.value_at(&[50, 50]), 3.5);
    }

    #[test]
    fn per_pixel_field_looks_up_the_exact_pixel() {
        let data = PixelArray::<f32>::from_vec(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0], None).unwrap();
        let f = SkyField::PerPixel(data);
        assert_eq!(f.value_at(&[1, 0]), 3.0);
    }

    #[test]
    fn per_tile_field_maps_many_pixels_to_one_cell() {
        let data = PixelArray::<f32>::from_vec(vec![1, 2], vec![10.0, 20.0], None).unwrap();
        let f = SkyField::PerTile { data, tile_shape: vec![4, 4] };
        assert_eq!(f.value_at(&[0, 0]), 10.0);
        assert_eq!(f.value_at(&[3, 3]), 10.0);
        assert_eq!(f.value_at(&[0, 4]), 20.0);
    }
}
