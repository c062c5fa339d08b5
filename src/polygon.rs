//! L4: polygon engine (spec.md §4.4). 2-D only; 3-D polygon crops are
//! rejected upstream (by the cropper request parser, per spec.md §4.4).

use crate::error::ContractError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Point2 { x, y }
    }
}

fn cross(o: Point2, a: Point2, b: Point2) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// `is_convex(vertices) -> bool`: consistency of cross-product sign around
/// the ring.
pub fn is_convex(vertices: &[Point2]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0i32;
    for i in 0..n {
        let o = vertices[i];
        let a = vertices[(i + 1) % n];
        let b = vertices[(i + 2) % n];
        let c = cross(o, a, b);
        if c.abs() < f64::EPSILON {
            continue;
        }
        let s = if c > 0.0 { 1 } else { -1 };
        if sign == 0 {
            sign = s;
        } else if sign != s {
            return false;
        }
    }
    true
}

/// `sort_ccw(vertices) -> permutation`: indices that order the vertices
/// counter-clockwise around their centroid. If the polygon is concave, a
/// warning is the caller's responsibility (spec.md §4.4: the sort has no
/// unique answer, but the traversal order is still well-defined) — this
/// function always returns *a* CCW-around-centroid ordering.
pub fn sort_ccw(vertices: &[Point2]) -> Vec<usize> {
    let n = vertices.len();
    let (cx, cy) = {
        let sx: f64 = vertices.iter().map(|p| p.x).sum();
        let sy: f64 = vertices.iter().map(|p| p.y).sum();
        (sx / n as f64, sy / n as f64)
    };
    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&a, &b| {
        let angle_a = (vertices[a].y - cy).atan2(vertices[a].x - cx);
        let angle_b = (vertices[b].y - cy).atan2(vertices[b].x - cx);
        angle_a.partial_cmp(&angle_b).unwrap()
    });
    idx
}

/// `point_in_polygon(vertices, point) -> bool`: dispatches to the fast
/// convex test when the vertices are already convex, else ray-casting.
pub fn point_in_polygon(vertices: &[Point2], point: Point2) -> bool {
    if is_convex(vertices) {
        point_in_convex_polygon(vertices, point)
    } else {
        point_in_polygon_ray_casting(vertices, point)
    }
}

fn point_in_convex_polygon(vertices: &[Point2], point: Point2) -> bool {
    let n = vertices.len();
    let mut sign = 0i32;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        let c = cross(a, b, point);
        if c.abs() < f64::EPSILON {
            continue;
        }
        let s = if c > 0.0 { 1 } else { -1 };
        if sign == 0 {
            sign = s;
        } else if sign != s {
            return false;
        }
    }
    true
}

fn point_in_polygon_ray_casting(vertices: &[Point2], point: Point2) -> bool {
    let n = vertices.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[j];
        if ((vi.y > point.y) != (vj.y > point.y))
            && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Validates a polygon vertex list per spec.md §8: at least 3 vertices,
/// 2-D only.
pub fn validate_polygon(vertices: &[Point2]) -> Result<(), ContractError> {
    if vertices.len() < 3 {
        return Err(ContractError::PolygonTooFewVertices(vertices.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point2> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(4.0, 4.0),
            Point2::new(0.0, 4.0),
        ]
    }

    fn concave_l_shape() -> Vec<Point2> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(4.0, 2.0),
            Point2::new(2.0, 2.0),
            Point2::new(2.0, 4.0),
            Point2::new(0.0, 4.0),
        ]
    }

    #[test]
    fn square_is_convex() {
        assert!(is_convex(&square()));
    }

    #[test]
    fn l_shape_is_not_convex() {
        assert!(!is_convex(&concave_l_shape()));
    }

    #[test]
    fn too_few_vertices_rejected() {
        let v = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)];
        assert!(validate_polygon(&v).is_err());
        assert!(validate_polygon(&square()[..3]).is_ok());
    }

    #[test]
    fn point_inside_and_outside_square() {
        let sq = square();
        assert!(point_in_polygon(&sq, Point2::new(2.0, 2.0)));
        assert!(!point_in_polygon(&sq, Point2::new(5.0, 5.0)));
    }

    #[test]
    fn point_inside_and_outside_concave_shape() {
        let l = concave_l_shape();
        assert!(point_in_polygon(&l, Point2::new(1.0, 1.0)));
        // Inside the square bounding box but in the notch cut out of the L.
        assert!(!point_in_polygon(&l, Point2::new(3.0, 3.0)));
    }

    #[test]
    fn is_convex_of_sort_ccw_matches_is_convex_of_original() {
        // Property from spec.md §8: is_convex(sort_ccw(v)) == is_convex(v).
        for shape in [square(), concave_l_shape()] {
            let perm = sort_ccw(&shape);
            let sorted: Vec<Point2> = perm.iter().map(|&i| shape[i]).collect();
            assert_eq!(is_convex(&sorted), is_convex(&shape));
        }
    }

    #[test]
    fn sort_ccw_on_square_is_angularly_monotonic() {
        let sq = square();
        let perm = sort_ccw(&sq);
        let sorted: Vec<Point2> = perm.iter().map(|&i| sq[i]).collect();
        let cx = 2.0;
        let cy = 2.0;
        let angles: Vec<f64> = sorted.iter().map(|p| (p.y - cy).atan2(p.x - cx)).collect();
        for w in angles.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }
}
