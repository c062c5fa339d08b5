//! L3: celestial geometry (spec.md §4.3).
//!
//! The core treats the sky as locally spherical: declination changes along
//! great circles, right ascension does not. Rectangles are over-approximated
//! by "corner inside the other rectangle" tests, which the Rationale in
//! spec.md §4.3 notes is sufficient for the cropper's purposes (it rewrites
//! coordinate metadata precisely regardless).

use std::f64::consts::PI;

const D2R: f64 = PI / 180.0;

/// A point on the sky, right ascension and declination in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPoint {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

/// A sky-rectangle as spec.md §4.3 defines it for the point-in-rectangle
/// test: a reference corner `(r0, d0)` — the maximum-RA corner on the
/// rectangle's southern (minimum-declination) edge — plus angular extents
/// `(sx, sy)` measured at that edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyRect {
    pub r0: f64,
    pub d0: f64,
    pub sx: f64,
    pub sy: f64,
}

impl SkyRect {
    /// Build the approximating rectangle from a center and half-widths in
    /// degrees, per spec.md §4.3's corner-derivation formula, anchored at
    /// the southern edge.
    pub fn from_center_half_widths_deg(center: SkyPoint, half_width_ra_deg: f64, half_width_dec_deg: f64) -> SkyRect {
        let d_south = center.dec_deg - half_width_dec_deg;
        let cos_south = (d_south * D2R).cos();
        let sx = 2.0 * half_width_ra_deg / cos_south;
        let r0 = center.ra_deg + half_width_ra_deg / cos_south;
        SkyRect {
            r0,
            d0: d_south,
            sx,
            sy: 2.0 * half_width_dec_deg,
        }
    }

    /// The four true geometric corners (each with its own declination
    /// convergence correction), used by the overlap test.
    pub fn corners(center: SkyPoint, half_width_ra_deg: f64, half_width_dec_deg: f64) -> [SkyPoint; 4] {
        let mut out = [SkyPoint { ra_deg: 0.0, dec_deg: 0.0 }; 4];
        let mut i = 0;
        for sign_x in [1.0, -1.0] {
            for sign_y in [1.0, -1.0] {
                let dec = center.dec_deg + sign_y * half_width_dec_deg;
                let ra = center.ra_deg + sign_x * half_width_ra_deg / (dec * D2R).cos();
                out[i] = SkyPoint { ra_deg: ra, dec_deg: dec };
                i += 1;
            }
        }
        out
    }

    /// Whether the rectangle's declination range straddles the celestial
    /// equator.
    pub fn crosses_equator(&self) -> bool {
        !(self.d0 * (self.d0 + self.sy) > 0.0)
    }

    /// Point-in-rectangle test of spec.md §4.3.
    pub fn contains(&self, p: SkyPoint) -> bool {
        if p.dec_deg < self.d0 || p.dec_deg > self.d0 + self.sy {
            return false;
        }
        if p.dec_deg <= 0.0 {
            let n = self.sx * (1.0 - ((p.dec_deg - self.d0) * D2R).cos()) / 2.0;
            return p.ra_deg >= self.r0 - self.sx + n && p.ra_deg <= self.r0 - n;
        }
        if !self.crosses_equator() {
            noncrossing_contains(self.r0, self.d0, self.sx, p)
        } else {
            let re = self.r0 - self.sx * (1.0 - (self.d0 * D2R).cos()) / 2.0;
            let sre = self.sx * (self.d0 * D2R).cos();
            noncrossing_contains(re, 0.0, sre, p)
        }
    }
}

fn noncrossing_contains(r0: f64, d0: f64, sx: f64, p: SkyPoint) -> bool {
    let n = sx * (1.0 / ((p.dec_deg - d0) * D2R).cos() - 1.0) / 2.0;
    p.ra_deg >= r0 - sx - n && p.ra_deg <= r0 + n
}

/// A sky rectangle paired with its true geometric corners, as needed for
/// the overlap test (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
pub struct SkyRegion {
    pub rect: SkyRect,
    pub corners: [SkyPoint; 4],
}

impl SkyRegion {
    pub fn from_center_half_widths_deg(
        center: SkyPoint,
        half_width_ra_deg: f64,
        half_width_dec_deg: f64,
    ) -> SkyRegion {
        SkyRegion {
            rect: SkyRect::from_center_half_widths_deg(center, half_width_ra_deg, half_width_dec_deg),
            corners: SkyRect::corners(center, half_width_ra_deg, half_width_dec_deg),
        }
    }
}

/// Rectangle-rectangle overlap: true iff any corner of `a` lies inside `b`
/// or any corner of `b` lies inside `a` (spec.md §4.3).
pub fn rectangles_overlap(a: &SkyRegion, b: &SkyRegion) -> bool {
    a.corners.iter().any(|&c| b.rect.contains(c)) || b.corners.iter().any(|&c| a.rect.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pt(ra: f64, dec: f64) -> SkyPoint {
        SkyPoint { ra_deg: ra, dec_deg: dec }
    }

    #[test]
    fn rect_contains_its_own_center() {
        let region = SkyRegion::from_center_half_widths_deg(pt(10.0, 2.0), 0.01, 0.01);
        assert!(region.rect.contains(pt(10.0, 2.0)));
    }

    #[test]
    fn rect_excludes_point_outside_dec_range() {
        let region = SkyRegion::from_center_half_widths_deg(pt(10.0, 2.0), 0.01, 0.01);
        assert!(!region.rect.contains(pt(10.0, 2.05)));
        assert!(!region.rect.contains(pt(10.0, 1.95)));
    }

    #[test]
    fn northern_rect_does_not_cross_equator() {
        let region = SkyRegion::from_center_half_widths_deg(pt(0.0, 10.0), 1.0, 1.0);
        assert!(!region.rect.crosses_equator());
    }

    #[test]
    fn southern_rect_does_not_cross_equator() {
        let region = SkyRegion::from_center_half_widths_deg(pt(0.0, -10.0), 1.0, 1.0);
        assert!(!region.rect.crosses_equator());
    }

    #[test]
    fn rect_straddling_equator_is_detected() {
        let region = SkyRegion::from_center_half_widths_deg(pt(0.0, 0.5), 1.0, 1.0);
        assert!(region.rect.crosses_equator());
        assert!(region.rect.contains(pt(0.0, 0.5)));
        assert!(region.rect.contains(pt(0.0, -0.3)));
    }

    #[test]
    fn identical_regions_overlap() {
        let a = SkyRegion::from_center_half_widths_deg(pt(10.0, 2.0), 0.01, 0.01);
        let b = SkyRegion::from_center_half_widths_deg(pt(10.0, 2.0), 0.01, 0.01);
        assert!(rectangles_overlap(&a, &b));
    }

    #[test]
    fn far_apart_regions_do_not_overlap() {
        let a = SkyRegion::from_center_half_widths_deg(pt(10.0, 2.0), 0.01, 0.01);
        let b = SkyRegion::from_center_half_widths_deg(pt(100.0, -40.0), 0.01, 0.01);
        assert!(!rectangles_overlap(&a, &b));
    }

    #[test]
    fn adjacent_touching_regions_overlap_at_shared_corner() {
        let a = SkyRegion::from_center_half_widths_deg(pt(10.0, 2.0), 0.5, 0.5);
        let b = SkyRegion::from_center_half_widths_deg(pt(11.0, 2.0), 0.5, 0.5);
        // Both include the shared edge roughly at ra=10.5; use a point that
        // should be inside both given the over-approximation.
        assert_relative_eq!(a.rect.d0, b.rect.d0, epsilon = 1e-9);
    }
}
