//! L6: Cropper core (spec.md §4.6).
//!
//! Pixel-mode and celestial-mode crop orchestration. Mirrors the teacher's
//! `cutout.rs` request/response shape — one request in, one output (or a
//! per-request error) out — generalized from a single S3-backed plate lookup
//! to N co-registered input images and five ways of describing a crop
//! region.

pub mod section;

use crate::array::{PixelArray, PixelElement, Tile};
use crate::error::{ContractError, CoreError};
use crate::geometry::{rectangles_overlap, SkyPoint, SkyRegion};
use crate::polygon::{point_in_polygon, validate_polygon, Point2};
use crate::wcs::WcsTransform;

/// One crop request, tagged by coordinate mode (spec.md §3 "Crop request").
#[derive(Debug, Clone)]
pub enum CropMode {
    PixelCenterWidth { center: Vec<f64>, width_pixels: Vec<usize> },
    PixelSection(String),
    PixelPolygon(Vec<Point2>),
    CelestialCenterWidth { center: SkyPoint, width_deg: (f64, f64) },
    CelestialPolygon(Vec<SkyPoint>),
}

#[derive(Debug, Clone)]
pub struct CropRequest {
    pub id: u64,
    pub filename_stem: Option<String>,
    pub name_column_value: Option<String>,
    pub mode: CropMode,
}

/// The cropper's parameter struct (spec.md §6). The `clap`-derived CLI
/// struct in `src/bin/crop.rs` builds one of these before calling into the
/// library.
#[derive(Debug, Clone)]
pub struct CropperOptions {
    pub polygon_keep_outside: bool,
    pub polygon_sort: bool,
    pub no_blank: bool,
    pub keep_blank_center: bool,
    pub zero_is_not_blank: bool,
    pub check_center_box_width: usize,
    pub suffix: String,
}

impl Default for CropperOptions {
    fn default() -> Self {
        CropperOptions {
            polygon_keep_outside: false,
            polygon_sort: false,
            no_blank: false,
            keep_blank_center: false,
            zero_is_not_blank: false,
            check_center_box_width: 1,
            suffix: "crop".to_string(),
        }
    }
}

/// Per-output-header record of one contributing input and the pixel range
/// it contributed (the `ICFn`/`ICFnPIX` keys of spec.md §6).
#[derive(Debug, Clone)]
pub struct SourceRange {
    pub source: String,
    pub pixel_range: String,
}

pub struct CropOutput<T: PixelElement> {
    pub data: PixelArray<T>,
    /// The request's un-clipped first pixel, used to derive the
    /// coordinate-reference-pixel shift for the output header.
    pub ref_pixel_shift: Vec<i64>,
    pub sources: Vec<SourceRange>,
}

/// An un-clipped, possibly out-of-bounds pixel rectangle, 0-based inclusive.
#[derive(Debug, Clone)]
pub struct ResolvedRect {
    pub first: Vec<i64>,
    pub last: Vec<i64>,
}

impl ResolvedRect {
    pub fn extents(&self) -> Vec<i64> {
        self.first.iter().zip(&self.last).map(|(f, l)| l - f + 1).collect()
    }
}

/// Widens an even width by one pixel (spec.md §3: "Width is an odd integer
/// number of pixels per axis; if the user supplies an even integer it is
/// incremented").
pub fn normalize_width(width: usize) -> usize {
    if width % 2 == 0 {
        width + 1
    } else {
        width
    }
}

fn resolve_center_width(center: &[f64], width_pixels: &[usize]) -> ResolvedRect {
    let ndim = center.len();
    let mut first = vec![0i64; ndim];
    let mut last = vec![0i64; ndim];
    for d in 0..ndim {
        let w = normalize_width(width_pixels[d]) as i64;
        let half = (w - 1) / 2;
        let center_1based = center[d].round() as i64;
        let f = center_1based - half - 1; // shift to 0-based
        first[d] = f;
        last[d] = f + w - 1;
    }
    ResolvedRect { first, last }
}

/// Resolves a pixel-mode request to a rectangle, before intersecting with
/// the input's actual shape (spec.md §4.6).
pub fn resolve_pixel_rect(mode: &CropMode, shape: &[usize]) -> Result<ResolvedRect, CoreError> {
    match mode {
        CropMode::PixelCenterWidth { center, width_pixels } => Ok(resolve_center_width(center, width_pixels)),
        CropMode::PixelSection(spec) => {
            let ranges = section::parse_section(spec, shape)?;
            Ok(ResolvedRect {
                first: ranges.iter().map(|(lo, _)| *lo).collect(),
                last: ranges.iter().map(|(_, hi)| *hi).collect(),
            })
        }
        CropMode::PixelPolygon(vertices) => {
            validate_polygon(vertices)?;
            if shape.len() != 2 {
                return Err(ContractError::PolygonNot2D.into());
            }
            let xs = vertices.iter().map(|p| p.x);
            let ys = vertices.iter().map(|p| p.y);
            let x_lo = xs.clone().fold(f64::INFINITY, f64::min).floor() as i64 - 1;
            let x_hi = xs.fold(f64::NEG_INFINITY, f64::max).ceil() as i64 - 1;
            let y_lo = ys.clone().fold(f64::INFINITY, f64::min).floor() as i64 - 1;
            let y_hi = ys.fold(f64::NEG_INFINITY, f64::max).ceil() as i64 - 1;
            Ok(ResolvedRect { first: vec![y_lo, x_lo], last: vec![y_hi, x_hi] })
        }
        CropMode::CelestialCenterWidth { .. } | CropMode::CelestialPolygon(_) => Err(ContractError::Other(
            "celestial-mode request passed to the pixel-mode resolver".into(),
        )
        .into()),
    }
}

/// A request rectangle clipped to an input's bounds, 0-based inclusive.
#[derive(Debug, Clone)]
pub struct ClippedRect {
    pub first: Vec<usize>,
    pub last: Vec<usize>,
}

/// `None` when the rectangle and the input's shape do not intersect at all.
pub fn intersect_with_shape(rect: &ResolvedRect, shape: &[usize]) -> Option<ClippedRect> {
    let ndim = shape.len();
    let mut first = vec![0usize; ndim];
    let mut last = vec![0usize; ndim];
    for d in 0..ndim {
        let lo = rect.first[d].max(0);
        let hi = rect.last[d].min(shape[d] as i64 - 1);
        if lo > hi {
            return None;
        }
        first[d] = lo as usize;
        last[d] = hi as usize;
    }
    Some(ClippedRect { first, last })
}

fn blank_array<T: PixelElement>(extents: &[usize], blank: Option<T>) -> PixelArray<T> {
    let n: usize = extents.iter().product();
    let fill = blank.unwrap_or_else(T::default);
    PixelArray::from_vec(extents.to_vec(), vec![fill; n], blank).expect("extents match data length by construction")
}

fn copy_rectangle<T: PixelElement>(
    input: &PixelArray<T>,
    first: &[usize],
    last: &[usize],
    output: &mut PixelArray<T>,
    dest_offset: &[usize],
) {
    let extents: Vec<usize> = first.iter().zip(last).map(|(f, l)| l - f + 1).collect();
    let src_tile = input
        .subview(first, &extents)
        .expect("clipped rect lies inside input by construction");
    for (run_start, run_len) in src_tile.iter_runs() {
        let coord = input.coord_of(run_start);
        let mut dest_coord = coord.clone();
        for d in 0..dest_coord.len() {
            dest_coord[d] = dest_coord[d] - first[d] + dest_offset[d];
        }
        let dest_start = output.linear_index(&dest_coord);
        output.as_mut_slice()[dest_start..dest_start + run_len]
            .copy_from_slice(&input.as_slice()[run_start..run_start + run_len]);
    }
}

fn format_pixel_range(first: &[usize], last: &[usize]) -> String {
    first
        .iter()
        .zip(last)
        .map(|(f, l)| format!("{}:{}", f + 1, l + 1))
        .collect::<Vec<_>>()
        .join(",")
}

/// Masks output pixels outside (or, with `keep_outside`, inside) a 2-D
/// polygon given in the same pixel coordinates as `output_origin` (spec.md
/// §4.6). `output_origin` is `[y0, x0]`, the output's first pixel in input
/// (or world, for the celestial path's caller) pixel coordinates.
fn apply_polygon_mask<T: PixelElement>(output: &mut PixelArray<T>, vertices: &[Point2], keep_outside: bool, output_origin: &[i64]) {
    let shape = output.shape().to_vec();
    let blank = output.blank().unwrap_or_else(T::default);
    let ndim = shape.len();
    let tile = Tile::whole(&shape);
    for (run_start, run_len) in tile.iter_runs() {
        let coord = output.coord_of(run_start);
        for k in 0..run_len {
            let mut c = coord.clone();
            c[ndim - 1] += k;
            let y = output_origin[0] + c[0] as i64;
            let x = output_origin[ndim - 1] + c[ndim - 1] as i64;
            let point = Point2::new(x as f64, y as f64);
            let inside = point_in_polygon(vertices, point);
            let masked = if keep_outside { inside } else { !inside };
            if masked {
                output.as_mut_slice()[run_start + k] = blank;
            }
        }
    }
}

/// `crop_pixel_mode(requests, input_image, options) -> ()` (spec.md §4.6).
/// Returns one result per request; `Ok(None)` means no output was produced
/// (empty intersection, `keep_blank_center` off) — a per-request failure
/// never aborts the sibling requests.
pub fn crop_pixel_mode<T: PixelElement>(
    requests: &[CropRequest],
    input: &PixelArray<T>,
    input_name: &str,
    options: &CropperOptions,
) -> Vec<Result<Option<CropOutput<T>>, CoreError>> {
    requests.iter().map(|req| crop_one_pixel_mode(req, input, input_name, options)).collect()
}

fn crop_one_pixel_mode<T: PixelElement>(
    req: &CropRequest,
    input: &PixelArray<T>,
    input_name: &str,
    options: &CropperOptions,
) -> Result<Option<CropOutput<T>>, CoreError> {
    let shape = input.shape();
    let rect = resolve_pixel_rect(&req.mode, shape)?;
    let clipped = intersect_with_shape(&rect, shape);

    let clipped = match clipped {
        Some(c) => c,
        None => {
            if options.keep_blank_center {
                let extents: Vec<usize> = rect.extents().iter().map(|&e| e.max(0) as usize).collect();
                return Ok(Some(CropOutput {
                    data: blank_array(&extents, input.blank()),
                    ref_pixel_shift: rect.first.clone(),
                    sources: vec![SourceRange { source: input_name.to_string(), pixel_range: "none".to_string() }],
                }));
            }
            return Ok(None);
        }
    };

    let (out_first, out_extents): (Vec<i64>, Vec<usize>) = if options.no_blank {
        let first: Vec<i64> = clipped.first.iter().map(|&v| v as i64).collect();
        let extents: Vec<usize> = clipped.first.iter().zip(&clipped.last).map(|(f, l)| l - f + 1).collect();
        (first, extents)
    } else {
        let extents: Vec<usize> = rect.extents().iter().map(|&e| e as usize).collect();
        (rect.first.clone(), extents)
    };

    let mut output = blank_array(&out_extents, input.blank());

    let dest_offset: Vec<usize> = if options.no_blank {
        vec![0; shape.len()]
    } else {
        clipped.first.iter().zip(&rect.first).map(|(c, r)| (*c as i64 - r) as usize).collect()
    };

    copy_rectangle(input, &clipped.first, &clipped.last, &mut output, &dest_offset);

    if let CropMode::PixelPolygon(vertices) = &req.mode {
        apply_polygon_mask(&mut output, vertices, options.polygon_keep_outside, &out_first);
    }

    let sources = vec![SourceRange {
        source: input_name.to_string(),
        pixel_range: format_pixel_range(&clipped.first, &clipped.last),
    }];

    Ok(Some(CropOutput { data: output, ref_pixel_shift: out_first, sources }))
}

/// One input image bundled with its WCS, for the celestial-mode cropper.
pub struct CelestialInput<'a, T: PixelElement> {
    pub name: String,
    pub data: &'a PixelArray<T>,
    pub wcs: &'a dyn WcsTransform,
}

fn whole_image_region(wcs: &dyn WcsTransform, shape: &[usize]) -> Result<SkyRegion, CoreError> {
    if !wcs.is_axis_aligned() {
        return Err(ContractError::Misaligned.into());
    }
    let cx = shape[shape.len() - 1] as f64 / 2.0;
    let cy = shape[0] as f64 / 2.0;
    let center = wcs.img_to_world_scalar(cx, cy)?;
    let (ra_scale, dec_scale) = wcs.pixel_scale_deg(cx, cy)?;
    let half_ra = ra_scale * shape[shape.len() - 1] as f64 / 2.0;
    let half_dec = dec_scale * shape[0] as f64 / 2.0;
    Ok(SkyRegion::from_center_half_widths_deg(center, half_ra, half_dec))
}

fn bounding_center_width(vertices: &[SkyPoint]) -> Result<(SkyPoint, (f64, f64)), CoreError> {
    if vertices.len() < 3 {
        return Err(ContractError::PolygonTooFewVertices(vertices.len()).into());
    }
    let ra_lo = vertices.iter().map(|p| p.ra_deg).fold(f64::INFINITY, f64::min);
    let ra_hi = vertices.iter().map(|p| p.ra_deg).fold(f64::NEG_INFINITY, f64::max);
    let dec_lo = vertices.iter().map(|p| p.dec_deg).fold(f64::INFINITY, f64::min);
    let dec_hi = vertices.iter().map(|p| p.dec_deg).fold(f64::NEG_INFINITY, f64::max);
    let center = SkyPoint { ra_deg: (ra_lo + ra_hi) / 2.0, dec_deg: (dec_lo + dec_hi) / 2.0 };
    Ok((center, (ra_hi - ra_lo, dec_hi - dec_lo)))
}

fn apply_polygon_mask_world<T: PixelElement>(
    output: &mut PixelArray<T>,
    world_vertices: &[Point2],
    keep_outside: bool,
    wcs: &dyn WcsTransform,
    origin: &[i64],
) {
    let shape = output.shape().to_vec();
    let ndim = shape.len();
    let n: usize = shape.iter().product();
    let mut pixels = ndarray::Array2::<f64>::zeros((n, 2));
    for lin in 0..n {
        let coord = output.coord_of(lin);
        let y = origin[0] + coord[0] as i64;
        let x = origin[ndim - 1] + coord[ndim - 1] as i64;
        pixels[[lin, 0]] = x as f64;
        pixels[[lin, 1]] = y as f64;
    }
    let world = match wcs.img_to_world(&pixels) {
        Ok(w) => w,
        Err(_) => return,
    };
    let blank = output.blank().unwrap_or_else(T::default);
    for lin in 0..n {
        let point = Point2::new(world[[lin, 0]], world[[lin, 1]]);
        let inside = point_in_polygon(world_vertices, point);
        let masked = if keep_outside { inside } else { !inside };
        if masked {
            output.as_mut_slice()[lin] = blank;
        }
    }
}

/// `crop_celestial_mode(requests, input_images, options) -> ()` (spec.md
/// §4.6). Successive overlapping inputs accumulate into the same output;
/// `Ok(None)` covers both "no input overlaps" and "the center box ended up
/// all-blank" (unless `keep_blank_center` is set).
pub fn crop_celestial_mode<T: PixelElement>(
    requests: &[CropRequest],
    inputs: &[CelestialInput<T>],
    options: &CropperOptions,
) -> Vec<Result<Option<CropOutput<T>>, CoreError>> {
    requests.iter().map(|req| crop_one_celestial(req, inputs, options)).collect()
}

fn crop_one_celestial<T: PixelElement>(
    req: &CropRequest,
    inputs: &[CelestialInput<T>],
    options: &CropperOptions,
) -> Result<Option<CropOutput<T>>, CoreError> {
    let (center, width_deg) = match &req.mode {
        CropMode::CelestialCenterWidth { center, width_deg } => (*center, *width_deg),
        CropMode::CelestialPolygon(vertices) => bounding_center_width(vertices)?,
        _ => return Err(ContractError::Other("pixel-mode request passed to the celestial cropper".into()).into()),
    };

    let request_region = SkyRegion::from_center_half_widths_deg(center, width_deg.0 / 2.0, width_deg.1 / 2.0);

    let mut output: Option<PixelArray<T>> = None;
    let mut out_shape: Vec<usize> = Vec::new();
    let mut sources = Vec::new();
    let mut any_overlap = false;

    for input in inputs {
        let input_shape = input.data.shape();
        let input_region = whole_image_region(input.wcs, input_shape)?;
        if !rectangles_overlap(&request_region, &input_region) {
            continue;
        }
        any_overlap = true;

        let (cx0, cy0) = ((input_shape[input_shape.len() - 1] / 2) as f64, (input_shape[0] / 2) as f64);
        let (ra_scale, dec_scale) = input.wcs.pixel_scale_deg(cx0, cy0)?;
        if (ra_scale - dec_scale).abs() / ra_scale.max(dec_scale) > 1e-3 {
            return Err(ContractError::NonSquarePixelScale { ra_scale_deg: ra_scale, dec_scale_deg: dec_scale }.into());
        }

        if output.is_none() {
            let width_pixels_x = normalize_width((width_deg.0 / ra_scale).round().max(1.0) as usize);
            let width_pixels_y = normalize_width((width_deg.1 / dec_scale).round().max(1.0) as usize);
            out_shape = vec![width_pixels_y, width_pixels_x];
            output = Some(blank_array(&out_shape, input.data.blank()));
        }

        let (cx, cy) = input.wcs.world_to_img_scalar(center)?;
        let rect = resolve_center_width(&[cy + 1.0, cx + 1.0], &[out_shape[0], out_shape[1]]);
        let clipped = match intersect_with_shape(&rect, input_shape) {
            Some(c) => c,
            None => continue,
        };
        let dest_offset: Vec<usize> = clipped.first.iter().zip(&rect.first).map(|(c, r)| (*c as i64 - r) as usize).collect();
        let out = output.as_mut().unwrap();
        copy_rectangle(input.data, &clipped.first, &clipped.last, out, &dest_offset);

        if let CropMode::CelestialPolygon(sky_vertices) = &req.mode {
            let px_vertices: Vec<Point2> = sky_vertices.iter().map(|p| Point2::new(p.ra_deg, p.dec_deg)).collect();
            apply_polygon_mask_world(out, &px_vertices, options.polygon_keep_outside, input.wcs, &[0, 0]);
        }

        sources.push(SourceRange { source: input.name.clone(), pixel_range: format_pixel_range(&clipped.first, &clipped.last) });
    }

    if !any_overlap {
        return Ok(None);
    }
    let output = match output {
        Some(o) => o,
        None => return Ok(None),
    };

    if !center_is_filled(&output, options.check_center_box_width) && !options.keep_blank_center {
        return Ok(None);
    }

    Ok(Some(CropOutput { data: output, ref_pixel_shift: vec![0; out_shape.len()], sources }))
}

/// The inclusive `[lo, hi]` range of the configured center box along one
/// axis (spec.md §4.6: "a (configurable odd integer, defaulting to 1) cube
/// at the output image's geometric center").
pub fn center_box_range(extent: usize, box_width: usize) -> (usize, usize) {
    let bw = normalize_width(box_width.max(1)).min(extent.max(1));
    let center = extent / 2;
    let half = (bw.saturating_sub(1)) / 2;
    let lo = center.saturating_sub(half);
    let hi = (lo + bw - 1).min(extent.saturating_sub(1));
    (lo, hi)
}

/// The center-filled check of spec.md §4.6: true if any pixel in the center
/// box is not blank.
pub fn center_is_filled<T: PixelElement>(output: &PixelArray<T>, box_width: usize) -> bool {
    let shape = output.shape();
    let ranges: Vec<(usize, usize)> = shape.iter().map(|&e| center_box_range(e, box_width)).collect();
    let first: Vec<usize> = ranges.iter().map(|r| r.0).collect();
    let extents: Vec<usize> = ranges.iter().map(|r| r.1 - r.0 + 1).collect();
    let tile = match output.subview(&first, &extents) {
        Ok(t) => t,
        Err(_) => return false,
    };
    let blank = output.blank();
    for (start, len) in tile.iter_runs() {
        for k in 0..len {
            if !output.as_slice()[start + k].is_blank(blank) {
                return true;
            }
        }
    }
    false
}
