//! `crop`: thin CLI front end over [`astrocore::cropper`] (spec.md §6
//! Cropper parameter struct).
//!
//! Image and table I/O are explicitly out of scope for the core (spec.md
//! §1's "out of scope, external collaborators"); this binary parses
//! arguments and wires them into the library, but loading the input
//! images/catalog from disk is left to whatever embedding application
//! supplies a concrete reader — there is none vendored here.

use clap::Parser;

use astrocore::cropper::CropperOptions;
use astrocore::error::{CoreError, RuntimeIoError};

/// Crop one or more images in pixel or celestial coordinates (spec.md §6).
#[derive(Debug, Parser)]
#[command(name = "crop", version, about)]
struct Args {
    /// Input image paths, in stitching order.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// `pixel` or `celestial`.
    #[arg(long, default_value = "pixel")]
    coordinate_mode: String,

    /// Odd integer width per axis (incremented by one if even).
    #[arg(long, value_delimiter = ',')]
    width_pixels: Vec<usize>,

    /// Positive real width in degrees (celestial mode).
    #[arg(long)]
    width_degrees: Option<f64>,

    /// Center coordinate, one value per axis.
    #[arg(long, value_delimiter = ',')]
    center: Vec<f64>,

    /// Explicit section string: `dim-expr(",",dim-expr)*`.
    #[arg(long)]
    section: Option<String>,

    /// Polygon vertices as `x1,y1,x2,y2,...`.
    #[arg(long, value_delimiter = ',')]
    polygon: Vec<f64>,

    #[arg(long)]
    polygon_keep_outside: bool,

    #[arg(long)]
    polygon_sort: bool,

    /// Clip output to the actual input/request intersection instead of
    /// padding with blank.
    #[arg(long)]
    no_blank: bool,

    #[arg(long)]
    keep_blank_center: bool,

    #[arg(long)]
    zero_is_not_blank: bool,

    #[arg(long, default_value_t = 1)]
    check_center_box_width: usize,

    /// Catalog file supplying many crop centers/sections at once.
    #[arg(long)]
    catalog_file: Option<String>,

    #[arg(long)]
    name_column: Option<String>,

    #[arg(long, value_delimiter = ',')]
    coord_columns: Vec<String>,

    #[arg(long, default_value = "crop")]
    suffix: String,

    #[arg(long)]
    output: Option<String>,

    #[arg(long)]
    hstartwcs: Option<usize>,
    #[arg(long)]
    hendwcs: Option<usize>,
}

impl From<&Args> for CropperOptions {
    fn from(args: &Args) -> Self {
        CropperOptions {
            polygon_keep_outside: args.polygon_keep_outside,
            polygon_sort: args.polygon_sort,
            no_blank: args.no_blank,
            keep_blank_center: args.keep_blank_center,
            zero_is_not_blank: args.zero_is_not_blank,
            check_center_box_width: args.check_center_box_width,
            suffix: args.suffix.clone(),
        }
    }
}

fn run(args: &Args) -> Result<(), CoreError> {
    let _options = CropperOptions::from(args);

    tracing::info!(inputs = ?args.inputs, coordinate_mode = %args.coordinate_mode, "crop request parsed");

    // Loading `args.inputs` into `PixelArray`s (and, for celestial mode, a
    // `WcsTransform` per input) is the on-disk image I/O contract spec.md
    // §1/§6 leaves to an external collaborator; no such reader is vendored
    // in this core, so there is nothing further this binary can do without
    // one plugged in.
    Err(CoreError::Io(RuntimeIoError::Read {
        path: args.inputs.join(","),
        source: anyhow::anyhow!(
            "no image reader is wired into this build; supply one via the embedding application"
        ),
    }))
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        tracing::error!(%err, "crop failed");
        std::process::exit(err.exit_code());
    }
}
