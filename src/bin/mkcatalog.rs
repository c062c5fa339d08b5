//! `mkcatalog`: thin CLI front end over [`astrocore::catalog`] (spec.md §6
//! Catalog builder parameter struct).
//!
//! As with `crop`, on-disk image/table I/O is an external-collaborator
//! contract (spec.md §1) this binary does not implement; it parses
//! arguments, builds the library's option structs, and documents the column
//! list grammar, but an embedding application must supply the actual
//! pixel/label arrays.

use clap::Parser;

use astrocore::catalog::CatalogOptions;
use astrocore::columns::{AreaColumn, ColumnKind, IdentifierColumn};
use astrocore::error::{CoreError, RuntimeIoError};
use astrocore::upperlimit::UpperLimitParams;

/// Build an object/clump catalog from a labeled image (spec.md §6).
#[derive(Debug, Parser)]
#[command(name = "mkcatalog", version, about)]
struct Args {
    /// Values image path.
    values: String,
    /// Label image path.
    labels: String,

    #[arg(long)]
    sub_labels: Option<String>,
    #[arg(long)]
    sky: Option<String>,
    #[arg(long)]
    sky_noise: Option<String>,

    #[arg(long)]
    clumps: bool,
    #[arg(long)]
    no_clump_sort: bool,

    #[arg(long, default_value_t = 0.0)]
    zeropoint: f64,

    /// `nsigma,tolerance`.
    #[arg(long, default_value = "3.0,0.01", value_delimiter = ',')]
    sigma_clip: Vec<f64>,

    #[arg(long)]
    upper_limit_mask_file: Option<String>,
    #[arg(long, default_value_t = 20)]
    upper_limit_num_samples: u32,
    #[arg(long, value_delimiter = ',')]
    upper_limit_range: Vec<usize>,
    #[arg(long)]
    upper_limit_env_seed: bool,
    #[arg(long, default_value_t = 3.0)]
    upper_limit_nsigma: f64,

    #[arg(long)]
    forcereadstd: bool,
    #[arg(long)]
    subtract_sky: bool,
    #[arg(long)]
    variance: bool,
    #[arg(long)]
    spectrum: bool,
    #[arg(long)]
    in_between_ints: bool,

    #[arg(long, default_value_t = 3.0)]
    surface_brightness_nsigma: f64,
    #[arg(long, default_value_t = 1.0)]
    surface_brightness_area: f64,

    #[arg(long)]
    cps_corr: Option<f64>,

    #[arg(long, default_value_t = 1)]
    master_seed: u64,

    /// Comma-separated column names; recognized: `label`, `host-object-id`,
    /// `sub-label`, `num-sub-labels`, `numall`, `num`, `brightness`,
    /// `magnitude`, `sn`, `spectrum-slice` (requires a 3-D input and
    /// `--spectrum`).
    #[arg(long, default_value = "label,numall,num,brightness", value_delimiter = ',')]
    column_list: Vec<String>,

    #[arg(long)]
    output: Option<String>,
}

fn parse_column(name: &str, zeropoint: f64) -> Result<ColumnKind, CoreError> {
    Ok(match name {
        "label" => ColumnKind::Identifier(IdentifierColumn::Label),
        "host-object-id" => ColumnKind::Identifier(IdentifierColumn::HostObjectId),
        "sub-label" => ColumnKind::Identifier(IdentifierColumn::SubLabelWithinObject),
        "num-sub-labels" => ColumnKind::Identifier(IdentifierColumn::NumSubLabels),
        "numall" => ColumnKind::Area(AreaColumn::NumAll),
        "num" => ColumnKind::Area(AreaColumn::Num),
        "numall-xy" => ColumnKind::Area(AreaColumn::NumAllXy),
        "num-xy" => ColumnKind::Area(AreaColumn::NumXy),
        "brightness" => ColumnKind::Brightness,
        "brightness-error" => ColumnKind::BrightnessError,
        "magnitude" => ColumnKind::Magnitude { zeropoint },
        "magnitude-error" => ColumnKind::MagnitudeError,
        "sn" => ColumnKind::SignalToNoise,
        "semi-major" => ColumnKind::SemiMajorAxis,
        "semi-minor" => ColumnKind::SemiMinorAxis,
        "position-angle" => ColumnKind::PositionAngle,
        "ra" => ColumnKind::WorldCoordinate { axis: 0 },
        "dec" => ColumnKind::WorldCoordinate { axis: 1 },
        "x" => ColumnKind::Center { axis: 1 },
        "y" => ColumnKind::Center { axis: 0 },
        "upper-limit" => ColumnKind::UpperLimitBrightness,
        "upper-limit-sigma" => ColumnKind::UpperLimitSigmaClipped,
        "sigma-clip-median" => ColumnKind::SigmaClippedMedian,
        "sigma-clip-mean" => ColumnKind::SigmaClippedMean,
        "sigma-clip-std" => ColumnKind::SigmaClippedStd,
        "spectrum-slice" => ColumnKind::SpectrumSlice,
        other => return Err(astrocore::error::ContractError::Other(format!("unknown column `{other}`")).into()),
    })
}

impl Args {
    fn to_options(&self) -> Result<CatalogOptions, CoreError> {
        let columns = self
            .column_list
            .iter()
            .map(|c| parse_column(c, self.zeropoint))
            .collect::<Result<Vec<_>, _>>()?;

        let upper_limit = if self.upper_limit_mask_file.is_some() || self.upper_limit_num_samples > 20 {
            Some(UpperLimitParams {
                num_samples: self.upper_limit_num_samples,
                placement_range: if self.upper_limit_range.is_empty() { None } else { Some(self.upper_limit_range.clone()) },
                nsigma: self.upper_limit_nsigma,
                clip_nsigma: self.sigma_clip.first().copied().unwrap_or(3.0),
                clip_tolerance: self.sigma_clip.get(1).copied().unwrap_or(0.01),
            })
        } else {
            None
        };

        Ok(CatalogOptions {
            clumps: self.clumps,
            no_clump_sort: self.no_clump_sort,
            zeropoint: self.zeropoint,
            sigma_clip_nsigma: self.sigma_clip.first().copied().unwrap_or(3.0),
            sigma_clip_tolerance: self.sigma_clip.get(1).copied().unwrap_or(0.01),
            upper_limit,
            subtract_sky: self.subtract_sky,
            variance_is_given: self.variance,
            spectrum: self.spectrum,
            in_between_ints: self.in_between_ints,
            surface_brightness_nsigma: self.surface_brightness_nsigma,
            surface_brightness_area_pixels: self.surface_brightness_area,
            cps_corr_override: self.cps_corr,
            master_seed: self.master_seed,
            columns,
        })
    }
}

fn run(args: &Args) -> Result<(), CoreError> {
    let _options = args.to_options()?;

    tracing::info!(values = %args.values, labels = %args.labels, "catalog request parsed");

    // See crop.rs: loading the actual pixel/label/sky arrays from
    // `args.values`/`args.labels` is an external-collaborator contract this
    // core does not implement.
    Err(CoreError::Io(RuntimeIoError::Read {
        path: args.values.clone(),
        source: anyhow::anyhow!(
            "no image reader is wired into this build; supply one via the embedding application"
        ),
    }))
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        tracing::error!(%err, "mkcatalog failed");
        std::process::exit(err.exit_code());
    }
}
