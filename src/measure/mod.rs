//! L7: measurement kernels (spec.md §4.7) — the three accumulation passes
//! that turn a label index into raw-measurement rows.

pub mod accumulate;
pub mod orderstat;
pub mod slots;
pub mod spectrum;
pub mod sky;

pub use accumulate::{accumulate_label, AccumulateOptions};
pub use orderstat::{collect_finite_values, median, sigma_clip, SigmaClipMode, SigmaClipParams, SigmaClipResult};
pub use sky::SkyField;
pub use slots::{ExtremumWithPosition, NeedFlags, RawMeasurement};
pub use spectrum::{build_spectrum, SpectrumRow};
