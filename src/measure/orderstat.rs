//! Pass 2 — order statistics: median and iterative sigma-clipping
//! (spec.md §4.8).

use crate::array::{PixelArray, PixelElement, Tile};

/// Collects every non-blank, finite value under `label` within `tile`
/// (spec.md §4.8: order statistics need the actual sorted value set, not
/// just the running sums pass 1 keeps).
pub fn collect_finite_values<V: PixelElement>(
    values: &PixelArray<V>,
    labels: &PixelArray<i32>,
    tile: &Tile,
    label: i64,
) -> Vec<f64> {
    let mut out = Vec::new();
    for (run_start, run_len) in tile.iter_runs() {
        for k in 0..run_len {
            let lin = run_start + k;
            if labels.as_slice()[lin] as i64 != label {
                continue;
            }
            let v = values.as_slice()[lin];
            if v.is_blank(values.blank()) {
                continue;
            }
            let fv = v.to_f64();
            if fv.is_finite() {
                out.push(fv);
            }
        }
    }
    out
}

/// Median of a value set. Mutates the input by sorting it in place; callers
/// that still need the unsorted order should clone first. Returns `NaN` for
/// an empty set.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).expect("finite values only"));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Stop condition for the iterative sigma-clip (spec.md §4.8): either the
/// relative change in standard deviation between iterations falls below a
/// tolerance, or a fixed iteration count is reached.
#[derive(Debug, Clone, Copy)]
pub enum SigmaClipMode {
    Tolerance(f64),
    FixedIterations(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct SigmaClipParams {
    pub nsigma: f64,
    pub mode: SigmaClipMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SigmaClipResult {
    pub accepted: usize,
    pub median: f64,
    pub mean: f64,
    pub std: f64,
    pub iterations: u32,
}

/// Iterative sigma-clipping (spec.md §4.8): each round computes mean/std of
/// the currently-accepted set, rejects anything beyond `nsigma` standard
/// deviations of the mean, and repeats until the stop condition in
/// `params.mode` is reached or the accepted set stops shrinking.
pub fn sigma_clip(values: &[f64], params: &SigmaClipParams) -> SigmaClipResult {
    let mut accepted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if accepted.is_empty() {
        return SigmaClipResult { accepted: 0, median: f64::NAN, mean: f64::NAN, std: f64::NAN, iterations: 0 };
    }

    let mut prev_std = f64::INFINITY;
    let mut iterations = 0u32;
    let (mut mean, mut std) = mean_std(&accepted);

    loop {
        let done = match params.mode {
            SigmaClipMode::Tolerance(tol) => {
                iterations > 0 && prev_std > 0.0 && ((prev_std - std).abs() / prev_std) < tol
            }
            SigmaClipMode::FixedIterations(n) => iterations >= n,
        };
        if done || accepted.is_empty() {
            break;
        }

        let lo = mean - params.nsigma * std;
        let hi = mean + params.nsigma * std;
        let next: Vec<f64> = accepted.iter().copied().filter(|&v| v >= lo && v <= hi).collect();

        prev_std = std;
        iterations += 1;

        if next.len() == accepted.len() {
            accepted = next;
            break;
        }
        if next.is_empty() {
            break;
        }
        accepted = next;
        let (m, s) = mean_std(&accepted);
        mean = m;
        std = s;
    }

    let mut sorted = accepted.clone();
    let med = median(&mut sorted);

    SigmaClipResult { accepted: accepted.len(), median: med, mean, std, iterations }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_length_is_the_middle_value() {
        let mut v = vec![5.0, 1.0, 3.0];
        assert_eq!(median(&mut v), 3.0);
    }

    #[test]
    fn median_of_even_length_averages_the_two_middle_values() {
        let mut v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(median(&mut v), 2.5);
    }

    #[test]
    fn sigma_clip_removes_a_single_outlier() {
        let mut values: Vec<f64> = (0..20).map(|i| 10.0 + (i as f64) * 0.01).collect();
        values.push(1000.0);
        let params = SigmaClipParams { nsigma: 3.0, mode: SigmaClipMode::FixedIterations(5) };
        let result = sigma_clip(&values, &params);
        assert!(result.accepted < values.len());
        assert!((result.mean - 10.095).abs() < 0.5);
    }

    #[test]
    fn sigma_clip_on_empty_input_returns_nan() {
        let result = sigma_clip(&[], &SigmaClipParams { nsigma: 3.0, mode: SigmaClipMode::FixedIterations(3) });
        assert_eq!(result.accepted, 0);
        assert!(result.mean.is_nan());
    }

    #[test]
    fn collect_finite_values_skips_blank_and_nonlabel_pixels() {
        let labels = PixelArray::<i32>::from_vec(vec![2, 2], vec![1, 1, 0, 1], Some(0)).unwrap();
        let values = PixelArray::<f32>::from_vec(vec![2, 2], vec![1.0, 2.0, 9.0, f32::NAN], None).unwrap();
        let tile = Tile::whole(&[2, 2]);
        let got = collect_finite_values(&values, &labels, &tile, 1);
        assert_eq!(got, vec![1.0, 2.0]);
    }
}
