//! Section-string grammar (spec.md §6, §8 scenario 6):
//! `dim-expr ("," dim-expr)*`, each `dim-expr` is `lo:hi`; either side may be
//! `*`, `*+k`, or `*-k`.

use crate::error::ContractError;

/// Parses a section string into 0-based, inclusive `(lo, hi)` ranges, one
/// per axis, in the same order as the array's storage axes (spec.md §3:
/// dimension 0 slowest).
///
/// `*` alone on the low side of a `dim-expr` means "start of axis" (1 in
/// FITS 1-based convention); everywhere else — the high side, or any `*+k`/
/// `*-k` form regardless of side — it substitutes the axis's pixel extent,
/// per SPEC_FULL.md §8 scenario 6.
pub fn parse_section(spec: &str, shape: &[usize]) -> Result<Vec<(i64, i64)>, ContractError> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != shape.len() {
        return Err(ContractError::Other(format!(
            "section `{spec}` names {} axes but array has {}",
            parts.len(),
            shape.len()
        )));
    }
    let mut out = Vec::with_capacity(parts.len());
    for (d, part) in parts.iter().enumerate() {
        let (lo_s, hi_s) = part
            .split_once(':')
            .ok_or_else(|| ContractError::Other(format!("malformed dim-expr `{part}`, expected `lo:hi`")))?;
        let extent = shape[d] as i64;
        let lo = eval_side(lo_s.trim(), extent, true)?;
        let hi = eval_side(hi_s.trim(), extent, false)?;
        out.push((lo - 1, hi - 1));
    }
    Ok(out)
}

fn eval_side(token: &str, extent: i64, is_lo: bool) -> Result<i64, ContractError> {
    if token == "*" {
        return Ok(if is_lo { 1 } else { extent });
    }
    if let Some(rest) = token.strip_prefix("*+") {
        let k: i64 = rest
            .parse()
            .map_err(|_| ContractError::Other(format!("bad offset in `{token}`")))?;
        return Ok(extent + k);
    }
    if let Some(rest) = token.strip_prefix("*-") {
        let k: i64 = rest
            .parse()
            .map_err(|_| ContractError::Other(format!("bad offset in `{token}`")))?;
        return Ok(extent - k);
    }
    token
        .parse()
        .map_err(|_| ContractError::Other(format!("bad section bound `{token}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_bounds_are_one_based_inclusive() {
        let ranges = parse_section("20:40,30:50", &[100, 100]).unwrap();
        assert_eq!(ranges, vec![(19, 39), (29, 49)]);
    }

    #[test]
    fn asterisk_grammar_matches_spec_scenario() {
        // spec.md §8 scenario 6: "*:10,*-5:*" on a (100,100) image.
        let ranges = parse_section("*:10,*-5:*", &[100, 100]).unwrap();
        assert_eq!(ranges, vec![(0, 9), (94, 99)]);
    }

    #[test]
    fn wrong_axis_count_is_rejected() {
        assert!(parse_section("1:10", &[100, 100]).is_err());
    }

    #[test]
    fn malformed_dim_expr_is_rejected() {
        assert!(parse_section("1-10,1:10", &[100, 100]).is_err());
    }
}
