//! Natural (numeric-aware) string ordering.
//!
//! Export output must be deterministic, and the original store hands out
//! numeric identifiers as strings. Plain lexicographic ordering would place
//! `"node-10"` before `"node-2"`; natural ordering compares runs of digits
//! by their numeric value, so `"node-2"` sorts first.
//!
//! Used for the discovered record list, the per-definition source path lists
//! and the final migration ID list.
//!
//! # Examples
//!
//! ```
//! use ce_core::natural_sort;
//!
//! let mut ids = vec!["node:10".to_owned(), "node:2".to_owned(), "node:1".to_owned()];
//! natural_sort(&mut ids);
//! assert_eq!(ids, ["node:1", "node:2", "node:10"]);
//! ```

use std::cmp::Ordering;

/// Compares two strings using natural (numeric-aware) ordering.
///
/// Runs of ASCII digits are compared by numeric value; everything else is
/// compared byte-wise. The ordering is total and consistent with equality:
/// strings that differ only in leading zeros (`"a02"` vs `"a2"`) fall back
/// to a final byte-wise comparison so they never compare as equal.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut lhs = a.as_bytes();
    let mut rhs = b.as_bytes();

    while !lhs.is_empty() && !rhs.is_empty() {
        if lhs[0].is_ascii_digit() && rhs[0].is_ascii_digit() {
            let (l_run, l_rest) = split_digit_run(lhs);
            let (r_run, r_rest) = split_digit_run(rhs);
            match cmp_digit_runs(l_run, r_run) {
                Ordering::Equal => {
                    lhs = l_rest;
                    rhs = r_rest;
                }
                other => return other,
            }
        } else {
            match lhs[0].cmp(&rhs[0]) {
                Ordering::Equal => {
                    lhs = &lhs[1..];
                    rhs = &rhs[1..];
                }
                other => return other,
            }
        }
    }

    match lhs.len().cmp(&rhs.len()) {
        // Identical up to digit-run equivalence; make the order total.
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

/// Sorts a slice of strings in natural order, in place.
pub fn natural_sort<S: AsRef<str>>(items: &mut [S]) {
    items.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

/// Splits a byte slice into its leading digit run and the remainder.
fn split_digit_run(bytes: &[u8]) -> (&[u8], &[u8]) {
    let end = bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len());
    bytes.split_at(end)
}

/// Compares two digit runs by numeric value without parsing into integers.
///
/// Leading zeros are skipped; a longer stripped run is always the larger
/// number, and equal-length runs compare byte-wise.
fn cmp_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(run: &[u8]) -> &[u8] {
    let start = run.iter().position(|&b| b != b'0').unwrap_or(run.len());
    &run[start..]
}
