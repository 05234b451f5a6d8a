//! Package version ordering.
//!
//! Implements the conventional package-version comparison used by Linux
//! package managers: version-release strings are walked component by
//! component, numeric runs compare numerically and alphabetic runs
//! lexically, and a `~` marks a pre-release that sorts below the same
//! version without it. This comparator is the single source of truth
//! for "latest" across the whole catalog.

use std::cmp::Ordering;

/// Compare two `version-release` strings.
///
/// The version part (up to the first `-`) is compared first; the
/// release part breaks ties. `1.2-3 < 1.10-1 < 1.10-2`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (ver_a, rel_a) = split_ver_rel(a);
    let (ver_b, rel_b) = split_ver_rel(b);
    match segment_cmp(ver_a, ver_b) {
        Ordering::Equal => segment_cmp(rel_a, rel_b),
        other => other,
    }
}

fn split_ver_rel(ver_rel: &str) -> (&str, &str) {
    match ver_rel.split_once('-') {
        Some((ver, rel)) => (ver, rel),
        None => (ver_rel, ""),
    }
}

/// Compare one version segment (no `-` splitting).
///
/// Separator characters only delimit runs and never count themselves,
/// so `1.0.1` and `1.0_1` compare equal.
pub fn segment_cmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut i = 0;
    let mut j = 0;
    loop {
        while i < a.len() && !a[i].is_ascii_alphanumeric() && a[i] != b'~' {
            i += 1;
        }
        while j < b.len() && !b[j].is_ascii_alphanumeric() && b[j] != b'~' {
            j += 1;
        }
        // A tilde sorts below everything, even the end of the string.
        let tilde_a = i < a.len() && a[i] == b'~';
        let tilde_b = j < b.len() && b[j] == b'~';
        if tilde_a || tilde_b {
            if tilde_a && tilde_b {
                i += 1;
                j += 1;
                continue;
            }
            return if tilde_a {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
        if i >= a.len() || j >= b.len() {
            break;
        }
        let numeric = a[i].is_ascii_digit();
        let start_a = i;
        let start_b = j;
        if numeric {
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
        } else {
            while i < a.len() && a[i].is_ascii_alphabetic() {
                i += 1;
            }
            while j < b.len() && b[j].is_ascii_alphabetic() {
                j += 1;
            }
        }
        let run_a = &a[start_a..i];
        let run_b = &b[start_b..j];
        if run_b.is_empty() {
            // Mismatched run types: the numeric side is newer.
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }
        if numeric {
            let trimmed_a = trim_leading_zeros(run_a);
            let trimmed_b = trim_leading_zeros(run_b);
            match trimmed_a.len().cmp(&trimmed_b.len()) {
                Ordering::Equal => {}
                other => return other,
            }
            match trimmed_a.cmp(trimmed_b) {
                Ordering::Equal => {}
                other => return other,
            }
        } else {
            match run_a.cmp(run_b) {
                Ordering::Equal => {}
                other => return other,
            }
        }
    }
    // Whoever still has content left is newer.
    (a.len() - i).cmp(&(b.len() - j))
}

fn trim_leading_zeros(run: &[u8]) -> &[u8] {
    let first = run.iter().position(|c| *c != b'0').unwrap_or(run.len());
    &run[first..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(a: &str, b: &str) {
        assert_eq!(compare_versions(a, b), Ordering::Less, "{a} < {b}");
        assert_eq!(compare_versions(b, a), Ordering::Greater, "{b} > {a}");
    }

    fn eq(a: &str, b: &str) {
        assert_eq!(compare_versions(a, b), Ordering::Equal, "{a} == {b}");
    }

    #[test]
    fn numeric_runs_compare_numerically() {
        lt("1.2-3", "1.10-1");
        lt("1.10-1", "1.10-2");
        lt("2.9", "2.10");
        lt("0.9.9", "0.10.0");
    }

    #[test]
    fn leading_zeros_are_insignificant() {
        eq("1.02-1", "1.2-1");
        lt("1.02-1", "1.3-1");
    }

    #[test]
    fn tilde_sorts_before_release() {
        lt("1.0~rc1", "1.0");
        lt("1.0~rc1-1", "1.0-1");
        lt("1.0~alpha", "1.0~beta");
        eq("1.0~rc1", "1.0~rc1");
    }

    #[test]
    fn alpha_vs_numeric() {
        // A numeric run is newer than an alphabetic one.
        lt("1.0a", "1.0.1");
        lt("1.0rc", "1.0.0");
    }

    #[test]
    fn release_breaks_version_ties() {
        lt("1.0-1", "1.0-2");
        lt("1.0-1.el8", "1.0-2.el8");
        eq("1.0-1", "1.0-1");
    }

    #[test]
    fn version_dominates_release() {
        // 1.0-2 vs 1.0.1-1: the version part decides before the release
        // is ever looked at.
        lt("1.0-2", "1.0.1-1");
    }

    #[test]
    fn separators_only_delimit() {
        eq("1.0.1", "1.0_1");
        eq("1..0", "1.0");
    }

    #[test]
    fn longer_version_wins() {
        lt("1.0", "1.0.1");
        lt("1.0-1", "1.0-1.1");
    }

    #[test]
    fn ordering_is_transitive_on_samples() {
        let mut versions = vec![
            "1.0~rc1-1", "1.0-1", "1.0-2", "1.0.1-1", "1.2-3", "1.10-1", "1.10-2", "2.0-0.1",
        ];
        let sorted = versions.clone();
        versions.reverse();
        versions.sort_by(|a, b| compare_versions(a, b));
        assert_eq!(versions, sorted);
    }
}
