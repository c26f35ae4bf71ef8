//! Fuzzy matching of a stored hardware binding against the current machine.
//!
//! A license stores N fingerprints and a threshold T. The license stays bound
//! while at least T stored fingerprints are found on the current machine, so
//! up to N - T components may change without invalidating it.

use std::fmt;

use crate::hash::hex_eq_ct;

/// Per-entry match status, for support diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEntry {
    /// Position in the stored binding.
    pub index: usize,
    /// The stored fingerprint.
    pub fingerprint: String,
    /// Whether a current fingerprint satisfied it.
    pub matched: bool,
}

/// Full diagnostic outcome of a binding comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub entries: Vec<MatchEntry>,
    pub matches: usize,
    pub threshold: usize,
    pub passed: bool,
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Hardware binding: {} of {} matched (threshold {}) - {}",
            self.matches,
            self.entries.len(),
            self.threshold,
            if self.passed { "PASS" } else { "FAIL" }
        )?;
        for entry in &self.entries {
            writeln!(
                f,
                "  [{}] {} {}",
                entry.index + 1,
                entry.fingerprint,
                if entry.matched { "match" } else { "no match" }
            )?;
        }
        Ok(())
    }
}

/// Compares fingerprint sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyBindingMatcher;

impl FuzzyBindingMatcher {
    /// Counts stored fingerprints found in `current`.
    ///
    /// Each current fingerprint satisfies at most one stored entry.
    #[must_use]
    pub fn count_matches(stored: &[String], current: &[String]) -> usize {
        Self::match_flags(stored, current)
            .into_iter()
            .filter(|m| *m)
            .count()
    }

    /// True when `stored` is empty or at least `threshold` entries match.
    #[must_use]
    pub fn verify(stored: &[String], current: &[String], threshold: usize) -> bool {
        if stored.is_empty() {
            return true;
        }
        Self::count_matches(stored, current) >= threshold
    }

    /// Per-entry breakdown of the comparison. Same decision as [`Self::verify`].
    #[must_use]
    pub fn diagnose(stored: &[String], current: &[String], threshold: usize) -> MatchReport {
        let flags = Self::match_flags(stored, current);
        let matches = flags.iter().filter(|m| **m).count();
        let entries = stored
            .iter()
            .zip(flags)
            .enumerate()
            .map(|(index, (fingerprint, matched))| MatchEntry {
                index,
                fingerprint: fingerprint.clone(),
                matched,
            })
            .collect();
        MatchReport {
            entries,
            matches,
            threshold,
            passed: stored.is_empty() || matches >= threshold,
        }
    }

    fn match_flags(stored: &[String], current: &[String]) -> Vec<bool> {
        let mut used = vec![false; current.len()];
        stored
            .iter()
            .map(|s| {
                // Scan every candidate so timing does not reveal the match position.
                let mut hit: Option<usize> = None;
                for (i, c) in current.iter().enumerate() {
                    let eq = hex_eq_ct(s, c);
                    if eq && !used[i] && hit.is_none() {
                        hit = Some(i);
                    }
                }
                if let Some(i) = hit {
                    used[i] = true;
                }
                hit.is_some()
            })
            .collect()
    }
}
