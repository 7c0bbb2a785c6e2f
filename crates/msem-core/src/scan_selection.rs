//! Which scans of a slab to import.

use std::collections::BTreeSet;

/// Scans chosen for one slab
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSelection {
    /// Scans to import, ascending
    pub scans: Vec<u32>,
    /// Requested scans the slab has no data for
    pub missing_includes: Vec<u32>,
}

impl ScanSelection {
    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }
}

/// Select scans from include/exclude filters and the scans that have data.
///
/// A non-empty `include_scans` overrides `exclude_scans` completely; the exclude
/// list only applies when every effective scan is a candidate.
pub fn select_scans(
    include_scans: &BTreeSet<u32>,
    exclude_scans: &BTreeSet<u32>,
    effective_scans: &BTreeSet<u32>,
) -> ScanSelection {
    let missing_includes = include_scans
        .difference(effective_scans)
        .copied()
        .collect();

    let scans = if include_scans.is_empty() {
        effective_scans
            .difference(exclude_scans)
            .copied()
            .collect()
    } else {
        include_scans
            .intersection(effective_scans)
            .copied()
            .collect()
    };

    ScanSelection {
        scans,
        missing_includes,
    }
}
