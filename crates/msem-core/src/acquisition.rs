//! Read-only view of a wafer acquisition log and the slab model derived from it.

use crate::error::{ImportError, ImportResult, LogError};
use crate::layout::MfovPosition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

pub type LogResult<T> = std::result::Result<T, LogError>;

/// One SFOV image of a scan with its stage position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfovRecord {
    pub path: PathBuf,
    pub x: i64,
    pub y: i64,
}

/// SFOV records of one MFOV, ordered by 0-based SFOV index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfovSfovs {
    pub mfov: u32,
    pub sfovs: Vec<SfovRecord>,
}

/// Slab as enumerated by the acquisition log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlabEntry {
    pub magc_id: u32,
    /// Physical (cutting) order of the slab on the wafer
    pub serial_id: u32,
    pub mfovs: Vec<u32>,
}

/// Accessors the importer needs from a wafer acquisition log.
///
/// Implementations are shared across slab import threads, so they must not
/// hold per-read mutable state.
pub trait AcquisitionLog: Send + Sync {
    /// Maximum number of scans acquired for any slab
    fn max_scans(&self) -> LogResult<u32>;

    /// All slabs of the wafer
    fn slabs(&self) -> LogResult<Vec<SlabEntry>>;

    /// Stage positions of a slab's MFOVs
    fn mfov_positions(&self, slab: u32) -> LogResult<Vec<MfovPosition>>;

    /// Directory holding a slab's images for one scan
    fn slab_path(&self, scan: u32, slab: u32) -> LogResult<PathBuf>;

    /// SFOV images and stage positions for one MFOV of one scan, by SFOV index
    fn sfovs(&self, scan: u32, slab: u32, mfov: u32) -> LogResult<Vec<SfovRecord>>;

    /// Scans for which the slab has acquired data
    fn effective_scans(&self, slab: u32) -> LogResult<BTreeSet<u32>>;

    /// SFOV image width in pixels
    fn sfov_width(&self) -> LogResult<u32>;

    /// SFOV image height in pixels
    fn sfov_height(&self) -> LogResult<u32>;
}

/// Slab with its derived render stack name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabInfo {
    pub magc_id: u32,
    pub serial_id: u32,
    pub mfovs: Vec<u32>,
    pub stack_name: String,
}

impl SlabInfo {
    pub fn new(wafer_short_prefix: &str, entry: SlabEntry) -> Self {
        let stack_name = format!(
            "{}s{:03}_m{:03}",
            wafer_short_prefix, entry.serial_id, entry.magc_id
        );
        Self {
            magc_id: entry.magc_id,
            serial_id: entry.serial_id,
            mfovs: entry.mfovs,
            stack_name,
        }
    }

    pub fn first_mfov(&self) -> Option<u32> {
        self.mfovs.first().copied()
    }

    pub fn last_mfov(&self) -> Option<u32> {
        self.mfovs.last().copied()
    }
}

/// Contiguous run of slabs (by serial id) saved to one render project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabGroup {
    pub wafer_short_prefix: String,
    pub ordered_slabs: Vec<SlabInfo>,
}

impl SlabGroup {
    /// Project name covering the aligned serial range of the group,
    /// e.g. `w60_serial_290_to_299`.
    pub fn to_render_project_name(&self, number_of_slabs_per_group: u32) -> String {
        let per_group = number_of_slabs_per_group.max(1);
        let first_serial = self
            .ordered_slabs
            .first()
            .map(|slab| slab.serial_id)
            .unwrap_or(0);
        let first = (first_serial / per_group) * per_group;
        let last = first + per_group - 1;
        format!(
            "{}serial_{:03}_to_{:03}",
            self.wafer_short_prefix, first, last
        )
    }

    pub fn len(&self) -> usize {
        self.ordered_slabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_slabs.is_empty()
    }
}

/// Enumerate the slabs of a log and batch them into groups by serial id.
pub fn load_slab_info(
    log: &dyn AcquisitionLog,
    wafer_short_prefix: &str,
    number_of_slabs_per_group: u32,
) -> ImportResult<Vec<SlabGroup>> {
    if number_of_slabs_per_group == 0 {
        return Err(ImportError::InvalidOptions(
            "number of slabs per group must be at least 1".to_string(),
        ));
    }

    let mut slabs: Vec<SlabInfo> = log
        .slabs()?
        .into_iter()
        .map(|entry| SlabInfo::new(wafer_short_prefix, entry))
        .collect();
    slabs.sort_by_key(|slab| (slab.serial_id, slab.magc_id));

    let mut groups: Vec<SlabGroup> = Vec::new();
    let mut current_group_index = None;
    for slab in slabs {
        let group_index = slab.serial_id / number_of_slabs_per_group;
        if current_group_index != Some(group_index) {
            groups.push(SlabGroup {
                wafer_short_prefix: wafer_short_prefix.to_string(),
                ordered_slabs: Vec::new(),
            });
            current_group_index = Some(group_index);
        }
        if let Some(group) = groups.last_mut() {
            group.ordered_slabs.push(slab);
        }
    }

    Ok(groups)
}

/// Keep only slabs with the given magc ids. An empty filter keeps everything.
pub fn filter_slab_groups(
    slab_groups: Vec<SlabGroup>,
    magc_ids: &BTreeSet<u32>,
) -> ImportResult<Vec<SlabGroup>> {
    if magc_ids.is_empty() {
        return Ok(slab_groups);
    }

    let filtered: Vec<SlabGroup> = slab_groups
        .into_iter()
        .filter_map(|group| {
            let ordered_slabs: Vec<SlabInfo> = group
                .ordered_slabs
                .into_iter()
                .filter(|slab| magc_ids.contains(&slab.magc_id))
                .collect();
            (!ordered_slabs.is_empty()).then(|| SlabGroup {
                wafer_short_prefix: group.wafer_short_prefix,
                ordered_slabs,
            })
        })
        .collect();

    if filtered.is_empty() {
        return Err(ImportError::NoMatchingSlabs(magc_ids.iter().copied().collect()));
    }
    Ok(filtered)
}
