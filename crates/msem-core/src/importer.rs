//! Import of slab scans into render stacks.
//!
//! Every slab maps to one stack. Selected scans are imported in ascending order,
//! each successful scan becoming the next layer (z) of the stack. A stack is only
//! touched once a scan actually produces tiles: it is created or reopened in
//! `LOADING` state before the first batch and marked `COMPLETE` after the last.

use crate::acquisition::{
    filter_slab_groups, load_slab_info, AcquisitionLog, MfovSfovs, SlabGroup, SlabInfo,
};
use crate::error::{ImportError, ImportResult};
use crate::layout::{FieldOfViewLayout, LayoutParameters};
use crate::scan_fit::ScanFitParameters;
use crate::scan_selection::select_scans;
use crate::store::{RenderStore, StackId, StackResolution, StackState, StoreResult};
use crate::tile_spec::{build_tile_specs_for_slab_scan, SlabScanContext, TileSpec, DEFAULT_MARGIN};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Default number of slabs saved to one render project
pub const DEFAULT_SLABS_PER_PROJECT: u32 = 10;

/// Settings for one import run
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Wafer id, e.g. `60` or `B13`; prefixes all project and stack names
    pub wafer_id: String,
    /// Only import slabs with these magc ids (empty = all)
    pub import_magc_slabs: BTreeSet<u32>,
    /// Only import these scans; overrides `exclude_scans` when non-empty
    pub include_scans: BTreeSet<u32>,
    pub exclude_scans: BTreeSet<u32>,
    pub number_of_slabs_per_render_project: u32,
    pub layout: LayoutParameters,
    pub scan_fit: ScanFitParameters,
    pub margin: i64,
    pub resolution: StackResolution,
    pub derive_data: bool,
    /// Import the slabs of a group concurrently
    pub parallel_slabs: bool,
}

impl ImportOptions {
    pub fn new(wafer_id: impl Into<String>, scan_fit: ScanFitParameters) -> Self {
        Self {
            wafer_id: wafer_id.into(),
            import_magc_slabs: BTreeSet::new(),
            include_scans: BTreeSet::new(),
            exclude_scans: BTreeSet::new(),
            number_of_slabs_per_render_project: DEFAULT_SLABS_PER_PROJECT,
            layout: LayoutParameters::default(),
            scan_fit,
            margin: DEFAULT_MARGIN,
            resolution: StackResolution::default(),
            derive_data: true,
            parallel_slabs: false,
        }
    }

    pub fn wafer_short_prefix(&self) -> String {
        format!("w{}_", self.wafer_id)
    }
}

/// Why a selected scan was not imported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The scan's first SFOV image is not on disk
    MissingImage(PathBuf),
    /// The log has no SFOVs for the scan
    NoTiles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedScan {
    pub scan: u32,
    pub z: u32,
    pub tile_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedScan {
    pub scan: u32,
    pub reason: SkipReason,
}

/// Outcome for one stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackImportReport {
    pub stack: StackId,
    pub magc_id: u32,
    pub imported: Vec<ImportedScan>,
    pub skipped: Vec<SkippedScan>,
    /// Requested include scans the slab has no data for
    pub missing_includes: Vec<u32>,
    /// Whether the stack was marked complete during this run
    pub completed: bool,
}

impl StackImportReport {
    pub fn tile_count(&self) -> usize {
        self.imported.iter().map(|scan| scan.tile_count).sum()
    }
}

/// Outcome of a whole import run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub stacks: Vec<StackImportReport>,
}

impl ImportReport {
    pub fn tile_count(&self) -> usize {
        self.stacks.iter().map(StackImportReport::tile_count).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPhase {
    /// Nothing written in this run
    Untouched,
    Loading,
    Completed,
}

/// Loading lifecycle of one stack during one run.
///
/// Hands out dense layer indexes: z starts at 1 and only advances when a batch
/// is saved.
pub struct StackLoader<'a> {
    store: &'a dyn RenderStore,
    stack: &'a StackId,
    resolution: StackResolution,
    derive_data: bool,
    phase: LoadPhase,
    next_z: u32,
}

impl<'a> StackLoader<'a> {
    pub fn new(
        store: &'a dyn RenderStore,
        stack: &'a StackId,
        resolution: StackResolution,
        derive_data: bool,
    ) -> Self {
        Self {
            store,
            stack,
            resolution,
            derive_data,
            phase: LoadPhase::Untouched,
            next_z: 1,
        }
    }

    /// Layer index the next saved batch will get
    pub fn next_z(&self) -> u32 {
        self.next_z
    }

    /// Create the stack if it is absent, otherwise force it into `LOADING`.
    fn ensure_loading(&mut self) -> StoreResult<()> {
        if self.phase == LoadPhase::Loading {
            return Ok(());
        }
        match self.store.stack_state(self.stack)? {
            None => {
                info!("creating stack {}", self.stack);
                self.store.create_stack(self.stack, &self.resolution)?;
            }
            Some(state) => {
                debug!("stack {} is {}, setting it to LOADING", self.stack, state);
                self.store
                    .set_stack_state(self.stack, StackState::Loading)?;
            }
        }
        self.phase = LoadPhase::Loading;
        Ok(())
    }

    /// Save one scan's tiles as the current layer and advance z.
    ///
    /// Returns the z the batch was saved at. Empty batches are ignored.
    pub fn save_layer(&mut self, tile_specs: &[TileSpec]) -> StoreResult<Option<u32>> {
        let (Some(first), Some(last)) = (tile_specs.first(), tile_specs.last()) else {
            return Ok(None);
        };
        self.ensure_loading()?;

        info!(
            "saving tiles {} to {} in stack {}",
            first.tile_id, last.tile_id, self.stack
        );
        self.store
            .save_tile_specs(self.stack, tile_specs, self.derive_data)?;

        let z = self.next_z;
        self.next_z += 1;
        Ok(Some(z))
    }

    /// Mark the stack complete if this run put it into `LOADING`.
    ///
    /// Returns whether the stack was completed.
    pub fn finish(&mut self) -> StoreResult<bool> {
        if self.phase != LoadPhase::Loading {
            return Ok(false);
        }
        self.store
            .set_stack_state(self.stack, StackState::Complete)?;
        self.phase = LoadPhase::Completed;
        Ok(true)
    }
}

/// Values shared by every slab of a run
struct WaferImport<'a> {
    log: &'a dyn AcquisitionLog,
    store: &'a dyn RenderStore,
    options: &'a ImportOptions,
    tile_width: u32,
    tile_height: u32,
}

impl WaferImport<'_> {
    fn load_mfov_sfovs(&self, scan: u32, slab: &SlabInfo) -> ImportResult<Vec<MfovSfovs>> {
        slab.mfovs
            .iter()
            .map(|&mfov| {
                let sfovs = self.log.sfovs(scan, slab.magc_id, mfov)?;
                Ok(MfovSfovs { mfov, sfovs })
            })
            .collect()
    }

    fn import_slab(&self, project: &str, slab: &SlabInfo) -> ImportResult<StackImportReport> {
        let stack = StackId::new(project, slab.stack_name.clone());
        let options = self.options;

        info!("building layout for stack {}", stack);
        let mfov_positions = self.log.mfov_positions(slab.magc_id)?;
        let layout = FieldOfViewLayout::build(&mfov_positions, &options.layout)?;

        let effective_scans = self.log.effective_scans(slab.magc_id)?;
        let selection = select_scans(
            &options.include_scans,
            &options.exclude_scans,
            &effective_scans,
        );
        for scan in &selection.missing_includes {
            warn!("scan {} not found for stack {}", scan, stack);
        }
        if selection.is_empty() {
            warn!("found no scans to import for stack {}", stack);
        }
        info!(
            "found {} scans to import for stack {}",
            selection.scans.len(),
            stack
        );

        let mut report = StackImportReport {
            stack: stack.clone(),
            magc_id: slab.magc_id,
            imported: Vec::new(),
            skipped: Vec::new(),
            missing_includes: selection.missing_includes.clone(),
            completed: false,
        };
        let mut loader = StackLoader::new(
            self.store,
            &stack,
            options.resolution,
            options.derive_data,
        );

        for &scan in &selection.scans {
            let slab_scan_path = self.log.slab_path(scan, slab.magc_id)?;
            let mfov_sfovs = self.load_mfov_sfovs(scan, slab)?;
            let sfov_count: usize = mfov_sfovs.iter().map(|mfov| mfov.sfovs.len()).sum();

            let Some(first_sfov) = mfov_sfovs.iter().find_map(|mfov| mfov.sfovs.first()) else {
                debug!(
                    "no tile specs in {} for stack {}",
                    slab_scan_path.display(),
                    stack
                );
                report.skipped.push(SkippedScan {
                    scan,
                    reason: SkipReason::NoTiles,
                });
                continue;
            };

            info!(
                "loaded {} paths and xys for {} scan {}, mfovs {:?} to {:?}, first path is {}, first xy is ({}, {})",
                sfov_count,
                stack,
                scan,
                slab.first_mfov(),
                slab.last_mfov(),
                first_sfov.path.display(),
                first_sfov.x,
                first_sfov.y
            );

            if !first_sfov.path.exists() {
                warn!(
                    "skipping import of scan {} because {} is missing",
                    scan,
                    first_sfov.path.display()
                );
                report.skipped.push(SkippedScan {
                    scan,
                    reason: SkipReason::MissingImage(first_sfov.path.clone()),
                });
                continue;
            }

            let ctx = SlabScanContext {
                wafer_id: &options.wafer_id,
                slab: slab.magc_id,
                scan,
                z: loader.next_z(),
                tile_width: self.tile_width,
                tile_height: self.tile_height,
                margin: options.margin,
                layout: &layout,
                scan_fit: &options.scan_fit,
            };
            let tile_specs = build_tile_specs_for_slab_scan(&ctx, &mfov_sfovs)?;
            info!(
                "built {} tile specs from {}",
                tile_specs.len(),
                slab_scan_path.display()
            );

            match loader.save_layer(&tile_specs)? {
                Some(z) => report.imported.push(ImportedScan {
                    scan,
                    z,
                    tile_count: tile_specs.len(),
                }),
                None => {
                    debug!(
                        "no tile specs in {} for stack {}",
                        slab_scan_path.display(),
                        stack
                    );
                    report.skipped.push(SkippedScan {
                        scan,
                        reason: SkipReason::NoTiles,
                    });
                }
            }
        }

        report.completed = loader.finish()?;
        Ok(report)
    }

    fn import_group(&self, slab_group: &SlabGroup) -> ImportResult<Vec<StackImportReport>> {
        let project = slab_group
            .to_render_project_name(self.options.number_of_slabs_per_render_project);
        info!(
            "importing {} slabs into project {}",
            slab_group.len(),
            project
        );

        if self.options.parallel_slabs {
            slab_group
                .ordered_slabs
                .par_iter()
                .map(|slab| self.import_slab(&project, slab))
                .collect()
        } else {
            slab_group
                .ordered_slabs
                .iter()
                .map(|slab| self.import_slab(&project, slab))
                .collect()
        }
    }
}

/// Import every (filtered) slab of a wafer into its render stack.
///
/// Log, layout and store failures abort the run. Missing images and filters
/// that match no scans only skip the affected scan or slab.
pub fn import_slab_stacks_for_wafer(
    log: &dyn AcquisitionLog,
    store: &dyn RenderStore,
    options: &ImportOptions,
) -> ImportResult<ImportReport> {
    if options.wafer_id.is_empty() {
        return Err(ImportError::InvalidOptions(
            "wafer id must not be empty".to_string(),
        ));
    }

    info!(
        "loading slab info, wafer_id={}, number_of_slabs_per_group={}",
        options.wafer_id, options.number_of_slabs_per_render_project
    );
    let max_scans = log.max_scans()?;
    info!("the maximum number of scans is {}", max_scans);

    let mut slab_groups = load_slab_info(
        log,
        &options.wafer_short_prefix(),
        options.number_of_slabs_per_render_project,
    )?;
    info!("loaded {} slab groups", slab_groups.len());

    if !options.import_magc_slabs.is_empty() {
        info!("looking for magc slabs {:?}", options.import_magc_slabs);
        slab_groups = filter_slab_groups(slab_groups, &options.import_magc_slabs)?;
        info!("filtered down to {} slab groups", slab_groups.len());
    }

    let wafer = WaferImport {
        log,
        store,
        options,
        tile_width: log.sfov_width()?,
        tile_height: log.sfov_height()?,
    };

    let mut report = ImportReport::default();
    for slab_group in &slab_groups {
        report.stacks.extend(wafer.import_group(slab_group)?);
    }

    info!(
        "imported {} tiles into {} stacks",
        report.tile_count(),
        report.stacks.len()
    );
    Ok(report)
}
