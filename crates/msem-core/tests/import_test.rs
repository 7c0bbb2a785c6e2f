//! Integration tests for the import state machine
//!
//! These tests run full wafer imports against an in-memory render store and an
//! xlog whose slab directories live in a temp dir, so "missing image" checks hit
//! the real filesystem.

use msem_core::xlog::{sfov_image_path, XlogDocument, XlogSlab, XlogSlabScan};
use msem_core::{
    import_slab_stacks_for_wafer, ImportError, ImportOptions, JsonAcquisitionLog, LayoutError,
    RenderStore, ScanFitParameters, SkipReason, StackId, StackResolution, StackState, StoreError,
    StoreResult, TileSpec, SFOV_COUNT,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create(String),
    SetState(String, StackState),
    Save { stack: String, z: Vec<u32>, count: usize },
}

/// Render store keeping stacks in memory and recording every write
#[derive(Default)]
struct FakeStore {
    states: Mutex<HashMap<StackId, StackState>>,
    calls: Mutex<Vec<Call>>,
    saved: Mutex<Vec<TileSpec>>,
    fail_saves: bool,
}

impl FakeStore {
    fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn take_saved(&self) -> Vec<TileSpec> {
        std::mem::take(&mut *self.saved.lock().unwrap())
    }

    fn state(&self, stack: &StackId) -> Option<StackState> {
        self.states.lock().unwrap().get(stack).copied()
    }
}

impl RenderStore for FakeStore {
    fn stack_state(&self, stack: &StackId) -> StoreResult<Option<StackState>> {
        Ok(self.state(stack))
    }

    fn create_stack(&self, stack: &StackId, _resolution: &StackResolution) -> StoreResult<()> {
        self.states
            .lock()
            .unwrap()
            .insert(stack.clone(), StackState::Loading);
        self.calls
            .lock()
            .unwrap()
            .push(Call::Create(stack.stack.clone()));
        Ok(())
    }

    fn set_stack_state(&self, stack: &StackId, state: StackState) -> StoreResult<()> {
        self.states.lock().unwrap().insert(stack.clone(), state);
        self.calls
            .lock()
            .unwrap()
            .push(Call::SetState(stack.stack.clone(), state));
        Ok(())
    }

    fn save_tile_specs(
        &self,
        stack: &StackId,
        tile_specs: &[TileSpec],
        _derive_data: bool,
    ) -> StoreResult<()> {
        if self.fail_saves {
            return Err(StoreError::Transport {
                method: "PUT".to_string(),
                url: format!("http://render/{stack}/resolvedTiles"),
                message: "connection refused".to_string(),
            });
        }
        let mut z: Vec<u32> = tile_specs.iter().map(|tile| tile.z).collect();
        z.dedup();
        self.calls.lock().unwrap().push(Call::Save {
            stack: stack.stack.clone(),
            z,
            count: tile_specs.len(),
        });
        self.saved.lock().unwrap().extend_from_slice(tile_specs);
        Ok(())
    }
}

const DELTA: f64 = msem_core::NINETY_ONE_SFOV_ADJACENT_MFOV_DELTA_Y;

fn slab_scan_dir(root: &Path, scan: u32, magc_id: u32) -> PathBuf {
    root.join(format!("scan_{scan:03}"))
        .join("slabs")
        .join(format!("slab_{magc_id:04}"))
}

/// A slab with two stacked MFOVs and full 91-SFOV scans.
///
/// The first image of every scan in `with_images` is written to disk.
fn slab(root: &Path, magc_id: u32, serial_id: u32, scans: &[u32], with_images: &[u32]) -> XlogSlab {
    let mfovs = vec![1, 2];
    let mut mfov_positions = BTreeMap::new();
    mfov_positions.insert(1, [1000.0, 2000.0]);
    mfov_positions.insert(2, [1010.0, 2000.0 + DELTA]);

    let mut slab_scans = BTreeMap::new();
    for &scan in scans {
        let slab_path = slab_scan_dir(root, scan, magc_id);
        let mut sfovs = BTreeMap::new();
        for &mfov in &mfovs {
            let xys = (0..SFOV_COUNT as i64)
                .map(|i| [i * 1800 + scan as i64, i64::from(mfov) * 16550 + i * 7])
                .collect();
            sfovs.insert(mfov, xys);
        }
        if with_images.contains(&scan) {
            let first_image = sfov_image_path(&slab_path, 1, 0);
            std::fs::create_dir_all(first_image.parent().unwrap()).unwrap();
            std::fs::write(&first_image, b"png").unwrap();
        }
        slab_scans.insert(scan, XlogSlabScan { slab_path, sfovs });
    }

    XlogSlab {
        magc_id,
        serial_id,
        mfovs,
        mfov_positions,
        scans: slab_scans,
    }
}

fn log_for(slabs: Vec<XlogSlab>) -> JsonAcquisitionLog {
    JsonAcquisitionLog::from_document(XlogDocument {
        sfov_width: 2000,
        sfov_height: 1748,
        max_scans: None,
        slabs,
    })
    .unwrap()
}

fn options() -> ImportOptions {
    ImportOptions::new("60", ScanFitParameters::wafer_60_61())
}

#[test]
fn test_skipped_scan_leaves_no_z_gap() {
    let dir = TempDir::new().unwrap();
    let log = log_for(vec![slab(dir.path(), 399, 296, &[1, 2, 3, 4], &[1, 2, 4])]);
    let store = FakeStore::default();

    let report = import_slab_stacks_for_wafer(&log, &store, &options()).unwrap();

    assert_eq!(report.stacks.len(), 1);
    let stack_report = &report.stacks[0];
    let imported: Vec<(u32, u32)> = stack_report
        .imported
        .iter()
        .map(|scan| (scan.scan, scan.z))
        .collect();
    assert_eq!(imported, vec![(1, 1), (2, 2), (4, 3)]);
    assert_eq!(stack_report.skipped.len(), 1);
    assert_eq!(stack_report.skipped[0].scan, 3);
    assert!(matches!(
        stack_report.skipped[0].reason,
        SkipReason::MissingImage(_)
    ));
    assert!(stack_report.completed);
    assert_eq!(stack_report.tile_count(), 3 * 2 * SFOV_COUNT);

    let stack = "w60_s296_m399".to_string();
    assert_eq!(
        store.calls(),
        vec![
            Call::Create(stack.clone()),
            Call::Save { stack: stack.clone(), z: vec![1], count: 182 },
            Call::Save { stack: stack.clone(), z: vec![2], count: 182 },
            Call::Save { stack: stack.clone(), z: vec![3], count: 182 },
            Call::SetState(stack, StackState::Complete),
        ]
    );

    let saved = store.take_saved();
    assert_eq!(saved[0].tile_id, "w60_magc0399_scan001_m0001_r46_s01");
    assert_eq!(saved[2 * 182].tile_id, "w60_magc0399_scan004_m0001_r46_s01");
    assert_eq!(saved[2 * 182].layout.section_id, "3.0");
}

#[test]
fn test_reimport_reopens_complete_stack_with_identical_tiles() {
    let dir = TempDir::new().unwrap();
    let log = log_for(vec![slab(dir.path(), 399, 296, &[1, 2], &[1, 2])]);
    let store = FakeStore::default();
    let stack_id = StackId::new("w60_serial_290_to_299", "w60_s296_m399");

    import_slab_stacks_for_wafer(&log, &store, &options()).unwrap();
    assert_eq!(store.state(&stack_id), Some(StackState::Complete));
    let first_run = serde_json::to_string(&store.take_saved()).unwrap();
    let calls_before = store.calls().len();

    let report = import_slab_stacks_for_wafer(&log, &store, &options()).unwrap();
    assert!(report.stacks[0].completed);
    let second_run = serde_json::to_string(&store.take_saved()).unwrap();

    assert_eq!(first_run, second_run);
    let second_calls = store.calls().split_off(calls_before);
    assert_eq!(
        second_calls.first(),
        Some(&Call::SetState("w60_s296_m399".to_string(), StackState::Loading))
    );
    assert_eq!(
        second_calls.last(),
        Some(&Call::SetState("w60_s296_m399".to_string(), StackState::Complete))
    );
    assert!(!second_calls
        .iter()
        .any(|call| matches!(call, Call::Create(_))));
}

#[test]
fn test_stack_without_tiles_is_untouched() {
    let dir = TempDir::new().unwrap();
    let log = log_for(vec![slab(dir.path(), 399, 296, &[1, 2], &[])]);
    let store = FakeStore::default();

    let report = import_slab_stacks_for_wafer(&log, &store, &options()).unwrap();

    assert!(store.calls().is_empty());
    assert!(!report.stacks[0].completed);
    assert!(report.stacks[0].imported.is_empty());
    assert_eq!(report.stacks[0].skipped.len(), 2);
}

#[test]
fn test_include_scans_override_excludes_and_report_missing() {
    let dir = TempDir::new().unwrap();
    let log = log_for(vec![slab(dir.path(), 399, 296, &[1, 2, 3], &[1, 2, 3])]);
    let store = FakeStore::default();

    let mut options = options();
    options.include_scans = [2, 8].into_iter().collect();
    options.exclude_scans = [2].into_iter().collect();
    let report = import_slab_stacks_for_wafer(&log, &store, &options).unwrap();

    let stack_report = &report.stacks[0];
    assert_eq!(stack_report.missing_includes, vec![8]);
    let scans: Vec<u32> = stack_report.imported.iter().map(|scan| scan.scan).collect();
    assert_eq!(scans, vec![2]);
    assert_eq!(stack_report.imported[0].z, 1);
}

#[test]
fn test_slab_filter_and_grouping() {
    let dir = TempDir::new().unwrap();
    let log = log_for(vec![
        slab(dir.path(), 399, 296, &[1], &[1]),
        slab(dir.path(), 174, 297, &[1], &[1]),
        slab(dir.path(), 12, 305, &[1], &[1]),
    ]);
    let store = FakeStore::default();

    let mut options = options();
    options.import_magc_slabs = [174, 12].into_iter().collect();
    options.number_of_slabs_per_render_project = 5;
    let report = import_slab_stacks_for_wafer(&log, &store, &options).unwrap();

    let stacks: Vec<String> = report.stacks.iter().map(|r| r.stack.to_string()).collect();
    assert_eq!(
        stacks,
        vec![
            "w60_serial_295_to_299/w60_s297_m174",
            "w60_serial_305_to_309/w60_s305_m012",
        ]
    );

    options.import_magc_slabs = [1].into_iter().collect();
    let err = import_slab_stacks_for_wafer(&log, &store, &options).unwrap_err();
    assert!(matches!(err, ImportError::NoMatchingSlabs(ids) if ids == vec![1]));
}

#[test]
fn test_parallel_slabs_match_sequential_import() {
    let dir = TempDir::new().unwrap();
    let slabs: Vec<XlogSlab> = (0..4)
        .map(|i| slab(dir.path(), 100 + i, i, &[1, 2, 3], &[1, 3]))
        .collect();
    let log = log_for(slabs);

    let sequential = import_slab_stacks_for_wafer(&log, &FakeStore::default(), &options()).unwrap();

    let mut parallel_options = options();
    parallel_options.parallel_slabs = true;
    let parallel_store = FakeStore::default();
    let parallel = import_slab_stacks_for_wafer(&log, &parallel_store, &parallel_options).unwrap();

    assert_eq!(sequential, parallel);
    for stack_report in &parallel.stacks {
        let z: Vec<u32> = stack_report.imported.iter().map(|scan| scan.z).collect();
        assert_eq!(z, vec![1, 2]);
        assert_eq!(parallel_store.state(&stack_report.stack), Some(StackState::Complete));
    }
}

#[test]
fn test_store_failure_aborts_run() {
    let dir = TempDir::new().unwrap();
    let log = log_for(vec![slab(dir.path(), 399, 296, &[1], &[1])]);

    let err = import_slab_stacks_for_wafer(&log, &FakeStore::failing(), &options()).unwrap_err();
    assert!(matches!(err, ImportError::Store(StoreError::Transport { .. })));
}

#[test]
fn test_unresolvable_layout_aborts_run() {
    let dir = TempDir::new().unwrap();
    let mut broken = slab(dir.path(), 399, 296, &[1], &[1]);
    broken.mfov_positions.insert(2, [1000.0, 2000.0 + DELTA * 0.5]);
    let log = log_for(vec![broken]);
    let store = FakeStore::default();

    let err = import_slab_stacks_for_wafer(&log, &store, &options()).unwrap_err();
    assert!(matches!(
        err,
        ImportError::Layout(LayoutError::IrreconcilableOffset { .. })
    ));
    assert!(store.calls().is_empty());
}
