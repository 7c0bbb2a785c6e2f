//! Render tile specifications for one scan of one slab.

use crate::acquisition::{MfovSfovs, SfovRecord};
use crate::error::{ImportResult, LogError};
use crate::layout::{FieldOfViewLayout, GridAddress, LayoutError};
use crate::scan_fit::ScanFitParameters;
use crate::tile_id::{create_tile_id, sfov_name, TileKey, SFOV_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Render class for the translation appended after the scan correction.
pub const AFFINE_MODEL_2D_CLASS_NAME: &str = "mpicbg.trakem2.transform.AffineModel2D";

/// Pixels added on each axis so no tile sits at a negative coordinate.
pub const DEFAULT_MARGIN: i64 = 400;

pub const MIN_INTENSITY: u32 = 0;
pub const MAX_INTENSITY: u32 = 255;

/// A single render transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafTransformSpec {
    pub class_name: String,
    pub data_string: String,
}

/// Ordered list of transforms applied to a tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformList {
    #[serde(rename = "type")]
    pub kind: String,
    pub spec_list: Vec<LeafTransformSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayout {
    pub section_id: String,
    pub image_row: u32,
    pub image_col: u32,
    pub stage_x: i64,
    pub stage_y: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MipmapLevel {
    pub image_url: String,
}

/// One positioned source image in one layer of a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSpec {
    pub tile_id: String,
    pub z: u32,
    pub layout: TileLayout,
    pub width: u32,
    pub height: u32,
    pub min_intensity: u32,
    pub max_intensity: u32,
    pub mipmap_levels: BTreeMap<String, MipmapLevel>,
    pub transforms: TransformList,
}

impl TileSpec {
    pub fn grid_address(&self) -> GridAddress {
        GridAddress {
            row: self.layout.image_row,
            col: self.layout.image_col,
        }
    }
}

/// Everything shared by the tiles of one slab scan
#[derive(Debug, Clone, Copy)]
pub struct SlabScanContext<'a> {
    pub wafer_id: &'a str,
    pub slab: u32,
    pub scan: u32,
    pub z: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub margin: i64,
    pub layout: &'a FieldOfViewLayout,
    pub scan_fit: &'a ScanFitParameters,
}

/// Minimum stage x and y over every SFOV of a scan.
pub fn min_stage_bound(mfov_sfovs: &[MfovSfovs]) -> Option<(i64, i64)> {
    mfov_sfovs
        .iter()
        .flat_map(|mfov| mfov.sfovs.iter())
        .fold(None, |bound, sfov| match bound {
            None => Some((sfov.x, sfov.y)),
            Some((min_x, min_y)) => Some((min_x.min(sfov.x), min_y.min(sfov.y))),
        })
}

/// `dataString` of the translation placing a tile relative to the scan's minimum bound.
pub fn translation_data_string(sfov: &SfovRecord, min_x: i64, min_y: i64, margin: i64) -> String {
    format!(
        "1 0 0 1 {} {}",
        sfov.x - min_x + margin,
        sfov.y - min_y + margin
    )
}

fn image_url(path: &Path) -> String {
    format!("file:{}", path.display())
}

fn build_tile_spec(
    ctx: &SlabScanContext<'_>,
    sfov: &SfovRecord,
    tile_id: String,
    address: GridAddress,
    min_x: i64,
    min_y: i64,
) -> TileSpec {
    let mut mipmap_levels = BTreeMap::new();
    mipmap_levels.insert(
        "0".to_string(),
        MipmapLevel {
            image_url: image_url(&sfov.path),
        },
    );

    TileSpec {
        tile_id,
        z: ctx.z,
        layout: TileLayout {
            section_id: format!("{}.0", ctx.z),
            image_row: address.row,
            image_col: address.col,
            stage_x: sfov.x,
            stage_y: sfov.y,
        },
        width: ctx.tile_width,
        height: ctx.tile_height,
        min_intensity: MIN_INTENSITY,
        max_intensity: MAX_INTENSITY,
        mipmap_levels,
        transforms: TransformList {
            kind: "list".to_string(),
            spec_list: vec![
                ctx.scan_fit.to_transform_spec(),
                LeafTransformSpec {
                    class_name: AFFINE_MODEL_2D_CLASS_NAME.to_string(),
                    data_string: translation_data_string(sfov, min_x, min_y, ctx.margin),
                },
            ],
        },
    }
}

/// Build one tile spec per SFOV of a slab scan, in MFOV order then SFOV index order.
///
/// SFOV ids are 0-based here. The scope's own names (and image files) are
/// 1-based, and so is the layout's SFOV key.
pub fn build_tile_specs_for_slab_scan(
    ctx: &SlabScanContext<'_>,
    mfov_sfovs: &[MfovSfovs],
) -> ImportResult<Vec<TileSpec>> {
    let Some((min_x, min_y)) = min_stage_bound(mfov_sfovs) else {
        return Ok(Vec::new());
    };

    let tile_count: usize = mfov_sfovs.iter().map(|mfov| mfov.sfovs.len()).sum();
    let mut tile_specs = Vec::with_capacity(tile_count);
    let mut occupied: HashMap<GridAddress, usize> = HashMap::with_capacity(tile_count);

    for mfov in mfov_sfovs {
        if mfov.sfovs.len() > SFOV_COUNT {
            return Err(LogError::TooManySfovs {
                scan: ctx.scan,
                slab: ctx.slab,
                mfov: mfov.mfov,
                count: mfov.sfovs.len(),
                max: SFOV_COUNT,
            }
            .into());
        }

        for (sfov_index, sfov) in mfov.sfovs.iter().enumerate() {
            let address = ctx.layout.row_and_col(mfov.mfov, &sfov_name(sfov_index))?;
            let key = TileKey {
                wafer_id: ctx.wafer_id,
                slab: ctx.slab,
                scan: ctx.scan,
                mfov: mfov.mfov,
                sfov_index,
            };
            let tile_id = create_tile_id(&key)
                .ok_or_else(|| LayoutError::UnknownSfov(sfov_name(sfov_index)))?;

            if let Some(&existing) = occupied.get(&address) {
                let first: &TileSpec = &tile_specs[existing];
                return Err(LayoutError::DuplicateAddress {
                    first: first.tile_id.clone(),
                    second: tile_id,
                    row: address.row,
                    col: address.col,
                }
                .into());
            }
            occupied.insert(address, tile_specs.len());

            tile_specs.push(build_tile_spec(ctx, sfov, tile_id, address, min_x, min_y));
        }
    }

    Ok(tile_specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImportError;
    use crate::layout::{LayoutParameters, MfovPosition};
    use std::path::PathBuf;

    fn record(x: i64, y: i64) -> SfovRecord {
        SfovRecord {
            path: PathBuf::from(format!("/data/sfov_{x}_{y}.png")),
            x,
            y,
        }
    }

    fn single_mfov_layout(mfov: u32) -> FieldOfViewLayout {
        let positions = [MfovPosition {
            mfov,
            x: 0.0,
            y: 0.0,
        }];
        FieldOfViewLayout::build(&positions, &LayoutParameters::default()).unwrap()
    }

    fn context<'a>(
        layout: &'a FieldOfViewLayout,
        scan_fit: &'a ScanFitParameters,
    ) -> SlabScanContext<'a> {
        SlabScanContext {
            wafer_id: "60",
            slab: 2,
            scan: 1,
            z: 7,
            tile_width: 2000,
            tile_height: 1748,
            margin: DEFAULT_MARGIN,
            layout,
            scan_fit,
        }
    }

    #[test]
    fn test_min_bound_and_translations() {
        let sfovs = MfovSfovs {
            mfov: 3,
            sfovs: vec![record(100, 200), record(150, 220), record(90, 260)],
        };
        assert_eq!(min_stage_bound(std::slice::from_ref(&sfovs)), Some((90, 200)));

        let layout = single_mfov_layout(3);
        let scan_fit = ScanFitParameters::wafer_60_61();
        let tiles = build_tile_specs_for_slab_scan(&context(&layout, &scan_fit), &[sfovs]).unwrap();

        let translations: Vec<&str> = tiles
            .iter()
            .map(|tile| tile.transforms.spec_list[1].data_string.as_str())
            .collect();
        assert_eq!(
            translations,
            vec!["1 0 0 1 410 400", "1 0 0 1 460 420", "1 0 0 1 400 460"]
        );
    }

    #[test]
    fn test_min_bound_spans_mfovs() {
        let mfovs = [
            MfovSfovs {
                mfov: 1,
                sfovs: vec![record(500, 10)],
            },
            MfovSfovs {
                mfov: 2,
                sfovs: vec![record(-20, 900)],
            },
        ];
        assert_eq!(min_stage_bound(&mfovs), Some((-20, 10)));
        assert_eq!(min_stage_bound(&[]), None);
    }

    #[test]
    fn test_tile_spec_fields() {
        let layout = single_mfov_layout(3);
        let scan_fit = ScanFitParameters::wafer_60_61();
        let sfovs = MfovSfovs {
            mfov: 3,
            sfovs: (0..4).map(|i| record(i * 10, 0)).collect(),
        };
        let tiles = build_tile_specs_for_slab_scan(&context(&layout, &scan_fit), &[sfovs]).unwrap();
        let tile = &tiles[3];

        assert_eq!(tile.tile_id, "w60_magc0002_scan001_m0003_r35_s04");
        assert_eq!(tile.z, 7);
        assert_eq!(tile.layout.section_id, "7.0");
        assert_eq!(tile.grid_address(), GridAddress { row: 4, col: 9 });
        assert_eq!((tile.layout.stage_x, tile.layout.stage_y), (30, 0));
        assert_eq!((tile.width, tile.height), (2000, 1748));
        assert_eq!(
            tile.mipmap_levels["0"].image_url,
            "file:/data/sfov_30_0.png"
        );
        assert_eq!(tile.transforms.kind, "list");
        assert_eq!(tile.transforms.spec_list[0], scan_fit.to_transform_spec());
        assert_eq!(
            tile.transforms.spec_list[1].class_name,
            AFFINE_MODEL_2D_CLASS_NAME
        );
    }

    #[test]
    fn test_tile_spec_json_shape() {
        let layout = single_mfov_layout(1);
        let scan_fit = ScanFitParameters::new("a.Correction", vec![1.0]);
        let sfovs = MfovSfovs {
            mfov: 1,
            sfovs: vec![record(5, 6)],
        };
        let tiles = build_tile_specs_for_slab_scan(&context(&layout, &scan_fit), &[sfovs]).unwrap();
        let json = serde_json::to_value(&tiles[0]).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "tileId": "w60_magc0002_scan001_m0001_r46_s01",
                "z": 7,
                "layout": {
                    "sectionId": "7.0",
                    "imageRow": 5, "imageCol": 10,
                    "stageX": 5, "stageY": 6
                },
                "width": 2000, "height": 1748,
                "minIntensity": 0, "maxIntensity": 255,
                "mipmapLevels": { "0": { "imageUrl": "file:/data/sfov_5_6.png" } },
                "transforms": {
                    "type": "list",
                    "specList": [
                        { "className": "a.Correction", "dataString": "1" },
                        {
                            "className": "mpicbg.trakem2.transform.AffineModel2D",
                            "dataString": "1 0 0 1 400 400"
                        }
                    ]
                }
            })
        );
    }

    #[test]
    fn test_unknown_mfov_is_a_layout_error() {
        let layout = single_mfov_layout(1);
        let scan_fit = ScanFitParameters::wafer_60_61();
        let sfovs = MfovSfovs {
            mfov: 2,
            sfovs: vec![record(0, 0)],
        };
        let err = build_tile_specs_for_slab_scan(&context(&layout, &scan_fit), &[sfovs]).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Layout(LayoutError::UnknownMfov { mfov: 2 })
        ));
    }

    #[test]
    fn test_repeated_mfov_is_a_duplicate_address() {
        let layout = single_mfov_layout(1);
        let scan_fit = ScanFitParameters::wafer_60_61();
        let mfovs = [
            MfovSfovs {
                mfov: 1,
                sfovs: vec![record(0, 0)],
            },
            MfovSfovs {
                mfov: 1,
                sfovs: vec![record(10, 10)],
            },
        ];
        let err = build_tile_specs_for_slab_scan(&context(&layout, &scan_fit), &mfovs).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Layout(LayoutError::DuplicateAddress { row: 5, col: 10, .. })
        ));
    }

    #[test]
    fn test_too_many_sfovs_is_a_log_error() {
        let layout = single_mfov_layout(1);
        let scan_fit = ScanFitParameters::wafer_60_61();
        let sfovs = MfovSfovs {
            mfov: 1,
            sfovs: (0..92).map(|i| record(i, i)).collect(),
        };
        let err = build_tile_specs_for_slab_scan(&context(&layout, &scan_fit), &[sfovs]).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Log(LogError::TooManySfovs { count: 92, .. })
        ));
    }

    #[test]
    fn test_empty_scan_yields_no_tiles() {
        let layout = single_mfov_layout(1);
        let scan_fit = ScanFitParameters::wafer_60_61();
        let tiles = build_tile_specs_for_slab_scan(&context(&layout, &scan_fit), &[]).unwrap();
        assert!(tiles.is_empty());
    }
}
