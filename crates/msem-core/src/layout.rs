//! Stack-wide grid layout for MFOVs and their SFOVs.
//!
//! MFOVs are hexagons of 91 SFOVs packed into columns on the stage. The layout
//! clusters MFOV stage positions into columns, gives every MFOV a cell in a
//! stack-wide raster grid, and resolves each (MFOV, SFOV) pair to a row/column
//! address inside that cell.
//!
//! SFOV columns use doubled hex coordinates: neighbors within a row are two
//! columns apart, neighbors in adjacent rows are one column apart.

use crate::tile_id::SFOV_COUNT;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Rows of SFOVs in one MFOV (lengths 6..11..6).
pub const SFOV_ROW_COUNT: u32 = 11;

/// Doubled-coordinate columns spanned by one MFOV.
pub const SFOV_COLUMN_COUNT: u32 = 21;

/// Stage distance between vertically adjacent 91-SFOV MFOVs in one column.
pub const NINETY_ONE_SFOV_ADJACENT_MFOV_DELTA_Y: f64 = 16_550.0;

/// (row, col) of each SFOV within its MFOV, indexed by 0-based spiral index.
pub const NINETY_ONE_SFOV_ROW_COL: [(u32, u32); SFOV_COUNT] = [
    (5, 10), (5, 12), (4, 11), (4, 9), (5, 8), // s01..s05
    (6, 9), (6, 11), (5, 14), (4, 13), (3, 12), // s06..s10
    (3, 10), (3, 8), (4, 7), (5, 6), (6, 7), // s11..s15
    (7, 8), (7, 10), (7, 12), (6, 13), (5, 16), // s16..s20
    (4, 15), (3, 14), (2, 13), (2, 11), (2, 9), // s21..s25
    (2, 7), (3, 6), (4, 5), (5, 4), (6, 5), // s26..s30
    (7, 6), (8, 7), (8, 9), (8, 11), (8, 13), // s31..s35
    (7, 14), (6, 15), (5, 18), (4, 17), (3, 16), // s36..s40
    (2, 15), (1, 14), (1, 12), (1, 10), (1, 8), // s41..s45
    (1, 6), (2, 5), (3, 4), (4, 3), (5, 2), // s46..s50
    (6, 3), (7, 4), (8, 5), (9, 6), (9, 8), // s51..s55
    (9, 10), (9, 12), (9, 14), (8, 15), (7, 16), // s56..s60
    (6, 17), (5, 20), (4, 19), (3, 18), (2, 17), // s61..s65
    (1, 16), (0, 15), (0, 13), (0, 11), (0, 9), // s66..s70
    (0, 7), (0, 5), (1, 4), (2, 3), (3, 2), // s71..s75
    (4, 1), (5, 0), (6, 1), (7, 2), (8, 3), // s76..s80
    (9, 4), (10, 5), (10, 7), (10, 9), (10, 11), // s81..s85
    (10, 13), (10, 15), (9, 16), (8, 17), (7, 18), // s86..s90
    (6, 19), // s91
];

/// Row/col offset of an SFOV within its MFOV, by 3-digit 1-based name (`"001"`..`"091"`).
pub fn sfov_row_col(sfov_name: &str) -> Option<(u32, u32)> {
    if sfov_name.len() != 3 {
        return None;
    }
    let number: usize = sfov_name.parse().ok()?;
    number
        .checked_sub(1)
        .and_then(|index| NINETY_ONE_SFOV_ROW_COL.get(index))
        .copied()
}

/// Errors raised while building or querying a layout
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("no MFOV positions to lay out")]
    Empty,

    #[error("invalid layout parameters: {0}")]
    InvalidParameters(String),

    #[error("MFOV {mfov} is listed more than once")]
    DuplicateMfov { mfov: u32 },

    #[error("MFOV {mfov} has a non-finite stage position ({x}, {y})")]
    NonFinitePosition { mfov: u32, x: f64, y: f64 },

    #[error(
        "MFOV {mfov} is {offset_y} below MFOV {previous} in its column, \
         which is not a whole multiple of the adjacent MFOV delta {delta_y}"
    )]
    IrreconcilableOffset {
        mfov: u32,
        previous: u32,
        offset_y: f64,
        delta_y: f64,
    },

    #[error("MFOV {mfov} is not part of the layout")]
    UnknownMfov { mfov: u32 },

    #[error("unknown SFOV name {0:?}")]
    UnknownSfov(String),

    #[error("tiles {first} and {second} share grid address ({row}, {col})")]
    DuplicateAddress {
        first: String,
        second: String,
        row: u32,
        col: u32,
    },
}

pub type LayoutResult<T> = std::result::Result<T, LayoutError>;

/// Stage position of one MFOV
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MfovPosition {
    pub mfov: u32,
    pub x: f64,
    pub y: f64,
}

/// Thresholds for clustering MFOVs into columns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParameters {
    /// Expected y distance between vertically adjacent MFOVs
    pub adjacent_mfov_delta_y: f64,
    /// Maximum x distance from a column's first MFOV for another MFOV to join it
    pub column_x_tolerance: f64,
    /// Maximum deviation from a whole multiple of `adjacent_mfov_delta_y`
    pub delta_y_tolerance: f64,
}

impl Default for LayoutParameters {
    fn default() -> Self {
        Self::with_delta_y(NINETY_ONE_SFOV_ADJACENT_MFOV_DELTA_Y)
    }
}

impl LayoutParameters {
    /// Parameters for the given delta with both tolerances at a quarter of it.
    pub fn with_delta_y(adjacent_mfov_delta_y: f64) -> Self {
        Self {
            adjacent_mfov_delta_y,
            column_x_tolerance: adjacent_mfov_delta_y / 4.0,
            delta_y_tolerance: adjacent_mfov_delta_y / 4.0,
        }
    }

    fn validate(&self) -> LayoutResult<()> {
        let checks = [
            ("adjacent_mfov_delta_y", self.adjacent_mfov_delta_y),
            ("column_x_tolerance", self.column_x_tolerance),
            ("delta_y_tolerance", self.delta_y_tolerance),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value <= 0.0 {
                return Err(LayoutError::InvalidParameters(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.delta_y_tolerance * 2.0 >= self.adjacent_mfov_delta_y {
            return Err(LayoutError::InvalidParameters(format!(
                "delta_y_tolerance {} must be less than half of adjacent_mfov_delta_y {}",
                self.delta_y_tolerance, self.adjacent_mfov_delta_y
            )));
        }
        Ok(())
    }
}

/// One column of vertically stacked MFOVs
#[derive(Debug, Clone, PartialEq)]
pub struct MfovColumn {
    /// Mean stage x of the column's MFOVs
    pub x: f64,
    /// Row band of the topmost MFOV, relative to the topmost MFOV of the stack
    pub start_band: u32,
    /// (MFOV id, band within the column), ordered by stage y
    pub mfovs: Vec<(u32, u32)>,
}

fn by_stage(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Whole `adjacent_mfov_delta_y` steps from `upper` down to `lower`, if the
/// offset is at least one step and within tolerance of a whole multiple.
fn vertical_steps(upper: &MfovPosition, lower: &MfovPosition, params: &LayoutParameters) -> Option<u32> {
    let delta_y = params.adjacent_mfov_delta_y;
    let offset_y = lower.y - upper.y;
    let steps = (offset_y / delta_y).round();
    (steps >= 1.0 && (offset_y - steps * delta_y).abs() <= params.delta_y_tolerance)
        .then_some(steps as u32)
}

fn find_root(parents: &mut [usize], mut index: usize) -> usize {
    while parents[index] != index {
        parents[index] = parents[parents[index]];
        index = parents[index];
    }
    index
}

/// Cluster MFOV positions into columns ordered left to right.
///
/// Each MFOV is linked to its nearest MFOV above that is within
/// `column_x_tolerance` in x and a whole number of `adjacent_mfov_delta_y` steps
/// away in y. Columns are the connected chains, so a column may drift in x as
/// long as every step does not. Two MFOVs within x tolerance and less than two
/// steps apart must end up in the same column.
pub fn build_mfov_columns(
    positions: &[MfovPosition],
    params: &LayoutParameters,
) -> LayoutResult<Vec<MfovColumn>> {
    params.validate()?;
    if positions.is_empty() {
        return Err(LayoutError::Empty);
    }

    let mut seen = HashSet::with_capacity(positions.len());
    for position in positions {
        if !position.x.is_finite() || !position.y.is_finite() {
            return Err(LayoutError::NonFinitePosition {
                mfov: position.mfov,
                x: position.x,
                y: position.y,
            });
        }
        if !seen.insert(position.mfov) {
            return Err(LayoutError::DuplicateMfov {
                mfov: position.mfov,
            });
        }
    }

    let mut sorted: Vec<MfovPosition> = positions.to_vec();
    sorted.sort_by(|a, b| {
        by_stage(a.y, b.y)
            .then_with(|| by_stage(a.x, b.x))
            .then_with(|| a.mfov.cmp(&b.mfov))
    });

    let delta_y = params.adjacent_mfov_delta_y;
    let x_distance = |a: usize, b: usize| (sorted[a].x - sorted[b].x).abs();

    let mut parents: Vec<usize> = (0..sorted.len()).collect();
    for lower in 0..sorted.len() {
        let nearest_above = (0..lower)
            .filter(|&upper| x_distance(upper, lower) <= params.column_x_tolerance)
            .filter_map(|upper| {
                vertical_steps(&sorted[upper], &sorted[lower], params).map(|steps| (steps, upper))
            })
            .min_by(|(steps_a, upper_a), (steps_b, upper_b)| {
                steps_a.cmp(steps_b).then_with(|| {
                    by_stage(x_distance(*upper_a, lower), x_distance(*upper_b, lower))
                })
            });
        if let Some((_, upper)) = nearest_above {
            let upper_root = find_root(&mut parents, upper);
            let lower_root = find_root(&mut parents, lower);
            parents[lower_root] = upper_root;
        }
    }

    let roots: Vec<usize> = (0..sorted.len())
        .map(|index| find_root(&mut parents, index))
        .collect();

    for lower in 0..sorted.len() {
        for upper in 0..lower {
            let offset_y = sorted[lower].y - sorted[upper].y;
            if roots[upper] != roots[lower]
                && x_distance(upper, lower) <= params.column_x_tolerance
                && offset_y < 2.0 * delta_y - params.delta_y_tolerance
            {
                return Err(LayoutError::IrreconcilableOffset {
                    mfov: sorted[lower].mfov,
                    previous: sorted[upper].mfov,
                    offset_y,
                    delta_y,
                });
            }
        }
    }

    // members stay in stage y order
    let mut clusters: BTreeMap<usize, Vec<MfovPosition>> = BTreeMap::new();
    for (position, root) in sorted.iter().zip(&roots) {
        clusters.entry(*root).or_default().push(*position);
    }

    let global_min_y = sorted[0].y;
    let mut columns = Vec::with_capacity(clusters.len());
    for cluster in clusters.into_values() {
        let mut mfovs = Vec::with_capacity(cluster.len());
        let mut band = 0u32;
        mfovs.push((cluster[0].mfov, band));
        for pair in cluster.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            let steps = vertical_steps(previous, current, params).ok_or(
                LayoutError::IrreconcilableOffset {
                    mfov: current.mfov,
                    previous: previous.mfov,
                    offset_y: current.y - previous.y,
                    delta_y,
                },
            )?;
            band += steps;
            mfovs.push((current.mfov, band));
        }

        let x = cluster.iter().map(|position| position.x).sum::<f64>() / cluster.len() as f64;
        let start_band = ((cluster[0].y - global_min_y) / delta_y).round() as u32;
        columns.push(MfovColumn {
            x,
            start_band,
            mfovs,
        });
    }
    columns.sort_by(|a, b| by_stage(a.x, b.x));

    Ok(columns)
}

/// Row/column address in the stack-wide raster grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridAddress {
    pub row: u32,
    pub col: u32,
}

/// Maps (MFOV, SFOV) pairs of one stack to grid addresses
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOfViewLayout {
    mfov_origins: HashMap<u32, GridAddress>,
    column_count: usize,
}

impl FieldOfViewLayout {
    /// Layout from already clustered columns.
    pub fn new(columns: &[MfovColumn]) -> Self {
        let mut mfov_origins = HashMap::new();
        for (column_index, column) in columns.iter().enumerate() {
            for &(mfov, band) in &column.mfovs {
                let origin = GridAddress {
                    row: (column.start_band + band) * SFOV_ROW_COUNT,
                    col: column_index as u32 * SFOV_COLUMN_COUNT,
                };
                mfov_origins.insert(mfov, origin);
            }
        }
        Self {
            mfov_origins,
            column_count: columns.len(),
        }
    }

    /// Cluster the positions and build the layout in one step.
    pub fn build(positions: &[MfovPosition], params: &LayoutParameters) -> LayoutResult<Self> {
        let columns = build_mfov_columns(positions, params)?;
        Ok(Self::new(&columns))
    }

    pub fn mfov_count(&self) -> usize {
        self.mfov_origins.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Grid address of the top-left corner of an MFOV's cell.
    pub fn mfov_origin(&self, mfov: u32) -> Option<GridAddress> {
        self.mfov_origins.get(&mfov).copied()
    }

    /// Grid address for an SFOV identified by its 3-digit scope name.
    pub fn row_and_col(&self, mfov: u32, sfov_name: &str) -> LayoutResult<GridAddress> {
        let origin = self
            .mfov_origin(mfov)
            .ok_or(LayoutError::UnknownMfov { mfov })?;
        let (row, col) =
            sfov_row_col(sfov_name).ok_or_else(|| LayoutError::UnknownSfov(sfov_name.into()))?;
        Ok(GridAddress {
            row: origin.row + row,
            col: origin.col + col,
        })
    }

    /// Every (MFOV, 0-based SFOV index, address) cell of the layout.
    pub fn cells(&self) -> impl Iterator<Item = (u32, usize, GridAddress)> + '_ {
        self.mfov_origins.iter().flat_map(|(&mfov, origin)| {
            NINETY_ONE_SFOV_ROW_COL
                .iter()
                .enumerate()
                .map(move |(sfov_index, &(row, col))| {
                    let address = GridAddress {
                        row: origin.row + row,
                        col: origin.col + col,
                    };
                    (mfov, sfov_index, address)
                })
        })
    }
}
