//! Spiral-to-raster SFOV ordering and tile id formatting.
//!
//! The scope numbers the SFOVs of an MFOV starting at 1 in the center and spiraling
//! counter-clockwise out to 91. Rendering wants them top-to-bottom, left-to-right,
//! so every tile id carries the raster rank next to the scope number.

/// Number of SFOVs (beams) in one MFOV.
pub const SFOV_COUNT: usize = 91;

/// Raster render rank (1-based) for each 0-based spiral SFOV index.
pub const RENDER_SFOV_ORDER: [u8; SFOV_COUNT] = [
    46, 47, 36, 35, 45, 56, 57, 48, 37, 27, // s01 to s10
    26, 25, 34, 44, 55, 65, 66, 67, 58, 49, // s11 to s20
    38, 28, 19, 18, 17, 16, 24, 33, 43, 54, // s21 to s30
    64, 73, 74, 75, 76, 68, 59, 50, 39, 29, // s31 to s40
    20, 12, 11, 10, 9, 8, 15, 23, 32, 42, // s41 to s50
    53, 63, 72, 80, 81, 82, 83, 84, 77, 69, // s51 to s60
    60, 51, 40, 30, 21, 13, 6, 5, 4, 3, // s61 to s70
    2, 1, 7, 14, 22, 31, 41, 52, 62, 71, // s71 to s80
    79, 86, 87, 88, 89, 90, 91, 85, 78, 70, // s81 to s90
    61, // s91
];

/// Raster rank of the SFOV at the given 0-based spiral index.
pub fn render_rank(sfov_index: usize) -> Option<u8> {
    RENDER_SFOV_ORDER.get(sfov_index).copied()
}

/// 3-digit, 1-based scope name for a 0-based SFOV index (e.g. `3` -> `"004"`).
pub fn sfov_name(sfov_index: usize) -> String {
    format!("{:03}", sfov_index + 1)
}

/// Identity of one tile within a wafer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey<'a> {
    pub wafer_id: &'a str,
    pub slab: u32,
    pub scan: u32,
    pub mfov: u32,
    /// 0-based spiral index
    pub sfov_index: usize,
}

/// Build the tile id for a tile, e.g. `w60_magc0002_scan001_m0003_r35_s04`.
///
/// Returns `None` when `sfov_index` is outside the MFOV.
pub fn create_tile_id(key: &TileKey<'_>) -> Option<String> {
    let rank = render_rank(key.sfov_index)?;
    // scope numbering (and image file names) are 1-based
    let scope_sfov_number = key.sfov_index + 1;

    Some(format!(
        "w{}_magc{:04}_scan{:03}_m{:04}_r{:02}_s{:02}",
        key.wafer_id, key.slab, key.scan, key.mfov, rank, scope_sfov_number
    ))
}
