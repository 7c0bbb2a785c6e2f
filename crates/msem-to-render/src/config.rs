//! Configuration loading for msem-to-render.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use msem_core::{LayoutParameters, PathRewrite, ScanFitParameters, StackResolution, DEFAULT_MARGIN};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub render: Option<RenderConfig>,
    pub layout: Option<LayoutConfig>,
    pub tiles: Option<TilesConfig>,
    #[serde(default)]
    pub scan_fit: Vec<ScanFitConfig>,
    #[serde(default)]
    pub path_rewrite: Vec<PathRewriteConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RenderConfig {
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub resolution_x: Option<f64>,
    pub resolution_y: Option<f64>,
    pub resolution_z: Option<f64>,
    pub derive_data: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LayoutConfig {
    pub adjacent_mfov_delta_y: Option<f64>,
    pub column_x_tolerance: Option<f64>,
    pub delta_y_tolerance: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TilesConfig {
    pub margin: Option<i64>,
}

/// Scan correction for a set of wafers
#[derive(Debug, Deserialize, Clone)]
pub struct ScanFitConfig {
    pub wafers: Vec<String>,
    pub class_name: String,
    pub coefficients: Vec<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathRewriteConfig {
    pub from: String,
    pub to: String,
}

/// Default render web service port
pub const DEFAULT_RENDER_PORT: u16 = render_client::DEFAULT_RENDER_PORT;

/// Default request timeout in seconds (2 minutes)
pub const DEFAULT_TIMEOUT_SECS: u64 = render_client::DEFAULT_TIMEOUT.as_secs();

impl Config {
    pub fn render_port(&self) -> u16 {
        self.render
            .as_ref()
            .and_then(|render| render.port)
            .unwrap_or(DEFAULT_RENDER_PORT)
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .render
            .as_ref()
            .and_then(|render| render.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn stack_resolution(&self) -> StackResolution {
        let default = StackResolution::default();
        let Some(render) = self.render.as_ref() else {
            return default;
        };
        StackResolution {
            x: render.resolution_x.unwrap_or(default.x),
            y: render.resolution_y.unwrap_or(default.y),
            z: render.resolution_z.unwrap_or(default.z),
        }
    }

    pub fn derive_data(&self) -> bool {
        self.render
            .as_ref()
            .and_then(|render| render.derive_data)
            .unwrap_or(true)
    }

    /// Layout parameters. Tolerances not given are derived from the delta.
    pub fn layout_parameters(&self) -> LayoutParameters {
        let Some(layout) = self.layout.as_ref() else {
            return LayoutParameters::default();
        };
        let mut params = layout
            .adjacent_mfov_delta_y
            .map(LayoutParameters::with_delta_y)
            .unwrap_or_default();
        if let Some(tolerance) = layout.column_x_tolerance {
            params.column_x_tolerance = tolerance;
        }
        if let Some(tolerance) = layout.delta_y_tolerance {
            params.delta_y_tolerance = tolerance;
        }
        params
    }

    pub fn tile_margin(&self) -> i64 {
        self.tiles
            .as_ref()
            .and_then(|tiles| tiles.margin)
            .unwrap_or(DEFAULT_MARGIN)
    }

    /// Scan correction for a wafer: configured entries first, then built-ins.
    pub fn scan_fit_for_wafer(&self, wafer_id: &str) -> Option<ScanFitParameters> {
        let wanted = normalize_wafer_id(wafer_id);
        self.scan_fit
            .iter()
            .find(|entry| {
                entry
                    .wafers
                    .iter()
                    .any(|wafer| normalize_wafer_id(wafer) == wanted)
            })
            .map(|entry| ScanFitParameters::new(entry.class_name.clone(), entry.coefficients.clone()))
            .or_else(|| ScanFitParameters::builtin_for_wafer(wafer_id))
    }

    /// Slab directory rewrites. Falls back to the nearline mount when none are configured.
    pub fn path_rewrites(&self) -> Vec<PathRewrite> {
        if self.path_rewrite.is_empty() {
            return vec![PathRewrite::nearline()];
        }
        self.path_rewrite
            .iter()
            .map(|rewrite| PathRewrite::new(rewrite.from.clone(), rewrite.to.clone()))
            .collect()
    }
}

fn normalize_wafer_id(wafer_id: &str) -> &str {
    let trimmed = wafer_id.trim_start_matches('0');
    if trimmed.is_empty() {
        wafer_id
    } else {
        trimmed
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "msem-render")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}
