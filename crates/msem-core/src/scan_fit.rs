//! Scan-fit (scan distortion) correction parameters.
//!
//! Every tile's transform list starts with an instrument-specific correction for
//! the beam scan distortion. The coefficients are fixed per wafer rather than
//! fitted per scan, so they are passed into the tile builder as a value.

use crate::tile_spec::LeafTransformSpec;
use serde::{Deserialize, Serialize};

/// Render transform class applying the multi-SEM scan distortion correction.
pub const SCAN_CORRECTION_CLASS_NAME: &str = "org.janelia.alignment.transform.SEMDistortionTransformA";

/// Coefficients shared by wafers 60 and 61.
pub const WAFER_60_61_COEFFICIENTS: [f64; 5] = [19.4, 64.8, 24.4, 972.0, 0.0];

/// Scan correction transform for one wafer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFitParameters {
    pub class_name: String,
    pub coefficients: Vec<f64>,
}

impl ScanFitParameters {
    pub fn new(class_name: impl Into<String>, coefficients: Vec<f64>) -> Self {
        Self {
            class_name: class_name.into(),
            coefficients,
        }
    }

    /// Built-in parameters for wafers 60 and 61.
    pub fn wafer_60_61() -> Self {
        Self::new(SCAN_CORRECTION_CLASS_NAME, WAFER_60_61_COEFFICIENTS.to_vec())
    }

    /// Built-in parameters for a wafer id, if the wafer has any.
    pub fn builtin_for_wafer(wafer_id: &str) -> Option<Self> {
        match wafer_id.trim_start_matches('0') {
            "60" | "61" => Some(Self::wafer_60_61()),
            _ => None,
        }
    }

    /// Coefficients as a space separated render data string.
    pub fn data_string(&self) -> String {
        self.coefficients
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_transform_spec(&self) -> LeafTransformSpec {
        LeafTransformSpec {
            class_name: self.class_name.clone(),
            data_string: self.data_string(),
        }
    }
}
