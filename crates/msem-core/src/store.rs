//! Interface to the remote render store that receives tile specs.

use crate::tile_spec::TileSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Remote store errors. All of them abort the import run.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{method} {url} failed with status {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{method} {url} failed: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
    },

    #[error("unexpected response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("store error: {0}")]
    Other(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stack within a render project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId {
    pub project: String,
    pub stack: String,
}

impl StackId {
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
        }
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.stack)
    }
}

/// Lifecycle state of a remote stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackState {
    Loading,
    Complete,
    ReadOnly,
    Offline,
}

impl StackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackState::Loading => "LOADING",
            StackState::Complete => "COMPLETE",
            StackState::ReadOnly => "READ_ONLY",
            StackState::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOADING" => Ok(StackState::Loading),
            "COMPLETE" => Ok(StackState::Complete),
            "READ_ONLY" => Ok(StackState::ReadOnly),
            "OFFLINE" => Ok(StackState::Offline),
            other => Err(StoreError::Other(format!("unknown stack state {other:?}"))),
        }
    }
}

/// Stack resolution metadata in nanometers per pixel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StackResolution {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for StackResolution {
    fn default() -> Self {
        Self {
            x: 8.0,
            y: 8.0,
            z: 8.0,
        }
    }
}

/// Operations the importer performs against the remote store.
pub trait RenderStore: Send + Sync {
    /// Current state of a stack, or `None` if it does not exist
    fn stack_state(&self, stack: &StackId) -> StoreResult<Option<StackState>>;

    /// Create a stack (in `LOADING` state) with the given resolution
    fn create_stack(&self, stack: &StackId, resolution: &StackResolution) -> StoreResult<()>;

    fn set_stack_state(&self, stack: &StackId, state: StackState) -> StoreResult<()>;

    /// Save a batch of tile specs, optionally letting the store derive bounds
    fn save_tile_specs(
        &self,
        stack: &StackId,
        tile_specs: &[TileSpec],
        derive_data: bool,
    ) -> StoreResult<()>;
}
