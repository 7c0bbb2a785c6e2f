//! render-client: blocking client for the render web service
//!
//! Implements [`RenderStore`] over the render-ws REST API:
//!
//! - `GET  <stack_url>` reads stack metadata (404 = no such stack)
//! - `POST <stack_url>` creates a stack in `LOADING` state
//! - `PUT  <stack_url>/state/<STATE>` changes the stack state
//! - `PUT  <stack_url>/resolvedTiles?deriveData=<bool>` saves a batch of tile specs

use chrono::{DateTime, Utc};
use msem_core::{RenderStore, StackId, StackResolution, StackState, StoreError, StoreResult, TileSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Port the render web service listens on unless configured otherwise
pub const DEFAULT_RENDER_PORT: u16 = 8080;

/// Per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Location of the render web service for one owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderEndpoint {
    /// Host name, optionally with an explicit `:port`
    pub host: String,
    pub port: Option<u16>,
    pub owner: String,
}

impl RenderEndpoint {
    pub fn new(host: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Some(DEFAULT_RENDER_PORT),
            owner: owner.into(),
        }
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    fn authority(&self) -> String {
        match self.port {
            // a host given as `name:port` wins over the configured port
            Some(port) if !self.host.contains(':') => format!("{}:{}", self.host, port),
            _ => self.host.clone(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/render-ws/v1", self.authority())
    }

    pub fn project_url(&self, project: &str) -> String {
        format!("{}/owner/{}/project/{}", self.base_url(), self.owner, project)
    }

    pub fn stack_url(&self, stack: &StackId) -> String {
        format!("{}/stack/{}", self.project_url(&stack.project), stack.stack)
    }

    pub fn state_url(&self, stack: &StackId, state: StackState) -> String {
        format!("{}/state/{}", self.stack_url(stack), state)
    }

    pub fn resolved_tiles_url(&self, stack: &StackId, derive_data: bool) -> String {
        format!(
            "{}/resolvedTiles?deriveData={}",
            self.stack_url(stack),
            derive_data
        )
    }
}

/// Subset of the stack metadata the importer needs
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackMetaData {
    state: StackState,
}

/// Body of the create-stack request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StackVersion {
    stack_resolution_x: f64,
    stack_resolution_y: f64,
    stack_resolution_z: f64,
    create_timestamp: String,
}

impl StackVersion {
    fn new(resolution: &StackResolution, created: DateTime<Utc>) -> Self {
        Self {
            stack_resolution_x: resolution.x,
            stack_resolution_y: resolution.y,
            stack_resolution_z: resolution.z,
            create_timestamp: created.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        }
    }
}

/// Body of the save-tiles request. No shared transforms are used.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedTiles<'a> {
    transform_id_to_spec_map: BTreeMap<String, serde_json::Value>,
    tile_id_to_spec_map: BTreeMap<&'a str, &'a TileSpec>,
}

impl<'a> ResolvedTiles<'a> {
    fn new(tile_specs: &'a [TileSpec]) -> Self {
        Self {
            transform_id_to_spec_map: BTreeMap::new(),
            tile_id_to_spec_map: tile_specs
                .iter()
                .map(|tile| (tile.tile_id.as_str(), tile))
                .collect(),
        }
    }
}

/// Blocking render web service client
pub struct RenderWebServiceClient {
    endpoint: RenderEndpoint,
    agent: ureq::Agent,
}

impl RenderWebServiceClient {
    pub fn new(endpoint: RenderEndpoint, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { endpoint, agent }
    }

    pub fn endpoint(&self) -> &RenderEndpoint {
        &self.endpoint
    }

    fn put_empty(&self, url: &str) -> StoreResult<()> {
        debug!("submitting PUT {}", url);
        self.agent
            .put(url)
            .call()
            .map_err(|err| store_error("PUT", url, err))?;
        Ok(())
    }
}

/// Convert a ureq failure into the store's error type
fn store_error(method: &str, url: &str, err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, response) => StoreError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => StoreError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

impl RenderStore for RenderWebServiceClient {
    fn stack_state(&self, stack: &StackId) -> StoreResult<Option<StackState>> {
        let url = self.endpoint.stack_url(stack);
        debug!("submitting GET {}", url);

        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(err) => return Err(store_error("GET", &url, err)),
        };
        let metadata: StackMetaData =
            response
                .into_json()
                .map_err(|err| StoreError::InvalidResponse {
                    url: url.clone(),
                    message: err.to_string(),
                })?;
        Ok(Some(metadata.state))
    }

    fn create_stack(&self, stack: &StackId, resolution: &StackResolution) -> StoreResult<()> {
        let url = self.endpoint.stack_url(stack);
        let body = StackVersion::new(resolution, Utc::now());
        info!("submitting POST {} to create stack", url);

        self.agent
            .post(&url)
            .send_json(&body)
            .map_err(|err| store_error("POST", &url, err))?;
        Ok(())
    }

    fn set_stack_state(&self, stack: &StackId, state: StackState) -> StoreResult<()> {
        self.put_empty(&self.endpoint.state_url(stack, state))
    }

    fn save_tile_specs(
        &self,
        stack: &StackId,
        tile_specs: &[TileSpec],
        derive_data: bool,
    ) -> StoreResult<()> {
        let url = self.endpoint.resolved_tiles_url(stack, derive_data);
        let body = ResolvedTiles::new(tile_specs);
        info!(
            "submitting PUT {} for {} tile specs",
            url,
            body.tile_id_to_spec_map.len()
        );

        self.agent
            .put(&url)
            .send_json(&body)
            .map_err(|err| store_error("PUT", &url, err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use msem_core::tile_spec::{MipmapLevel, TileLayout, TransformList};

    fn stack() -> StackId {
        StackId::new("w60_serial_290_to_299", "w60_s296_m399")
    }

    fn tile(tile_id: &str) -> TileSpec {
        let mut mipmap_levels = BTreeMap::new();
        mipmap_levels.insert(
            "0".to_string(),
            MipmapLevel {
                image_url: format!("file:/data/{tile_id}.png"),
            },
        );
        TileSpec {
            tile_id: tile_id.to_string(),
            z: 1,
            layout: TileLayout {
                section_id: "1.0".to_string(),
                image_row: 0,
                image_col: 0,
                stage_x: 0,
                stage_y: 0,
            },
            width: 2000,
            height: 1748,
            min_intensity: 0,
            max_intensity: 255,
            mipmap_levels,
            transforms: TransformList {
                kind: "list".to_string(),
                spec_list: vec![],
            },
        }
    }

    #[test]
    fn test_stack_urls() {
        let endpoint = RenderEndpoint::new("em-services-1.int.janelia.org", "hess_wafer_53");

        assert_eq!(
            endpoint.stack_url(&stack()),
            "http://em-services-1.int.janelia.org:8080/render-ws/v1/owner/hess_wafer_53/project/w60_serial_290_to_299/stack/w60_s296_m399"
        );
        assert!(endpoint
            .state_url(&stack(), StackState::Loading)
            .ends_with("/stack/w60_s296_m399/state/LOADING"));
        assert!(endpoint
            .resolved_tiles_url(&stack(), false)
            .ends_with("/stack/w60_s296_m399/resolvedTiles?deriveData=false"));
    }

    #[test]
    fn test_host_port_handling() {
        let endpoint = RenderEndpoint::new("render:9000", "owner");
        assert_eq!(endpoint.base_url(), "http://render:9000/render-ws/v1");

        let endpoint = RenderEndpoint::new("render", "owner").with_port(None);
        assert_eq!(endpoint.base_url(), "http://render/render-ws/v1");

        let endpoint = RenderEndpoint::new("render", "owner").with_port(Some(8081));
        assert_eq!(endpoint.project_url("p"), "http://render:8081/render-ws/v1/owner/owner/project/p");
    }

    #[test]
    fn test_create_stack_body() {
        let created = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let body = StackVersion::new(&StackResolution::default(), created);

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "stackResolutionX": 8.0,
                "stackResolutionY": 8.0,
                "stackResolutionZ": 8.0,
                "createTimestamp": "2024-03-05T14:07:09.000Z"
            })
        );
    }

    #[test]
    fn test_resolved_tiles_body() {
        let tiles = vec![tile("b"), tile("a")];
        let value = serde_json::to_value(ResolvedTiles::new(&tiles)).unwrap();

        assert_eq!(value["transformIdToSpecMap"], serde_json::json!({}));
        let specs = value["tileIdToSpecMap"].as_object().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs["a"]["tileId"], "a");
        assert_eq!(specs["b"]["mipmapLevels"]["0"]["imageUrl"], "file:/data/b.png");
    }

    #[test]
    fn test_stack_metadata_state() {
        let metadata: StackMetaData = serde_json::from_str(
            r#"{"stackId": {"owner": "o", "project": "p", "stack": "s"},
                "state": "COMPLETE",
                "currentVersionNumber": 3}"#,
        )
        .unwrap();
        assert_eq!(metadata.state, StackState::Complete);
    }
}
