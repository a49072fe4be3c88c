use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_PIPELINE_CONFIG: &str = include_str!("data/pipeline_config.json");

pub const PIPELINE_CONFIG_PATH_ENV: &str = "REROLL_PIPELINE_CONFIG_PATH";

/// Tunables for region detection and planning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    region_size: u32,
    worker_count: usize,
    world_seed: u64,
    command_bind: SocketAddr,
    log_bind: SocketAddr,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region_size: 16,
            worker_count: 2,
            world_seed: 0xCAFE_BABE,
            command_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42001),
            log_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42003),
        }
    }
}

impl PipelineConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_PIPELINE_CONFIG)
                .expect("builtin pipeline config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| PipelineConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = PipelineConfig::from_json_str(&contents)?;
        Ok(config)
    }

    /// Edge length of a region in cells, never zero.
    pub fn region_size(&self) -> u32 {
        self.region_size.max(1)
    }

    /// Number of planning workers, never zero.
    pub fn worker_count(&self) -> usize {
        self.worker_count.max(1)
    }

    pub fn world_seed(&self) -> u64 {
        self.world_seed
    }

    pub fn command_bind(&self) -> SocketAddr {
        self.command_bind
    }

    pub fn log_bind(&self) -> SocketAddr {
        self.log_bind
    }

    pub fn with_region_size(mut self, region_size: u32) -> Self {
        self.region_size = region_size;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_world_seed(mut self, world_seed: u64) -> Self {
        self.world_seed = world_seed;
        self
    }
}

#[derive(Debug, Error)]
pub enum PipelineConfigError {
    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read pipeline config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Resource, Debug, Clone)]
pub struct PipelineConfigHandle(pub Arc<PipelineConfig>);

impl PipelineConfigHandle {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<PipelineConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.0
    }
}

pub fn load_pipeline_config_from_env() -> Arc<PipelineConfig> {
    if let Some(path) = env::var_os(PIPELINE_CONFIG_PATH_ENV).map(PathBuf::from) {
        match PipelineConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "reroll::config",
                    path = %path.display(),
                    region_size = config.region_size(),
                    worker_count = config.worker_count(),
                    "pipeline_config.loaded=file"
                );
                return Arc::new(config);
            }
            Err(err) => {
                tracing::warn!(
                    target: "reroll::config",
                    path = %path.display(),
                    error = %err,
                    "pipeline_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "reroll::config", "pipeline_config.loaded=builtin");
    PipelineConfig::builtin()
}
