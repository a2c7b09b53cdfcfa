//! Application state.

use alertclip_engine::{EngineConfig, JobRegistry};
use alertclip_media::Toolchain;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub engine_config: EngineConfig,
    pub tools: Toolchain,
    pub registry: JobRegistry,
}

impl AppState {
    /// Create new application state. Fails when a required external
    /// tool is missing from PATH.
    pub fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let tools = Toolchain::discover()?;
        let engine_config = EngineConfig::from_env();
        let registry = JobRegistry::new(tools.clone(), engine_config.clone());

        Ok(Self {
            config,
            engine_config,
            tools,
            registry,
        })
    }
}
