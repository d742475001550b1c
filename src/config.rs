use crate::error::{EngineError, Result};

/// Engine-wide tunables. Constructed explicitly and injected into the services
/// that need it; there is no process-global configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// An agent is considered live while `now - last_heartbeat` stays under
    /// this window.
    pub agent_liveness_secs: i64,
    /// Default retry budget applied to auto-restart tasks whose definition does
    /// not carry its own.
    pub max_auto_restarts: u32,
    /// TTL stamped on dispatch messages so a queue never delivers work to an
    /// agent that has been gone for hours.
    pub dispatch_ttl_secs: u64,
    /// Capacity of the entity-change event channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_liveness_secs: 180,
            max_auto_restarts: 3,
            dispatch_ttl_secs: 600,
            event_channel_capacity: 1000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(window) = std::env::var("JOBGRID_AGENT_LIVENESS_SECS") {
            config.agent_liveness_secs = window.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid agent_liveness_secs: {e}"))
            })?;
        }

        if let Ok(retries) = std::env::var("JOBGRID_MAX_AUTO_RESTARTS") {
            config.max_auto_restarts = retries.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid max_auto_restarts: {e}"))
            })?;
        }

        if let Ok(ttl) = std::env::var("JOBGRID_DISPATCH_TTL_SECS") {
            config.dispatch_ttl_secs = ttl
                .parse()
                .map_err(|e| EngineError::Configuration(format!("Invalid dispatch_ttl_secs: {e}")))?;
        }

        Ok(config)
    }
}
