use serde::{Deserialize, Serialize};

/// Top-level configuration file (`console-engine.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Tunables shared by every engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Page size of a freshly created list.
    pub default_page_size: u32,

    /// Fixed delay between poll ticks.
    pub poll_delay_ms: u64,

    /// Buffer of each engine's change broadcast channel.
    pub event_capacity: usize,

    /// Upper bound on concurrent per-target mutations.
    pub executor_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            poll_delay_ms: 3000,
            event_capacity: 100,
            executor_concurrency: 4,
        }
    }
}

impl EngineConfig {
    pub fn poll_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub prefix: String,
    pub debug: bool,
    pub console: bool,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            prefix: "console-engine".to_string(),
            debug: false,
            console: true,
            json: false,
        }
    }
}
