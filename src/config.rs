//! TOML configuration for the orchestrator and its worker fleet.
//!
//! Descriptor-only configuration: the file declares worker metadata
//! (capabilities, contracts, limits, retry policy) while the invoker
//! implementations are supplied in code at registration time.

use crate::contract::Contract;
use crate::error::Result;
use crate::worker::{BackoffKind, Capability, RetryPolicy, WorkerDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

fn default_max_in_flight() -> usize {
    4
}

fn default_selection_retry_ms() -> u64 {
    100
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Global ceiling on simultaneous in-flight invocations.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Re-poll interval for tasks stalled on saturated workers.
    #[serde(default = "default_selection_retry_ms")]
    pub selection_retry_ms: u64,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            selection_retry_ms: default_selection_retry_ms(),
            workers: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading orchestrator config");
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "orchestrator config saved");
        Ok(())
    }

    pub fn selection_retry(&self) -> Duration {
        Duration::from_millis(self.selection_retry_ms)
    }

    /// Build validated descriptors for every configured worker.
    pub fn descriptors(&self) -> Result<Vec<WorkerDescriptor>> {
        self.workers.iter().map(WorkerConfig::descriptor).collect()
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_priority() -> i32 {
    50
}

fn default_timeout_secs() -> u64 {
    30
}

/// Declarative worker entry in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: String,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub input_contract: Contract,
    #[serde(default)]
    pub output_contract: Contract,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Default payload fields merged into dispatched tasks.
    #[serde(default)]
    pub defaults: serde_json::Map<String, Value>,
}

impl WorkerConfig {
    /// Convert to a runtime descriptor, validating capability names.
    pub fn descriptor(&self) -> Result<WorkerDescriptor> {
        let capabilities = self
            .capabilities
            .iter()
            .map(|c| Capability::new(c))
            .collect::<Result<Vec<_>>>()?;
        let descriptor = WorkerDescriptor::new(&self.id, capabilities)
            .with_input_contract(self.input_contract.clone())
            .with_output_contract(self.output_contract.clone())
            .with_concurrency_limit(self.concurrency)
            .with_priority(self.priority)
            .with_retry_policy(self.retry.policy())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_defaults(self.defaults.clone());
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Retry policy as declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffKind::default(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}
