//! Worker identity, capability declarations, and retry policy.
//!
//! Workers are external, opaque units of execution. The core only knows a
//! worker through its [`WorkerDescriptor`] (declared capabilities, input
//! and output contracts, scheduling hints) and its [`Worker`] invocation
//! trait. What happens inside an invocation (retrieval, model inference,
//! plain computation) is not the core's concern.

use crate::contract::Contract;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A named unit of functionality a worker declares it can perform.
///
/// Identifiers are validated at construction: lowercase `verb_noun` style,
/// ASCII letters, digits and underscores, starting with a letter
/// (e.g. `"summarize_text"`, `"retrieve_documents"`). Validating here, at
/// registration time, replaces duck-typed capability discovery at call time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(String);

impl Capability {
    pub fn new(id: &str) -> Result<Self> {
        let mut chars = id.chars();
        let valid = match chars.next() {
            Some(first) => {
                first.is_ascii_lowercase()
                    && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            }
            None => false,
        };
        if !valid {
            return Err(Error::InvalidCapability(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Capability {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Capability::new(&value)
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        capability.0
    }
}

/// Unique identifier for a registered worker.
///
/// Worker ids come from the configuration surface and act as the
/// idempotency key for registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delay strategy applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy for failed task attempts.
///
/// `max_retries` bounds re-execution: a task gets at most
/// `max_retries + 1` attempts in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffKind::Exponential,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all: a single attempt per task.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffKind::Fixed,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff delay before re-entering selection after the given number
    /// of failed attempts (`failed_attempts >= 1`).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let n = failed_attempts.max(1);
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Linear => self.base_delay.saturating_mul(n),
            BackoffKind::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(n.saturating_sub(1))),
        }
    }
}

/// Declarative record describing a registered worker.
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    pub id: WorkerId,
    /// Capabilities this worker can perform. Never empty.
    pub capabilities: Vec<Capability>,
    /// Contract every dispatched payload must satisfy.
    pub input_contract: Contract,
    /// Contract every returned result must satisfy.
    pub output_contract: Contract,
    /// Maximum simultaneous in-flight tasks for this worker.
    pub concurrency_limit: usize,
    /// Selection priority; higher is preferred.
    pub priority: i32,
    pub retry_policy: RetryPolicy,
    /// Timeout applied to each invocation.
    pub timeout: Duration,
    /// Default payload values merged into task payloads for missing
    /// optional fields before input validation.
    pub defaults: serde_json::Map<String, Value>,
}

impl WorkerDescriptor {
    /// A descriptor with open contracts and default policy, for building up
    /// in code. `capabilities` must be non-empty and `concurrency_limit`
    /// positive; both are re-checked at registration.
    pub fn new(id: &str, capabilities: Vec<Capability>) -> Self {
        Self {
            id: WorkerId::new(id),
            capabilities,
            input_contract: Contract::empty(),
            output_contract: Contract::empty(),
            concurrency_limit: 1,
            priority: 50,
            retry_policy: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            defaults: serde_json::Map::new(),
        }
    }

    pub fn with_input_contract(mut self, contract: Contract) -> Self {
        self.input_contract = contract;
        self
    }

    pub fn with_output_contract(mut self, contract: Contract) -> Self {
        self.output_contract = contract;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_defaults(mut self, defaults: serde_json::Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Cheap capability check against the declared set.
    pub fn can_handle(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Structural sanity checks applied at registration.
    pub fn validate(&self) -> Result<()> {
        if self.capabilities.is_empty() {
            return Err(Error::InvalidDescriptor(format!(
                "worker {} declares no capabilities",
                self.id
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::InvalidDescriptor(format!(
                "worker {} has concurrency_limit 0",
                self.id
            )));
        }
        Ok(())
    }
}

/// Error returned by a worker invocation. Opaque to the core; carried
/// into the task's failure record verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationError(pub String);

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for InvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for InvocationError {}

/// The invocation boundary between the core and an external worker.
///
/// A single blocking call with a caller-supplied timeout; the core does
/// not know or care what the call is composed of.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(
        &self,
        capability: &Capability,
        payload: Value,
    ) -> std::result::Result<Value, InvocationError>;
}
