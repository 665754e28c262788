//! Key layout shared with Resque-compatible tooling
//!
//! Every key is prefixed with the configured namespace (`resque:` by default).

/// Builds namespaced store keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// List holding the job envelopes of one queue
    pub fn queue(&self, queue: &str) -> String {
        format!("{}queue:{}", self.namespace, queue)
    }

    /// Status record of one worker
    pub fn worker(&self, worker: &str) -> String {
        format!("{}worker:{}", self.namespace, worker)
    }

    /// Start time of the job a worker is running
    pub fn worker_started(&self, worker: &str) -> String {
        format!("{}worker:{}:started", self.namespace, worker)
    }

    /// Set of live worker ids
    pub fn workers(&self) -> String {
        format!("{}workers", self.namespace)
    }

    /// Append-only list of failure records
    pub fn failed(&self) -> String {
        format!("{}failed", self.namespace)
    }

    pub fn processed(&self) -> String {
        format!("{}stat:processed", self.namespace)
    }

    pub fn processed_by(&self, worker: &str) -> String {
        format!("{}stat:processed:{}", self.namespace, worker)
    }

    pub fn failed_count(&self) -> String {
        format!("{}stat:failed", self.namespace)
    }

    pub fn failed_by(&self, worker: &str) -> String {
        format!("{}stat:failed:{}", self.namespace, worker)
    }
}
