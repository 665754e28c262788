//! Registry of job handlers keyed by class name

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

/// Exception kind recorded for handler errors and unknown classes
pub const ERROR_EXCEPTION: &str = "Error";

/// Exception kind recorded for panicking handlers
pub const PANIC_EXCEPTION: &str = "Panic";

/// A failed job, as recorded in the failure list
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    /// Exception kind (`"Error"` or `"Panic"`)
    pub exception: String,

    /// Human-readable description
    pub message: String,
}

impl JobError {
    /// An ordinary handler error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            exception: ERROR_EXCEPTION.to_string(),
            message: message.into(),
        }
    }

    /// A recovered panic
    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            exception: PANIC_EXCEPTION.to_string(),
            message: message.into(),
        }
    }

    /// No handler registered for the job's class
    pub fn handler_not_found(class: &str, queue: &str, args: &[Value]) -> Self {
        Self::new(format!(
            "No worker for {} in queue {} with args {}",
            class,
            queue,
            Value::Array(args.to_vec())
        ))
    }

    pub fn is_panic(&self) -> bool {
        self.exception == PANIC_EXCEPTION
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Job handler result
pub type JobResult = Result<(), JobError>;

/// Job handler function type, called with the queue name and the job arguments
pub type JobHandler =
    Arc<dyn Fn(String, Vec<Value>) -> Pin<Box<dyn Future<Output = JobResult> + Send>> + Send + Sync>;

/// Maps job classes to handlers
///
/// Populated before a run starts and read-only while workers execute.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job class, replacing any previous one
    ///
    /// # Example
    ///
    /// ```
    /// use rework::registry::{HandlerRegistry, JobError};
    ///
    /// let mut registry = HandlerRegistry::new();
    /// registry.register("Archive", |queue, args| async move {
    ///     if args.is_empty() {
    ///         return Err(JobError::new(format!("nothing to archive from {queue}")));
    ///     }
    ///     Ok(())
    /// });
    /// assert!(registry.contains("Archive"));
    /// ```
    pub fn register<F, Fut>(&mut self, class: impl Into<String>, handler: F)
    where
        F: Fn(String, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |queue, args| Box::pin(handler(queue, args)));
        self.handlers.insert(class.into(), handler);
    }

    pub fn get(&self, class: &str) -> Option<&JobHandler> {
        self.handlers.get(class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.handlers.contains_key(class)
    }

    /// Registered class names
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<_> = self.classes().collect();
        classes.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("classes", &classes)
            .finish()
    }
}
