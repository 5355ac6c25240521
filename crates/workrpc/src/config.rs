//! Worker configuration.

/// Settings for a spawned worker thread.
///
/// Built fluently:
///
/// ```ignore
/// let config = WorkerConfig::new("filters").stack_size(8 << 20);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub name: String,
    pub stack_size: Option<usize>,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
        }
    }

    /// Overrides the worker thread's stack size in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("workrpc-worker")
    }
}
