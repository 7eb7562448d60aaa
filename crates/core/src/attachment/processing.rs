//! Processing steps and versions.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::error::ProcessingError;

/// One processing step applied while a file is cached.
pub trait Processor: Send + Sync {
    /// Step name, reported in errors.
    fn name(&self) -> &str;

    /// Transform the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be processed.
    fn process(&self, content: Bytes) -> Result<Bytes, ProcessingError>;
}

struct FnProcessor<F> {
    name: String,
    step: F,
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(Bytes) -> Result<Bytes, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, content: Bytes) -> Result<Bytes, ProcessingError> {
        (self.step)(content).map_err(|reason| ProcessingError::new(&self.name, reason))
    }
}

/// Wrap a closure as a processing step.
pub fn processor<F>(name: impl Into<String>, step: F) -> Arc<dyn Processor>
where
    F: Fn(Bytes) -> Result<Bytes, String> + Send + Sync + 'static,
{
    Arc::new(FnProcessor {
        name: name.into(),
        step,
    })
}

/// Run steps in order, stopping at the first failure.
pub(crate) fn run_pipeline(
    steps: &[Arc<dyn Processor>],
    content: Bytes,
) -> Result<Bytes, ProcessingError> {
    steps
        .iter()
        .try_fold(content, |content, step| step.process(content))
}

/// A named rendition stored next to the main file as `<name>_<identifier>`.
#[derive(Clone)]
pub struct Version {
    name: String,
    processors: Vec<Arc<dyn Processor>>,
}

impl Version {
    /// Create a version with no processing of its own.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processors: Vec::new(),
        }
    }

    /// Append a processing step.
    #[must_use]
    pub fn process(mut self, step: Arc<dyn Processor>) -> Self {
        self.processors.push(step);
        self
    }

    /// Version name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("name", &self.name)
            .field(
                "processors",
                &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
