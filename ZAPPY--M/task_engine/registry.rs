use std::{fmt, sync::Arc};

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use crate::{
    executor::{ExecutionError, ExecutionReport, TaskExecutor},
    task::{TaskDescriptor, TaskMode},
};

/// Logical purpose an executor is selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Deliberate reasoning over code or documents.
    Analyze,
    /// Browser-driven interaction.
    Browse,
    /// Latency-sensitive work.
    Realtime,
    /// Anything without a dedicated executor.
    General,
}

impl Purpose {
    /// Purpose serving a task mode.
    #[must_use]
    pub const fn for_mode(mode: TaskMode) -> Self {
        match mode {
            TaskMode::Browser => Self::Browse,
            TaskMode::Code => Self::Analyze,
            TaskMode::Fast => Self::Realtime,
        }
    }
}

type Factory = Box<dyn Fn() -> Result<Arc<dyn TaskExecutor>, ExecutionError> + Send + Sync>;

struct Entry {
    factory: Factory,
    instance: OnceCell<Arc<dyn TaskExecutor>>,
}

/// Executors keyed by purpose, each built on first use and cached afterwards.
///
/// A purpose without its own entry resolves to the [`Purpose::General`] entry.
/// A factory that fails is retried on the next resolve.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: IndexMap<Purpose, Entry>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("purposes", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a lazily constructed executor for `purpose`, replacing any previous one.
    pub fn register<F>(&mut self, purpose: Purpose, factory: F)
    where
        F: Fn() -> Result<Arc<dyn TaskExecutor>, ExecutionError> + Send + Sync + 'static,
    {
        self.entries.insert(
            purpose,
            Entry {
                factory: Box::new(factory),
                instance: OnceCell::new(),
            },
        );
    }

    /// Builder-style [`CapabilityRegistry::register`].
    #[must_use]
    pub fn with<F>(mut self, purpose: Purpose, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn TaskExecutor>, ExecutionError> + Send + Sync + 'static,
    {
        self.register(purpose, factory);
        self
    }

    /// Returns the executor for `purpose`, constructing it on first demand.
    pub fn resolve(&self, purpose: Purpose) -> Result<Arc<dyn TaskExecutor>, ExecutionError> {
        let entry = self
            .entries
            .get(&purpose)
            .or_else(|| self.entries.get(&Purpose::General))
            .ok_or_else(|| ExecutionError::Unavailable(format!("no executor for {purpose:?}")))?;
        let executor = entry.instance.get_or_try_init(|| {
            tracing::info!(?purpose, "constructing executor");
            (entry.factory)()
        })?;
        Ok(Arc::clone(executor))
    }

    /// True if `purpose` already has a constructed executor.
    #[must_use]
    pub fn is_loaded(&self, purpose: Purpose) -> bool {
        self.entries
            .get(&purpose)
            .is_some_and(|entry| entry.instance.get().is_some())
    }
}

/// Executor that picks a registry entry per task mode.
#[derive(Debug)]
pub struct RoutingExecutor {
    registry: CapabilityRegistry,
}

impl RoutingExecutor {
    /// Wraps a registry.
    #[must_use]
    pub const fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }
}

#[async_trait]
impl TaskExecutor for RoutingExecutor {
    fn name(&self) -> &str {
        "routing"
    }

    async fn execute(
        &self,
        task: &TaskDescriptor,
    ) -> Result<Box<dyn ExecutionReport>, ExecutionError> {
        let executor = self.registry.resolve(Purpose::for_mode(task.mode))?;
        executor.execute(task).await
    }
}
