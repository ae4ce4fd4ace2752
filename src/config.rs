use std::sync::Arc;

use crate::{
    listener::AllocationListener,
    storage::{MemoryStorage, Storage},
    strategy::Strategy,
    Allocator,
};

/// Configuration for [`Allocator`].
///
/// # Examples
/// ```
/// # use abtest::AllocatorConfig;
/// let allocator = AllocatorConfig::in_memory()
///     .default_namespace("checkout")
///     .listener(|event: &abtest::AllocationEvent| {
///         println!("{:?}", event);
///     })
///     .to_allocator();
/// ```
pub struct AllocatorConfig {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) default_namespace: String,
    pub(crate) listeners: Vec<Arc<dyn AllocationListener + Send + Sync>>,
}

impl AllocatorConfig {
    /// Default namespace for calls that don't specify one.
    pub const DEFAULT_NAMESPACE: &'static str = "__global_abtest__";

    /// Keep assignments in process memory only.
    ///
    /// ```
    /// # use abtest::AllocatorConfig;
    /// AllocatorConfig::in_memory();
    /// ```
    pub fn in_memory() -> Self {
        AllocatorConfig::with_storage(MemoryStorage::new())
    }

    /// Persist assignments in `storage`.
    ///
    /// ```no_run
    /// # use abtest::{AllocatorConfig, FileStorage};
    /// let storage = FileStorage::new("/var/lib/my-app/abtest").unwrap();
    /// let allocator = AllocatorConfig::with_storage(storage).to_allocator();
    /// ```
    pub fn with_storage(storage: impl Storage + 'static) -> Self {
        AllocatorConfig {
            storage: Arc::new(storage),
            default_namespace: AllocatorConfig::DEFAULT_NAMESPACE.to_owned(),
            listeners: Vec::new(),
        }
    }

    /// Override the namespace used when [`AllocateOptions`] don't name one.
    pub fn default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Register a listener at construction. More can be added later with
    /// [`Allocator::subscribe`].
    pub fn listener(mut self, listener: impl AllocationListener + Send + Sync + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Create a new [`Allocator`] using the specified configuration.
    pub fn to_allocator(self) -> Allocator {
        Allocator::new(self)
    }
}

/// Per-call options of [`Allocator::allocate`] and [`Allocator::reset`].
///
/// ```
/// # use abtest::{AllocateOptions, BuiltinStrategy};
/// let options = AllocateOptions::new()
///     .strategy(BuiltinStrategy::Crc32)
///     .identity("user-42")
///     .namespace("checkout");
/// ```
#[derive(Debug, Clone, Default)]
pub struct AllocateOptions {
    pub(crate) strategy: Strategy,
    pub(crate) identity: Option<String>,
    pub(crate) namespace: Option<String>,
}

impl AllocateOptions {
    /// Random strategy, no identity, allocator's default namespace.
    pub fn new() -> Self {
        AllocateOptions::default()
    }

    /// Strategy for experiments that don't set their own.
    pub fn strategy(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Stable user or session id. Required by [`BuiltinStrategy::Crc32`](crate::BuiltinStrategy).
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Namespace to read and write. Defaults to [`AllocatorConfig::default_namespace`].
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}
