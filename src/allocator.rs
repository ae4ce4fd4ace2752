use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
};

use chrono::Utc;

use crate::{
    assignment_store::{AssignmentStore, PersistedState},
    config::{AllocateOptions, AllocatorConfig},
    experiment::{AssignmentResult, ConfigurationMap, UNASSIGNED},
    fingerprint::fingerprint,
    listener::{AllocationEvent, AllocationListener, SubscriptionId},
    userstat,
};

type Listener = Arc<dyn AllocationListener + Send + Sync>;

/// The allocation engine.
///
/// Assigns experiments to groups, persists the assignment per namespace, and reconciles it with a
/// changing configuration on every [`allocate`](Allocator::allocate) call:
/// - experiments whose groups are unchanged keep their stored group id;
/// - new experiments, and experiments whose groups changed, are bucketed again;
/// - experiments that are no longer configured are dropped.
///
/// Calls against the same namespace are serialized, so an `Allocator` can be shared between threads.
/// Separate allocators on top of the same storage are not coordinated.
///
/// # Examples
/// ```
/// # use abtest::{AllocateOptions, AllocatorConfig, ConfigurationMap, ExperimentSpec};
/// let allocator = AllocatorConfig::in_memory().to_allocator();
///
/// let config = ConfigurationMap::from([(
///     "button_color",
///     ExperimentSpec::new("exp_button", "button_color", [(0, 50.0), (1, 50.0)]),
/// )]);
///
/// let first = allocator.allocate(&config, &AllocateOptions::new());
/// let second = allocator.allocate(&config, &AllocateOptions::new());
/// assert_eq!(first, second);
/// ```
pub struct Allocator {
    store: AssignmentStore,
    default_namespace: String,
    namespace_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Last configuration map per namespace, used for the userstat string.
    configurations: RwLock<HashMap<String, Arc<ConfigurationMap>>>,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_subscription_id: AtomicU64,
}

impl Allocator {
    /// Create a new `Allocator` using the specified configuration.
    pub fn new(config: AllocatorConfig) -> Self {
        let next_subscription_id = AtomicU64::new(0);
        let listeners: Vec<(SubscriptionId, Listener)> = config
            .listeners
            .into_iter()
            .map(|listener| {
                let id = SubscriptionId(next_subscription_id.fetch_add(1, Ordering::Relaxed));
                (id, listener)
            })
            .collect();

        Allocator {
            store: AssignmentStore::new(config.storage),
            default_namespace: config.default_namespace,
            namespace_locks: Mutex::new(HashMap::new()),
            configurations: RwLock::new(HashMap::new()),
            listeners: RwLock::new(listeners),
            next_subscription_id,
        }
    }

    /// Assign every experiment of `config` and persist the result.
    ///
    /// The returned map contains exactly the experiments of `config`. Never fails: storage errors
    /// degrade to "nothing stored" and strategy errors to [`UNASSIGNED`] or a random draw.
    pub fn allocate(&self, config: &ConfigurationMap, options: &AllocateOptions) -> AssignmentResult {
        let namespace = self.namespace(options.namespace.as_deref());

        let event = {
            let lock = self.namespace_lock(namespace);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.allocate_locked(namespace, config, options)
        };

        self.publish(event)
    }

    /// Clear the namespace, then allocate. Every experiment is bucketed afresh.
    pub fn reset(&self, config: &ConfigurationMap, options: &AllocateOptions) -> AssignmentResult {
        let namespace = self.namespace(options.namespace.as_deref());

        let event = {
            let lock = self.namespace_lock(namespace);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.clear_locked(namespace);
            self.allocate_locked(namespace, config, options)
        };

        self.publish(event)
    }

    /// Forget everything stored for the namespace.
    pub fn clear(&self, namespace: Option<&str>) {
        let namespace = self.namespace(namespace);

        let lock = self.namespace_lock(namespace);
        {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.clear_locked(namespace);
        }
        self.release_namespace_lock(namespace, lock);
    }

    /// Stored group id of `experiment`, or [`UNASSIGNED`] if there's none or storage is unreadable.
    pub fn get_value(&self, experiment: &str, namespace: Option<&str>) -> i64 {
        self.result(namespace)
            .and_then(|result| result.get(experiment).copied())
            .unwrap_or(UNASSIGNED)
    }

    /// Stored result of the namespace.
    pub fn result(&self, namespace: Option<&str>) -> Option<AssignmentResult> {
        self.store
            .load(self.namespace(namespace))
            .map(|state| state.result)
    }

    /// Userstat string of the namespace (see [`userstat::serialize`]).
    ///
    /// Returns an empty string if nothing has been allocated for the namespace.
    pub fn userstat(&self, namespace: Option<&str>) -> String {
        let namespace = self.namespace(namespace);

        let Some(state) = self.store.load(namespace) else {
            return String::new();
        };
        let Some(config) = self.configuration(namespace) else {
            return String::new();
        };

        userstat::serialize(&config, &state.result)
    }

    /// Register a listener for [`AllocationEvent`]s.
    pub fn subscribe(
        &self,
        listener: impl AllocationListener + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.listeners
            .write()
            .expect("thread holding listeners lock should not panic")
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .expect("thread holding listeners lock should not panic");
        let len = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != len
    }

    fn namespace<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace.unwrap_or(&self.default_namespace)
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .namespace_locks
            .lock()
            .expect("thread holding namespace locks should not panic");
        locks.entry(namespace.to_owned()).or_default().clone()
    }

    /// Drop the lock entry of a cleared namespace unless another call is holding or waiting on it.
    fn release_namespace_lock(&self, namespace: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .namespace_locks
            .lock()
            .expect("thread holding namespace locks should not panic");
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(namespace);
        }
    }

        /// In-memory configuration first, then the companion record (e.g., after a restart).
    fn configuration(&self, namespace: &str) -> Option<Arc<ConfigurationMap>> {
        let remembered = self
            .configurations
            .read()
            .expect("thread holding configurations lock should not panic")
            .get(namespace)
            .cloned();

        remembered.or_else(|| self.store.load_config(namespace).map(Arc::new))
    }

    fn clear_locked(&self, namespace: &str) {
        self.configurations
            .write()
            .expect("thread holding configurations lock should not panic")
            .remove(namespace);
        self.store.clear(namespace);
    }

    /// Must be called while holding the namespace lock.
    fn allocate_locked(
        &self,
        namespace: &str,
        config: &ConfigurationMap,
        options: &AllocateOptions,
    ) -> AllocationEvent {
        self.configurations
            .write()
            .expect("thread holding configurations lock should not panic")
            .insert(namespace.to_owned(), Arc::new(config.clone()));
        self.store.save_config(namespace, config);

        let (stored, legacy) = match self.store.load_record(namespace) {
            Some(record) => {
                let legacy = record.is_legacy();
                (PersistedState::from(record), legacy)
            }
            None => (PersistedState::default(), false),
        };

        let mut state = PersistedState::default();
        let mut reassigned = Vec::new();

        for (experiment, spec) in config.iter() {
            let current = fingerprint(&spec.groups);

            let stored_group_id = stored.result.get(experiment).copied();
            let group_id = match (stored_group_id, stored.fingerprints.get(experiment)) {
                (Some(group_id), Some(previous)) if *previous == current => {
                    log::debug!(target: "abtest", namespace, experiment, group_id; "keeping stored assignment");
                    group_id
                }
                // Legacy records carry no fingerprints. Their assignments are kept and get a
                // fingerprint from now on.
                (Some(group_id), None) if legacy => {
                    log::debug!(target: "abtest", namespace, experiment, group_id; "adopting assignment without fingerprint");
                    group_id
                }
                _ => {
                    let strategy = spec.strategy.as_ref().unwrap_or(&options.strategy);
                    let group_id =
                        strategy.assign(experiment, &spec.groups, options.identity.as_deref());
                    log::debug!(target: "abtest",
                                namespace,
                                experiment,
                                group_id,
                                fingerprint = current;
                                "bucketed experiment");
                    reassigned.push(experiment.to_owned());
                    group_id
                }
            };

            state.result.insert(experiment.to_owned(), group_id);
            state.fingerprints.insert(experiment.to_owned(), current);
        }

        let pruned: Vec<String> = stored
            .result
            .keys()
            .filter(|experiment| !config.contains(experiment))
            .cloned()
            .collect();
        if !pruned.is_empty() {
            log::debug!(target: "abtest", namespace; "dropping unconfigured experiments: {:?}", pruned);
        }

        self.store.save(namespace, &state);

        log::trace!(target: "abtest", namespace, result:serde = state.result; "allocated");

        AllocationEvent {
            namespace: namespace.to_owned(),
            result: Arc::new(state.result),
            reassigned,
            pruned,
            timestamp: Utc::now(),
        }
    }

    /// Notify listeners outside of the namespace lock and hand the result back to the caller.
    fn publish(&self, event: AllocationEvent) -> AssignmentResult {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .expect("thread holding listeners lock should not panic")
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener.on_allocation(&event);
        }

        Arc::unwrap_or_clone(event.result)
    }
}
