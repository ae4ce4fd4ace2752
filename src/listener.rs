use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::experiment::AssignmentResult;

/// Snapshot published after every `allocate` or `reset`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEvent {
    /// Namespace the result was persisted under.
    pub namespace: String,
    /// Complete result, exactly as returned to the caller.
    pub result: Arc<AssignmentResult>,
    /// Experiments that were freshly bucketed (new, or their groups changed).
    pub reassigned: Vec<String>,
    /// Experiments dropped because they are no longer configured.
    pub pruned: Vec<String>,
    /// When the allocation finished.
    pub timestamp: DateTime<Utc>,
}

/// Receives [`AllocationEvent`]s from an [`Allocator`](crate::Allocator).
///
/// ```
/// # use abtest::{AllocationEvent, AllocatorConfig};
/// let allocator = AllocatorConfig::in_memory()
///     .listener(|event: &AllocationEvent| println!("{:?}", event.result))
///     .to_allocator();
/// ```
///
/// # Notes
///
/// Listeners are called synchronously on the thread that ran the allocation, after the result has
/// been persisted. Namespace locks are already released at that point, so a listener may call back
/// into the allocator.
pub trait AllocationListener {
    /// Handle a published snapshot.
    fn on_allocation(&self, event: &AllocationEvent);
}

impl<T: Fn(&AllocationEvent)> AllocationListener for T {
    fn on_allocation(&self, event: &AllocationEvent) {
        self(event);
    }
}

/// Handle returned by [`Allocator::subscribe`](crate::Allocator::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);
