//! Persistent A/B test bucket allocation.
//!
//! # Overview
//!
//! The crate revolves around an [`Allocator`] that assigns every experiment of a
//! [`ConfigurationMap`] to one of its groups and persists the assignment, so a returning client
//! sees the same groups. Each experiment is an [`ExperimentSpec`]: a traffic split of group ids to
//! percentage weights, plus an optional [`Strategy`].
//!
//! On every [`Allocator::allocate`] call the stored assignment is reconciled with the current
//! configuration. Experiments whose groups are unchanged keep their group, experiments that are new
//! or whose groups changed are bucketed again, and experiments that are no longer configured are
//! dropped. Only the groups are [fingerprinted](fingerprint::fingerprint): changing an
//! experiment's strategy, key or param name keeps the stored assignment.
//!
//! # Strategies
//!
//! - [`BuiltinStrategy::Random`] draws uniformly; it is the default.
//! - [`BuiltinStrategy::Crc32`] buckets deterministically by the CRC-32 of the caller's identity
//!   (see [`AllocateOptions::identity`]). This is standard IEEE CRC-32 over UTF-8 bytes; older
//!   JavaScript clients hashed UTF-16 code units with a non-standard variant, so the same identity
//!   can land in a different group than it did there.
//! - [`Strategy::custom`] plugs in any [`CustomStrategy`], including plain closures. Invalid output
//!   falls back to a random draw.
//!
//! # Storage
//!
//! Assignments are kept per namespace in a [`Storage`]: [`MemoryStorage`] by default, or
//! [`FileStorage`] to survive restarts. Storage failures are never returned to the caller; they
//! are logged and the allocator keeps working as if nothing had been stored.
//!
//! ```
//! # use abtest::{AllocateOptions, AllocatorConfig, BuiltinStrategy, ConfigurationMap, ExperimentSpec};
//! let allocator = AllocatorConfig::in_memory().to_allocator();
//!
//! let config = ConfigurationMap::from([
//!     ("pricing", ExperimentSpec::new("exp_pricing", "pricing", [(0, 50.0), (1, 50.0)])),
//!     ("layout", ExperimentSpec::new("exp_layout", "layout", [(0, 10.0), (1, 90.0)])),
//! ]);
//! let options = AllocateOptions::new()
//!     .strategy(BuiltinStrategy::Crc32)
//!     .identity("123456789");
//!
//! let result = allocator.allocate(&config, &options);
//! assert_eq!(result["pricing"], 1);
//! assert_eq!(allocator.get_value("layout", None), 1);
//! assert_eq!(allocator.userstat(None), "exp_pricing-1;exp_layout-1");
//! ```
//!
//! # Error Handling
//!
//! Allocation itself never fails. [`Error`] is used by [`Storage`] implementations and
//! [`StrategyError`] by [`CustomStrategy`] implementations; both are logged by the allocator.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with target `"abtest"` for
//! logging messages. Consider integrating a `log`-compatible logger implementation for better
//! visibility into reassignments and degraded storage.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod fingerprint;
pub mod hash;
pub mod strategy;
pub mod userstat;

mod allocator;
mod assignment_store;
mod config;
mod error;
mod experiment;
mod listener;
mod storage;

pub use allocator::Allocator;
pub use assignment_store::{AssignmentStore, PersistedState};
pub use config::{AllocateOptions, AllocatorConfig};
pub use error::{Error, Result, StrategyError};
pub use experiment::{AssignmentResult, ConfigurationMap, ExperimentSpec, Groups, UNASSIGNED};
pub use fingerprint::Fingerprint;
pub use listener::{AllocationEvent, AllocationListener, SubscriptionId};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use strategy::{BuiltinStrategy, CustomStrategy, Strategy, UnknownStrategy};
