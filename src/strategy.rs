//! Bucketing strategies.
//!
//! Every strategy walks the groups in ascending id order, accumulating weights, and picks the first
//! group whose cumulative weight exceeds the drawn point. When weights under-cover 100, points past
//! the last group land in the largest group id.
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    str::FromStr,
    sync::Arc,
};

use derive_more::From;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    error::StrategyError,
    experiment::{Groups, UNASSIGNED},
    hash::crc32,
};

/// Strategies that ship with the crate. Serialized as `"random"` and `"crc32"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinStrategy {
    /// Uniform random draw, not reproducible.
    #[default]
    Random,
    /// Deterministic bucketing by CRC-32 of the caller's identity.
    Crc32,
}

impl BuiltinStrategy {
    /// Serialized name.
    pub fn name(self) -> &'static str {
        match self {
            BuiltinStrategy::Random => "random",
            BuiltinStrategy::Crc32 => "crc32",
        }
    }
}

/// Strategy name that is not one of [`BuiltinStrategy`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown strategy {0:?}")]
pub struct UnknownStrategy(pub String);

impl FromStr for BuiltinStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(BuiltinStrategy::Random),
            "crc32" => Ok(BuiltinStrategy::Crc32),
            other => Err(UnknownStrategy(other.to_owned())),
        }
    }
}

/// Caller-supplied bucketing.
///
/// Any `Fn(&Groups) -> i64` closure is a `CustomStrategy`:
///
/// ```
/// # use abtest::{Groups, Strategy};
/// let always_control = Strategy::custom(|_groups: &Groups| -> i64 { 0 });
/// ```
///
/// # Errors
///
/// Returning an error, returning an id that is not a key of `groups`, or panicking makes the engine
/// fall back to [`BuiltinStrategy::Random`] for that experiment. None of these reach the caller of
/// `allocate`.
pub trait CustomStrategy: Send + Sync {
    /// Pick a group id out of `groups`.
    fn select(&self, groups: &Groups) -> Result<i64, StrategyError>;
}

impl<F: Fn(&Groups) -> i64 + Send + Sync> CustomStrategy for F {
    fn select(&self, groups: &Groups) -> Result<i64, StrategyError> {
        Ok(self(groups))
    }
}

/// Bucketing strategy of an experiment or of an `allocate` call.
#[derive(Clone, From)]
pub enum Strategy {
    /// One of the strategies shipped with the crate.
    Builtin(BuiltinStrategy),
    /// Caller-supplied strategy.
    Custom(Arc<dyn CustomStrategy>),
}

impl Strategy {
    /// Wrap a custom strategy.
    pub fn custom(strategy: impl CustomStrategy + 'static) -> Self {
        Strategy::Custom(Arc::new(strategy))
    }

    /// Compute a group id for `experiment`.
    ///
    /// Never fails: a missing identity for [`BuiltinStrategy::Crc32`] yields [`UNASSIGNED`] and a
    /// misbehaving custom strategy falls back to a random draw. Both are logged.
    pub fn assign(&self, experiment: &str, groups: &Groups, identity: Option<&str>) -> i64 {
        match self {
            Strategy::Builtin(BuiltinStrategy::Random) => select_random(groups, &mut thread_rng()),
            Strategy::Builtin(BuiltinStrategy::Crc32) => {
                match identity.filter(|identity| !identity.is_empty()) {
                    Some(identity) => select_by_identity(groups, identity),
                    None => {
                        log::warn!(target: "abtest", experiment; "{}", StrategyError::MissingIdentity);
                        UNASSIGNED
                    }
                }
            }
            Strategy::Custom(custom) => {
                run_custom(custom.as_ref(), groups).unwrap_or_else(|err| {
                    log::warn!(target: "abtest", experiment; "{}, falling back to random", err);
                    select_random(groups, &mut thread_rng())
                })
            }
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Builtin(BuiltinStrategy::Random)
    }
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Builtin(builtin) => f.debug_tuple("Builtin").field(builtin).finish(),
            Strategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Serialize for Strategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Strategy::Builtin(builtin) => builtin.serialize(serializer),
            Strategy::Custom(_) => Err(serde::ser::Error::custom(
                "custom strategies cannot be serialized",
            )),
        }
    }
}

/// Uniform draw in `[0, 100)`.
pub fn select_random<R: Rng + ?Sized>(groups: &Groups, rng: &mut R) -> i64 {
    pick(groups, rng.gen_range(0.0..100.0))
}

/// Deterministic bucketing: the point is `crc32(identity) mod 100`, so the same identity and groups
/// always land in the same group.
pub fn select_by_identity(groups: &Groups, identity: &str) -> i64 {
    pick(groups, f64::from(crc32(identity) % 100))
}

/// `point` and weights are both in percent.
fn pick(groups: &Groups, point: f64) -> i64 {
    let mut accumulated = 0.0;
    for (&id, &weight) in groups {
        accumulated += weight;
        if point < accumulated {
            return i64::from(id);
        }
    }
    overflow_group(groups)
}

fn overflow_group(groups: &Groups) -> i64 {
    groups
        .keys()
        .next_back()
        .map_or(UNASSIGNED, |&id| i64::from(id))
}

fn run_custom(custom: &dyn CustomStrategy, groups: &Groups) -> Result<i64, StrategyError> {
    let id = catch_unwind(AssertUnwindSafe(|| custom.select(groups)))
        .map_err(|payload| StrategyError::Panicked(panic_message(payload.as_ref())))??;

    let is_known = u32::try_from(id).map_or(false, |id| groups.contains_key(&id));
    if is_known {
        Ok(id)
    } else {
        Err(StrategyError::InvalidGroup(id))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn half_and_half() -> Groups {
        Groups::from([(0, 50.0), (1, 50.0)])
    }

    #[test]
    fn pick_walks_groups_in_id_order() {
        let groups = Groups::from([(2, 40.0), (0, 30.0), (1, 30.0)]);
        assert_eq!(pick(&groups, 0.0), 0);
        assert_eq!(pick(&groups, 29.9), 0);
        assert_eq!(pick(&groups, 30.0), 1);
        assert_eq!(pick(&groups, 59.9), 1);
        assert_eq!(pick(&groups, 60.0), 2);
        assert_eq!(pick(&groups, 99.9), 2);
    }

    #[test]
    fn under_covered_weights_go_to_largest_id() {
        let groups = Groups::from([(0, 30.0), (1, 30.0)]);
        for point in [60.0, 60.5, 75.0, 99.99] {
            assert_eq!(pick(&groups, point), 1, "point {point}");
        }

        // Zero-weight groups still count as the overflow bucket.
        let groups = Groups::from([(0, 30.0), (1, 30.0), (5, 0.0)]);
        assert_eq!(pick(&groups, 62.0), 5);
    }

    #[test]
    fn empty_groups_are_unassigned() {
        assert_eq!(pick(&Groups::new(), 10.0), UNASSIGNED);
    }

    #[test]
    fn random_respects_weights() {
        let groups = Groups::from([(0, 20.0), (1, 80.0)]);
        let mut rng = StdRng::seed_from_u64(42);

        let n = 10_000;
        let zeros = (0..n)
            .filter(|_| select_random(&groups, &mut rng) == 0)
            .count();

        assert!((1_700..2_300).contains(&zeros), "got {zeros} zeros");
    }

    #[test]
    fn random_under_coverage_never_leaves_groups() {
        let groups = Groups::from([(0, 30.0), (1, 30.0)]);
        let mut rng = StdRng::seed_from_u64(7);

        let n = 10_000;
        let mut ones = 0;
        for _ in 0..n {
            match select_random(&groups, &mut rng) {
                0 => {}
                1 => ones += 1,
                other => panic!("unexpected group {other}"),
            }
        }
        assert!((6_700..7_300).contains(&ones), "got {ones} ones");
    }

    #[test]
    fn identity_bucketing_is_stable() {
        // crc32("123456789") % 100 == 62
        assert_eq!(select_by_identity(&half_and_half(), "123456789"), 1);
        // crc32("bob") % 100 == 4
        assert_eq!(select_by_identity(&half_and_half(), "bob"), 0);
        // crc32("alice") % 100 == 35
        assert_eq!(select_by_identity(&half_and_half(), "alice"), 0);

        for _ in 0..10 {
            assert_eq!(select_by_identity(&half_and_half(), "123456789"), 1);
        }
    }

    #[test]
    fn identity_bucketing_under_coverage() {
        let groups = Groups::from([(0, 30.0), (1, 30.0)]);
        assert_eq!(select_by_identity(&groups, "123456789"), 1);
        assert_eq!(select_by_identity(&groups, "bob"), 0);
    }

    #[test]
    fn crc32_without_identity_is_unassigned() {
        let strategy = Strategy::from(BuiltinStrategy::Crc32);
        assert_eq!(strategy.assign("exp", &half_and_half(), None), UNASSIGNED);
        assert_eq!(strategy.assign("exp", &half_and_half(), Some("")), UNASSIGNED);
        assert_eq!(strategy.assign("exp", &half_and_half(), Some("bob")), 0);
    }

    #[test]
    fn custom_strategy_result_is_used() {
        let strategy = Strategy::custom(|_: &Groups| -> i64 { 1 });
        for _ in 0..20 {
            assert_eq!(strategy.assign("exp", &half_and_half(), None), 1);
        }
    }

    #[test]
    fn custom_strategy_invalid_group_falls_back() {
        let strategy = Strategy::custom(|_: &Groups| -> i64 { 99 });
        for _ in 0..20 {
            let id = strategy.assign("exp", &half_and_half(), None);
            assert!(id == 0 || id == 1, "got {id}");
        }

        let negative = Strategy::custom(|_: &Groups| -> i64 { -3 });
        let id = negative.assign("exp", &half_and_half(), None);
        assert!(id == 0 || id == 1, "got {id}");
    }

    #[test]
    fn custom_strategy_error_falls_back() {
        struct Failing;
        impl CustomStrategy for Failing {
            fn select(&self, _groups: &Groups) -> Result<i64, StrategyError> {
                Err(StrategyError::failed("remote bucket service is down"))
            }
        }

        assert_eq!(
            run_custom(&Failing, &half_and_half()),
            Err(StrategyError::Failed("remote bucket service is down".into()))
        );

        let id = Strategy::custom(Failing).assign("exp", &half_and_half(), None);
        assert!(id == 0 || id == 1, "got {id}");
    }

    #[test]
    fn custom_strategy_panic_falls_back() {
        let panicking = |_: &Groups| -> i64 { panic!("boom") };
        assert_eq!(
            run_custom(&panicking, &half_and_half()),
            Err(StrategyError::Panicked("boom".into()))
        );

        let id = Strategy::custom(panicking).assign("exp", &half_and_half(), None);
        assert!(id == 0 || id == 1, "got {id}");
    }

    #[test]
    fn parse_builtin_names() {
        assert_eq!("random".parse::<BuiltinStrategy>(), Ok(BuiltinStrategy::Random));
        assert_eq!("crc32".parse::<BuiltinStrategy>(), Ok(BuiltinStrategy::Crc32));
        assert_eq!(
            "md5".parse::<BuiltinStrategy>(),
            Err(UnknownStrategy("md5".into()))
        );
        assert_eq!(BuiltinStrategy::Crc32.name(), "crc32");
        assert_eq!(
            serde_json::to_string(&Strategy::from(BuiltinStrategy::Crc32)).unwrap(),
            "\"crc32\""
        );
    }
}
