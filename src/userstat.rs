//! Userstat string: `key-value;key-value;...` for analytics tagging.
use crate::experiment::{AssignmentResult, ConfigurationMap, UNASSIGNED};

/// Render assignments in `config` order as `<spec.key>-<result[spec.param_name]>` joined with `;`.
///
/// Experiments without a recorded result render as `-1`.
///
/// ```
/// # use abtest::{userstat, AssignmentResult, ConfigurationMap, ExperimentSpec};
/// let config = ConfigurationMap::from([
///     ("y", ExperimentSpec::new("exp_y", "y", [(0, 50.0), (1, 50.0)])),
///     ("x", ExperimentSpec::new("exp_x", "x", [(0, 50.0), (1, 50.0)])),
/// ]);
/// let result = AssignmentResult::from([("x".to_owned(), 1), ("y".to_owned(), 0)]);
///
/// assert_eq!(userstat::serialize(&config, &result), "exp_y-0;exp_x-1");
/// ```
pub fn serialize(config: &ConfigurationMap, result: &AssignmentResult) -> String {
    let entries: Vec<String> = config
        .iter()
        .map(|(_, spec)| {
            let value = result.get(&spec.param_name).copied().unwrap_or(UNASSIGNED);
            format!("{}-{}", spec.key, value)
        })
        .collect();
    entries.join(";")
}
