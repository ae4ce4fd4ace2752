use std::collections::BTreeMap;

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::strategy::{BuiltinStrategy, Strategy};

/// Group id to weight (percentage in `[0, 100]`). Ordered by group id.
///
/// Weights don't need to sum to 100. Traffic that is not covered goes to the largest group id.
pub type Groups = BTreeMap<u32, f64>;

/// Experiment name to assigned group id, or [`UNASSIGNED`].
pub type AssignmentResult = BTreeMap<String, i64>;

/// Value assigned when no bucket could be determined.
pub const UNASSIGNED: i64 = -1;

/// Traffic split definition of one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSpec {
    /// Identifier used in the userstat string.
    pub key: String,
    /// Identifier the userstat serializer looks up in the result.
    pub param_name: String,
    /// Group id to weight.
    pub groups: Groups,
    /// Overrides the call-wide default strategy.
    #[serde(
        default,
        skip_serializing_if = "is_unserializable",
        deserialize_with = "deserialize_strategy"
    )]
    pub strategy: Option<Strategy>,
}

impl ExperimentSpec {
    /// Create an experiment without its own strategy.
    ///
    /// ```
    /// # use abtest::ExperimentSpec;
    /// let spec = ExperimentSpec::new("exp_1", "button_color", [(0, 50.0), (1, 50.0)]);
    /// assert_eq!(spec.groups.len(), 2);
    /// ```
    pub fn new(
        key: impl Into<String>,
        param_name: impl Into<String>,
        groups: impl Into<Groups>,
    ) -> Self {
        ExperimentSpec {
            key: key.into(),
            param_name: param_name.into(),
            groups: groups.into(),
            strategy: None,
        }
    }

    /// Set a per-experiment strategy.
    pub fn strategy(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }
}

fn is_unserializable(strategy: &Option<Strategy>) -> bool {
    !matches!(strategy, Some(Strategy::Builtin(_)))
}

/// Unknown strategy names don't fail the whole configuration. They are dropped, so the call-wide
/// default applies.
fn deserialize_strategy<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Strategy>, D::Error> {
    let Some(name) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match name.parse::<BuiltinStrategy>() {
        Ok(strategy) => Ok(Some(strategy.into())),
        Err(_) => {
            log::warn!(target: "abtest", strategy = name.as_str(); "unknown strategy, using default");
            Ok(None)
        }
    }
}

/// Experiment name to [`ExperimentSpec`], in insertion order.
///
/// The order is the canonical iteration order of the engine and the userstat string.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationMap {
    experiments: Vec<(String, ExperimentSpec)>,
}

impl ConfigurationMap {
    /// Create an empty configuration.
    pub fn new() -> Self {
        ConfigurationMap::default()
    }

    /// Insert an experiment. Replacing an existing name keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, spec: ExperimentSpec) {
        let name = name.into();
        match self.experiments.iter().position(|(n, _)| *n == name) {
            Some(index) => self.experiments[index].1 = spec,
            None => self.experiments.push((name, spec)),
        }
    }

    /// Look up an experiment by name.
    pub fn get(&self, name: &str) -> Option<&ExperimentSpec> {
        self.experiments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    /// Whether an experiment named `name` is configured.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Experiments in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExperimentSpec)> {
        self.experiments
            .iter()
            .map(|(name, spec)| (name.as_str(), spec))
    }

    /// Number of experiments.
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Whether no experiment is configured.
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ExperimentSpec)> for ConfigurationMap {
    fn from_iter<I: IntoIterator<Item = (K, ExperimentSpec)>>(iter: I) -> Self {
        let mut map = ConfigurationMap::new();
        for (name, spec) in iter {
            map.insert(name, spec);
        }
        map
    }
}

impl<K: Into<String>, const N: usize> From<[(K, ExperimentSpec); N]> for ConfigurationMap {
    fn from(value: [(K, ExperimentSpec); N]) -> Self {
        value.into_iter().collect()
    }
}

impl Serialize for ConfigurationMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.experiments.len()))?;
        for (name, spec) in &self.experiments {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConfigurationMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ConfigurationMapVisitor;

        impl<'de> Visitor<'de> for ConfigurationMapVisitor {
            type Value = ConfigurationMap;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of experiment name to experiment spec")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<ConfigurationMap, A::Error> {
                let mut map = ConfigurationMap::new();
                while let Some((name, spec)) = access.next_entry::<String, ExperimentSpec>()? {
                    map.insert(name, spec);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(ConfigurationMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::BufReader};

    use crate::strategy::{BuiltinStrategy, Strategy};

    use super::{ConfigurationMap, ExperimentSpec, Groups};

    #[test]
    fn parse_configuration_file() {
        let f = File::open("tests/data/config.json")
            .expect("Failed to open tests/data/config.json");
        let config: ConfigurationMap = serde_json::from_reader(BufReader::new(f)).unwrap();

        let names: Vec<&str> = config.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["pricing_page", "button_color", "onboarding"]);

        let button = config.get("button_color").unwrap();
        assert_eq!(button.key, "exp_button");
        assert_eq!(button.param_name, "button_color");
        assert_eq!(button.groups, Groups::from([(0, 30.0), (1, 30.0), (2, 40.0)]));
        assert!(matches!(
            button.strategy,
            Some(Strategy::Builtin(BuiltinStrategy::Crc32))
        ));

        assert!(config.get("pricing_page").unwrap().strategy.is_none());
    }

    #[test]
    fn unknown_strategy_is_dropped() {
        let spec: ExperimentSpec = serde_json::from_str(
            r#"{"key": "k", "paramName": "p", "groups": {"0": 100}, "strategy": "baiduTongji"}"#,
        )
        .unwrap();
        assert!(spec.strategy.is_none());
    }

    #[test]
    fn preserves_insertion_order_through_json() {
        let config = ConfigurationMap::from([
            ("y", ExperimentSpec::new("key_y", "y", [(0, 100.0)])),
            ("x", ExperimentSpec::new("key_x", "x", [(0, 100.0)])),
        ]);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.find("\"y\"").unwrap() < json.find("\"x\"").unwrap());

        let parsed: ConfigurationMap = serde_json::from_str(&json).unwrap();
        let names: Vec<&str> = parsed.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["y", "x"]);
    }

    #[test]
    fn custom_strategy_is_not_serialized() {
        let spec = ExperimentSpec::new("k", "p", [(0, 100.0)])
            .strategy(Strategy::custom(|_: &Groups| -> i64 { 0 }));

        let json = serde_json::to_value(&spec).unwrap();
        assert!(json.get("strategy").is_none());
        assert_eq!(json["paramName"], "p");
        assert_eq!(json["groups"]["0"], 100.0);
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut config = ConfigurationMap::new();
        config.insert("a", ExperimentSpec::new("a1", "a", [(0, 100.0)]));
        config.insert("b", ExperimentSpec::new("b", "b", [(0, 100.0)]));
        config.insert("a", ExperimentSpec::new("a2", "a", [(0, 100.0)]));

        let keys: Vec<&str> = config.iter().map(|(_, spec)| spec.key.as_str()).collect();
        assert_eq!(keys, ["a2", "b"]);
        assert_eq!(config.len(), 2);
    }
}
