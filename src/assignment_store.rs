//! Persisted assignment state, one record per namespace.
//!
//! Record under `<namespace>`:
//!
//! ```json
//! { "result": { "<experiment>": 0 }, "fingerprints": { "<experiment>": "0:50|1:50" } }
//! ```
//!
//! The companion record under `<namespace>__config__` keeps the last configuration map, so the
//! userstat string can be rebuilt without an `allocate` call in the current process.
use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    experiment::{AssignmentResult, ConfigurationMap},
    fingerprint::Fingerprint,
    storage::Storage,
    Result,
};

/// Last computed assignments plus the fingerprints they were computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Experiment name to group id.
    pub result: AssignmentResult,
    /// Experiment name to fingerprint of the groups its assignment was computed from.
    ///
    /// `configHashes` is accepted on read for records written by older clients. Those ordered
    /// group ids as strings (`1:..|10:..|2:..`), so experiments with ten or more group ids won't
    /// match such a record and are bucketed again once.
    #[serde(default, alias = "configHashes")]
    pub fingerprints: BTreeMap<String, Fingerprint>,
}

/// Shapes accepted on read. The legacy shape is a bare result with no fingerprints.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StoredRecord {
    Current(PersistedState),
    Legacy(AssignmentResult),
}

impl StoredRecord {
    pub(crate) fn is_legacy(&self) -> bool {
        matches!(self, StoredRecord::Legacy(_))
    }
}

impl From<StoredRecord> for PersistedState {
    fn from(value: StoredRecord) -> Self {
        match value {
            StoredRecord::Current(state) => state,
            StoredRecord::Legacy(result) => PersistedState {
                result,
                fingerprints: BTreeMap::new(),
            },
        }
    }
}

const CONFIG_SUFFIX: &str = "__config__";

fn config_key(namespace: &str) -> String {
    format!("{}{}", namespace, CONFIG_SUFFIX)
}

/// Reads and writes [`PersistedState`] on top of a [`Storage`].
///
/// Storage failures never reach the caller. A failed read is logged and reported as "nothing
/// stored", a failed write is logged and skipped, so the engine keeps working and simply
/// reassigns on the next run.
#[derive(Clone)]
pub struct AssignmentStore {
    storage: Arc<dyn Storage>,
}

impl AssignmentStore {
    /// Wrap `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        AssignmentStore { storage }
    }

    /// Load state of `namespace`. Legacy records come back with an empty fingerprint map.
    pub fn load(&self, namespace: &str) -> Option<PersistedState> {
        self.load_record(namespace).map(PersistedState::from)
    }

    /// Load state of `namespace` in the shape it was stored in.
    pub(crate) fn load_record(&self, namespace: &str) -> Option<StoredRecord> {
        self.read::<StoredRecord>(namespace)
            .inspect_err(|err| {
                log::warn!(target: "abtest", namespace; "failed to load assignments: {}", err);
            })
            .ok()
            .flatten()
    }

    /// Overwrite state of `namespace`.
    pub fn save(&self, namespace: &str, state: &PersistedState) {
        if let Err(err) = self.write(namespace, state) {
            log::warn!(target: "abtest", namespace; "failed to save assignments: {}", err);
        }
    }

    /// Remove state of `namespace` and its configuration record.
    pub fn clear(&self, namespace: &str) {
        for key in [namespace.to_owned(), config_key(namespace)] {
            if let Err(err) = self.storage.remove_item(&key) {
                log::warn!(target: "abtest", namespace, key = key.as_str(); "failed to clear stored record: {}", err);
            }
        }
    }

    /// Load the last configuration map saved for `namespace`.
    pub fn load_config(&self, namespace: &str) -> Option<ConfigurationMap> {
        self.read::<ConfigurationMap>(&config_key(namespace))
            .inspect_err(|err| {
                log::warn!(target: "abtest", namespace; "failed to load configuration: {}", err);
            })
            .ok()
            .flatten()
    }

    /// Overwrite the configuration record of `namespace`.
    pub fn save_config(&self, namespace: &str, config: &ConfigurationMap) {
        if let Err(err) = self.write(&config_key(namespace), config) {
            log::warn!(target: "abtest", namespace; "failed to save configuration: {}", err);
        }
    }

    fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(stored) = self.storage.get_item(key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&stored)?))
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.storage.set_item(key, &json)
    }
}
