//! Durable global environment store with explicit observers.
//!
//! `set` writes through to the JSON db and only then notifies observers.
//! Observers must not block: the propagation engine, the one observer in
//! production, just schedules a background task.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use dnpm_common::constants::GLOBAL_ENVS_PREFIX;
use dnpm_common::db::JsonDb;
use dnpm_common::error::Result;
use uuid::Uuid;

use crate::schema::{self, GlobalEnvValue};

/// One successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChange {
    /// Unique id, carried by every propagation event of this change.
    pub id: Uuid,
    /// Prefixed key.
    pub key: String,
    /// New value.
    pub value: GlobalEnvValue,
}

/// Called after every durable `set`.
pub trait EnvObserver: Send + Sync {
    /// Reacts to a change. Must return promptly.
    fn on_change(&self, change: &EnvChange);
}

/// Process-wide store of global environment values.
pub struct GlobalEnvStore {
    db: Arc<JsonDb>,
    observers: RwLock<Vec<Arc<dyn EnvObserver>>>,
}

impl std::fmt::Debug for GlobalEnvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalEnvStore")
            .field("db", &self.db.path())
            .finish_non_exhaustive()
    }
}

impl GlobalEnvStore {
    /// Creates a store over `db`.
    #[must_use]
    pub fn new(db: Arc<JsonDb>) -> Self {
        Self {
            db,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registers an observer notified after every `set`.
    pub fn subscribe(&self, observer: Arc<dyn EnvObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Current value of `key` (prefixed or not).
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value has an unexpected shape.
    pub fn get(&self, key: &str) -> Result<Option<GlobalEnvValue>> {
        self.db.get(&schema::prefixed(key.trim()))
    }

    /// Persists `value` under the prefixed `key`, then notifies observers.
    /// Returns once the durable write completed; propagation happens
    /// elsewhere and never fails this call.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` for an invalid key or a
    /// mistyped value, or an error if the db write fails.
    pub fn set(&self, key: &str, value: GlobalEnvValue) -> Result<EnvChange> {
        let key = schema::validate(key, &value)?;
        self.db.set(&key, &value)?;
        let change = EnvChange {
            id: Uuid::new_v4(),
            key,
            value,
        };
        tracing::info!(change = %change.id, key = %change.key, value = %change.value, "global env set");

        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_change(&change);
        }
        Ok(change)
    }

    /// Every stored global env value, keyed by prefixed key.
    #[must_use]
    pub fn all(&self) -> BTreeMap<String, GlobalEnvValue> {
        global_envs(&self.db)
    }
}

/// Reads every global env entry out of the shared db.
#[must_use]
pub fn global_envs(db: &JsonDb) -> BTreeMap<String, GlobalEnvValue> {
    db.entries()
        .into_iter()
        .filter(|(key, _)| key.starts_with(GLOBAL_ENVS_PREFIX))
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(value) => Some((key, value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "ignoring malformed global env entry");
                None
            }
        })
        .collect()
}
