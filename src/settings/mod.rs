//! # Context Settings and Global Key Catalog
//!
//! This module provides the typed key/value context attached to a storage
//! instance and the registry of globally known configuration keys.
//!
//! ## Context Settings
//!
//! A [`ContextSettings`] holds the per-database overrides of engine tuning
//! values (minimum cluster count, validation flag, encryption key, …). The
//! configuration store persists the whole context as a single binary blob
//! under the `configuration` key on close and rehydrates it on load.
//!
//! ## Global Key Catalog
//!
//! The [`KeyCatalog`] trait is the seam to the engine-wide key registry:
//! it resolves a key name to its [`GlobalKey`] metadata (value kind,
//! hidden flag, default). The store consults it while encoding the
//! context blob (hidden keys are written with a null value so secrets
//! never reach disk or the wire) and while decoding, to convert the
//! stored text back into a typed value.
//!
//! The catalog is injected at store construction so tests can stub it.
//! [`BuiltinCatalog`] is the engine's static registry.
//!
//! ## Value kinds
//!
//! Values are booleans, 64-bit integers, or text. Conversion between the
//! textual form (used on the wire) and the typed form is driven by the
//! catalog entry's kind, never guessed from the value itself.

use std::collections::BTreeMap;

use eyre::{bail, Result};

/// The kind of value a globally known key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Bool,
    Int,
    Text,
}

/// A typed context value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl SettingValue {
    /// Parses the textual form of a value according to the target kind.
    pub fn parse(kind: SettingKind, raw: &str) -> Result<Self> {
        match kind {
            SettingKind::Bool => match raw {
                "true" => Ok(SettingValue::Bool(true)),
                "false" => Ok(SettingValue::Bool(false)),
                other => bail!("invalid boolean setting value: '{}'", other),
            },
            SettingKind::Int => {
                let parsed = raw
                    .parse::<i64>()
                    .map_err(|e| eyre::eyre!("invalid integer setting value '{}': {}", raw, e))?;
                Ok(SettingValue::Int(parsed))
            }
            SettingKind::Text => Ok(SettingValue::Text(raw.to_string())),
        }
    }

    /// Renders the value in its textual wire form.
    pub fn as_string(&self) -> String {
        match self {
            SettingValue::Bool(v) => v.to_string(),
            SettingValue::Int(v) => v.to_string(),
            SettingValue::Text(v) => v.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Default value carried by a catalog entry.
#[derive(Debug, Clone, Copy)]
pub enum SettingDefault {
    None,
    Bool(bool),
    Int(i64),
    Text(&'static str),
}

/// Metadata for a globally known configuration key.
#[derive(Debug, Clone, Copy)]
pub struct GlobalKey {
    key: &'static str,
    kind: SettingKind,
    hidden: bool,
    default: SettingDefault,
}

impl GlobalKey {
    pub const fn new(
        key: &'static str,
        kind: SettingKind,
        hidden: bool,
        default: SettingDefault,
    ) -> Self {
        Self {
            key,
            kind,
            hidden,
            default,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn kind(&self) -> SettingKind {
        self.kind
    }

    /// Hidden keys are serialized with a null value so their contents
    /// never leave the process.
    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn default_value(&self) -> Option<SettingValue> {
        match self.default {
            SettingDefault::None => None,
            SettingDefault::Bool(v) => Some(SettingValue::Bool(v)),
            SettingDefault::Int(v) => Some(SettingValue::Int(v)),
            SettingDefault::Text(v) => Some(SettingValue::Text(v.to_string())),
        }
    }
}

/// The engine-wide key registry.
///
/// Injected into the configuration store at construction; tests stub it
/// to control which keys are known and which are hidden.
pub trait KeyCatalog: Send + Sync {
    fn find_by_key(&self, key: &str) -> Option<&GlobalKey>;
}

/// Minimum number of clusters allocated per document class. 0 selects
/// automatic sizing from the host's processor count.
pub const MINIMUM_CLUSTERS_KEY: &str = "storage.minimumClusters";

/// Whether record-level validation runs on write.
pub const VALIDATION_KEY: &str = "db.validation";

/// Symmetric key for at-rest encryption. Hidden: never serialized.
pub const ENCRYPTION_KEY_KEY: &str = "storage.encryptionKey";

static BUILTIN_KEYS: &[GlobalKey] = &[
    GlobalKey::new(
        MINIMUM_CLUSTERS_KEY,
        SettingKind::Int,
        false,
        SettingDefault::Int(0),
    ),
    GlobalKey::new(
        VALIDATION_KEY,
        SettingKind::Bool,
        false,
        SettingDefault::Bool(true),
    ),
    GlobalKey::new(
        ENCRYPTION_KEY_KEY,
        SettingKind::Text,
        true,
        SettingDefault::None,
    ),
    GlobalKey::new(
        "storage.diskCache.bufferSize",
        SettingKind::Int,
        false,
        SettingDefault::Int(4096),
    ),
    GlobalKey::new(
        "query.timeout",
        SettingKind::Int,
        false,
        SettingDefault::Int(0),
    ),
];

/// The engine's static key registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCatalog;

impl KeyCatalog for BuiltinCatalog {
    fn find_by_key(&self, key: &str) -> Option<&GlobalKey> {
        BUILTIN_KEYS.iter().find(|entry| entry.key == key)
    }
}

/// Per-database typed key/value context.
///
/// Iteration order is the keys' lexicographic order, which keeps the
/// persisted context blob deterministic.
#[derive(Debug, Clone, Default)]
pub struct ContextSettings {
    values: BTreeMap<String, SettingValue>,
}

impl ContextSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: SettingValue) {
        self.values.insert(key.to_string(), value);
    }

    /// Installs the textual form of a value, converting it according to
    /// the catalog entry's kind.
    pub fn set_from_text(&mut self, entry: &GlobalKey, raw: &str) -> Result<()> {
        let value = SettingValue::parse(entry.kind(), raw)?;
        self.values.insert(entry.key().to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The textual wire form of a value, if present.
    pub fn value_as_string(&self, key: &str) -> Option<String> {
        self.values.get(key).map(SettingValue::as_string)
    }

    /// Resolves an integer value, falling back to the catalog default.
    pub fn int_or_default(&self, catalog: &dyn KeyCatalog, key: &str) -> i64 {
        if let Some(value) = self.values.get(key).and_then(SettingValue::as_int) {
            return value;
        }

        catalog
            .find_by_key(key)
            .and_then(|entry| entry.default_value())
            .and_then(|value| value.as_int())
            .unwrap_or(0)
    }

    /// Resolves a boolean value, falling back to the catalog default.
    pub fn bool_or_default(&self, catalog: &dyn KeyCatalog, key: &str) -> bool {
        if let Some(value) = self.values.get(key).and_then(SettingValue::as_bool) {
            return value;
        }

        catalog
            .find_by_key(key)
            .and_then(|entry| entry.default_value())
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }
}
