//! # Storage Configuration
//!
//! The atomic, persistent storage-configuration store: a typed facade
//! over a keyed transactional map whose entries live in the key index and
//! the record cluster. Every database keeps exactly one of these stores;
//! it survives restarts bit-for-bit and every update is either fully
//! visible or not visible at all.
//!
//! ## Key Namespace
//!
//! Single-field values use their plain key (`version`, `charset`, …).
//! Families group under reserved prefixes:
//!
//! ```text
//! cluster_<decimal-id>   paginated-cluster descriptors
//! engine_<name>          secondary-index engine descriptors
//! property_<name>        arbitrary user properties
//! ```
//!
//! Each key's value format is fixed by its name; readers and writers
//! agree on the codec through the key alone.
//!
//! ## Lifecycle
//!
//! ```text
//! uninitialized ──create/load──► open ──close──► closed
//!                                  │
//!                                  └────delete──► deleted
//! ```
//!
//! `create` populates the store with host defaults; `load` rehydrates
//! the context blob and the minimum-cluster count; `close` persists both
//! before closing the children. Any operation outside the open state
//! fails.
//!
//! ## Concurrency
//!
//! All public entry points synchronize on one readers/writer lock:
//! readers shared, mutators and lifecycle transitions exclusive. The
//! lock is not reentrant; no facade method calls back into another
//! entry point while holding it.
//!
//! ## Module Organization
//!
//! - [`values`]: scalar value codecs (string, integer)
//! - [`types`]: cluster and index-engine descriptors with their codecs
//! - [`store`]: the keyed transactional map
//! - [`stream`]: the legacy pipe-delimited snapshot
//! - [`host`]: host defaults, locale, and date formatters

pub mod host;
pub mod store;
pub mod stream;
pub mod types;
pub mod values;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

use crate::settings::{
    BuiltinCatalog, ContextSettings, KeyCatalog, SettingValue, ENCRYPTION_KEY_KEY,
    MINIMUM_CLUSTERS_KEY, VALIDATION_KEY,
};

pub use host::{DateFormatter, Locale};
pub use store::{ConfigStore, ConfigUpdateListener, CONFIG_ATOMIC_OP, CONFIG_COMPONENT_NAME};
pub use types::{
    ClusterConfig, ClusterStatus, IndexEngineData, KeyType, PaginatedClusterConfig,
};

/// Version of the configuration layout itself.
pub const CURRENT_VERSION: i32 = 23;

/// Version of the engine's record binary format.
pub const CURRENT_BINARY_FORMAT_VERSION: i32 = 13;

pub const DEFAULT_CHARSET: &str = "UTF-8";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Upper bound of the automatic minimum-cluster sizing.
pub const MAX_AUTO_CLUSTERS: usize = 64;

const VERSION_PROPERTY: &str = "version";
const SCHEMA_RECORD_ID_PROPERTY: &str = "schemaRecordId";
const INDEX_MANAGER_RECORD_ID_PROPERTY: &str = "indexManagerRecordId";
const LOCALE_LANGUAGE_PROPERTY: &str = "localeLanguage";
const LOCALE_COUNTRY_PROPERTY: &str = "localeCountry";
const DATE_FORMAT_PROPERTY: &str = "dateFormat";
const DATE_TIME_FORMAT_PROPERTY: &str = "dateTimeFormat";
const TIME_ZONE_PROPERTY: &str = "timeZone";
const CHARSET_PROPERTY: &str = "charset";
const CONFLICT_STRATEGY_PROPERTY: &str = "conflictStrategy";
const BINARY_FORMAT_VERSION_PROPERTY: &str = "binaryFormatVersion";
const CLUSTER_SELECTION_PROPERTY: &str = "clusterSelection";
const MINIMUM_CLUSTERS_PROPERTY: &str = "minimumClusters";
const RECORD_SERIALIZER_PROPERTY: &str = "recordSerializer";
const RECORD_SERIALIZER_VERSION_PROPERTY: &str = "recordSerializerVersion";
const CONFIGURATION_PROPERTY: &str = "configuration";
const CREATED_AT_VERSION_PROPERTY: &str = "createAtVersion";
const PAGE_SIZE_PROPERTY: &str = "pageSize";
const FREE_LIST_BOUNDARY_PROPERTY: &str = "freeListBoundary";
const MAX_KEY_SIZE_PROPERTY: &str = "maxKeySize";

const CLUSTERS_PREFIX: &str = "cluster_";
const PROPERTY_PREFIX: &str = "property_";
const ENGINE_PREFIX: &str = "engine_";

enum State {
    Uninitialized,
    Open(OpenState),
    Closed,
    Deleted,
}

struct OpenState {
    store: ConfigStore,
    settings: ContextSettings,
    validation: bool,
}

/// The per-database storage-configuration store.
///
/// Construct with [`StorageConfig::new`], then bring it to the open state
/// with [`create`](StorageConfig::create) (fresh storage) or
/// [`load`](StorageConfig::load) (existing storage).
pub struct StorageConfig {
    dir: PathBuf,
    catalog: Arc<dyn KeyCatalog>,
    state: RwLock<State>,
    locale_cache: Mutex<Option<Locale>>,
}

impl StorageConfig {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_catalog(dir, Arc::new(BuiltinCatalog))
    }

    /// Builds the store with an injected global key catalog. Tests stub
    /// the catalog to control which context keys are known or hidden.
    pub fn with_catalog(dir: impl AsRef<Path>, catalog: Arc<dyn KeyCatalog>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            catalog,
            state: RwLock::new(State::Uninitialized),
            locale_cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Initializes fresh storage: creates the cluster and the index,
    /// writes the default value of every known field, and opens the
    /// store.
    pub fn create(&self) -> Result<()> {
        let mut guard = self.state.write();
        if matches!(&*guard, State::Open(_)) {
            bail!("configuration store is already open");
        }

        fs::create_dir_all(&self.dir)
            .wrap_err_with(|| format!("failed to create storage directory '{}'", self.dir.display()))?;

        let store = ConfigStore::create(&self.dir)?;
        let mut open = OpenState {
            store,
            settings: ContextSettings::new(),
            validation: true,
        };

        self.init(&mut open)?;
        update_int_property(&mut open, VERSION_PROPERTY, CURRENT_VERSION)?;

        *guard = State::Open(open);
        Ok(())
    }

    /// Opens existing storage with the given context, rehydrating the
    /// persisted context blob and the minimum-cluster count.
    pub fn load(&self, settings: ContextSettings) -> Result<()> {
        let mut guard = self.state.write();
        if matches!(&*guard, State::Open(_)) {
            bail!("configuration store is already open");
        }

        let store = ConfigStore::load(&self.dir)?;
        let mut open = OpenState {
            store,
            settings,
            validation: true,
        };

        self.read_configuration(&mut open)?;
        self.read_minimum_clusters(&mut open)?;

        let stored_validation =
            read_string_property(&open, &format!("{PROPERTY_PREFIX}validation"))?;
        open.validation = match stored_validation {
            Some(text) => text.eq_ignore_ascii_case("true"),
            None => open.settings.bool_or_default(&*self.catalog, VALIDATION_KEY),
        };

        *guard = State::Open(open);
        Ok(())
    }

    /// Persists the computed values (`configuration`, `minimumClusters`)
    /// and closes the children.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.state.write();
        if !matches!(&*guard, State::Open(_)) {
            bail!("configuration store is not open");
        }
        let State::Open(mut open) = std::mem::replace(&mut *guard, State::Closed) else {
            unreachable!()
        };

        self.update_configuration_property(&mut open)?;
        let minimum = self.minimum_clusters_of(&open);
        update_int_property(&mut open, MINIMUM_CLUSTERS_PROPERTY, minimum)?;

        open.store.close()
    }

    /// Deletes the cluster and the index files.
    pub fn delete(&self) -> Result<()> {
        let mut guard = self.state.write();
        if !matches!(&*guard, State::Open(_)) {
            bail!("configuration store is not open");
        }
        let State::Open(open) = std::mem::replace(&mut *guard, State::Deleted) else {
            unreachable!()
        };

        open.store.delete()
    }

    // ------------------------------------------------------------------
    // Plain fields
    // ------------------------------------------------------------------

    pub fn version(&self) -> Result<i32> {
        self.with_read(|open| read_int_property(open, VERSION_PROPERTY))
    }

    pub fn set_schema_record_id(&self, record_id: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, SCHEMA_RECORD_ID_PROPERTY, Some(record_id)))
    }

    pub fn schema_record_id(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, SCHEMA_RECORD_ID_PROPERTY))
    }

    pub fn set_index_mgr_record_id(&self, record_id: &str) -> Result<()> {
        self.with_write(|open| {
            update_string_property(open, INDEX_MANAGER_RECORD_ID_PROPERTY, Some(record_id))
        })
    }

    pub fn index_mgr_record_id(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, INDEX_MANAGER_RECORD_ID_PROPERTY))
    }

    pub fn set_locale_language(&self, language: &str) -> Result<()> {
        *self.locale_cache.lock() = None;
        self.with_write(|open| update_string_property(open, LOCALE_LANGUAGE_PROPERTY, Some(language)))
    }

    pub fn locale_language(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, LOCALE_LANGUAGE_PROPERTY))
    }

    pub fn set_locale_country(&self, country: &str) -> Result<()> {
        *self.locale_cache.lock() = None;
        self.with_write(|open| update_string_property(open, LOCALE_COUNTRY_PROPERTY, Some(country)))
    }

    pub fn locale_country(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, LOCALE_COUNTRY_PROPERTY))
    }

    pub fn set_date_format(&self, pattern: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, DATE_FORMAT_PROPERTY, Some(pattern)))
    }

    pub fn date_format(&self) -> Result<String> {
        self.with_read(|open| {
            read_string_property(open, DATE_FORMAT_PROPERTY)?
                .ok_or_else(|| eyre::eyre!("date format is not set"))
        })
    }

    pub fn set_date_time_format(&self, pattern: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, DATE_TIME_FORMAT_PROPERTY, Some(pattern)))
    }

    pub fn date_time_format(&self) -> Result<String> {
        self.with_read(|open| {
            read_string_property(open, DATE_TIME_FORMAT_PROPERTY)?
                .ok_or_else(|| eyre::eyre!("date-time format is not set"))
        })
    }

    pub fn set_time_zone(&self, time_zone_id: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, TIME_ZONE_PROPERTY, Some(time_zone_id)))
    }

    pub fn time_zone(&self) -> Result<String> {
        self.with_read(|open| {
            read_string_property(open, TIME_ZONE_PROPERTY)?
                .ok_or_else(|| eyre::eyre!("time zone is not set"))
        })
    }

    pub fn set_charset(&self, charset: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, CHARSET_PROPERTY, Some(charset)))
    }

    pub fn charset(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, CHARSET_PROPERTY))
    }

    pub fn set_conflict_strategy(&self, strategy: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, CONFLICT_STRATEGY_PROPERTY, Some(strategy)))
    }

    pub fn conflict_strategy(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, CONFLICT_STRATEGY_PROPERTY))
    }

    pub fn binary_format_version(&self) -> Result<i32> {
        self.with_read(|open| read_int_property(open, BINARY_FORMAT_VERSION_PROPERTY))
    }

    pub fn set_cluster_selection(&self, strategy: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, CLUSTER_SELECTION_PROPERTY, Some(strategy)))
    }

    pub fn cluster_selection(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, CLUSTER_SELECTION_PROPERTY))
    }

    pub fn set_record_serializer(&self, serializer: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, RECORD_SERIALIZER_PROPERTY, Some(serializer)))
    }

    pub fn record_serializer(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, RECORD_SERIALIZER_PROPERTY))
    }

    pub fn set_record_serializer_version(&self, version: i32) -> Result<()> {
        self.with_write(|open| update_int_property(open, RECORD_SERIALIZER_VERSION_PROPERTY, version))
    }

    pub fn record_serializer_version(&self) -> Result<i32> {
        self.with_read(|open| read_int_property(open, RECORD_SERIALIZER_VERSION_PROPERTY))
    }

    pub fn set_creation_version(&self, version: &str) -> Result<()> {
        self.with_write(|open| update_string_property(open, CREATED_AT_VERSION_PROPERTY, Some(version)))
    }

    pub fn created_at_version(&self) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, CREATED_AT_VERSION_PROPERTY))
    }

    pub fn set_page_size(&self, page_size: i32) -> Result<()> {
        self.with_write(|open| update_int_property(open, PAGE_SIZE_PROPERTY, page_size))
    }

    pub fn page_size(&self) -> Result<i32> {
        self.with_read(|open| read_int_property(open, PAGE_SIZE_PROPERTY))
    }

    pub fn set_free_list_boundary(&self, boundary: i32) -> Result<()> {
        self.with_write(|open| update_int_property(open, FREE_LIST_BOUNDARY_PROPERTY, boundary))
    }

    pub fn free_list_boundary(&self) -> Result<i32> {
        self.with_read(|open| read_int_property(open, FREE_LIST_BOUNDARY_PROPERTY))
    }

    pub fn set_max_key_size(&self, max_key_size: i32) -> Result<()> {
        self.with_write(|open| update_int_property(open, MAX_KEY_SIZE_PROPERTY, max_key_size))
    }

    pub fn max_key_size(&self) -> Result<i32> {
        self.with_read(|open| read_int_property(open, MAX_KEY_SIZE_PROPERTY))
    }

    // ------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------

    /// The configured locale, built lazily from the stored language and
    /// country. Falls back to the host locale if either field is absent.
    pub fn locale_instance(&self) -> Result<Locale> {
        if let Some(locale) = self.locale_cache.lock().clone() {
            return Ok(locale);
        }

        let locale = self.with_read(|open| {
            let language = read_string_property(open, LOCALE_LANGUAGE_PROPERTY)?;
            let country = read_string_property(open, LOCALE_COUNTRY_PROPERTY)?;

            Ok(match (language, country) {
                (Some(language), Some(country)) => Locale::new(language, country),
                _ => {
                    let fallback = host::host_locale();
                    error!(
                        "error during initialization of locale, default one {} will be used",
                        fallback
                    );
                    fallback
                }
            })
        })?;

        *self.locale_cache.lock() = Some(locale.clone());
        Ok(locale)
    }

    /// A fresh, strict date formatter bound to the stored pattern and
    /// time zone.
    pub fn date_format_instance(&self) -> Result<DateFormatter> {
        self.with_read(|open| build_formatter(open, DATE_FORMAT_PROPERTY))
    }

    /// A fresh, strict date-time formatter bound to the stored pattern
    /// and time zone.
    pub fn date_time_format_instance(&self) -> Result<DateFormatter> {
        self.with_read(|open| build_formatter(open, DATE_TIME_FORMAT_PROPERTY))
    }

    /// The minimum cluster count per document class. A stored value of 0
    /// auto-sizes to the host's processor count, capped at
    /// [`MAX_AUTO_CLUSTERS`].
    pub fn minimum_clusters(&self) -> Result<i32> {
        self.with_read(|open| Ok(self.minimum_clusters_of(open)))
    }

    pub fn set_minimum_clusters(&self, minimum_clusters: i32) -> Result<()> {
        self.with_write(|open| {
            open.settings.set(
                MINIMUM_CLUSTERS_KEY,
                SettingValue::Int(i64::from(minimum_clusters)),
            );
            if minimum_clusters == 0 {
                open.settings.set(
                    MINIMUM_CLUSTERS_KEY,
                    SettingValue::Int(auto_cluster_count() as i64),
                );
            }
            Ok(())
        })
    }

    /// A snapshot of the installed context.
    pub fn context_settings(&self) -> Result<ContextSettings> {
        self.with_read(|open| Ok(open.settings.clone()))
    }

    /// Sets a value in the installed context. The context is persisted
    /// as the `configuration` blob on close.
    pub fn set_context_value(&self, key: &str, value: SettingValue) -> Result<()> {
        self.with_write(|open| {
            open.settings.set(key, value);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // User properties
    // ------------------------------------------------------------------

    pub fn set_property(&self, name: &str, value: &str) -> Result<()> {
        self.with_write(|open| {
            if name.eq_ignore_ascii_case("validation") {
                open.validation = value.eq_ignore_ascii_case("true");
            }

            update_string_property(open, &format!("{PROPERTY_PREFIX}{name}"), Some(value))
        })
    }

    pub fn property(&self, name: &str) -> Result<Option<String>> {
        self.with_read(|open| read_string_property(open, &format!("{PROPERTY_PREFIX}{name}")))
    }

    /// Every user property, prefix stripped, in ascending name order.
    pub fn properties(&self) -> Result<Vec<(String, Option<String>)>> {
        self.with_read(|open| {
            open.store
                .prefix_scan(PROPERTY_PREFIX)?
                .into_iter()
                .map(|(key, payload)| {
                    let value = values::decode_string_value(&payload, 0)
                        .wrap_err_with(|| format!("corrupt value for key '{key}'"))?;
                    Ok((key[PROPERTY_PREFIX.len()..].to_string(), value))
                })
                .collect()
        })
    }

    pub fn remove_property(&self, name: &str) -> Result<()> {
        self.with_write(|open| open.store.drop_key(&format!("{PROPERTY_PREFIX}{name}")))
    }

    pub fn clear_properties(&self) -> Result<()> {
        self.with_write(|open| open.store.clear_prefix(PROPERTY_PREFIX))
    }

    pub fn set_validation(&self, enabled: bool) -> Result<()> {
        self.set_property("validation", if enabled { "true" } else { "false" })
    }

    pub fn is_validation_enabled(&self) -> Result<bool> {
        self.with_read(|open| Ok(open.validation))
    }

    // ------------------------------------------------------------------
    // Index engines
    // ------------------------------------------------------------------

    /// Registers an index engine. Re-adding a name logs a warning and
    /// leaves the existing engine untouched.
    pub fn add_index_engine(&self, name: &str, engine: IndexEngineData) -> Result<()> {
        self.with_write(|open| {
            let key = format!("{ENGINE_PREFIX}{name}");
            if open.store.contains(&key) {
                warn!(
                    "index engine with name '{}' already contained in database configuration",
                    name
                );
                return Ok(());
            }

            open.store.put(&key, &engine.to_bytes())
        })
    }

    pub fn delete_index_engine(&self, name: &str) -> Result<()> {
        self.with_write(|open| open.store.drop_key(&format!("{ENGINE_PREFIX}{name}")))
    }

    /// The names of all registered index engines.
    pub fn index_engines(&self) -> Result<BTreeSet<String>> {
        self.with_read(|open| {
            Ok(open
                .store
                .prefix_scan(ENGINE_PREFIX)?
                .into_iter()
                .map(|(key, _)| key[ENGINE_PREFIX.len()..].to_string())
                .collect())
        })
    }

    pub fn index_engine(&self, name: &str) -> Result<Option<IndexEngineData>> {
        self.with_read(|open| {
            let Some(payload) = open.store.get(&format!("{ENGINE_PREFIX}{name}"))? else {
                return Ok(None);
            };

            let engine =
                IndexEngineData::from_bytes(name, &payload, encryption_options(open))
                    .wrap_err_with(|| format!("corrupt value for key '{ENGINE_PREFIX}{name}'"))?;
            Ok(Some(engine))
        })
    }

    fn load_index_engines(open: &OpenState) -> Result<Vec<IndexEngineData>> {
        open.store
            .prefix_scan(ENGINE_PREFIX)?
            .into_iter()
            .map(|(key, payload)| {
                let name = &key[ENGINE_PREFIX.len()..];
                IndexEngineData::from_bytes(name, &payload, encryption_options(open))
                    .wrap_err_with(|| format!("corrupt value for key '{key}'"))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Clusters
    // ------------------------------------------------------------------

    pub fn update_cluster(&self, cluster: ClusterConfig) -> Result<()> {
        self.with_write(|open| {
            open.store
                .put(&format!("{CLUSTERS_PREFIX}{}", cluster.id()), &cluster.to_bytes())
        })
    }

    /// Updates the status of a cluster, preserving every other field.
    /// Unknown ids are ignored.
    pub fn set_cluster_status(&self, cluster_id: u32, status: ClusterStatus) -> Result<()> {
        self.with_write(|open| {
            let key = format!("{CLUSTERS_PREFIX}{cluster_id}");
            let Some(payload) = open.store.get(&key)? else {
                return Ok(());
            };

            let mut cluster = ClusterConfig::from_bytes(cluster_id, &payload)
                .wrap_err_with(|| format!("corrupt value for key '{key}'"))?;
            cluster.set_status(status);
            open.store.put(&key, &cluster.to_bytes())
        })
    }

    /// All cluster descriptors as a sparse sequence indexed by cluster
    /// id; ids never assigned read as `None`.
    pub fn clusters(&self) -> Result<Vec<Option<ClusterConfig>>> {
        self.with_read(|open| clusters_of(open))
    }

    pub fn drop_cluster(&self, cluster_id: u32) -> Result<()> {
        self.with_write(|open| open.store.drop_key(&format!("{CLUSTERS_PREFIX}{cluster_id}")))
    }

    // ------------------------------------------------------------------
    // Update listener
    // ------------------------------------------------------------------

    /// Installs (or clears) the hook invoked after every committed
    /// configuration update.
    pub fn set_update_listener(
        &self,
        listener: Option<Arc<dyn ConfigUpdateListener>>,
    ) -> Result<()> {
        self.with_write(|open| {
            open.store.set_update_listener(listener);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn with_read<T>(&self, body: impl FnOnce(&OpenState) -> Result<T>) -> Result<T> {
        let guard = self.state.read();
        match &*guard {
            State::Open(open) => body(open),
            _ => bail!("configuration store is not open"),
        }
    }

    fn with_write<T>(&self, body: impl FnOnce(&mut OpenState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.write();
        match &mut *guard {
            State::Open(open) => body(open),
            _ => bail!("configuration store is not open"),
        }
    }

    /// Writes the default value of every known field into a freshly
    /// created store.
    fn init(&self, open: &mut OpenState) -> Result<()> {
        update_int_property(open, VERSION_PROPERTY, CURRENT_VERSION)?;
        update_int_property(open, BINARY_FORMAT_VERSION_PROPERTY, CURRENT_BINARY_FORMAT_VERSION)?;

        update_string_property(open, CHARSET_PROPERTY, Some(DEFAULT_CHARSET))?;
        update_string_property(open, DATE_FORMAT_PROPERTY, Some(DEFAULT_DATE_FORMAT))?;
        update_string_property(open, DATE_TIME_FORMAT_PROPERTY, Some(DEFAULT_DATETIME_FORMAT))?;

        let locale = host::host_locale();
        update_string_property(open, LOCALE_LANGUAGE_PROPERTY, Some(locale.language()))?;
        update_string_property(open, LOCALE_COUNTRY_PROPERTY, Some(locale.country()))?;
        update_string_property(open, TIME_ZONE_PROPERTY, Some(&host::host_time_zone()))?;

        update_int_property(open, PAGE_SIZE_PROPERTY, -1)?;
        update_int_property(open, FREE_LIST_BOUNDARY_PROPERTY, -1)?;
        update_int_property(open, MAX_KEY_SIZE_PROPERTY, -1)?;

        let default_minimum = self
            .catalog
            .find_by_key(MINIMUM_CLUSTERS_KEY)
            .and_then(|entry| entry.default_value())
            .and_then(|value| value.as_int())
            .unwrap_or(0);
        open.settings
            .set(MINIMUM_CLUSTERS_KEY, SettingValue::Int(default_minimum));
        if default_minimum == 0 {
            open.settings.set(
                MINIMUM_CLUSTERS_KEY,
                SettingValue::Int(auto_cluster_count() as i64),
            );
        }

        update_int_property(open, RECORD_SERIALIZER_VERSION_PROPERTY, 0)?;
        open.validation = open.settings.bool_or_default(&*self.catalog, VALIDATION_KEY);

        Ok(())
    }

    fn minimum_clusters_of(&self, open: &OpenState) -> i32 {
        let value = open
            .settings
            .int_or_default(&*self.catalog, MINIMUM_CLUSTERS_KEY);
        if value == 0 {
            auto_cluster_count()
        } else {
            value as i32
        }
    }

    /// Serializes the context into the `configuration` blob. Hidden keys
    /// are written with a null value; unregistered keys are written with
    /// a null value and a warning.
    fn update_configuration_property(&self, open: &mut OpenState) -> Result<()> {
        let mut buf = Vec::new();
        values::append_int_value(&mut buf, open.settings.len() as i32);

        for key in open.settings.keys() {
            values::append_string_value(&mut buf, Some(key));

            match self.catalog.find_by_key(key) {
                Some(entry) => {
                    let value = if entry.hidden() {
                        None
                    } else {
                        open.settings.value_as_string(key)
                    };
                    values::append_string_value(&mut buf, value.as_deref());
                }
                None => {
                    values::append_string_value(&mut buf, None);
                    warn!(
                        "storing configuration value for key '{}' not existing in current version",
                        key
                    );
                }
            }
        }

        open.store.put(CONFIGURATION_PROPERTY, &buf)
    }

    /// Rehydrates the context from the `configuration` blob. Null values
    /// leave the context default in place; unknown keys are logged and
    /// skipped.
    fn read_configuration(&self, open: &mut OpenState) -> Result<()> {
        let Some(raw) = open.store.get(CONFIGURATION_PROPERTY)? else {
            return Ok(());
        };

        let mut decode = || -> Result<()> {
            let mut pos = 0;
            let count = values::take_int_value(&raw, &mut pos)?;

            for _ in 0..count {
                let Some(key) = values::take_string_value(&raw, &mut pos)? else {
                    bail!("configuration key is null at offset {}", pos);
                };
                let value = values::take_string_value(&raw, &mut pos)?;

                match self.catalog.find_by_key(&key) {
                    Some(entry) => {
                        if let Some(value) = value {
                            open.settings.set_from_text(entry, &value)?;
                        }
                    }
                    None => warn!(
                        "ignored configuration value because it is not supported: {}={}",
                        key,
                        value.as_deref().unwrap_or("<null>")
                    ),
                }
            }
            Ok(())
        };

        decode().wrap_err_with(|| format!("corrupt value for key '{CONFIGURATION_PROPERTY}'"))
    }

    fn read_minimum_clusters(&self, open: &mut OpenState) -> Result<()> {
        // Absent when the store was created but never cleanly closed;
        // the context default applies.
        let Some(raw) = open.store.get(MINIMUM_CLUSTERS_PROPERTY)? else {
            return Ok(());
        };

        let minimum = values::decode_int_value(&raw, 0)
            .wrap_err_with(|| format!("corrupt value for key '{MINIMUM_CLUSTERS_PROPERTY}'"))?;

        open.settings
            .set(MINIMUM_CLUSTERS_KEY, SettingValue::Int(i64::from(minimum)));
        if minimum == 0 {
            open.settings.set(
                MINIMUM_CLUSTERS_KEY,
                SettingValue::Int(auto_cluster_count() as i64),
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

fn auto_cluster_count() -> i32 {
    host::available_cpus().min(MAX_AUTO_CLUSTERS) as i32
}

fn encryption_options(open: &OpenState) -> Option<String> {
    open.settings.value_as_string(ENCRYPTION_KEY_KEY)
}

fn update_string_property(open: &mut OpenState, key: &str, value: Option<&str>) -> Result<()> {
    open.store.put(key, &values::encode_string_value(value))
}

fn update_int_property(open: &mut OpenState, key: &str, value: i32) -> Result<()> {
    open.store.put(key, &values::encode_int_value(value))
}

fn read_string_property(open: &OpenState, key: &str) -> Result<Option<String>> {
    let Some(raw) = open.store.get(key)? else {
        return Ok(None);
    };

    values::decode_string_value(&raw, 0).wrap_err_with(|| format!("corrupt value for key '{key}'"))
}

fn read_int_property(open: &OpenState, key: &str) -> Result<i32> {
    let raw = open
        .store
        .get(key)?
        .ok_or_else(|| eyre::eyre!("configuration entry '{key}' is missing"))?;

    values::decode_int_value(&raw, 0).wrap_err_with(|| format!("corrupt value for key '{key}'"))
}

fn build_formatter(open: &OpenState, pattern_key: &str) -> Result<DateFormatter> {
    let pattern = read_string_property(open, pattern_key)?
        .ok_or_else(|| eyre::eyre!("configuration entry '{pattern_key}' is missing"))?;
    let time_zone_id = read_string_property(open, TIME_ZONE_PROPERTY)?
        .ok_or_else(|| eyre::eyre!("time zone is not set"))?;

    let offset = match host::resolve_time_zone(&time_zone_id) {
        Some(offset) => offset,
        None => {
            error!(
                "error during initialization of time zone '{}', UTC will be used",
                time_zone_id
            );
            host::resolve_time_zone("UTC").expect("UTC always resolves")
        }
    };

    Ok(DateFormatter::new(pattern, time_zone_id, offset))
}

fn clusters_of(open: &OpenState) -> Result<Vec<Option<ClusterConfig>>> {
    let mut clusters: Vec<Option<ClusterConfig>> = Vec::new();

    for (key, payload) in open.store.prefix_scan(CLUSTERS_PREFIX)? {
        let id: u32 = key[CLUSTERS_PREFIX.len()..]
            .parse()
            .wrap_err_with(|| format!("invalid cluster id in key '{key}'"))?;

        let cluster = ClusterConfig::from_bytes(id, &payload)
            .wrap_err_with(|| format!("corrupt value for key '{key}'"))?;

        if clusters.len() <= id as usize {
            clusters.resize_with(id as usize + 1, || None);
        }
        clusters[id as usize] = Some(cluster);
    }

    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn operations_fail_before_create_and_after_close() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));

        let err = config.version().unwrap_err();
        assert!(err.to_string().contains("not open"));

        config.create().unwrap();
        config.version().unwrap();

        config.close().unwrap();
        let err = config.set_charset("UTF-8").unwrap_err();
        assert!(err.to_string().contains("not open"));
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));

        config.create().unwrap();
        assert!(config.create().unwrap_err().to_string().contains("already open"));
    }

    #[test]
    fn validation_property_tracks_the_flag() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        assert!(config.is_validation_enabled().unwrap());

        config.set_validation(false).unwrap();
        assert!(!config.is_validation_enabled().unwrap());
        assert_eq!(
            config.property("validation").unwrap().as_deref(),
            Some("false")
        );

        // Case-insensitive, like every validation toggle before it.
        config.set_property("VALIDATION", "TRUE").unwrap();
        assert!(config.is_validation_enabled().unwrap());
    }

    #[test]
    fn delete_removes_storage_files() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db");
        let config = StorageConfig::new(&db_path);
        config.create().unwrap();

        config.delete().unwrap();

        assert!(!db_path.join("config.bd").exists());
        assert!(!db_path.join("config.cd").exists());
        assert!(config.version().is_err());
    }
}
