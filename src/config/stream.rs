//! # Legacy Text Snapshot
//!
//! The pipe-delimited byte stream reproducing the legacy
//! storage-configuration wire format, used when the catalog is shipped to
//! cluster peers or network clients. The caller picks a target network
//! protocol version; fields introduced later than that version are
//! omitted, and blocks the legacy format reserved for storage layouts
//! this engine never had are emitted with their historical defaults so
//! old readers keep their field offsets.
//!
//! Rules: a `|` separator precedes every field after the first; a null
//! field renders as a single space; the stream ends with a trailing `|`.
//! The serializer is read-only and holds the store's read lock for the
//! duration of one snapshot.

use eyre::Result;
use tracing::warn;

use super::types::ClusterConfig;
use super::{
    read_int_property, read_string_property, values, StorageConfig, BINARY_FORMAT_VERSION_PROPERTY,
    CLUSTER_SELECTION_PROPERTY, CONFLICT_STRATEGY_PROPERTY, CREATED_AT_VERSION_PROPERTY,
    CURRENT_VERSION, DATE_FORMAT_PROPERTY, FREE_LIST_BOUNDARY_PROPERTY, INDEX_MANAGER_RECORD_ID_PROPERTY,
    LOCALE_COUNTRY_PROPERTY, LOCALE_LANGUAGE_PROPERTY, MAX_KEY_SIZE_PROPERTY, PAGE_SIZE_PROPERTY,
    PROPERTY_PREFIX, RECORD_SERIALIZER_PROPERTY, RECORD_SERIALIZER_VERSION_PROPERTY,
    SCHEMA_RECORD_ID_PROPERTY, TIME_ZONE_PROPERTY,
};

struct StreamWriter {
    buf: String,
}

impl StreamWriter {
    fn new() -> Self {
        Self {
            buf: String::with_capacity(8192),
        }
    }

    /// Appends one field; null renders as a single space.
    fn write(&mut self, token: Option<&str>) {
        if !self.buf.is_empty() {
            self.buf.push('|');
        }

        match token {
            Some(token) => self.buf.push_str(token),
            None => self.buf.push(' '),
        }
    }

    fn write_str(&mut self, token: &str) {
        self.write(Some(token));
    }

    fn write_int(&mut self, value: i32) {
        self.write_str(&value.to_string());
    }

    fn write_bool(&mut self, value: bool) {
        self.write_str(if value { "true" } else { "false" });
    }

    /// Floats render with a forced fraction (`0.0`, not `0`), matching
    /// the legacy readers' expectations.
    fn write_f32(&mut self, value: f32) {
        self.write_str(&format!("{value:?}"));
    }

    fn finish(mut self) -> String {
        self.buf.push('|');
        self.buf
    }
}

/// The legacy physical-segment block. This engine never had physical
/// segments; the block carries the historical defaults.
fn phys_segment_to_stream(writer: &mut StreamWriter) {
    writer.write(None); // location
    writer.write_str("0"); // maxSize
    writer.write_str("mmap"); // fileType
    writer.write_str("500Kb"); // fileStartSize
    writer.write_str("500Mb"); // fileMaxSize
    writer.write_str("50%"); // fileIncrementSize
    writer.write_str("auto"); // defrag
    writer.write_int(0); // infoFiles count
}

impl StorageConfig {
    /// Serializes the catalog at the newest protocol version.
    pub fn to_stream(&self, charset: &str) -> Result<Vec<u8>> {
        self.to_stream_with_version(i32::MAX, charset)
    }

    /// Serializes the catalog for a peer speaking network protocol
    /// version `network_version`. The charset name is emitted verbatim
    /// as the stream's charset field.
    pub fn to_stream_with_version(&self, network_version: i32, charset: &str) -> Result<Vec<u8>> {
        self.with_read(|open| {
            let mut writer = StreamWriter::new();

            writer.write_int(CURRENT_VERSION);
            writer.write(None);

            writer.write(read_string_property(open, SCHEMA_RECORD_ID_PROPERTY)?.as_deref());
            writer.write_str("");
            writer.write(read_string_property(open, INDEX_MANAGER_RECORD_ID_PROPERTY)?.as_deref());

            writer.write(read_string_property(open, LOCALE_LANGUAGE_PROPERTY)?.as_deref());
            writer.write(read_string_property(open, LOCALE_COUNTRY_PROPERTY)?.as_deref());
            let date_format = read_string_property(open, DATE_FORMAT_PROPERTY)?;
            writer.write(date_format.as_deref());
            writer.write(date_format.as_deref());

            writer.write(read_string_property(open, TIME_ZONE_PROPERTY)?.as_deref());
            writer.write_str(charset);
            if network_version > 24 {
                writer.write(read_string_property(open, CONFLICT_STRATEGY_PROPERTY)?.as_deref());
            }

            phys_segment_to_stream(&mut writer);

            let clusters = super::clusters_of(open)?;
            writer.write_int(clusters.len() as i32);
            for cluster in &clusters {
                let Some(ClusterConfig::Paginated(cluster)) = cluster else {
                    writer.write_int(-1);
                    continue;
                };

                writer.write_int(cluster.id as i32);
                writer.write(cluster.name.as_deref());
                writer.write_int(-1); // data segment id

                writer.write_str("d");
                writer.write_bool(cluster.use_wal);
                writer.write_f32(cluster.record_overflow_grow_factor);
                writer.write_f32(cluster.record_grow_factor);
                writer.write(cluster.compression.as_deref());

                if network_version >= 31 {
                    writer.write(cluster.encryption.as_deref());
                }
                if network_version > 24 {
                    writer.write(cluster.conflict_strategy.as_deref());
                }
                if network_version > 25 {
                    writer.write_str(cluster.status.name());
                }
                if network_version == i32::MAX {
                    writer.write_int(cluster.binary_version);
                }
            }

            if network_version <= 25 {
                // Legacy data-segment array and transaction-segment file.
                writer.write_int(0);
                writer.write_str("");
                writer.write_str("");
                writer.write_int(0);
                writer.write_bool(false);
                writer.write_bool(false);
            }

            let properties = open.store.prefix_scan(PROPERTY_PREFIX)?;
            writer.write_int(properties.len() as i32);
            for (key, payload) in &properties {
                let value = values::decode_string_value(payload, 0)?;
                writer.write_str(&key[PROPERTY_PREFIX.len()..]);
                writer.write(value.as_deref());
            }

            writer.write_int(read_int_property(open, BINARY_FORMAT_VERSION_PROPERTY)?);
            writer.write(read_string_property(open, CLUSTER_SELECTION_PROPERTY)?.as_deref());
            writer.write_int(self.minimum_clusters_of(open));

            if network_version > 24 {
                writer.write(read_string_property(open, RECORD_SERIALIZER_PROPERTY)?.as_deref());
                writer.write_int(read_int_property(open, RECORD_SERIALIZER_VERSION_PROPERTY)?);

                writer.write_int(open.settings.len() as i32);
                for key in open.settings.keys() {
                    writer.write_str(key);
                    match self.catalog.find_by_key(key) {
                        Some(entry) => {
                            let value = if entry.hidden() {
                                None
                            } else {
                                open.settings.value_as_string(key)
                            };
                            writer.write(value.as_deref());
                        }
                        None => {
                            writer.write(None);
                            warn!(
                                "storing configuration value for key '{}' not existing in current version",
                                key
                            );
                        }
                    }
                }
            }

            let engines = StorageConfig::load_index_engines(open)?;
            writer.write_int(engines.len() as i32);
            for engine in &engines {
                writer.write_str(&engine.name);
                writer.write(engine.algorithm.as_deref());
                writer.write_str(&engine.index_type);

                writer.write_int(i32::from(engine.value_serializer_id));
                writer.write_int(i32::from(engine.key_serializer_id));

                writer.write_bool(engine.automatic);
                writer.write_bool(engine.durable_in_non_tx_mode);

                writer.write_int(engine.version);
                writer.write_bool(engine.null_values_supported);
                writer.write_int(engine.key_size);
                writer.write(engine.encryption.as_deref());
                writer.write(engine.encryption_options.as_deref());

                writer.write_int(engine.key_types.len() as i32);
                for key_type in &engine.key_types {
                    writer.write_str(key_type.name());
                }

                writer.write_int(engine.engine_properties.len() as i32);
                for (key, value) in &engine.engine_properties {
                    writer.write_str(key);
                    writer.write_str(value);
                }
            }

            writer.write(read_string_property(open, CREATED_AT_VERSION_PROPERTY)?.as_deref());
            writer.write_int(read_int_property(open, PAGE_SIZE_PROPERTY)?);
            writer.write_int(read_int_property(open, FREE_LIST_BOUNDARY_PROPERTY)?);
            writer.write_int(read_int_property(open, MAX_KEY_SIZE_PROPERTY)?);

            Ok(writer.finish().into_bytes())
        })
    }
}
