//! # Catalog Value Types
//!
//! Typed views of the structured value families the configuration store
//! persists: paginated-cluster descriptors and secondary-index engine
//! descriptors. Each type owns its binary codec; the layouts concatenate
//! the scalar primitives from [`values`](super::values) and change only
//! behind the version tag carried inside the value.

use std::collections::BTreeMap;

use eyre::{bail, ensure, Result};

use super::values::{
    append_int_value, append_string_value, take_int_value, take_string_value,
};

/// Availability of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Online,
    Offline,
}

impl ClusterStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ClusterStatus::Online => "ONLINE",
            ClusterStatus::Offline => "OFFLINE",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ONLINE" => Ok(ClusterStatus::Online),
            "OFFLINE" => Ok(ClusterStatus::Offline),
            other => bail!("unknown cluster status name: '{}'", other),
        }
    }
}

/// Descriptor of a paginated cluster.
///
/// The grow factors are runtime tuning knobs of the legacy engine; they
/// are not persisted and rehydrate as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedClusterConfig {
    pub id: u32,
    pub name: Option<String>,
    pub use_wal: bool,
    pub binary_version: i32,
    pub encryption: Option<String>,
    pub conflict_strategy: Option<String>,
    pub status: ClusterStatus,
    pub compression: Option<String>,
    pub record_overflow_grow_factor: f32,
    pub record_grow_factor: f32,
}

impl PaginatedClusterConfig {
    pub fn new(id: u32, name: impl Into<String>, binary_version: i32) -> Self {
        Self {
            id,
            name: Some(name.into()),
            use_wal: true,
            binary_version,
            encryption: None,
            conflict_strategy: None,
            status: ClusterStatus::Online,
            compression: None,
            record_overflow_grow_factor: 0.0,
            record_grow_factor: 0.0,
        }
    }
}

/// Descriptor of a cluster, tagged by storage variant.
///
/// Only the paginated variant exists today; the tag stays explicit so a
/// future variant cannot silently change the persisted format.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterConfig {
    Paginated(PaginatedClusterConfig),
}

impl ClusterConfig {
    pub fn id(&self) -> u32 {
        match self {
            ClusterConfig::Paginated(config) => config.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ClusterConfig::Paginated(config) => config.name.as_deref(),
        }
    }

    pub fn status(&self) -> ClusterStatus {
        match self {
            ClusterConfig::Paginated(config) => config.status,
        }
    }

    pub fn set_status(&mut self, status: ClusterStatus) {
        match self {
            ClusterConfig::Paginated(config) => config.status = status,
        }
    }

    /// Encodes the descriptor: name, WAL flag, binary format version,
    /// then encryption, conflict strategy, status, and compression.
    pub fn to_bytes(&self) -> Vec<u8> {
        let ClusterConfig::Paginated(config) = self;

        let mut buf = Vec::new();
        append_string_value(&mut buf, config.name.as_deref());
        buf.push(config.use_wal as u8);
        append_int_value(&mut buf, config.binary_version);
        append_string_value(&mut buf, config.encryption.as_deref());
        append_string_value(&mut buf, config.conflict_strategy.as_deref());
        append_string_value(&mut buf, Some(config.status.name()));
        append_string_value(&mut buf, config.compression.as_deref());
        buf
    }

    /// Decodes a descriptor; the id comes from the key, not the value.
    pub fn from_bytes(id: u32, raw: &[u8]) -> Result<Self> {
        let mut pos = 0;

        let name = take_string_value(raw, &mut pos)?;

        ensure!(
            pos < raw.len(),
            "unexpected end of data reading WAL flag at offset {}",
            pos
        );
        let use_wal = raw[pos] == 1;
        pos += 1;

        let binary_version = take_int_value(raw, &mut pos)?;
        let encryption = take_string_value(raw, &mut pos)?;
        let conflict_strategy = take_string_value(raw, &mut pos)?;

        let Some(status_name) = take_string_value(raw, &mut pos)? else {
            bail!("cluster status is null at offset {}", pos);
        };
        let status = ClusterStatus::from_name(&status_name)?;

        let compression = take_string_value(raw, &mut pos)?;

        Ok(ClusterConfig::Paginated(PaginatedClusterConfig {
            id,
            name,
            use_wal,
            binary_version,
            encryption,
            conflict_strategy,
            status,
            compression,
            record_overflow_grow_factor: 0.0,
            record_grow_factor: 0.0,
        }))
    }
}

/// Scalar types an index engine can key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Boolean,
    Integer,
    Short,
    Long,
    Float,
    Double,
    Decimal,
    String,
    Binary,
    Byte,
    Date,
    DateTime,
    Link,
    Embedded,
}

impl KeyType {
    pub fn name(&self) -> &'static str {
        match self {
            KeyType::Boolean => "BOOLEAN",
            KeyType::Integer => "INTEGER",
            KeyType::Short => "SHORT",
            KeyType::Long => "LONG",
            KeyType::Float => "FLOAT",
            KeyType::Double => "DOUBLE",
            KeyType::Decimal => "DECIMAL",
            KeyType::String => "STRING",
            KeyType::Binary => "BINARY",
            KeyType::Byte => "BYTE",
            KeyType::Date => "DATE",
            KeyType::DateTime => "DATETIME",
            KeyType::Link => "LINK",
            KeyType::Embedded => "EMBEDDED",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "BOOLEAN" => Ok(KeyType::Boolean),
            "INTEGER" => Ok(KeyType::Integer),
            "SHORT" => Ok(KeyType::Short),
            "LONG" => Ok(KeyType::Long),
            "FLOAT" => Ok(KeyType::Float),
            "DOUBLE" => Ok(KeyType::Double),
            "DECIMAL" => Ok(KeyType::Decimal),
            "STRING" => Ok(KeyType::String),
            "BINARY" => Ok(KeyType::Binary),
            "BYTE" => Ok(KeyType::Byte),
            "DATE" => Ok(KeyType::Date),
            "DATETIME" => Ok(KeyType::DateTime),
            "LINK" => Ok(KeyType::Link),
            "EMBEDDED" => Ok(KeyType::Embedded),
            other => bail!("unknown key type name: '{}'", other),
        }
    }
}

/// Descriptor of a secondary-index engine.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEngineData {
    pub name: String,
    pub algorithm: Option<String>,
    /// Empty when the engine has no declared index type.
    pub index_type: String,
    pub version: i32,
    pub value_serializer_id: u8,
    pub key_serializer_id: u8,
    pub automatic: bool,
    pub null_values_supported: bool,
    pub key_size: i32,
    pub encryption: Option<String>,
    /// Resolved from the context's encryption key at decode time; never
    /// persisted inside the descriptor.
    pub encryption_options: Option<String>,
    /// Whether the engine is durable for operations outside a transaction.
    /// Not persisted; rehydrates as true.
    pub durable_in_non_tx_mode: bool,
    pub key_types: Vec<KeyType>,
    pub engine_properties: BTreeMap<String, String>,
}

impl IndexEngineData {
    pub fn new(name: impl Into<String>, algorithm: impl Into<String>, version: i32) -> Self {
        Self {
            name: name.into(),
            algorithm: Some(algorithm.into()),
            index_type: String::new(),
            version,
            value_serializer_id: 0,
            key_serializer_id: 0,
            automatic: false,
            null_values_supported: false,
            key_size: 1,
            encryption: None,
            encryption_options: None,
            durable_in_non_tx_mode: true,
            key_types: Vec::new(),
            engine_properties: BTreeMap::new(),
        }
    }

    /// Encodes the descriptor: version, serializer ids and flags, key
    /// size, algorithm, index type, encryption, key types, and engine
    /// properties.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        append_int_value(&mut buf, self.version);
        buf.push(self.value_serializer_id);
        buf.push(self.key_serializer_id);
        buf.push(self.automatic as u8);
        buf.push(self.null_values_supported as u8);
        append_int_value(&mut buf, self.key_size);

        append_string_value(&mut buf, self.algorithm.as_deref());
        append_string_value(&mut buf, Some(self.index_type.as_str()));
        append_string_value(&mut buf, self.encryption.as_deref());

        append_int_value(&mut buf, self.key_types.len() as i32);
        for key_type in &self.key_types {
            append_string_value(&mut buf, Some(key_type.name()));
        }

        append_int_value(&mut buf, self.engine_properties.len() as i32);
        for (key, value) in &self.engine_properties {
            append_string_value(&mut buf, Some(key));
            append_string_value(&mut buf, Some(value));
        }

        buf
    }

    /// Decodes a descriptor; the name comes from the key, the encryption
    /// options from the installed context.
    pub fn from_bytes(
        name: &str,
        raw: &[u8],
        encryption_options: Option<String>,
    ) -> Result<Self> {
        let mut pos = 0;

        let version = take_int_value(raw, &mut pos)?;

        ensure!(
            pos + 4 <= raw.len(),
            "unexpected end of data reading engine flags at offset {}",
            pos
        );
        let value_serializer_id = raw[pos];
        let key_serializer_id = raw[pos + 1];
        let automatic = raw[pos + 2] == 1;
        let null_values_supported = raw[pos + 3] == 1;
        pos += 4;

        let key_size = take_int_value(raw, &mut pos)?;

        let algorithm = take_string_value(raw, &mut pos)?;
        let index_type = take_string_value(raw, &mut pos)?.unwrap_or_default();
        let encryption = take_string_value(raw, &mut pos)?;

        let key_type_count = take_int_value(raw, &mut pos)?;
        ensure!(
            key_type_count >= 0,
            "negative key type count {} at offset {}",
            key_type_count,
            pos
        );
        let mut key_types = Vec::with_capacity(key_type_count as usize);
        for _ in 0..key_type_count {
            let Some(type_name) = take_string_value(raw, &mut pos)? else {
                bail!("key type name is null at offset {}", pos);
            };
            key_types.push(KeyType::from_name(&type_name)?);
        }

        let property_count = take_int_value(raw, &mut pos)?;
        ensure!(
            property_count >= 0,
            "negative engine property count {} at offset {}",
            property_count,
            pos
        );
        let mut engine_properties = BTreeMap::new();
        for _ in 0..property_count {
            let Some(key) = take_string_value(raw, &mut pos)? else {
                bail!("engine property key is null at offset {}", pos);
            };
            let Some(value) = take_string_value(raw, &mut pos)? else {
                bail!("engine property value is null at offset {}", pos);
            };
            engine_properties.insert(key, value);
        }

        Ok(Self {
            name: name.to_string(),
            algorithm,
            index_type,
            version,
            value_serializer_id,
            key_serializer_id,
            automatic,
            null_values_supported,
            key_size,
            encryption,
            encryption_options,
            durable_in_non_tx_mode: true,
            key_types,
            engine_properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cluster() -> PaginatedClusterConfig {
        PaginatedClusterConfig {
            id: 7,
            name: Some("users".to_string()),
            use_wal: true,
            binary_version: 3,
            encryption: Some("aes".to_string()),
            conflict_strategy: Some("overwrite".to_string()),
            status: ClusterStatus::Online,
            compression: Some("none".to_string()),
            record_overflow_grow_factor: 0.0,
            record_grow_factor: 0.0,
        }
    }

    #[test]
    fn cluster_descriptor_roundtrips() {
        let config = ClusterConfig::Paginated(sample_cluster());
        let decoded = ClusterConfig::from_bytes(7, &config.to_bytes()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn cluster_descriptor_roundtrips_null_fields() {
        let mut cluster = sample_cluster();
        cluster.encryption = None;
        cluster.conflict_strategy = None;
        cluster.compression = None;

        let config = ClusterConfig::Paginated(cluster);
        let decoded = ClusterConfig::from_bytes(7, &config.to_bytes()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn cluster_status_names_roundtrip() {
        assert_eq!(
            ClusterStatus::from_name("ONLINE").unwrap(),
            ClusterStatus::Online
        );
        assert_eq!(
            ClusterStatus::from_name("OFFLINE").unwrap(),
            ClusterStatus::Offline
        );
        assert!(ClusterStatus::from_name("BROKEN").is_err());
    }

    #[test]
    fn truncated_cluster_descriptor_fails() {
        let config = ClusterConfig::Paginated(sample_cluster());
        let bytes = config.to_bytes();

        let err = ClusterConfig::from_bytes(7, &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(err.to_string().contains("unexpected end of data"));
    }

    fn sample_engine() -> IndexEngineData {
        let mut engine = IndexEngineData::new("idx_users_name", "sbtree", 2);
        engine.index_type = "NOTUNIQUE".to_string();
        engine.value_serializer_id = 17;
        engine.key_serializer_id = 13;
        engine.automatic = true;
        engine.null_values_supported = true;
        engine.key_size = 2;
        engine.encryption = Some("aes".to_string());
        engine.key_types = vec![KeyType::String, KeyType::Long];
        engine
            .engine_properties
            .insert("partitions".to_string(), "8".to_string());
        engine
            .engine_properties
            .insert("seed".to_string(), "42".to_string());
        engine
    }

    #[test]
    fn engine_descriptor_roundtrips() {
        let engine = sample_engine();
        let decoded =
            IndexEngineData::from_bytes("idx_users_name", &engine.to_bytes(), None).unwrap();
        assert_eq!(decoded, engine);
    }

    #[test]
    fn engine_descriptor_absent_index_type_becomes_empty() {
        let engine = IndexEngineData::new("idx", "hash", 1);
        let decoded = IndexEngineData::from_bytes("idx", &engine.to_bytes(), None).unwrap();
        assert_eq!(decoded.index_type, "");
    }

    #[test]
    fn engine_descriptor_carries_encryption_options_from_context() {
        let engine = sample_engine();
        let decoded = IndexEngineData::from_bytes(
            "idx_users_name",
            &engine.to_bytes(),
            Some("s3cr3t".to_string()),
        )
        .unwrap();
        assert_eq!(decoded.encryption_options.as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn engine_descriptor_rejects_unknown_key_type() {
        let mut engine = sample_engine();
        engine.key_types = vec![KeyType::String];
        let mut bytes = engine.to_bytes();

        // Corrupt the key type name: STRING -> STRINH (UTF-16BE, last
        // code unit's low byte).
        let needle: Vec<u8> = "STRING"
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect();
        let at = bytes
            .windows(needle.len())
            .position(|window| window == needle)
            .unwrap();
        bytes[at + needle.len() - 1] += 1;

        let err = IndexEngineData::from_bytes("idx", &bytes, None).unwrap_err();
        assert!(err.to_string().contains("unknown key type"));
    }
}
