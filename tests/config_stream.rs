//! # Text Snapshot Tests
//!
//! Token-exact coverage of the legacy pipe-delimited stream across
//! network protocol versions:
//!
//! - R1: at version 30 the token sequence matches the documented layout,
//!   with nulls rendered as a single space
//! - R2: at version 24 the conflict-strategy, record-serializer, and
//!   context blocks are omitted and the legacy data-segment block appears
//! - R3: at the newest version the per-cluster encryption and binary
//!   version are appended
//! - R4: gaps in the cluster list emit a bare `-1`

use std::sync::Arc;

use rookdb::settings::{GlobalKey, KeyCatalog, SettingDefault, SettingKind, SettingValue};
use rookdb::{
    ClusterConfig, ClusterStatus, IndexEngineData, KeyType, PaginatedClusterConfig, StorageConfig,
};
use tempfile::{tempdir, TempDir};

fn internal_cluster(id: u32) -> ClusterConfig {
    ClusterConfig::Paginated(PaginatedClusterConfig {
        id,
        name: Some("internal".to_string()),
        use_wal: true,
        binary_version: 3,
        encryption: None,
        conflict_strategy: None,
        status: ClusterStatus::Online,
        compression: None,
        record_overflow_grow_factor: 0.0,
        record_grow_factor: 0.0,
    })
}

/// A store with every stream-visible field pinned to a known value.
fn deterministic_config() -> (TempDir, StorageConfig) {
    let dir = tempdir().unwrap();
    let config = StorageConfig::new(dir.path().join("db"));
    config.create().unwrap();

    config.set_schema_record_id("3:0").unwrap();
    config.set_index_mgr_record_id("3:1").unwrap();
    config.set_locale_language("en").unwrap();
    config.set_locale_country("US").unwrap();
    config.set_date_format("%Y-%m-%d").unwrap();
    config.set_time_zone("UTC").unwrap();
    config.set_conflict_strategy("version").unwrap();
    config.set_cluster_selection("round-robin").unwrap();
    config.set_record_serializer("binary").unwrap();
    config.set_minimum_clusters(4).unwrap();
    config.set_creation_version("0.1.0").unwrap();

    config.update_cluster(internal_cluster(0)).unwrap();
    config.set_property("graph.lightweightEdges", "false").unwrap();

    let mut engine = IndexEngineData::new("idx1", "sbtree", 2);
    engine.key_types = vec![KeyType::String];
    config.add_index_engine("idx1", engine).unwrap();

    (dir, config)
}

fn tokens(stream: Vec<u8>) -> Vec<String> {
    String::from_utf8(stream)
        .unwrap()
        .split('|')
        .map(str::to_string)
        .collect()
}

#[test]
fn version_30_token_sequence_is_exact() {
    let (_dir, config) = deterministic_config();

    let actual = tokens(config.to_stream_with_version(30, "UTF-8").unwrap());

    let expected: Vec<&str> = vec![
        "23", " ", // current version, pad
        "3:0", "", "3:1", // schema rid, reserved, index mgr rid
        "en", "US", "%Y-%m-%d", "%Y-%m-%d", // locale, date format twice
        "UTC", "UTF-8", "version", // time zone, charset, conflict strategy
        " ", "0", "mmap", "500Kb", "500Mb", "50%", "auto", "0", // phys segment
        "1", // cluster count
        "0", "internal", "-1", "d", "true", "0.0", "0.0", " ", // cluster core
        " ", "ONLINE", // conflict strategy, status
        "1", "graph.lightweightEdges", "false", // properties
        "13", "round-robin", "4", // binary format, selection, min clusters
        "binary", "0", // record serializer, serializer version
        "1", "storage.minimumClusters", "4", // context
        "1", // engine count
        "idx1", "sbtree", "", "0", "0", "false", "true", "2", "false", "1", " ", " ",
        "1", "STRING", "0", // engine key types and properties
        "0.1.0", "-1", "-1", "-1", // created at, page size, free list, max key
        "", // trailing separator
    ];

    assert_eq!(actual, expected);
}

#[test]
fn version_24_omits_new_fields_and_emits_legacy_block() {
    let (_dir, config) = deterministic_config();

    let actual = tokens(config.to_stream_with_version(24, "UTF-8").unwrap());

    let expected: Vec<&str> = vec![
        "23", " ", "3:0", "", "3:1", "en", "US", "%Y-%m-%d", "%Y-%m-%d", "UTC", "UTF-8",
        " ", "0", "mmap", "500Kb", "500Mb", "50%", "auto", "0", // phys segment
        "1", // cluster count
        "0", "internal", "-1", "d", "true", "0.0", "0.0", " ", // cluster, nothing newer
        "0", "", "", "0", "false", "false", // legacy data segment block
        "1", "graph.lightweightEdges", "false", // properties
        "13", "round-robin", "4", // no record serializer or context at 24
        "1", // engine count
        "idx1", "sbtree", "", "0", "0", "false", "true", "2", "false", "1", " ", " ",
        "1", "STRING", "0",
        "0.1.0", "-1", "-1", "-1", "",
    ];

    assert_eq!(actual, expected);
}

#[test]
fn newest_version_appends_encryption_and_binary_version() {
    let (_dir, config) = deterministic_config();

    let actual = tokens(config.to_stream("UTF-8").unwrap());

    let expected: Vec<&str> = vec![
        "23", " ", "3:0", "", "3:1", "en", "US", "%Y-%m-%d", "%Y-%m-%d", "UTC", "UTF-8", "version",
        " ", "0", "mmap", "500Kb", "500Mb", "50%", "auto", "0",
        "1",
        "0", "internal", "-1", "d", "true", "0.0", "0.0", " ", // cluster core
        " ", " ", "ONLINE", "3", // encryption, conflict, status, binary version
        "1", "graph.lightweightEdges", "false",
        "13", "round-robin", "4",
        "binary", "0",
        "1", "storage.minimumClusters", "4",
        "1",
        "idx1", "sbtree", "", "0", "0", "false", "true", "2", "false", "1", " ", " ",
        "1", "STRING", "0",
        "0.1.0", "-1", "-1", "-1", "",
    ];

    assert_eq!(actual, expected);
}

#[test]
fn cluster_gaps_emit_minus_one() {
    let dir = tempdir().unwrap();
    let config = StorageConfig::new(dir.path().join("db"));
    config.create().unwrap();
    config.set_minimum_clusters(4).unwrap();

    config.update_cluster(internal_cluster(1)).unwrap();

    let actual = tokens(config.to_stream_with_version(26, "UTF-8").unwrap());

    // Two entries: the gap at id 0, then the real cluster.
    let cluster_block: Vec<&str> = vec!["2", "-1", "1", "internal", "-1", "d"];
    assert!(
        actual
            .windows(cluster_block.len())
            .any(|window| window == cluster_block),
        "stream SHOULD contain the gap marker followed by the cluster header, got {actual:?}"
    );
}

struct HiddenKeyCatalog;

impl KeyCatalog for HiddenKeyCatalog {
    fn find_by_key(&self, key: &str) -> Option<&GlobalKey> {
        static KEYS: &[GlobalKey] = &[
            GlobalKey::new(
                "storage.minimumClusters",
                SettingKind::Int,
                false,
                SettingDefault::Int(0),
            ),
            GlobalKey::new("db.validation", SettingKind::Bool, false, SettingDefault::Bool(true)),
            GlobalKey::new("test.secret", SettingKind::Text, true, SettingDefault::None),
        ];
        KEYS.iter().find(|entry| entry.key() == key)
    }
}

#[test]
fn hidden_context_keys_stream_as_null() {
    let dir = tempdir().unwrap();
    let config = StorageConfig::with_catalog(dir.path().join("db"), Arc::new(HiddenKeyCatalog));
    config.create().unwrap();
    config.set_minimum_clusters(4).unwrap();
    config
        .set_context_value("test.secret", SettingValue::Text("s3cr3t".to_string()))
        .unwrap();

    let actual = tokens(config.to_stream_with_version(30, "UTF-8").unwrap());

    let context_block: Vec<&str> = vec!["2", "storage.minimumClusters", "4", "test.secret", " "];
    assert!(
        actual
            .windows(context_block.len())
            .any(|window| window == context_block),
        "hidden key SHOULD stream with a null value, got {actual:?}"
    );
    assert!(
        !actual.iter().any(|token| token == "s3cr3t"),
        "the secret SHOULD never reach the stream"
    );
}

#[test]
fn charset_parameter_is_emitted_verbatim() {
    let (_dir, config) = deterministic_config();

    let actual = tokens(config.to_stream_with_version(30, "ISO-8859-1").unwrap());
    assert_eq!(actual[10], "ISO-8859-1");
}
