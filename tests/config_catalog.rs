//! # Catalog Family Tests
//!
//! Coverage of the prefixed key families: cluster descriptors, index
//! engines, and user properties:
//!
//! - R1: cluster descriptors round-trip with every field intact, and a
//!   status update preserves the rest
//! - R2: the cluster list is sparse, indexed by id, with null gaps
//! - R3: re-adding an index engine logs and skips instead of overwriting
//! - R4: property scans are confined to the `property_` prefix

use rookdb::settings::ContextSettings;
use rookdb::{
    ClusterConfig, ClusterStatus, IndexEngineData, KeyType, PaginatedClusterConfig, StorageConfig,
};
use tempfile::tempdir;

fn users_cluster() -> PaginatedClusterConfig {
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

mod cluster_tests {
    use super::*;

    #[test]
    fn cluster_descriptor_roundtrips_through_the_store() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        config
            .update_cluster(ClusterConfig::Paginated(users_cluster()))
            .unwrap();

        let clusters = config.clusters().unwrap();
        assert_eq!(clusters.len(), 8);

        let ClusterConfig::Paginated(stored) = clusters[7].clone().unwrap();
        assert_eq!(stored.name.as_deref(), Some("users"));
        assert!(stored.use_wal);
        assert_eq!(stored.binary_version, 3);
        assert_eq!(stored.encryption.as_deref(), Some("aes"));
        assert_eq!(stored.conflict_strategy.as_deref(), Some("overwrite"));
        assert_eq!(stored.status, ClusterStatus::Online);
        assert_eq!(stored.compression.as_deref(), Some("none"));
    }

    #[test]
    fn status_update_preserves_every_other_field() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        config
            .update_cluster(ClusterConfig::Paginated(users_cluster()))
            .unwrap();
        config.set_cluster_status(7, ClusterStatus::Offline).unwrap();

        let clusters = config.clusters().unwrap();
        let ClusterConfig::Paginated(stored) = clusters[7].clone().unwrap();
        assert_eq!(stored.status, ClusterStatus::Offline);
        assert_eq!(stored.name.as_deref(), Some("users"));
        assert_eq!(stored.encryption.as_deref(), Some("aes"));
        assert_eq!(stored.conflict_strategy.as_deref(), Some("overwrite"));
        assert_eq!(stored.compression.as_deref(), Some("none"));
        assert_eq!(stored.binary_version, 3);

        // Unknown ids are ignored.
        config.set_cluster_status(99, ClusterStatus::Offline).unwrap();
    }

    #[test]
    fn cluster_list_is_sparse_with_null_gaps() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        let mut first = users_cluster();
        first.id = 1;
        first.name = Some("vertices".to_string());
        let mut second = users_cluster();
        second.id = 4;
        second.name = Some("edges".to_string());

        config.update_cluster(ClusterConfig::Paginated(first)).unwrap();
        config.update_cluster(ClusterConfig::Paginated(second)).unwrap();

        let clusters = config.clusters().unwrap();
        assert_eq!(clusters.len(), 5);
        assert!(clusters[0].is_none());
        assert_eq!(clusters[1].as_ref().unwrap().name(), Some("vertices"));
        assert!(clusters[2].is_none());
        assert!(clusters[3].is_none());
        assert_eq!(clusters[4].as_ref().unwrap().name(), Some("edges"));
    }

    #[test]
    fn lexicographic_keys_still_index_numerically() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        // cluster_10 sorts before cluster_2 in the index; the sparse
        // list must still place both by numeric id.
        for id in [10, 2] {
            let mut cluster = users_cluster();
            cluster.id = id;
            cluster.name = Some(format!("c{id}"));
            config.update_cluster(ClusterConfig::Paginated(cluster)).unwrap();
        }

        let clusters = config.clusters().unwrap();
        assert_eq!(clusters.len(), 11);
        assert_eq!(clusters[2].as_ref().unwrap().name(), Some("c2"));
        assert_eq!(clusters[10].as_ref().unwrap().name(), Some("c10"));
    }

    #[test]
    fn drop_cluster_leaves_a_gap() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        for id in [0, 1] {
            let mut cluster = users_cluster();
            cluster.id = id;
            config.update_cluster(ClusterConfig::Paginated(cluster)).unwrap();
        }
        config.drop_cluster(0).unwrap();

        let clusters = config.clusters().unwrap();
        assert!(clusters[0].is_none());
        assert!(clusters[1].is_some());
    }

    #[test]
    fn clusters_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db");

        {
            let config = StorageConfig::new(&db_path);
            config.create().unwrap();
            config
                .update_cluster(ClusterConfig::Paginated(users_cluster()))
                .unwrap();
            config.close().unwrap();
        }

        let config = StorageConfig::new(&db_path);
        config.load(ContextSettings::new()).unwrap();

        let clusters = config.clusters().unwrap();
        let ClusterConfig::Paginated(stored) = clusters[7].clone().unwrap();
        assert_eq!(stored, users_cluster());
    }
}

mod engine_tests {
    use super::*;

    fn sample_engine(seed: u8) -> IndexEngineData {
        let mut engine = IndexEngineData::new("idx1", "sbtree", i32::from(seed));
        engine.key_serializer_id = seed;
        engine.key_types = vec![KeyType::String];
        engine
    }

    #[test]
    fn add_duplicate_engine_logs_and_skips() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        let first = sample_engine(1);
        let second = sample_engine(2);

        config.add_index_engine("idx1", first.clone()).unwrap();
        config.add_index_engine("idx1", second).unwrap();

        let stored = config.index_engine("idx1").unwrap().unwrap();
        assert_eq!(stored, first, "second add SHOULD not overwrite the first");
    }

    #[test]
    fn engine_names_enumerate_by_prefix() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        config.add_index_engine("idx_b", sample_engine(1)).unwrap();
        config.add_index_engine("idx_a", sample_engine(2)).unwrap();

        let names: Vec<String> = config.index_engines().unwrap().into_iter().collect();
        assert_eq!(names, vec!["idx_a".to_string(), "idx_b".to_string()]);
    }

    #[test]
    fn delete_engine_removes_it() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        config.add_index_engine("idx1", sample_engine(1)).unwrap();
        config.delete_index_engine("idx1").unwrap();

        assert!(config.index_engine("idx1").unwrap().is_none());
        assert!(config.index_engines().unwrap().is_empty());

        // Deleting again is a no-op.
        config.delete_index_engine("idx1").unwrap();
    }

    #[test]
    fn engines_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db");

        let engine = sample_engine(3);
        {
            let config = StorageConfig::new(&db_path);
            config.create().unwrap();
            config.add_index_engine("idx1", engine.clone()).unwrap();
            config.close().unwrap();
        }

        let config = StorageConfig::new(&db_path);
        config.load(ContextSettings::new()).unwrap();
        assert_eq!(config.index_engine("idx1").unwrap().unwrap(), engine);
    }
}

mod property_tests {
    use super::*;

    #[test]
    fn properties_roundtrip_and_enumerate() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        config.set_property("graph.lightweightEdges", "false").unwrap();
        config.set_property("custom", "42").unwrap();

        assert_eq!(config.property("custom").unwrap().as_deref(), Some("42"));
        assert_eq!(config.property("missing").unwrap(), None);

        let properties = config.properties().unwrap();
        assert_eq!(
            properties,
            vec![
                ("custom".to_string(), Some("42".to_string())),
                (
                    "graph.lightweightEdges".to_string(),
                    Some("false".to_string())
                ),
            ]
        );
    }

    #[test]
    fn property_scan_is_prefix_confined() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        config.set_property("a", "1").unwrap();
        // Plain fields and other families must not appear among the
        // properties even though "propertyX" sorts right after
        // "property_" keys would.
        config.set_schema_record_id("3:0").unwrap();
        config.add_index_engine("p", IndexEngineData::new("p", "hash", 1)).unwrap();

        let names: Vec<String> = config
            .properties()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn remove_and_clear_properties() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("db"));
        config.create().unwrap();

        config.set_property("a", "1").unwrap();
        config.set_property("b", "2").unwrap();
        config.set_property("c", "3").unwrap();

        config.remove_property("b").unwrap();
        assert_eq!(config.property("b").unwrap(), None);
        assert_eq!(config.properties().unwrap().len(), 2);

        config.clear_properties().unwrap();
        assert!(config.properties().unwrap().is_empty());

        // Other families are untouched by the clear.
        assert!(config.version().is_ok());
    }

    #[test]
    fn properties_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db");

        {
            let config = StorageConfig::new(&db_path);
            config.create().unwrap();
            config.set_property("graph.lightweightEdges", "false").unwrap();
            config.close().unwrap();
        }

        let config = StorageConfig::new(&db_path);
        config.load(ContextSettings::new()).unwrap();
        assert_eq!(
            config.property("graph.lightweightEdges").unwrap().as_deref(),
            Some("false")
        );
    }
}
