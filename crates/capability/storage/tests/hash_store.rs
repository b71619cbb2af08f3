use domain::{DeviceConfig, InstanceConfig, AppKind, Sample, SampleValue, TagBinding, Timestamp};
use gw_storage::{ConfigStore, HashStore, InMemoryHashStore, RuntimeStore};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn hash_store_set_get_delete() {
    let store = InMemoryHashStore::new();
    store.hset("c1", "f1", "v1").await.expect("hset");
    store
        .hset_many(
            "c1",
            &[
                ("f2".to_string(), "v2".to_string()),
                ("f1".to_string(), "v1b".to_string()),
            ],
        )
        .await
        .expect("hset_many");

    assert_eq!(store.hget("c1", "f1").await.expect("hget"), Some("v1b".to_string()));
    assert_eq!(store.hgetall("c1").await.expect("hgetall").len(), 2);
    assert_eq!(store.hget("missing", "f1").await.expect("hget"), None);

    assert!(store.hdel("c1", "f1").await.expect("hdel"));
    assert!(!store.hdel("c1", "f1").await.expect("hdel again"));
    assert!(store.hdel("c1", "f2").await.expect("hdel last"));
    assert!(store.is_empty());
}

#[tokio::test]
async fn config_store_resolves_devices_and_tags() {
    let config = ConfigStore::new(Arc::new(InMemoryHashStore::new()));
    let instance = InstanceConfig::new(AppKind::Modbus, "modbus@abc123", json!({"host": "127.0.0.1"}));
    config.save_instance(&instance).await.expect("save instance");
    config
        .save_device(&DeviceConfig::new("DEV_A", "modbus@abc123"))
        .await
        .expect("save device");
    config
        .save_device(&DeviceConfig::new("DEV_B", "opcua@other"))
        .await
        .expect("save device");
    config
        .save_tags(
            "DEV_A",
            &[
                TagBinding::new(
                    "t2",
                    vec![json!("t2"), json!(""), json!(1), json!("03"), json!(0), json!("int16")],
                ),
                TagBinding::new(
                    "t1",
                    vec![json!("t1"), json!(""), json!(1), json!("01"), json!(0), json!("bool")],
                ),
            ],
        )
        .await
        .expect("save tags");

    let loaded = config
        .load_instance("modbus@abc123")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded, instance);
    assert!(config.load_instance("modbus@none").await.expect("load").is_none());

    let devices = config
        .devices_for_instance("modbus@abc123")
        .await
        .expect("devices");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].dev_id, "DEV_A");

    let tags = config.tags_for_device("DEV_A").await.expect("tags");
    let names: Vec<&str> = tags.iter().map(|tag| tag.name.as_str()).collect();
    assert_eq!(names, vec!["t1", "t2"]);

    let some = config
        .devices_by_ids(&["DEV_B".to_string(), "DEV_Z".to_string()])
        .await
        .expect("by ids");
    assert_eq!(some.len(), 1);
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let backend = Arc::new(InMemoryHashStore::new());
    let config = ConfigStore::new(backend.clone());
    backend
        .hset(domain::INSTANCE_LIST_KEY, "broken@1", "{not json")
        .await
        .expect("hset");
    config
        .save_instance(&InstanceConfig::new(AppKind::Simulator, "simulator@1", json!({})))
        .await
        .expect("save");
    backend.hset("DEV_A", "bad", "[]").await.expect("hset");
    backend.hset("DEV_A", "good", r#"["float"]"#).await.expect("hset");

    assert_eq!(config.list_instances().await.expect("list").len(), 1);
    assert!(config.load_instance("broken@1").await.is_err());
    assert_eq!(config.tags_for_device("DEV_A").await.expect("tags").len(), 1);
}

#[tokio::test]
async fn runtime_store_writes_one_batch_per_device() {
    let backend = Arc::new(InMemoryHashStore::new());
    let runtime = RuntimeStore::new(backend.clone());
    let stamp = Timestamp::now();
    runtime
        .write_samples(
            "DEV_A",
            &[
                ("flag".to_string(), Sample::at(&stamp, SampleValue::Bool(false))),
                ("level".to_string(), Sample::at(&stamp, SampleValue::Float(1.5))),
            ],
        )
        .await
        .expect("write");
    backend.hset("DEV_A", "junk", "oops").await.expect("hset");

    let flag = runtime
        .read_sample("DEV_A", "flag")
        .await
        .expect("read")
        .expect("present");
    assert_eq!(flag.value, SampleValue::Bool(false));

    let device = runtime.read_device("DEV_A").await.expect("device");
    assert_eq!(device.len(), 2);

    let snapshot = runtime
        .read_snapshot(&["DEV_A".to_string(), "DEV_EMPTY".to_string()])
        .await
        .expect("snapshot");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot["DEV_A"]["level"].value, SampleValue::Float(1.5));
}
