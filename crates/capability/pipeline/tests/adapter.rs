use domain::{AppKind, DeviceConfig, InstanceConfig, Sample, SampleValue, TagBinding};
use gw_pipeline::{
    AdapterContext, AdapterError, AdapterSettings, CancelHandle, DeviceBatches, ItemIndex,
    connect_with_retry, decode_config,
};
use gw_storage::{ConfigStore, InMemoryHashStore, RuntimeStore};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn context(instance_id: &str, cancel: &CancelHandle) -> AdapterContext {
    AdapterContext {
        instance_id: instance_id.to_string(),
        config_store: ConfigStore::new(Arc::new(InMemoryHashStore::new())),
        runtime_store: RuntimeStore::new(Arc::new(InMemoryHashStore::new())),
        cancel: cancel.token(),
        settings: AdapterSettings::default(),
    }
}

#[derive(Debug, serde::Deserialize)]
struct SampleConfig {
    host: String,
    #[serde(default)]
    port: u16,
}

#[tokio::test]
async fn missing_instance_is_config_error() {
    let cancel = CancelHandle::new();
    let ctx = context("opcua@missing", &cancel);
    let err = ctx.load_instance().await.expect_err("missing");
    assert!(matches!(err, AdapterError::Config(_)));
}

#[tokio::test]
async fn config_decode_fails_closed() {
    let cancel = CancelHandle::new();
    let ctx = context("opcua@a1", &cancel);
    ctx.config_store
        .save_instance(&InstanceConfig::new(AppKind::OpcUa, "opcua@a1", json!({"port": "x"})))
        .await
        .expect("save");
    let err = ctx.load_config::<SampleConfig>().await.expect_err("mistyped");
    assert!(matches!(err, AdapterError::Config(_)));

    let parsed: SampleConfig = decode_config(&json!(r#"{"host": "h"}"#)).expect("string payload");
    assert_eq!(parsed.host, "h");
    assert_eq!(parsed.port, 0);
}

#[tokio::test]
async fn bindings_build_reverse_index() {
    let cancel = CancelHandle::new();
    let ctx = context("opcda@b1", &cancel);
    assert!(matches!(
        ctx.resolve_bindings().await.expect_err("no devices"),
        AdapterError::Config(_)
    ));

    ctx.config_store
        .save_device(&DeviceConfig::new("DEV_1", "opcda@b1"))
        .await
        .expect("device");
    assert!(ctx.resolve_bindings().await.is_err());

    ctx.config_store
        .save_tags(
            "DEV_1",
            &[
                TagBinding::new("temp", vec![json!("Random.Real4"), json!("float")]),
                TagBinding::new("noid", vec![json!("int")]),
            ],
        )
        .await
        .expect("tags");
    let bindings = ctx.resolve_bindings().await.expect("bindings");
    let index = ItemIndex::from_bindings(&bindings);
    assert_eq!(index.len(), 1);
    let bound = index.get("Random.Real4").expect("indexed");
    assert_eq!(bound.device_id, "DEV_1");
    assert_eq!(bound.tag_name, "temp");
}

#[tokio::test]
async fn deliver_writes_each_device() {
    let cancel = CancelHandle::new();
    let ctx = context("simulator@c1", &cancel);
    let mut batches = DeviceBatches::new();
    batches.insert(
        "DEV_1".to_string(),
        vec![("a".to_string(), Sample::now(SampleValue::Int(1)))],
    );
    batches.insert("DEV_2".to_string(), Vec::new());
    assert_eq!(ctx.deliver(batches).await, 1);
    let stored = ctx
        .runtime_store
        .read_sample("DEV_1", "a")
        .await
        .expect("read")
        .expect("present");
    assert_eq!(stored.value, SampleValue::Int(1));
}

#[tokio::test(start_paused = true)]
async fn connect_retries_with_fixed_delay() {
    let cancel = CancelHandle::new();
    let token = cancel.token();
    let attempts = Arc::new(AtomicU32::new(0));
    let started = tokio::time::Instant::now();

    let result = connect_with_retry("fake:1", &token, Duration::from_secs(5), || {
        let attempts = attempts.clone();
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AdapterError::Connect("refused".to_string()))
            } else {
                Ok("session")
            }
        }
    })
    .await;

    assert_eq!(result, Some("session"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn connect_retry_stops_on_cancel() {
    let cancel = CancelHandle::new();
    let token = cancel.token();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        canceller.cancel();
    });

    let result: Option<()> = connect_with_retry("fake:2", &token, Duration::from_secs(5), || async {
        Err(AdapterError::Connect("down".to_string()))
    })
    .await;
    assert!(result.is_none());
}
