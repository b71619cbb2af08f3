use async_trait::async_trait;
use domain::{AppKind, DeviceConfig, InstanceConfig, Sample, SampleValue, Snapshot, TagBinding};
use gw_pipeline::{
    AdapterContext, AdapterError, AdapterSettings, BackpressurePolicy, CancelHandle,
    DeviceBinding,
};
use gw_sink::{
    Delivery, NorthPlan, SinkConnector, SinkError, SnapshotSink, deliver_item, resolve_targets,
    run_northbound,
};
use gw_storage::{ConfigStore, InMemoryHashStore, RuntimeStore};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Written = Arc<Mutex<Vec<Snapshot>>>;

struct RecordingSink {
    written: Written,
    fail_with: Option<fn() -> SinkError>,
}

#[async_trait]
impl SnapshotSink for RecordingSink {
    async fn write(&mut self, snapshot: &Snapshot) -> Result<usize, SinkError> {
        if let Some(fail) = self.fail_with {
            return Err(fail());
        }
        self.written.lock().unwrap().push(snapshot.clone());
        Ok(snapshot.values().map(|samples| samples.len()).sum())
    }

    async fn close(&mut self) {}
}

struct RecordingConnector {
    written: Written,
    targets: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SinkConnector for RecordingConnector {
    fn endpoint(&self) -> String {
        "memory://sink".to_string()
    }

    async fn connect(
        &self,
        targets: &[DeviceBinding],
    ) -> Result<Box<dyn SnapshotSink>, SinkError> {
        *self.targets.lock().unwrap() = targets
            .iter()
            .map(|binding| binding.device.dev_id.clone())
            .collect();
        Ok(Box::new(RecordingSink {
            written: self.written.clone(),
            fail_with: None,
        }))
    }
}

fn fast_settings() -> AdapterSettings {
    AdapterSettings {
        reconnect_delay: Duration::from_millis(20),
        poll_interval: Duration::from_millis(20),
        backpressure: BackpressurePolicy::new(1000, Duration::from_millis(20)),
    }
}

fn context(instance_id: &str, cancel: &CancelHandle) -> AdapterContext {
    AdapterContext {
        instance_id: instance_id.to_string(),
        config_store: ConfigStore::new(Arc::new(InMemoryHashStore::new())),
        runtime_store: RuntimeStore::new(Arc::new(InMemoryHashStore::new())),
        cancel: cancel.token(),
        settings: fast_settings(),
    }
}

async fn seed_devices(ctx: &AdapterContext) {
    for dev_id in ["DEV_A", "DEV_B"] {
        ctx.config_store
            .save_device(&DeviceConfig::new(dev_id, "simulator@s1"))
            .await
            .expect("device");
        ctx.config_store
            .save_tags(dev_id, &[TagBinding::new("temp", vec![json!("float")])])
            .await
            .expect("tags");
        ctx.runtime_store
            .write_samples(
                dev_id,
                &[("temp".to_string(), Sample::now(SampleValue::Float(20.5)))],
            )
            .await
            .expect("sample");
    }
}

#[tokio::test]
async fn empty_target_set_is_config_error() {
    let cancel = CancelHandle::new();
    let ctx = context("mqttpub@n0", &cancel);
    let err = resolve_targets(&ctx, &[]).await.expect_err("no devices");
    assert!(matches!(err, AdapterError::Config(_)));

    seed_devices(&ctx).await;
    let err = resolve_targets(&ctx, &["DEV_MISSING".to_string()])
        .await
        .expect_err("unknown device");
    assert!(matches!(err, AdapterError::Config(_)));

    let all = resolve_targets(&ctx, &[]).await.expect("all devices");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].tags.len(), 1);
}

#[tokio::test]
async fn stored_samples_reach_the_sink() {
    let cancel = CancelHandle::new();
    let ctx = context("mqttpub@n1", &cancel);
    ctx.config_store
        .save_instance(&InstanceConfig::new(AppKind::MqttPub, "mqttpub@n1", json!({})))
        .await
        .expect("instance");
    seed_devices(&ctx).await;

    let written: Written = Arc::default();
    let targets = Arc::new(Mutex::new(Vec::new()));
    let connector = Arc::new(RecordingConnector {
        written: written.clone(),
        targets: targets.clone(),
    });
    let plan = NorthPlan::new(0.02, vec!["DEV_B".to_string()]);
    let task = tokio::spawn(run_northbound(ctx, plan, connector));

    tokio::time::timeout(Duration::from_secs(2), async {
        while written.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("snapshot delivered");

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("adapter stops")
        .expect("join");
    assert!(result.is_ok());

    assert_eq!(*targets.lock().unwrap(), vec!["DEV_B".to_string()]);
    let first = written.lock().unwrap()[0].clone();
    assert_eq!(first.len(), 1);
    assert_eq!(first["DEV_B"]["temp"].value, SampleValue::Float(20.5));
}

#[tokio::test]
async fn malformed_items_are_skipped_and_failures_dropped() {
    let written: Written = Arc::default();
    let mut sink = RecordingSink {
        written: written.clone(),
        fail_with: None,
    };
    assert_eq!(deliver_item(&mut sink, "{bad").await, Delivery::Skipped);
    assert_eq!(deliver_item(&mut sink, "{}").await, Delivery::Written(0));

    let mut rejecting = RecordingSink {
        written: written.clone(),
        fail_with: Some(|| SinkError::Rejected {
            code: 400,
            message: "bad sql".to_string(),
        }),
    };
    assert_eq!(deliver_item(&mut rejecting, "{}").await, Delivery::Dropped);

    let mut broken = RecordingSink {
        written,
        fail_with: Some(|| SinkError::Disconnected),
    };
    assert_eq!(deliver_item(&mut broken, "{}").await, Delivery::LinkLost);
}

struct PanickingSink;

#[async_trait]
impl SnapshotSink for PanickingSink {
    async fn write(&mut self, _snapshot: &Snapshot) -> Result<usize, SinkError> {
        panic!("sink driver bug");
    }

    async fn close(&mut self) {}
}

struct PanickingConnector;

#[async_trait]
impl SinkConnector for PanickingConnector {
    fn endpoint(&self) -> String {
        "memory://panicking".to_string()
    }

    async fn connect(
        &self,
        _targets: &[DeviceBinding],
    ) -> Result<Box<dyn SnapshotSink>, SinkError> {
        Ok(Box::new(PanickingSink))
    }
}

#[tokio::test]
async fn consumer_panic_stops_the_whole_instance() {
    let cancel = CancelHandle::new();
    let ctx = context("dsInfluxdb@n2", &cancel);
    seed_devices(&ctx).await;

    let plan = NorthPlan::new(0.02, Vec::new());
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        run_northbound(ctx, plan, Arc::new(PanickingConnector)),
    )
    .await
    .expect("adapter returns without being cancelled");

    assert!(matches!(result, Err(AdapterError::Delivery(_))));
    assert!(!cancel.is_cancelled());
}
