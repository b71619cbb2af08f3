use async_trait::async_trait;
use domain::{AppKind, DeviceConfig, InstanceConfig, SampleValue, TagBinding};
use gw_pipeline::{AdapterContext, AdapterError, AdapterSettings, BackpressurePolicy, CancelHandle};
use gw_protocol::{
    ModbusAppConfig, ModbusFunction, ProtocolError, RegisterClient, RegisterConnector, run_modbus,
};
use gw_storage::{ConfigStore, HashStore, InMemoryHashStore, RuntimeStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const INSTANCE: &str = "modbus@abc123";

/// 每个连接在 `fail_after` 次读取后报告超时，模拟链路中断。
struct FakeConnector {
    connects: Arc<AtomicU32>,
    fail_after: Option<u32>,
}

struct FakeClient {
    reads: u32,
    fail_after: Option<u32>,
}

#[async_trait]
impl RegisterClient for FakeClient {
    async fn read_bits(
        &mut self,
        _unit_id: u8,
        _function: ModbusFunction,
        _address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError> {
        Ok(vec![true; count as usize])
    }

    async fn read_words(
        &mut self,
        _unit_id: u8,
        _function: ModbusFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.reads += 1;
        if self.fail_after.is_some_and(|limit| self.reads > limit) {
            return Err(ProtocolError::Timeout("read timed out".to_string()));
        }
        let mut words = vec![0xFFFE];
        words.resize(count as usize, address);
        Ok(words)
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl RegisterConnector for FakeConnector {
    async fn connect(
        &self,
        _config: &ModbusAppConfig,
    ) -> Result<Box<dyn RegisterClient>, ProtocolError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeClient {
            reads: 0,
            fail_after: self.fail_after,
        }))
    }
}

async fn context(cancel: &CancelHandle, runtime: Arc<InMemoryHashStore>) -> AdapterContext {
    let ctx = AdapterContext {
        instance_id: INSTANCE.to_string(),
        config_store: ConfigStore::new(Arc::new(InMemoryHashStore::new())),
        runtime_store: RuntimeStore::new(runtime),
        cancel: cancel.token(),
        settings: AdapterSettings {
            reconnect_delay: Duration::from_millis(20),
            poll_interval: Duration::from_millis(20),
            backpressure: BackpressurePolicy::new(1000, Duration::from_millis(20)),
        },
    };
    ctx.config_store
        .save_instance(&InstanceConfig::new(
            AppKind::Modbus,
            INSTANCE,
            json!({"host": "127.0.0.1", "port": 5020, "intervalMs": 20}),
        ))
        .await
        .expect("instance");
    ctx
}

async fn bind_int16_tag(ctx: &AdapterContext) {
    ctx.config_store
        .save_device(&DeviceConfig::new("DEV_PLC1", INSTANCE))
        .await
        .expect("device");
    ctx.config_store
        .save_tags(
            "DEV_PLC1",
            &[TagBinding::new(
                "pressure",
                vec![
                    json!("pressure"),
                    json!("出口压力"),
                    json!("1"),
                    json!("03"),
                    json!("40001"),
                    json!("int16"),
                ],
            )],
        )
        .await
        .expect("tags");
}

async fn wait_until_stored(runtime: &InMemoryHashStore) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while runtime
            .hget("DEV_PLC1", "pressure")
            .await
            .expect("read")
            .is_none()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sample stored in time");
}

#[tokio::test]
async fn polled_register_lands_as_sample_triple() {
    let cancel = CancelHandle::new();
    let runtime = Arc::new(InMemoryHashStore::new());
    let ctx = context(&cancel, runtime.clone()).await;
    bind_int16_tag(&ctx).await;

    let connector = Arc::new(FakeConnector {
        connects: Arc::default(),
        fail_after: None,
    });
    let before = chrono::Utc::now().timestamp_millis();
    let task = tokio::spawn(run_modbus(ctx, connector));

    wait_until_stored(&runtime).await;
    let after = chrono::Utc::now().timestamp_millis();

    let raw = runtime
        .hget("DEV_PLC1", "pressure")
        .await
        .expect("read")
        .expect("stored");
    let triple: Vec<Value> = serde_json::from_str(&raw).expect("json array");
    assert_eq!(triple.len(), 3);
    assert!(triple[0].is_string());
    assert_eq!(triple[1], json!(-2));
    let ts = triple[2].as_i64().expect("ms epoch");
    assert!(ts >= before && ts <= after);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("stops on cancel")
        .expect("join");
    assert!(result.is_ok());
}

#[tokio::test]
async fn link_loss_triggers_reconnect() {
    let cancel = CancelHandle::new();
    let runtime = Arc::new(InMemoryHashStore::new());
    let ctx = context(&cancel, runtime.clone()).await;
    bind_int16_tag(&ctx).await;

    let connects = Arc::new(AtomicU32::new(0));
    let connector = Arc::new(FakeConnector {
        connects: connects.clone(),
        fail_after: Some(1),
    });
    let task = tokio::spawn(run_modbus(ctx, connector));

    tokio::time::timeout(Duration::from_secs(2), async {
        while connects.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconnected in time");

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("stops on cancel")
        .expect("join");
    assert!(result.is_ok());

    let sample = RuntimeStore::new(runtime)
        .read_sample("DEV_PLC1", "pressure")
        .await
        .expect("read")
        .expect("first poll stored");
    assert_eq!(sample.value, SampleValue::Int(-2));
}

#[tokio::test]
async fn instance_without_tags_exits_with_config_error() {
    let cancel = CancelHandle::new();
    let ctx = context(&cancel, Arc::new(InMemoryHashStore::new())).await;
    ctx.config_store
        .save_device(&DeviceConfig::new("DEV_PLC1", INSTANCE))
        .await
        .expect("device");

    let connects = Arc::new(AtomicU32::new(0));
    let connector = Arc::new(FakeConnector {
        connects: connects.clone(),
        fail_after: None,
    });
    let err = run_modbus(ctx, connector).await.expect_err("no tags");
    assert!(matches!(err, AdapterError::Config(_)));
    assert_eq!(connects.load(Ordering::SeqCst), 0);
}
