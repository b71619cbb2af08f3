//! 模拟数据源
//!
//! 按声明类型生成随机值：int 为 0..100，float 为 0..100 浮点，
//! bool 随机，string 从固定词表中选取。

use domain::{Sample, SampleValue, TagDataType, Timestamp};
use gw_pipeline::{AdapterContext, AdapterError, DeviceBatches, DeviceBinding};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const WORDS: [&str; 8] = [
    "apple", "banana", "cherry", "grape", "lemon", "mango", "orange", "peach",
];

/// 模拟器实例配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorAppConfig {
    /// 生成周期（毫秒），缺省使用进程配置
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// 生成一个随机值
pub fn simulate<R: Rng + ?Sized>(data_type: TagDataType, rng: &mut R) -> SampleValue {
    match data_type {
        TagDataType::Bool => SampleValue::Bool(rng.gen_bool(0.5)),
        TagDataType::Int => SampleValue::Int(rng.gen_range(0..100)),
        TagDataType::Float => SampleValue::Float(f64::from(rng.r#gen::<f32>() * 100.0)),
        TagDataType::String => {
            let word = WORDS.choose(rng).copied().unwrap_or("apple");
            SampleValue::Text(word.to_string())
        }
    }
}

/// (设备, 标签, 类型) 列表；未声明类型的标签跳过。
pub fn simulated_tags(bindings: &[DeviceBinding]) -> Vec<(String, String, TagDataType)> {
    let mut tags = Vec::new();
    for binding in bindings {
        for tag in &binding.tags {
            match tag.declared_type() {
                Ok(data_type) => {
                    tags.push((binding.device.dev_id.clone(), tag.name.clone(), data_type))
                }
                Err(err) => warn!(
                    target: "gw.simulator",
                    device_id = %binding.device.dev_id,
                    tag = %tag.name,
                    error = %err,
                    "simulated tag skipped"
                ),
            }
        }
    }
    tags
}

/// 生成一个周期的全部采样
pub fn generate(tags: &[(String, String, TagDataType)]) -> DeviceBatches {
    let stamp = Timestamp::now();
    let mut rng = rand::thread_rng();
    let mut batches = DeviceBatches::new();
    for (device_id, tag, data_type) in tags {
        batches
            .entry(device_id.clone())
            .or_default()
            .push((tag.clone(), Sample::at(&stamp, simulate(*data_type, &mut rng))));
    }
    batches
}

/// 运行模拟器直到取消
pub async fn run_simulator(ctx: AdapterContext) -> Result<(), AdapterError> {
    let config: SimulatorAppConfig = ctx.load_config().await?;
    let bindings = ctx.resolve_bindings().await?;
    let tags = simulated_tags(&bindings);
    if tags.is_empty() {
        return Err(AdapterError::Config(format!(
            "no typed tag for {}",
            ctx.instance_id
        )));
    }
    let interval = config
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(ctx.settings.poll_interval);
    info!(
        target: "gw.simulator",
        instance_id = %ctx.instance_id,
        tags = tags.len(),
        "simulator starting"
    );

    loop {
        ctx.deliver(generate(&tags)).await;
        if ctx.cancel.sleep(interval).await {
            break;
        }
    }
    info!(target: "gw.simulator", instance_id = %ctx.instance_id, "simulator stopped");
    Ok(())
}
