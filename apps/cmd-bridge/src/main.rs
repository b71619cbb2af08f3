//! 命令桥接进程：订阅 `<hardwareId>/command`，按版本号启停模拟/发布任务对。

use gw_config::BridgeConfig;
use gw_control::{
    CommandProcessor, CommandTopics, MqttChannelConfig, MqttCommandChannel, SimulatedPair,
    hardware_id, run_command_loop,
};
use gw_pipeline::CancelHandle;
use gw_telemetry::{init_tracing, metrics};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = BridgeConfig::from_env()?;
    init_tracing();

    let hwid = match config.hardware_id.clone() {
        Some(id) => id,
        None => hardware_id()?,
    };
    let topics = CommandTopics::for_hardware(&hwid);
    info!(
        target: "gw.bridge",
        hardware_id = %hwid,
        command_topic = %topics.command,
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        "command bridge starting"
    );

    let (channel, inbox, pump) = MqttCommandChannel::connect(
        MqttChannelConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            client_id: config.mqtt_client_id.clone(),
        },
        &topics,
    );
    let channel = Arc::new(channel);
    let pair = SimulatedPair::new(
        channel.clone(),
        topics.data.clone(),
        config.sim_interval(),
        config.pub_interval(),
    );
    let processor = CommandProcessor::new(Arc::new(pair));

    let cancel = CancelHandle::new();
    let command_loop = tokio::spawn(run_command_loop(
        processor,
        inbox,
        channel.clone(),
        topics,
        cancel.token(),
    ));

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    command_loop.await?;
    channel.disconnect().await;
    pump.abort();
    info!(target: "gw.bridge", metrics = ?metrics().snapshot(), "command bridge stopped");
    Ok(())
}
