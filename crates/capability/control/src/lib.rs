//! # 实例编排与远程控制
//!
//! - [`registry`]：instanceId → 取消句柄，至多一个运行中的 worker，退出自动注销
//! - [`launcher`]：按 appCode 选择南向/北向适配器，开机自启
//! - [`command`]：带版本号的 start/stop 命令协议
//! - [`bridge`] / [`channel`]：独立桥接进程的任务对与 MQTT 命令通道

pub mod bridge;
pub mod channel;
pub mod command;
pub mod launcher;
pub mod registry;

pub use bridge::{Publisher, SimulatedPair, hardware_id, hardware_id_from_cpuinfo};
pub use channel::{MqttChannelConfig, MqttCommandChannel, run_command_loop};
pub use command::{
    Command, CommandDevice, CommandError, CommandProcessor, CommandResult, CommandTopics,
    PairLauncher,
};
pub use launcher::{Drivers, InstanceCheck, Launcher};
pub use registry::{RegistryError, WorkerRegistry};
