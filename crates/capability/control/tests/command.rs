use async_trait::async_trait;
use gw_control::{
    Command, CommandError, CommandProcessor, CommandResult, CommandTopics, PairLauncher,
    Publisher, SimulatedPair, run_command_loop,
};
use gw_pipeline::{CancelHandle, CancelToken};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 记录启动次数与已退出的任务数
#[derive(Default)]
struct CountingLauncher {
    launched: AtomicUsize,
    stopped: Arc<AtomicUsize>,
}

#[async_trait]
impl PairLauncher for CountingLauncher {
    async fn launch(
        &self,
        _command: &Command,
        cancel: CancelToken,
    ) -> Result<Vec<JoinHandle<()>>, CommandError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        let stopped = self.stopped.clone();
        Ok(vec![tokio::spawn(async move {
            cancel.cancelled().await;
            stopped.fetch_add(1, Ordering::SeqCst);
        })])
    }
}

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    fn on_topic(&self, topic: &str) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_slice(payload).expect("json payload"))
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CommandError> {
        self.sent.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

fn start_command(ver: i64) -> Vec<u8> {
    json!({
        "start": true,
        "ver": ver,
        "appconfig": {"instid": "opcda@434uyjhgwqe"},
        "devices": {"DEV_12345678": {"tags": [["tag1", "tag1", "uuid", 1, 3, "int16"]]}}
    })
    .to_string()
    .into_bytes()
}

fn assert_result(result: &CommandResult, outcome: &str, reason: &str) {
    assert_eq!(result.result, outcome);
    assert_eq!(result.reason, reason);
}

#[tokio::test]
async fn version_gate_accepts_newer_and_rejects_stale() {
    let launcher = Arc::new(CountingLauncher::default());
    let stopped = launcher.stopped.clone();
    let mut processor = CommandProcessor::new(launcher.clone());

    let result = processor.handle(&start_command(4)).await;
    assert_result(&result, "success", "new version is updated");
    assert_eq!(result.cmd["ver"], json!(4));

    let result = processor.handle(&start_command(5)).await;
    assert_result(&result, "success", "new version is updated");
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
    assert_eq!(stopped.load(Ordering::SeqCst), 1, "old pair stopped before restart");

    let result = processor.handle(&start_command(3)).await;
    assert_result(&result, "failed", "current version 5 is newest");
    let result = processor.handle(&start_command(5)).await;
    assert_result(&result, "failed", "current version 5 is newest");
    assert_eq!(launcher.launched.load(Ordering::SeqCst), 2, "no restart on stale command");
    assert_eq!(processor.applied_version(), 5);
    assert!(processor.is_running());
}

#[tokio::test]
async fn stop_command_is_acknowledged_even_when_idle() {
    let launcher = Arc::new(CountingLauncher::default());
    let stopped = launcher.stopped.clone();
    let mut processor = CommandProcessor::new(launcher);

    let result = processor.handle(br#"{"start": false}"#).await;
    assert_result(&result, "success", "No running simulation to stop");

    processor.handle(&start_command(1)).await;
    let result = processor.handle(br#"{"start": false}"#).await;
    assert_result(&result, "success", "Stopped data simulation and publishing");
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert!(!processor.is_running());

    // 停止不回退版本
    let result = processor.handle(&start_command(1)).await;
    assert!(!result.is_success());
}

#[tokio::test]
async fn malformed_commands_get_failed_results() {
    let mut processor = CommandProcessor::new(Arc::new(CountingLauncher::default()));
    let result = processor.handle(b"{not json").await;
    assert_eq!(result.result, "failed");
    assert_eq!(result.cmd, json!("{not json"));

    let result = processor.handle(br#"{"ver": 2}"#).await;
    assert_eq!(result.result, "failed");
    assert!(result.reason.starts_with("invalid command"));
    assert_eq!(processor.applied_version(), 0);
}

#[tokio::test]
async fn simulated_pair_publishes_to_data_topic() {
    let publisher = Arc::new(RecordingPublisher::default());
    let topics = CommandTopics::for_hardware("1a2b3c4d");
    let pair = SimulatedPair::new(
        publisher.clone(),
        topics.data.clone(),
        Duration::from_millis(20),
        Duration::from_millis(10),
    );
    let mut processor = CommandProcessor::new(Arc::new(pair));

    let result = processor
        .handle(br#"{"start": true, "ver": 1, "devices": {"DEV_X": {"tags": []}}}"#)
        .await;
    assert_eq!(result.result, "failed");
    assert_eq!(processor.applied_version(), 0);

    let result = processor.handle(&start_command(1)).await;
    assert!(result.is_success());

    tokio::time::timeout(Duration::from_secs(2), async {
        while publisher.on_topic(&topics.data).is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("data published");
    processor.shutdown().await;

    let messages = publisher.on_topic(&topics.data);
    let sample = &messages[0]["DEV_12345678"]["tag1"];
    assert!(sample[0].is_string());
    let value = sample[1].as_i64().expect("int16 tag simulated as integer");
    assert!((0..100).contains(&value));
    assert!(sample[2].is_i64());
}

#[tokio::test]
async fn command_loop_publishes_every_result() {
    let publisher = Arc::new(RecordingPublisher::default());
    let topics = CommandTopics::for_hardware("cafe0001");
    let processor = CommandProcessor::new(Arc::new(CountingLauncher::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelHandle::new();
    let task = tokio::spawn(run_command_loop(
        processor,
        rx,
        publisher.clone(),
        topics.clone(),
        cancel.token(),
    ));

    tx.send(start_command(2)).expect("send");
    tx.send(start_command(1)).expect("send");
    tx.send(br#"{"start": false}"#.to_vec()).expect("send");

    tokio::time::timeout(Duration::from_secs(2), async {
        while publisher.on_topic(&topics.result).len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("three results");
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop stops")
        .expect("join");

    let results: Vec<String> = publisher
        .on_topic(&topics.result)
        .iter()
        .map(|result| result["result"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(results, vec!["success", "failed", "success"]);
}
