// In-process transport simulating the broker and the remote power monitor
//
// Stands in for a real pub/sub client during development and tests: the
// "device" publishes frames in the exact wire format on the sensor topic
// and honours ON/OFF publishes on the command topic by flipping its relay,
// which shows up in subsequent frames. No reconnect policy: a refused
// connect attempt is reported once and left alone, like the real contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::application::transport::{Transport, TransportEvent};
use crate::error::MonitorError;
use crate::infrastructure::config::MonitorConfig;

pub struct SimulatedDeviceTransport {
    host: String,
    port: u16,
    keepalive_secs: u64,
    sensor_topic: String,
    command_topic: String,
    frame_interval: Duration,
    connect_code: i32,
    relay_on: Arc<AtomicBool>,
    subscribed: Arc<AtomicBool>,
    connected: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    emitter: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDeviceTransport {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            host: config.broker.host.clone(),
            port: config.broker.port,
            keepalive_secs: config.broker.keepalive_secs,
            sensor_topic: config.topics.sensors.clone(),
            command_topic: config.topics.commands.clone(),
            frame_interval: Duration::from_secs(1),
            connect_code: 0,
            relay_on: Arc::new(AtomicBool::new(false)),
            subscribed: Arc::new(AtomicBool::new(false)),
            connected: Mutex::new(None),
            emitter: Mutex::new(None),
        }
    }

    /// Emit frames faster or slower than the default one per second.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Refuse connect attempts with the given non-zero result code.
    pub fn with_connect_code(mut self, code: i32) -> Self {
        self.connect_code = code;
        self
    }
}

#[async_trait]
impl Transport for SimulatedDeviceTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, MonitorError> {
        tracing::debug!(
            "simulated broker at {}:{} (keepalive {}s)",
            self.host,
            self.port,
            self.keepalive_secs
        );
        let (tx, rx) = mpsc::channel(64);
        tx.send(TransportEvent::Connected {
            code: self.connect_code,
        })
        .await
        .map_err(|_| MonitorError::Transport("event channel closed".into()))?;

        if self.connect_code == 0 {
            *lock(&self.connected) = Some(tx.clone());
            let task = tokio::spawn(emit_frames(
                tx,
                self.sensor_topic.clone(),
                self.frame_interval,
                Arc::clone(&self.relay_on),
                Arc::clone(&self.subscribed),
            ));
            if let Some(previous) = lock(&self.emitter).replace(task) {
                previous.abort();
            }
        }
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MonitorError> {
        if topic == self.sensor_topic {
            self.subscribed.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), MonitorError> {
        if lock(&self.connected).is_none() {
            return Err(MonitorError::Transport("not connected".into()));
        }
        if topic == self.command_topic {
            match payload {
                b"ON" => self.relay_on.store(true, Ordering::Relaxed),
                b"OFF" => self.relay_on.store(false, Ordering::Relaxed),
                other => tracing::warn!(
                    "simulated device ignoring command {:?}",
                    String::from_utf8_lossy(other)
                ),
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MonitorError> {
        if let Some(task) = lock(&self.emitter).take() {
            task.abort();
        }
        let sender = lock(&self.connected).take();
        if let Some(tx) = sender {
            let _ = tx.send(TransportEvent::Disconnected { code: 0 }).await;
        }
        Ok(())
    }
}

async fn emit_frames(
    tx: mpsc::Sender<TransportEvent>,
    topic: String,
    interval: Duration,
    relay_on: Arc<AtomicBool>,
    subscribed: Arc<AtomicBool>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        if !subscribed.load(Ordering::Relaxed) {
            continue;
        }
        let frame = synth_frame(relay_on.load(Ordering::Relaxed));
        let event = TransportEvent::Message {
            topic: topic.clone(),
            payload: Bytes::from(frame),
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

fn synth_frame(relay_on: bool) -> String {
    let mut rng = rand::thread_rng();
    let voltage: f64 = rng.gen_range(228.0..232.0);
    let current: f64 = if relay_on {
        rng.gen_range(0.8..1.6)
    } else {
        rng.gen_range(0.0..0.05)
    };
    let power = voltage * current;
    let temperature: f64 = rng.gen_range(31.0..39.8);
    let relay = if relay_on { "ON" } else { "OFF" };
    let safety = if temperature > 39.0 { "OVERTEMP" } else { "NORMAL" };
    format!("V,{voltage:.1},A,{current:.3},P,{power:.1},T,{temperature:.1},R,{relay},S,{safety}")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
