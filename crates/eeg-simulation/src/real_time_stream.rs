//! Real-time sensor stream for live pipelines

use crate::simulator::{SensorSimulator, SimulatorConfig};
use eeg_core::{EegResult, SensorEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for real-time streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub simulator: SimulatorConfig,
    /// Sensor events kept for slow receivers before they lag
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            simulator: SimulatorConfig::default(),
            buffer_size: 8192,
        }
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    /// Pause and rewind every channel to index zero
    Stop,
    Pause,
    Resume,
    UpdateConfig(StreamConfig),
    /// Emit a device failure event
    InjectFault(String),
}

/// Totals reported when the stream ends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub packets_sent: u64,
    pub samples_sent: u64,
    pub faults_injected: u64,
}

/// Paces simulator packets onto a broadcast channel in real time.
///
/// Each tick sends one packet from every channel, so ticks are one packet
/// duration apart.
pub struct RealTimeSensorStream {
    config: StreamConfig,
    simulator: SensorSimulator,
    data_sender: broadcast::Sender<SensorEvent>,
    control_receiver: mpsc::Receiver<StreamCommand>,
    stats: StreamStats,
}

impl RealTimeSensorStream {
    /// Create the stream and its control handle. `run` returns once every
    /// clone of the handle is dropped.
    pub fn new(config: StreamConfig) -> EegResult<(Self, mpsc::Sender<StreamCommand>)> {
        let simulator = SensorSimulator::new(config.simulator.clone())?;
        let (data_sender, _) = broadcast::channel(config.buffer_size.max(1));
        let (control_sender, control_receiver) = mpsc::channel(32);

        let stream = RealTimeSensorStream {
            config,
            simulator,
            data_sender,
            control_receiver,
            stats: StreamStats::default(),
        };
        Ok((stream, control_sender))
    }

    /// Sender side of the sample stream; `subscribe` on it for a receiver
    pub fn sender(&self) -> broadcast::Sender<SensorEvent> {
        self.data_sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.data_sender.subscribe()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Run until every control handle is dropped
    pub async fn run(&mut self) -> EegResult<StreamStats> {
        let mut ticker = self.ticker();

        info!(
            channels = self.config.simulator.nb_channels,
            srate = self.config.simulator.srate,
            packet = self.config.simulator.packet_size,
            "sensor stream ready"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.stats.is_running {
                        self.send_round();
                    }
                }

                command = self.control_receiver.recv() => {
                    match command {
                        Some(StreamCommand::Start) | Some(StreamCommand::Resume) => {
                            self.stats.is_running = true;
                            info!("sensor stream running");
                        }
                        Some(StreamCommand::Pause) => {
                            self.stats.is_running = false;
                            info!("sensor stream paused");
                        }
                        Some(StreamCommand::Stop) => {
                            self.stats.is_running = false;
                            self.simulator.reset_time();
                            info!("sensor stream stopped");
                        }
                        Some(StreamCommand::UpdateConfig(config)) => {
                            self.simulator.update_config(config.simulator.clone())?;
                            self.config = config;
                            ticker = self.ticker();
                            info!(
                                channels = self.config.simulator.nb_channels,
                                srate = self.config.simulator.srate,
                                "sensor stream reconfigured"
                            );
                        }
                        Some(StreamCommand::InjectFault(reason)) => {
                            warn!(%reason, "injecting sensor fault");
                            self.stats.faults_injected += 1;
                            let _ = self.data_sender.send(SensorEvent::Fault { reason });
                        }
                        None => {
                            debug!("sensor stream control channel closed");
                            break;
                        }
                    }
                }
            }
        }

        self.stats.is_running = false;
        Ok(self.stats.clone())
    }

    fn ticker(&self) -> Interval {
        let period = Duration::from_secs_f32(self.config.simulator.packet_seconds());
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn send_round(&mut self) {
        let events = self.simulator.next_round();
        self.stats.packets_sent += self.config.simulator.nb_channels as u64;
        self.stats.samples_sent += events.len() as u64;

        for event in events {
            // Nobody listening is fine
            let _ = self.data_sender.send(event);
        }
    }
}

/// Create a stream and run it on a background task
pub fn start_sensor_stream(
    config: StreamConfig,
) -> EegResult<(broadcast::Sender<SensorEvent>, mpsc::Sender<StreamCommand>)> {
    let (mut stream, control_sender) = RealTimeSensorStream::new(config)?;
    let data_sender = stream.sender();

    tokio::spawn(async move {
        match stream.run().await {
            Ok(stats) => info!(
                packets = stats.packets_sent,
                samples = stats.samples_sent,
                "sensor stream finished"
            ),
            Err(e) => warn!(error = %e, "sensor stream error"),
        }
    });

    Ok((data_sender, control_sender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            simulator: SimulatorConfig {
                nb_channels: 2,
                srate: 512,
                seed: Some(1),
                ..SimulatorConfig::default()
            },
            ..StreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_stream_delivers_packets() {
        let (sender, control) = start_sensor_stream(fast_config()).unwrap();
        let mut receiver = sender.subscribe();
        control.send(StreamCommand::Start).await.unwrap();

        let mut per_channel = [0u64; 2];
        let collected = timeout(Duration::from_secs(5), async {
            while per_channel.iter().sum::<u64>() < 48 {
                if let Ok(SensorEvent::Sample(sample)) = receiver.recv().await {
                    assert_eq!(sample.index, per_channel[sample.channel]);
                    per_channel[sample.channel] += 1;
                }
            }
        })
        .await;

        assert!(collected.is_ok(), "stream produced too little data");
        control.send(StreamCommand::Stop).await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_is_idle_until_started() {
        let (sender, _control) = start_sensor_stream(fast_config()).unwrap();
        let mut receiver = sender.subscribe();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_inject_fault() {
        let (sender, control) = start_sensor_stream(fast_config()).unwrap();
        let mut receiver = sender.subscribe();
        control
            .send(StreamCommand::InjectFault("battery low".into()))
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SensorEvent::Fault {
                reason: "battery low".into()
            }
        );
    }

    #[tokio::test]
    async fn test_run_returns_stats_when_controls_drop() {
        let (mut stream, control) = RealTimeSensorStream::new(fast_config()).unwrap();
        let task = tokio::spawn(async move { stream.run().await });

        control.send(StreamCommand::Start).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        drop(control);

        let stats = timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!stats.is_running);
        assert!(stats.packets_sent >= 2);
        assert_eq!(stats.samples_sent, stats.packets_sent * 12);
    }
}
