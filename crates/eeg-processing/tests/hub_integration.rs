//! Simulated headset driving the hub end to end

use eeg_core::{PipelineSettings, SensorEvent, SettingsChange};
use eeg_processing::{EpochHub, HubConfig, HubStatus, RebuildOutcome};
use eeg_simulation::{
    start_sensor_stream, EegPattern, SensorSimulator, SimulatorConfig, StreamCommand,
    StreamConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn settings() -> PipelineSettings {
    PipelineSettings {
        nb_channels: 4,
        srate: 256,
        duration: 256,
        interval: 128,
        ..PipelineSettings::default()
    }
}

fn simulator(pattern: EegPattern) -> SensorSimulator {
    SensorSimulator::new(SimulatorConfig {
        nb_channels: 4,
        srate: 256,
        pattern,
        noise_std: 1.0,
        seed: Some(11),
        ..SimulatorConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_packetized_stream_produces_epochs() {
    let (source, _) = broadcast::channel::<SensorEvent>(1 << 16);
    let hub = EpochHub::new(source.clone(), settings(), HubConfig::raw()).unwrap();
    hub.connect().await.unwrap();
    let mut chart = hub.subscribe("chart").unwrap();

    let mut sensor = simulator(EegPattern::Rhythm {
        frequency: 10.0,
        amplitude: 20.0,
    });
    for event in sensor.generate(1024) {
        source.send(event).unwrap();
    }

    let mut starts = Vec::new();
    for _ in 0..7 {
        let epoch = timeout(Duration::from_secs(5), chart.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(epoch.channel_count(), 4);
        assert_eq!(epoch.duration(), 256);
        assert_eq!(epoch.sampling_rate, 256);
        for quality in epoch.qualities() {
            assert!(quality > 5.0, "alpha channel quality {}", quality);
        }
        starts.push(epoch.window_start_index);
    }

    assert_eq!(starts, vec![0, 128, 256, 384, 512, 640, 768]);
    assert_eq!(hub.stats().samples_consumed, 4096);
}

#[tokio::test]
async fn test_flat_channels_score_near_zero() {
    let (source, _) = broadcast::channel::<SensorEvent>(1 << 16);
    let hub = EpochHub::new(source.clone(), settings(), HubConfig::raw()).unwrap();
    hub.connect().await.unwrap();
    let mut recorder = hub.subscribe("recorder").unwrap();

    let mut sensor = SensorSimulator::new(SimulatorConfig {
        nb_channels: 4,
        srate: 256,
        pattern: EegPattern::Flat { level: 50.0 },
        noise_std: 0.0,
        line_frequency: None,
        seed: Some(3),
        ..SimulatorConfig::default()
    })
    .unwrap();
    for event in sensor.generate(1024) {
        source.send(event).unwrap();
    }

    let mut last = None;
    for _ in 0..7 {
        last = Some(recorder.recv().await.unwrap());
    }

    // The filter transient has died out by the last window
    let last = last.unwrap();
    assert_eq!(last.window_start_index, 768);
    for quality in last.qualities() {
        assert!(quality < 0.5, "flat channel quality {}", quality);
    }
}

#[tokio::test]
async fn test_live_stream_with_reconfiguration() {
    let stream_config = StreamConfig {
        simulator: SimulatorConfig {
            nb_channels: 2,
            srate: 256,
            seed: Some(5),
            ..SimulatorConfig::default()
        },
        ..StreamConfig::default()
    };
    let (samples, control) = start_sensor_stream(stream_config).unwrap();

    let live = PipelineSettings {
        nb_channels: 2,
        duration: 64,
        interval: 64,
        ..PipelineSettings::default()
    };
    let hub = EpochHub::new(samples, live, HubConfig::raw()).unwrap();
    hub.connect().await.unwrap();
    let mut chart = hub.subscribe("chart").unwrap();
    let mut recorder = hub.subscribe("recorder").unwrap();

    control.send(StreamCommand::Start).await.unwrap();

    for _ in 0..2 {
        let a = timeout(Duration::from_secs(5), chart.recv())
            .await
            .unwrap()
            .unwrap();
        let b = timeout(Duration::from_secs(5), recorder.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.duration(), 64);
    }

    let outcome = hub.reconfigure(SettingsChange::Duration(32)).await.unwrap();
    assert!(matches!(outcome, RebuildOutcome::Applied { .. }));

    let first = timeout(Duration::from_secs(5), chart.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.duration(), 32);
    assert_eq!(first.window_start_index, 0);

    control.send(StreamCommand::Stop).await.unwrap();
    hub.shutdown().await;
}

#[tokio::test]
async fn test_injected_fault_reaches_status() {
    let stream_config = StreamConfig {
        simulator: SimulatorConfig {
            nb_channels: 2,
            srate: 256,
            seed: Some(9),
            ..SimulatorConfig::default()
        },
        ..StreamConfig::default()
    };
    let (samples, control) = start_sensor_stream(stream_config).unwrap();

    let hub = EpochHub::new(
        samples,
        PipelineSettings {
            nb_channels: 2,
            ..PipelineSettings::default()
        },
        HubConfig::raw(),
    )
    .unwrap();
    let mut status = hub.watch_status();
    hub.connect().await.unwrap();

    control
        .send(StreamCommand::InjectFault("headset disconnected".into()))
        .await
        .unwrap();

    let faulted = timeout(
        Duration::from_secs(5),
        status.wait_for(|s| matches!(s, HubStatus::Faulted { .. })),
    )
    .await
    .unwrap()
    .map(|s| s.clone())
    .unwrap();

    match faulted {
        HubStatus::Faulted { reason, .. } => assert!(reason.contains("headset disconnected")),
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(hub.stats().faults, 1);
}
