//! EEG raw view host: simulated headset -> epoching pipeline -> consumers
//!
//! Usage: `eeg-raw [settings.json]`. Logging is controlled with `RUST_LOG`.

use anyhow::Context;
use eeg_core::{PipelineSettings, SettingsChange};
use eeg_processing::{EpochHub, HubConfig, Subscription};
use eeg_simulation::{start_sensor_stream, SimulatorConfig, StreamCommand, StreamConfig};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Interval applied once the stream has been running for a while
const RECONFIGURE_AFTER: Duration = Duration::from_secs(10);
const RECONFIGURED_INTERVAL: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = load_settings(std::env::args().nth(1))?;
    info!(
        channels = settings.nb_channels,
        srate = settings.srate,
        duration = settings.duration,
        interval = settings.interval,
        "starting raw view"
    );

    let stream_config = StreamConfig {
        simulator: SimulatorConfig {
            nb_channels: settings.nb_channels,
            srate: settings.srate,
            ..SimulatorConfig::default()
        },
        ..StreamConfig::default()
    };
    let (samples, control) = start_sensor_stream(stream_config)?;

    let hub = EpochHub::new(samples, settings, HubConfig::raw())?;
    hub.connect().await?;

    let chart = tokio::spawn(chart_consumer(hub.subscribe("chart")?));
    let recorder = tokio::spawn(recorder_consumer(hub.subscribe("recorder")?));

    control.send(StreamCommand::Start).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(RECONFIGURE_AFTER) => {
            let outcome = hub
                .reconfigure(SettingsChange::Interval(RECONFIGURED_INTERVAL))
                .await?;
            info!(?outcome, interval = RECONFIGURED_INTERVAL, "interval changed");
            tokio::signal::ctrl_c().await?;
        }
    }

    info!(stats = ?hub.stats(), "shutting down");
    control.send(StreamCommand::Stop).await?;
    hub.shutdown().await;

    let _ = chart.await;
    let epochs = recorder.await?;
    info!(epochs, "recorder finished");

    Ok(())
}

fn load_settings(path: Option<String>) -> anyhow::Result<PipelineSettings> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading settings file {}", path))?;
            let settings = PipelineSettings::from_json(&json)
                .with_context(|| format!("parsing settings file {}", path))?;
            Ok(settings)
        }
        None => Ok(PipelineSettings::default()),
    }
}

// Stands in for the chart: logs what a plot would draw
async fn chart_consumer(subscription: Subscription) {
    subscription
        .for_each(|epoch| {
            let qualities: Vec<String> = epoch
                .qualities()
                .iter()
                .map(|q| format!("{:.1}", q))
                .collect();
            info!(
                start = epoch.window_start_index,
                seconds = epoch.start_time_secs(),
                samples = epoch.duration(),
                quality = %qualities.join(" "),
                "epoch"
            );
        })
        .await;
}

// Counts epochs and flags channels that look disconnected
async fn recorder_consumer(mut subscription: Subscription) -> u64 {
    let mut epochs = 0;
    loop {
        match subscription.recv().await {
            Ok(epoch) => {
                epochs += 1;
                for (channel, quality) in epoch.qualities().iter().enumerate() {
                    if *quality < 0.5 {
                        warn!(channel, quality, "channel looks flat");
                    }
                }
            }
            Err(eeg_processing::RecvError::Lagged(skipped)) => {
                warn!(skipped, "recorder fell behind");
            }
            Err(eeg_processing::RecvError::Closed) => break,
        }
    }
    epochs
}
