//! Topology manager and multicast hub
//!
//! The hub owns the one active pipeline instance of a logical pipeline, drives
//! it from the sensor stream on a producer task and broadcasts every epoch to
//! all subscribers.
//!
//! Every started production run gets a new generation number. Subscribers are
//! attached to exactly one generation at a time and drop anything else, so a
//! rebuild can never leak epochs of the old instance to a consumer once it has
//! returned.

use crate::config::HubConfig;
use crate::pipeline::PipelineInstance;
use eeg_core::{EegError, EegResult, Epoch, PipelineSettings, SensorEvent, SettingsChange};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

// Generation meaning "no instance attached"
const DETACHED: u64 = 0;

/// The sensor collaborator as seen by the hub.
///
/// Every connect opens a fresh receiver, so a rebuilt instance only sees
/// samples that arrive after it was started.
pub trait SampleSource: Send + Sync + 'static {
    fn open(&self) -> broadcast::Receiver<SensorEvent>;
}

impl SampleSource for broadcast::Sender<SensorEvent> {
    fn open(&self) -> broadcast::Receiver<SensorEvent> {
        self.subscribe()
    }
}

/// Holding a receiver instead of the sender lets the stream close once the
/// device side drops every sender.
impl SampleSource for broadcast::Receiver<SensorEvent> {
    fn open(&self) -> broadcast::Receiver<SensorEvent> {
        self.resubscribe()
    }
}

/// Lifecycle state, published on a watch channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum HubStatus {
    /// Instance built, production not started
    Idle { instance: Uuid },
    /// Producer task running
    Running { instance: Uuid, generation: u64 },
    /// Old instance torn down, replacement not yet running
    Rebuilding,
    /// Production stopped on an upstream fault; needs `connect` or `rebuild`
    Faulted { instance: Uuid, reason: String },
    /// The sensor stream ended
    SourceClosed { instance: Uuid },
    /// Hub shut down
    Stopped,
}

/// Result of a `rebuild` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The new instance is running and consumers are attached to it
    Applied { instance: Uuid },
    /// A newer rebuild request arrived first; nothing from this one was started
    Superseded,
}

/// Errors seen by a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The subscriber fell behind the broadcast buffer and missed epochs
    #[error("subscriber lagged behind, {0} epochs skipped")]
    Lagged(u64),
    /// The hub was shut down
    #[error("hub closed")]
    Closed,
}

/// Snapshot of hub counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubStats {
    pub samples_consumed: u64,
    pub epochs_emitted: u64,
    pub rebuilds: u64,
    pub superseded_rebuilds: u64,
    pub faults: u64,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
struct HubCounters {
    samples_consumed: AtomicU64,
    epochs_emitted: AtomicU64,
    rebuilds: AtomicU64,
    superseded_rebuilds: AtomicU64,
    faults: AtomicU64,
}

#[derive(Debug, Clone)]
struct EpochDelivery {
    generation: u64,
    epoch: Arc<Epoch>,
}

type Registry = Arc<SyncMutex<HashMap<Uuid, String>>>;

struct Production {
    generation: u64,
    instance: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct HubState {
    settings: PipelineSettings,
    // Built but not yet connected
    staged: Option<PipelineInstance>,
    production: Option<Production>,
    shut_down: bool,
}

/// Topology manager and multicast point for one logical pipeline
pub struct EpochHub {
    config: HubConfig,
    source: Arc<dyn SampleSource>,
    state: Mutex<HubState>,
    epochs: SyncMutex<Option<broadcast::Sender<EpochDelivery>>>,
    attached: Arc<AtomicU64>,
    next_generation: AtomicU64,
    latest_ticket: AtomicU64,
    status: Arc<watch::Sender<HubStatus>>,
    counters: Arc<HubCounters>,
    registry: Registry,
}

impl EpochHub {
    /// Create the hub and build its first instance without starting it
    pub fn new<S: SampleSource>(
        source: S,
        settings: PipelineSettings,
        config: HubConfig,
    ) -> EegResult<Self> {
        config.validate()?;
        let instance = PipelineInstance::build(&settings)?;

        let (epochs, _) = broadcast::channel(config.broadcast_capacity);
        let (status, _) = watch::channel(HubStatus::Idle {
            instance: instance.id(),
        });

        info!(pipeline = %config.name, instance = %instance.id(), "hub created");

        Ok(EpochHub {
            config,
            source: Arc::new(source),
            state: Mutex::new(HubState {
                settings,
                staged: Some(instance),
                production: None,
                shut_down: false,
            }),
            epochs: SyncMutex::new(Some(epochs)),
            attached: Arc::new(AtomicU64::new(DETACHED)),
            next_generation: AtomicU64::new(DETACHED),
            latest_ticket: AtomicU64::new(0),
            status: Arc::new(status),
            counters: Arc::new(HubCounters::default()),
            registry: Arc::new(SyncMutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Settings of the current (or most recently built) instance
    pub async fn settings(&self) -> PipelineSettings {
        self.state.lock().await.settings.clone()
    }

    pub fn status(&self) -> HubStatus {
        self.status.borrow().clone()
    }

    /// Side channel for lifecycle changes, including upstream faults
    pub fn watch_status(&self) -> watch::Receiver<HubStatus> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            samples_consumed: self.counters.samples_consumed.load(Ordering::Relaxed),
            epochs_emitted: self.counters.epochs_emitted.load(Ordering::Relaxed),
            rebuilds: self.counters.rebuilds.load(Ordering::Relaxed),
            superseded_rebuilds: self.counters.superseded_rebuilds.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Names of the registered consumers
    pub fn subscribers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().values().cloned().collect();
        names.sort();
        names
    }

    /// True while a producer task is running
    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state
            .production
            .as_ref()
            .is_some_and(|production| self.is_live(production))
    }

    /// Start production, whether or not anyone is subscribed.
    ///
    /// No-op while already producing. After a fault or a closed source the
    /// instance is rebuilt from the current settings.
    pub async fn connect(&self) -> EegResult<()> {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Err(EegError::HubClosed);
        }

        if let Some(production) = &state.production {
            if self.is_live(production) {
                debug!(pipeline = %self.config.name, "already connected");
                return Ok(());
            }
        }

        // Collect a run that ended on its own
        self.stop_production(&mut state).await;

        let instance = match state.staged.take() {
            Some(instance) => instance,
            None => PipelineInstance::build(&state.settings)?,
        };
        self.start_production(&mut state, instance)?;

        Ok(())
    }

    /// Register a consumer; it receives every epoch emitted from now on
    pub fn subscribe(&self, consumer: &str) -> EegResult<Subscription> {
        let receiver = self
            .epochs
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(EegError::HubClosed)?;

        let id = Uuid::new_v4();
        self.registry.lock().insert(id, consumer.to_string());
        info!(pipeline = %self.config.name, consumer, subscription = %id, "subscribed");

        Ok(Subscription {
            id,
            consumer: consumer.to_string(),
            receiver,
            attached: Arc::clone(&self.attached),
            registry: Arc::clone(&self.registry),
        })
    }

    /// Detach a consumer. Production keeps running.
    pub fn release(&self, subscription: Subscription) {
        subscription.release();
    }

    /// Replace the running instance with one built from `settings`.
    ///
    /// Invalid settings fail with `InvalidConfig` before anything is torn
    /// down. Otherwise consumers are detached, the old producer is stopped and
    /// joined, the new instance is built, consumers are re-attached and the
    /// new producer is started, all under the hub lock. When calls race, only
    /// the newest settings are applied; older calls return `Superseded`.
    pub async fn rebuild(&self, settings: PipelineSettings) -> EegResult<RebuildOutcome> {
        settings.validate()?;
        let ticket = self.draw_ticket();

        let mut state = self.state.lock().await;
        self.rebuild_locked(&mut state, settings, ticket).await
    }

    /// Rebuild with one field of the current settings changed.
    ///
    /// The change is applied to the settings under the hub lock, so concurrent
    /// changes to different fields all take effect.
    pub async fn reconfigure(&self, change: SettingsChange) -> EegResult<RebuildOutcome> {
        let mut state = self.state.lock().await;
        let next = state.settings.apply(change);
        next.validate()?;
        let ticket = self.draw_ticket();

        self.rebuild_locked(&mut state, next, ticket).await
    }

    async fn rebuild_locked(
        &self,
        state: &mut HubState,
        settings: PipelineSettings,
        ticket: u64,
    ) -> EegResult<RebuildOutcome> {
        if state.shut_down {
            return Err(EegError::HubClosed);
        }
        if self.is_superseded(ticket) {
            return Ok(self.superseded(ticket));
        }

        self.attached.store(DETACHED, Ordering::SeqCst);
        self.stop_production(state).await;
        state.staged = None;
        self.status.send_replace(HubStatus::Rebuilding);

        let instance = PipelineInstance::build(&settings)?;
        if self.is_superseded(ticket) {
            return Ok(self.superseded(ticket));
        }
        state.settings = settings;

        let instance_id = instance.id();
        let generation = self.start_production(state, instance)?;

        self.counters.rebuilds.fetch_add(1, Ordering::Relaxed);
        info!(
            pipeline = %self.config.name,
            instance = %instance_id,
            generation,
            subscribers = self.subscriber_count(),
            "pipeline rebuilt"
        );

        Ok(RebuildOutcome::Applied {
            instance: instance_id,
        })
    }

    /// Stop production for good and close every subscription
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }

        self.attached.store(DETACHED, Ordering::SeqCst);
        self.stop_production(&mut state).await;
        state.staged = None;
        state.shut_down = true;

        self.epochs.lock().take();
        self.status.send_replace(HubStatus::Stopped);
        info!(pipeline = %self.config.name, "hub shut down");
    }

    fn is_live(&self, production: &Production) -> bool {
        !production.handle.is_finished()
            && matches!(
                &*self.status.borrow(),
                HubStatus::Running { generation, .. } if *generation == production.generation
            )
    }

    fn draw_ticket(&self) -> u64 {
        self.latest_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_superseded(&self, ticket: u64) -> bool {
        ticket != self.latest_ticket.load(Ordering::SeqCst)
    }

    fn superseded(&self, ticket: u64) -> RebuildOutcome {
        self.counters.superseded_rebuilds.fetch_add(1, Ordering::Relaxed);
        info!(pipeline = %self.config.name, ticket, "rebuild superseded by newer settings");
        RebuildOutcome::Superseded
    }

    fn start_production(
        &self,
        state: &mut HubState,
        instance: PipelineInstance,
    ) -> EegResult<u64> {
        let epochs = self.epochs.lock().clone().ok_or(EegError::HubClosed)?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let instance_id = instance.id();
        let cancel = CancellationToken::new();

        self.status.send_replace(HubStatus::Running {
            instance: instance_id,
            generation,
        });

        let producer = Producer {
            pipeline: self.config.name.clone(),
            samples: self.source.open(),
            instance,
            epochs,
            generation,
            cancel: cancel.clone(),
            status: Arc::clone(&self.status),
            counters: Arc::clone(&self.counters),
        };
        // Attach consumers before the first epoch can exist
        self.attached.store(generation, Ordering::SeqCst);
        let handle = tokio::spawn(producer.run());

        state.production = Some(Production {
            generation,
            instance: instance_id,
            cancel,
            handle,
        });

        info!(pipeline = %self.config.name, instance = %instance_id, generation, "production started");
        Ok(generation)
    }

    // Cancel the producer and wait until it can no longer broadcast
    async fn stop_production(&self, state: &mut HubState) {
        if let Some(production) = state.production.take() {
            production.cancel.cancel();
            if let Err(err) = production.handle.await {
                warn!(pipeline = %self.config.name, error = %err, "producer task failed");
            }
            debug!(
                pipeline = %self.config.name,
                instance = %production.instance,
                generation = production.generation,
                "production stopped"
            );
        }
    }
}

impl Drop for EpochHub {
    fn drop(&mut self) {
        if let Some(production) = self.state.get_mut().production.take() {
            production.cancel.cancel();
        }
    }
}

enum ProducerExit {
    Cancelled,
    Faulted(EegError),
    SourceClosed,
}

/// Drives one pipeline instance from the sensor stream
struct Producer {
    pipeline: String,
    samples: broadcast::Receiver<SensorEvent>,
    instance: PipelineInstance,
    epochs: broadcast::Sender<EpochDelivery>,
    generation: u64,
    cancel: CancellationToken,
    status: Arc<watch::Sender<HubStatus>>,
    counters: Arc<HubCounters>,
}

impl Producer {
    async fn run(mut self) {
        let exit = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break ProducerExit::Cancelled,

                event = self.samples.recv() => match event {
                    Ok(event) => {
                        self.counters.samples_consumed.fetch_add(1, Ordering::Relaxed);
                        match self.instance.feed(event) {
                            Ok(Some(epoch)) => self.deliver(epoch),
                            Ok(None) => {}
                            Err(err) => break ProducerExit::Faulted(err),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        break ProducerExit::Faulted(EegError::upstream_fault(format!(
                            "sensor stream overran the pipeline, {} events lost",
                            missed
                        )));
                    }
                    Err(broadcast::error::RecvError::Closed) => break ProducerExit::SourceClosed,
                },
            }
        };

        let instance = self.instance.id();
        match exit {
            ProducerExit::Cancelled => {
                debug!(pipeline = %self.pipeline, %instance, "producer cancelled");
            }
            ProducerExit::Faulted(err) => {
                self.counters.faults.fetch_add(1, Ordering::Relaxed);
                error!(
                    pipeline = %self.pipeline,
                    %instance,
                    error = %err,
                    "upstream fault, production stopped"
                );
                self.status.send_replace(HubStatus::Faulted {
                    instance,
                    reason: err.to_string(),
                });
            }
            ProducerExit::SourceClosed => {
                info!(pipeline = %self.pipeline, %instance, "sensor stream closed");
                self.status.send_replace(HubStatus::SourceClosed { instance });
            }
        }
    }

    fn deliver(&self, epoch: Epoch) {
        let start = epoch.window_start_index;
        let delivery = EpochDelivery {
            generation: self.generation,
            epoch: Arc::new(epoch),
        };

        // No receivers is fine; production does not depend on subscribers
        let receivers = self.epochs.send(delivery).unwrap_or(0);
        self.counters.epochs_emitted.fetch_add(1, Ordering::Relaxed);
        trace!(generation = self.generation, start, receivers, "epoch broadcast");
    }
}

/// A consumer's handle on the hub's epoch broadcast.
///
/// Survives rebuilds: it follows whichever instance the hub currently has
/// attached. Dropping it releases it.
pub struct Subscription {
    id: Uuid,
    consumer: String,
    receiver: broadcast::Receiver<EpochDelivery>,
    attached: Arc<AtomicU64>,
    registry: Registry,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    fn accepts(&self, delivery: &EpochDelivery) -> bool {
        let attached = self.attached.load(Ordering::SeqCst);
        attached != DETACHED && delivery.generation == attached
    }

    /// Wait for the next epoch of the attached instance
    pub async fn recv(&mut self) -> Result<Arc<Epoch>, RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(delivery) if self.accepts(&delivery) => return Ok(delivery.epoch),
                Ok(delivery) => {
                    trace!(
                        consumer = %self.consumer,
                        generation = delivery.generation,
                        "dropping epoch of detached instance"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(consumer = %self.consumer, skipped, "subscriber lagged");
                    return Err(RecvError::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return Err(RecvError::Closed),
            }
        }
    }

    /// Next queued epoch, if any, without waiting
    pub fn try_recv(&mut self) -> Result<Option<Arc<Epoch>>, RecvError> {
        loop {
            match self.receiver.try_recv() {
                Ok(delivery) if self.accepts(&delivery) => return Ok(Some(delivery.epoch)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(RecvError::Lagged(skipped))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(RecvError::Closed),
            }
        }
    }

    /// Call `consumer` with every epoch until the hub shuts down
    pub async fn for_each<F>(mut self, mut consumer: F)
    where
        F: FnMut(Arc<Epoch>),
    {
        loop {
            match self.recv().await {
                Ok(epoch) => consumer(epoch),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Detach from the hub
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.lock().remove(&self.id).is_some() {
            debug!(consumer = %self.consumer, subscription = %self.id, "subscription released");
        }
    }
}
