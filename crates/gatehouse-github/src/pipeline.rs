//! Event intake pipeline.
//!
//! Webhook deliveries are acknowledged long before they are understood.
//! The web layer enqueues the raw body, a dispatcher fans deliveries out
//! to a bounded pool of processors, and a forwarder hands finished events
//! to the sink in the exact order the deliveries arrived, however long
//! each one took to process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use github_app_sdk::{InstallationId, InstallationRegistry};

use crate::error::ConnectionError;
use crate::events::mapper::EventMapper;
use crate::events::{EventContext, PullRequestTarget, TriggerEvent};

/// Upper bound on concurrently running processors across all installations.
const MAX_CONCURRENT_PROCESSORS: usize = 32;

/// A webhook delivery exactly as it arrived.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub delivery_id: String,
    pub event_type: String,
    pub body: Bytes,
    pub received_at: DateTime<Utc>,
}

/// Destination for fully mapped events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: TriggerEvent);
}

/// Refreshes a cached change before its event is forwarded, so the event
/// lands downstream with current change data behind it.
#[async_trait]
pub trait ChangeRefresher: Send + Sync {
    async fn refresh(&self, target: &PullRequestTarget) -> Result<(), ConnectionError>;
}

/// The intake queue and its two worker tasks.
///
/// The dispatcher pops deliveries and spawns one processor per delivery,
/// pushing the join handles into the forward queue as it goes. The
/// forwarder awaits those handles in queue order, which makes delivery
/// order to the sink equal receipt order regardless of completion order.
pub struct EventPipeline {
    intake: Mutex<Option<mpsc::UnboundedSender<RawEvent>>>,
    queued: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl EventPipeline {
    /// Start the dispatcher and forwarder tasks.
    pub fn start(
        mapper: EventMapper,
        refresher: Arc<dyn ChangeRefresher>,
        installations: Option<Arc<InstallationRegistry>>,
        sink: Arc<dyn EventSink>,
        max_threads_per_installation: usize,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (forward_tx, forward_rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let queued = Arc::new(AtomicUsize::new(0));

        let processor = Arc::new(EventProcessor {
            mapper,
            refresher,
            installations,
            limits: InstallationLimits::new(max_threads_per_installation),
            stopped: Arc::clone(&stopped),
        });

        let dispatcher = tokio::spawn(run_dispatcher(
            intake_rx,
            forward_tx,
            processor,
            Arc::clone(&stopped),
            Arc::clone(&queued),
        ));
        let forwarder = tokio::spawn(run_forwarder(forward_rx, sink, Arc::clone(&stopped)));

        Self {
            intake: Mutex::new(Some(intake_tx)),
            queued,
            stopped,
            dispatcher: Mutex::new(Some(dispatcher)),
            forwarder: Mutex::new(Some(forwarder)),
        }
    }

    /// Queue one delivery for processing.
    pub async fn enqueue(&self, raw: RawEvent) -> Result<(), ConnectionError> {
        let intake = self.intake.lock().await;
        let Some(sender) = intake.as_ref() else {
            return Err(ConnectionError::Stopped);
        };
        sender.send(raw).map_err(|_| ConnectionError::Stopped)?;
        self.queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Deliveries accepted but not yet dispatched.
    pub fn queue_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Stop accepting deliveries and wind the worker tasks down.
    ///
    /// Already-dispatched processors finish on their own; their results
    /// are discarded once the flag is set.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.intake.lock().await.take();

        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "event dispatcher task failed");
            }
        }
        if let Some(handle) = self.forwarder.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "event forwarder task failed");
            }
        }
    }
}

async fn run_dispatcher(
    mut intake: mpsc::UnboundedReceiver<RawEvent>,
    forward: mpsc::UnboundedSender<JoinHandle<Option<TriggerEvent>>>,
    processor: Arc<EventProcessor>,
    stopped: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
) {
    let pool = Arc::new(Semaphore::new(MAX_CONCURRENT_PROCESSORS));
    while let Some(raw) = intake.recv().await {
        queued.fetch_sub(1, Ordering::SeqCst);
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        debug!(
            delivery = %raw.delivery_id,
            queued = queued.load(Ordering::SeqCst),
            "dispatching webhook event"
        );
        let pool = Arc::clone(&pool);
        let processor = Arc::clone(&processor);
        let handle = tokio::spawn(async move {
            // Acquired inside the task: handles must reach the forward
            // queue in receipt order even while the pool is full.
            let Ok(_permit) = pool.acquire_owned().await else {
                return None;
            };
            processor.process(raw).await
        });
        if forward.send(handle).is_err() {
            break;
        }
    }
}

async fn run_forwarder(
    mut forward: mpsc::UnboundedReceiver<JoinHandle<Option<TriggerEvent>>>,
    sink: Arc<dyn EventSink>,
    stopped: Arc<AtomicBool>,
) {
    while let Some(handle) = forward.recv().await {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        match handle.await {
            Ok(Some(event)) => {
                debug!(
                    delivery = %event.delivery_id(),
                    kind = event.kind(),
                    project = event.project(),
                    "forwarding event"
                );
                sink.deliver(event).await;
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "event processor task failed"),
        }
    }
}

/// Turns one raw delivery into at most one trigger event.
struct EventProcessor {
    mapper: EventMapper,
    refresher: Arc<dyn ChangeRefresher>,
    installations: Option<Arc<InstallationRegistry>>,
    limits: InstallationLimits,
    stopped: Arc<AtomicBool>,
}

impl EventProcessor {
    async fn process(&self, raw: RawEvent) -> Option<TriggerEvent> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        let body: Value = match serde_json::from_slice(&raw.body) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    delivery = %raw.delivery_id,
                    error = %e,
                    "discarding webhook body that is not valid JSON"
                );
                return None;
            }
        };

        // Payloads name the covering installation; fold that into the map
        // before any API traffic for this delivery.
        let installation_id = body
            .get("installation")
            .and_then(|installation| installation.get("id"))
            .and_then(Value::as_u64);
        let project = body
            .get("repository")
            .and_then(|repository| repository.get("full_name"))
            .and_then(Value::as_str);
        if let (Some(id), Some(project), Some(registry)) =
            (installation_id, project, self.installations.as_ref())
        {
            registry
                .record_project(project, InstallationId::new(id))
                .await;
        }

        debug!(
            delivery = %raw.delivery_id,
            event = %raw.event_type,
            "handling webhook event"
        );
        let context = EventContext::new(raw.delivery_id.clone(), raw.received_at);
        let event = match self.mapper.map(&raw.event_type, &body, context).await {
            Ok(Some(event)) => event,
            Ok(None) => return None,
            Err(e) => {
                error!(
                    delivery = %raw.delivery_id,
                    error = %e,
                    "failed to process webhook event"
                );
                return None;
            }
        };

        // The provider throttles installations that burst, hence the
        // per-installation cap on parallel requests.
        let limiter = self.limits.for_installation(installation_id).await;
        let Ok(_permit) = limiter.acquire_owned().await else {
            return None;
        };
        if let Some(target) = event.pull_request_target() {
            if let Err(e) = self.refresher.refresh(target).await {
                error!(
                    delivery = %raw.delivery_id,
                    change = %target.number,
                    error = %e,
                    "failed to refresh change for event"
                );
                return None;
            }
            debug!(
                delivery = %raw.delivery_id,
                change = %target.number,
                patchset = %target.head_sha,
                "refreshed change"
            );
        }

        Some(event)
    }
}

/// Hands out one request semaphore per installation id.
struct InstallationLimits {
    permits: usize,
    semaphores: Mutex<HashMap<Option<u64>, Arc<Semaphore>>>,
}

impl InstallationLimits {
    fn new(permits: usize) -> Self {
        Self {
            permits,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    async fn for_installation(&self, installation_id: Option<u64>) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().await;
        Arc::clone(
            semaphores
                .entry(installation_id)
                .or_insert_with(|| Arc::new(Semaphore::new(self.permits))),
        )
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
