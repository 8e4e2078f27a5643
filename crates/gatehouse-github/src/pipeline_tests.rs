use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::change::{ChangeNumber, PullRequestChange};
use crate::events::mapper::ChangeLookup;

/// Lookup that knows nothing; pull_request payloads never consult it.
struct NoLookup;

#[async_trait]
impl ChangeLookup for NoLookup {
    async fn pull_by_number(
        &self,
        project: &str,
        number: ChangeNumber,
    ) -> Result<Arc<PullRequestChange>, ConnectionError> {
        Err(ConnectionError::ChangeNotFound {
            project: project.to_string(),
            number: number.as_u64(),
        })
    }

    async fn pull_by_sha(
        &self,
        _project: &str,
        _sha: &str,
    ) -> Result<Option<Arc<PullRequestChange>>, ConnectionError> {
        Ok(None)
    }
}

/// Records refreshes and can delay or fail them per change number.
#[derive(Default)]
struct StubRefresher {
    delay_millis: HashMap<u64, u64>,
    failing: HashSet<u64>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: std::sync::Mutex<Vec<u64>>,
}

impl StubRefresher {
    fn with_delays(delays: &[(u64, u64)]) -> Self {
        Self {
            delay_millis: delays.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn failing_for(number: u64) -> Self {
        Self {
            failing: HashSet::from([number]),
            ..Self::default()
        }
    }

    fn refreshed(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeRefresher for StubRefresher {
    async fn refresh(&self, target: &PullRequestTarget) -> Result<(), ConnectionError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let number = target.number.as_u64();
        if let Some(millis) = self.delay_millis.get(&number) {
            tokio::time::sleep(Duration::from_millis(*millis)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(number);

        if self.failing.contains(&number) {
            return Err(ConnectionError::ChangeNotFound {
                project: target.project.clone(),
                number,
            });
        }
        Ok(())
    }
}

/// Pushes every delivered event into a channel the test can drain.
struct ChannelSink {
    tx: mpsc::UnboundedSender<TriggerEvent>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&self, event: TriggerEvent) {
        let _ = self.tx.send(event);
    }
}

fn start_pipeline(
    refresher: Arc<StubRefresher>,
    max_threads_per_installation: usize,
) -> (EventPipeline, mpsc::UnboundedReceiver<TriggerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mapper = EventMapper::new("https://github.com", Arc::new(NoLookup));
    let pipeline = EventPipeline::start(
        mapper,
        refresher,
        None,
        Arc::new(ChannelSink { tx }),
        max_threads_per_installation,
    );
    (pipeline, rx)
}

fn raw(delivery: &str, event_type: &str, body: &serde_json::Value) -> RawEvent {
    RawEvent {
        delivery_id: delivery.to_string(),
        event_type: event_type.to_string(),
        body: Bytes::from(serde_json::to_vec(body).expect("body serializes")),
        received_at: Utc::now(),
    }
}

fn pull_request_body(number: u64) -> serde_json::Value {
    json!({
        "action": "synchronize",
        "pull_request": {
            "number": number,
            "title": format!("Change {number}"),
            "body": null,
            "state": "open",
            "user": {"login": "octocat"},
            "head": {
                "ref": "topic",
                "sha": format!("sha-{number}"),
                "repo": {"full_name": "acme/widgets"}
            },
            "base": {
                "ref": "main",
                "sha": "basesha",
                "repo": {"full_name": "acme/widgets"}
            },
            "merge_commit_sha": null,
            "updated_at": "2021-03-14T09:00:00Z",
            "html_url": format!("https://github.com/acme/widgets/pull/{number}")
        },
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "octocat"}
    })
}

fn push_body() -> serde_json::Value {
    json!({
        "ref": "refs/heads/main",
        "before": "0ld5ha",
        "after": "n3w5ha",
        "commits": [],
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "octocat"}
    })
}

fn event_number(event: &TriggerEvent) -> u64 {
    event
        .pull_request_target()
        .expect("pull request shaped event")
        .number
        .as_u64()
}

/// Slow early deliveries must not be overtaken by fast later ones.
#[tokio::test(start_paused = true)]
async fn test_events_forward_in_receipt_order() {
    let refresher = Arc::new(StubRefresher::with_delays(&[(1, 100), (2, 50), (3, 0)]));
    let (pipeline, mut rx) = start_pipeline(Arc::clone(&refresher), 4);

    for number in [1, 2, 3] {
        pipeline
            .enqueue(raw(
                &format!("d-{number}"),
                "pull_request",
                &pull_request_body(number),
            ))
            .await
            .expect("enqueue");
    }

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(event_number(&rx.recv().await.expect("event delivered")));
    }
    assert_eq!(delivered, vec![1, 2, 3]);
    assert_eq!(refresher.refreshed().len(), 3);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_push_event_needs_no_refresh() {
    let refresher = Arc::new(StubRefresher::default());
    let (pipeline, mut rx) = start_pipeline(Arc::clone(&refresher), 4);

    pipeline
        .enqueue(raw("d-push", "push", &push_body()))
        .await
        .expect("enqueue");

    let event = rx.recv().await.expect("push delivered");
    assert_eq!(event.kind(), "push");
    assert!(refresher.refreshed().is_empty());

    pipeline.stop().await;
}

/// A failed refresh drops the event instead of forwarding stale data.
#[tokio::test(start_paused = true)]
async fn test_failed_refresh_drops_event() {
    let refresher = Arc::new(StubRefresher::failing_for(1));
    let (pipeline, mut rx) = start_pipeline(Arc::clone(&refresher), 4);

    pipeline
        .enqueue(raw("d-1", "pull_request", &pull_request_body(1)))
        .await
        .expect("enqueue");
    pipeline
        .enqueue(raw("d-2", "pull_request", &pull_request_body(2)))
        .await
        .expect("enqueue");

    let delivered = rx.recv().await.expect("second event still delivered");
    assert_eq!(event_number(&delivered), 2);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_json_is_discarded() {
    let refresher = Arc::new(StubRefresher::default());
    let (pipeline, mut rx) = start_pipeline(Arc::clone(&refresher), 4);

    pipeline
        .enqueue(RawEvent {
            delivery_id: "d-bad".to_string(),
            event_type: "push".to_string(),
            body: Bytes::from_static(b"not json"),
            received_at: Utc::now(),
        })
        .await
        .expect("enqueue");
    pipeline
        .enqueue(raw("d-good", "push", &push_body()))
        .await
        .expect("enqueue");

    let event = rx.recv().await.expect("good event still delivered");
    assert_eq!(event.delivery_id(), "d-good");

    pipeline.stop().await;
}

/// Refreshes for the same installation hold one shared permit.
#[tokio::test(start_paused = true)]
async fn test_refreshes_serialize_per_installation() {
    let refresher = Arc::new(StubRefresher::with_delays(&[(1, 50), (2, 50)]));
    let (pipeline, mut rx) = start_pipeline(Arc::clone(&refresher), 1);

    for number in [1, 2] {
        let mut body = pull_request_body(number);
        body["installation"] = json!({"id": 77});
        pipeline
            .enqueue(raw(&format!("d-{number}"), "pull_request", &body))
            .await
            .expect("enqueue");
    }

    for _ in 0..2 {
        rx.recv().await.expect("event delivered");
    }
    assert_eq!(refresher.max_in_flight(), 1);

    pipeline.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_rejects_new_deliveries() {
    let refresher = Arc::new(StubRefresher::default());
    let (pipeline, mut rx) = start_pipeline(refresher, 4);

    pipeline.stop().await;

    let error = pipeline
        .enqueue(raw("d-late", "push", &push_body()))
        .await
        .expect_err("intake closed");
    assert!(matches!(error, ConnectionError::Stopped));
    assert!(rx.recv().await.is_none());
}
