//! MessageProcessor Lifecycle Tests
//!
//! Runs on a paused clock so poll intervals elapse instantly.
//!
//! Tests for:
//! - Start/stop state transitions and wrong-state no-ops
//! - First pass timing and periodic passes
//! - No passes after stop, and no overlapping passes across a restart
//! - A panicking pass does not stop the loop
//! - Read path delegation

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ms_common::{DeliveryReceipt, Message, MessageStatus, OutboundMessage};
use ms_processor::{
    DeliveryError, DispatchPipeline, InMemoryDeliveryCache, InMemoryMessageRepository,
    MessageDelivery, MessageProcessor, MessageRepository, PipelineConfig, ProcessorConfig,
};

const INTERVAL: Duration = Duration::from_secs(120);

/// Repository wrapper counting fetches of unsent messages (one per pass)
struct CountingRepository {
    inner: InMemoryMessageRepository,
    unsent_fetches: AtomicU32,
}

impl CountingRepository {
    fn new(inner: InMemoryMessageRepository) -> Self {
        Self {
            inner,
            unsent_fetches: AtomicU32::new(0),
        }
    }

    fn passes(&self) -> u32 {
        self.unsent_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageRepository for CountingRepository {
    async fn fetch_by_status(
        &self,
        status: MessageStatus,
        limit: u32,
    ) -> anyhow::Result<Vec<Message>> {
        if status == MessageStatus::Unsent {
            self.unsent_fetches.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.fetch_by_status(status, limit).await
    }

    async fn mark_sent(&self, message_id: &str, delivery_id: &str) -> anyhow::Result<()> {
        self.inner.mark_sent(message_id, delivery_id).await
    }
}

/// Always-failing webhook that takes `delay` per call and tracks how many
/// calls are in flight at once
struct SlowFailingDelivery {
    delay: Duration,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    call_count: AtomicU32,
}

impl SlowFailingDelivery {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            call_count: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MessageDelivery for SlowFailingDelivery {
    async fn send(&self, _message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Err(DeliveryError::Rejected {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

/// Webhook whose every call panics
struct PanickingDelivery {
    call_count: AtomicU32,
}

#[async_trait]
impl MessageDelivery for PanickingDelivery {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        panic!("webhook client bug while sending to {}", message.to);
    }
}

fn build(
    repo: Arc<dyn MessageRepository>,
    delivery: Arc<dyn MessageDelivery>,
    call_timeout: Duration,
) -> MessageProcessor {
    let pipeline = DispatchPipeline::new(
        repo,
        delivery,
        Arc::new(InMemoryDeliveryCache::new()),
        PipelineConfig {
            call_timeout,
            ..Default::default()
        },
    );
    MessageProcessor::new(Arc::new(pipeline), ProcessorConfig { poll_interval: INTERVAL })
}

fn counting_processor() -> (MessageProcessor, Arc<CountingRepository>) {
    let repo = Arc::new(CountingRepository::new(InMemoryMessageRepository::new()));
    let delivery = Arc::new(SlowFailingDelivery::new(Duration::ZERO));
    let processor = build(repo.clone(), delivery, Duration::from_secs(30));
    (processor, repo)
}

#[tokio::test(start_paused = true)]
async fn test_first_pass_runs_one_interval_after_start() {
    let (processor, repo) = counting_processor();

    assert!(processor.start());
    assert!(processor.is_running());

    tokio::time::sleep(INTERVAL - Duration::from_secs(1)).await;
    assert_eq!(repo.passes(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(repo.passes(), 1);

    tokio::time::sleep(INTERVAL).await;
    assert_eq!(repo.passes(), 2);

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_keeps_single_task() {
    let (processor, repo) = counting_processor();

    assert!(processor.start());
    assert!(!processor.start());
    assert!(processor.is_running());

    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(repo.passes(), 1);

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_stopped_is_noop() {
    let (processor, _repo) = counting_processor();

    assert!(!processor.stop());
    assert!(!processor.is_running());

    assert!(processor.start());
    assert!(processor.stop());
    assert!(!processor.stop());
    assert!(!processor.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_no_passes_after_stop() {
    let (processor, repo) = counting_processor();

    processor.start();
    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(repo.passes(), 1);

    assert!(processor.stop());
    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(repo.passes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_dispatching() {
    let (processor, repo) = counting_processor();

    processor.start();
    processor.stop();
    assert!(processor.start());
    assert!(processor.is_running());

    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(repo.passes(), 1);

    processor.shutdown().await;
    assert!(!processor.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_restart_does_not_overlap_in_flight_pass() {
    let repo = Arc::new(CountingRepository::new(InMemoryMessageRepository::with_messages([
        Message::with_id("a", "+905550000001", "hello"),
    ])));
    let delivery = Arc::new(SlowFailingDelivery::new(Duration::from_secs(50)));
    let processor = build(repo.clone(), delivery.clone(), Duration::from_secs(100));

    processor.start();
    // First pass starts at 120s and is stuck in delivery until 170s
    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(delivery.in_flight.load(Ordering::SeqCst), 1);

    processor.stop();
    processor.start();

    tokio::time::sleep(INTERVAL * 4).await;
    processor.shutdown().await;

    assert!(delivery.call_count.load(Ordering::SeqCst) >= 2);
    assert_eq!(delivery.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_pass() {
    let repo = Arc::new(CountingRepository::new(InMemoryMessageRepository::with_messages([
        Message::with_id("a", "+905550000001", "hello"),
    ])));
    let delivery = Arc::new(SlowFailingDelivery::new(Duration::from_secs(50)));
    let processor = build(repo, delivery.clone(), Duration::from_secs(100));

    processor.start();
    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(delivery.in_flight.load(Ordering::SeqCst), 1);

    processor.shutdown().await;
    assert!(!processor.is_running());
    assert_eq!(delivery.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_pass_keeps_loop_alive() {
    let repo = Arc::new(CountingRepository::new(InMemoryMessageRepository::with_messages([
        Message::with_id("a", "+905550000001", "hello"),
    ])));
    let delivery = Arc::new(PanickingDelivery {
        call_count: AtomicU32::new(0),
    });
    let processor = build(repo.clone(), delivery.clone(), Duration::from_secs(30));

    processor.start();
    tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(1)).await;

    assert!(processor.is_running());
    assert_eq!(repo.passes(), 2);
    assert_eq!(delivery.call_count.load(Ordering::SeqCst), 2);

    assert!(processor.stop());
    assert!(!processor.is_running());
    assert!(processor.start());
    processor.shutdown().await;
}

#[tokio::test]
async fn test_get_sent_messages_delegates_to_store() {
    let inner = InMemoryMessageRepository::with_messages([
        Message::with_id("a", "+905550000001", "one"),
        Message::with_id("b", "+905550000002", "two"),
        Message::with_id("c", "+905550000003", "three"),
    ]);
    inner.mark_sent("a", "w1").await.unwrap();
    inner.mark_sent("c", "w3").await.unwrap();
    let repo = Arc::new(CountingRepository::new(inner));
    let delivery = Arc::new(SlowFailingDelivery::new(Duration::ZERO));
    let processor = build(repo, delivery, Duration::from_secs(30));

    let sent = processor.get_sent_messages(10).await.unwrap();
    let ids: Vec<_> = sent.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);

    let limited = processor.get_sent_messages(1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_get_sent_messages_propagates_store_error() {
    let repo = Arc::new(InMemoryMessageRepository::new());
    repo.set_fetch_error(Some("database offline"));
    let delivery = Arc::new(SlowFailingDelivery::new(Duration::ZERO));
    let processor = build(repo, delivery, Duration::from_secs(30));

    let err = processor.get_sent_messages(10).await.unwrap_err();
    assert_eq!(err.to_string(), "database offline");
}
