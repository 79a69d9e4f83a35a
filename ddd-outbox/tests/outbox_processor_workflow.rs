use async_trait::async_trait;
use ddd_outbox::domain_event::{AnyEvent, DomainEvent, EventSchema};
use ddd_outbox::eventing::{EventBus, EventHandler, HandledEventType, HandlerContext};
use ddd_outbox::outbox::{
    InMemoryOutboxRepository, OutboxEntry, OutboxProcessor, OutboxProcessorConfig,
    OutboxPublisher, OutboxRepository, OutboxStatus,
};
use ddd_outbox::serializer::{EventFactory, VersionedSerializer};
use ddd_outbox::versioning::{FnUpgrader, VersionedEventConfig, upgraders};
use ddd_outbox_macros::domain_event;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[domain_event(event_type = "SalesOrderPlaced", version = 2)]
struct SalesOrderPlaced {
    order_no: String,
    #[serde(default)]
    channel: String,
}

#[domain_event(event_type = "SalesOrderPlaced", version = 1)]
struct SalesOrderPlacedV1 {
    order_no: String,
}

#[derive(Default)]
struct Recorder {
    orders: Mutex<Vec<(Uuid, String, String)>>,
}

impl Recorder {
    fn orders(&self) -> Vec<(Uuid, String, String)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn handler_name(&self) -> &str {
        "order-projection"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::One(SalesOrderPlaced::EVENT_TYPE.to_string())
    }

    async fn handle(&self, _ctx: &HandlerContext, event: &dyn AnyEvent) -> anyhow::Result<()> {
        let placed = event
            .downcast_ref::<SalesOrderPlaced>()
            .ok_or_else(|| anyhow::anyhow!("unexpected event {}", event.event_type()))?;
        self.orders.lock().unwrap().push((
            placed.event_id(),
            placed.order_no.clone(),
            placed.channel.clone(),
        ));
        Ok(())
    }
}

fn serializer() -> VersionedSerializer {
    let serializer = VersionedSerializer::new();
    serializer
        .register_versioned(
            VersionedEventConfig::new(SalesOrderPlaced::EVENT_TYPE, 2)
                .with_prototype(1, EventFactory::of::<SalesOrderPlacedV1>())
                .with_prototype(2, EventFactory::of::<SalesOrderPlaced>())
                .with_upgrader(FnUpgrader::new(
                    1,
                    2,
                    upgraders::add_field("channel", json!("legacy")),
                )),
        )
        .unwrap();
    serializer
}

fn placed(order_no: &str) -> SalesOrderPlaced {
    SalesOrderPlaced {
        metadata: SalesOrderPlaced::new_metadata("SalesOrder", Uuid::new_v4(), Uuid::new_v4()),
        order_no: order_no.into(),
        channel: "web".into(),
    }
}

struct Fixture {
    repo: InMemoryOutboxRepository,
    serializer: Arc<VersionedSerializer>,
    recorder: Arc<Recorder>,
    processor: Arc<OutboxProcessor>,
}

fn fixture() -> Fixture {
    let repo = InMemoryOutboxRepository::new();
    let serializer = Arc::new(serializer());
    let recorder = Arc::new(Recorder::default());
    let bus = Arc::new(EventBus::new());
    bus.subscribe(recorder.clone(), &[]);
    bus.start();

    let processor = OutboxProcessor::builder()
        .repository(Arc::new(repo.clone()))
        .serializer(serializer.clone())
        .publisher(bus)
        .config(OutboxProcessorConfig {
            poll_interval: Duration::from_millis(20),
            cleanup_enabled: false,
            ..Default::default()
        })
        .build();

    Fixture {
        repo,
        serializer,
        recorder,
        processor: Arc::new(processor),
    }
}

async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn committed_events_are_delivered_by_the_running_processor() {
    let fx = fixture();
    let publisher = OutboxPublisher::builder()
        .repository(Arc::new(fx.repo.clone()))
        .serializer(fx.serializer.clone())
        .build();

    let first = placed("SO-1");
    let second = placed("SO-2");
    let mut uow = fx.repo.begin();
    let ids = publisher
        .publish_with_tx(&mut uow, &[&first, &second])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(uow.commit().unwrap(), 2);

    let handle = fx.processor.clone().start();
    assert!(wait_until(|| fx.recorder.orders().len() == 2).await);
    assert!(handle.stop(Duration::from_secs(2)).await);

    let delivered: Vec<String> = fx
        .recorder
        .orders()
        .into_iter()
        .map(|(_, order_no, _)| order_no)
        .collect();
    assert_eq!(delivered, vec!["SO-1", "SO-2"]);

    let rows = fx.repo.snapshot().unwrap();
    assert!(rows.iter().all(|e| e.status() == OutboxStatus::Sent));
    assert!(rows.iter().all(|e| e.processed_at().is_some()));

    let counts = fx.processor.status_counts().await.unwrap();
    assert_eq!(counts[&OutboxStatus::Sent], 2);
    assert_eq!(counts[&OutboxStatus::Pending], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rolled_back_transaction_never_reaches_handlers() {
    let fx = fixture();
    let publisher = OutboxPublisher::builder()
        .repository(Arc::new(fx.repo.clone()))
        .serializer(fx.serializer.clone())
        .build();

    let event = placed("SO-rollback");
    let mut uow = fx.repo.begin();
    publisher.publish_with_tx(&mut uow, &[&event]).await.unwrap();
    uow.rollback();

    let report = fx
        .processor
        .process_batch(&HandlerContext::default())
        .await
        .unwrap();
    assert_eq!(report.claimed, 0);
    assert!(fx.recorder.orders().is_empty());
    assert!(fx.repo.is_empty().unwrap());
}

#[tokio::test]
async fn stored_v1_payload_is_upgraded_before_delivery() {
    let fx = fixture();
    let legacy = SalesOrderPlacedV1 {
        metadata: SalesOrderPlacedV1::new_metadata("SalesOrder", Uuid::new_v4(), Uuid::new_v4()),
        order_no: "SO-OLD".into(),
    };
    let payload = serde_json::to_vec(&legacy).unwrap();
    fx.repo
        .save(&[OutboxEntry::from_event(&legacy, payload)])
        .await
        .unwrap();

    let report = fx
        .processor
        .process_batch(&HandlerContext::default())
        .await
        .unwrap();
    assert_eq!(report.sent, 1);

    let orders = fx.recorder.orders();
    assert_eq!(orders.len(), 1);
    let (event_id, order_no, channel) = &orders[0];
    assert_eq!(*event_id, legacy.event_id());
    assert_eq!(order_no, "SO-OLD");
    assert_eq!(channel, "legacy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_handle_stops_polling() {
    let fx = fixture();
    let handle = fx.processor.clone().start();
    assert!(!handle.is_shutdown());
    drop(handle);

    // 句柄释放后提交的记录不会再被处理
    tokio::time::sleep(Duration::from_millis(50)).await;
    let event = placed("SO-late");
    let payload = serde_json::to_vec(&event).unwrap();
    fx.repo
        .save(&[OutboxEntry::from_event(&event, payload)])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(fx.recorder.orders().is_empty());
    let rows = fx.repo.snapshot().unwrap();
    assert_eq!(rows[0].status(), OutboxStatus::Pending);
}
