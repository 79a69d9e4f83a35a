use ddd_outbox::domain_event::{DomainEvent, EventMetadata, EventSchema};
use ddd_outbox_macros::domain_event;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// 已声明 metadata 与部分派生时不重复生成
#[domain_event(event_type = "PaymentCaptured", version = 3u32)]
#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct PaymentCaptured {
    metadata: EventMetadata,
    #[serde(default)]
    currency: String,
}

fn main() {
    let event = PaymentCaptured {
        metadata: PaymentCaptured::new_metadata("Payment", Uuid::new_v4(), Uuid::new_v4()),
        currency: "CNY".into(),
    };
    assert_eq!(event.clone(), event);
    assert_eq!(event.event_type(), "PaymentCaptured");
    assert_eq!(event.schema_version(), 3);
}
