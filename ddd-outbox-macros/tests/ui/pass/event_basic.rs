use ddd_outbox::domain_event::{DomainEvent, EventSchema};
use ddd_outbox_macros::domain_event;
use uuid::Uuid;

#[domain_event(event_type = "SalesOrderCreated", version = 2)]
pub struct SalesOrderCreated {
    pub order_no: String,
    pub amount: i64,
}

fn main() {
    let event = SalesOrderCreated {
        metadata: SalesOrderCreated::new_metadata("SalesOrder", Uuid::new_v4(), Uuid::new_v4()),
        order_no: "SO-1".into(),
        amount: 10,
    };
    assert_eq!(SalesOrderCreated::EVENT_TYPE, "SalesOrderCreated");
    assert_eq!(SalesOrderCreated::SCHEMA_VERSION, 2);
    assert_eq!(event.event_type(), "SalesOrderCreated");
    assert_eq!(event.schema_version(), 2);
    let _cloned = event.clone();
}
