use ddd_outbox::domain_event::{DomainEvent, EventSchema};
use ddd_outbox_macros::domain_event;
use uuid::Uuid;

// 缺省事件类型取结构体名，版本为 1
#[domain_event]
struct InventoryReserved {
    sku: String,
}

fn main() {
    assert_eq!(InventoryReserved::EVENT_TYPE, "InventoryReserved");
    assert_eq!(InventoryReserved::SCHEMA_VERSION, 1);

    let event = InventoryReserved {
        metadata: InventoryReserved::new_metadata("Inventory", Uuid::new_v4(), Uuid::new_v4()),
        sku: "SKU-1".into(),
    };
    assert_eq!(event.schema_version(), 1);
    assert_eq!(event.sku, "SKU-1");
}
