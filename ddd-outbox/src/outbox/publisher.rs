//! Outbox 发布器（OutboxPublisher）
//!
//! 把事件序列化为 `Pending` 记录，写入调用方传入的业务事务。
//! 事件与业务状态同事务提交，要么都落库，要么都不落库。
//!
use super::entry::{DEFAULT_MAX_RETRIES, OutboxEntry};
use super::repository::{OutboxRepository, OutboxUnitOfWork};
use crate::domain_event::AnyEvent;
use crate::error::DomainResult as Result;
use crate::serializer::EventSerializer;
use bon::Builder;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Builder)]
pub struct OutboxPublisher {
    repository: Arc<dyn OutboxRepository>,
    serializer: Arc<dyn EventSerializer>,
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
}

impl OutboxPublisher {
    /// 在 `uow` 中写入事件，返回新记录的 id；空输入不触碰事务
    pub async fn publish_with_tx(
        &self,
        uow: &mut dyn OutboxUnitOfWork,
        events: &[&dyn AnyEvent],
    ) -> Result<Vec<Uuid>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let entries = events
            .iter()
            .map(|event| {
                let payload = self.serializer.serialize(*event)?;
                Ok(OutboxEntry::from_event(*event, payload).with_max_retries(self.max_retries))
            })
            .collect::<Result<Vec<_>>>()?;

        self.repository.save_in(uow, &entries).await?;

        tracing::debug!(count = entries.len(), "events written to outbox");
        Ok(entries.iter().map(OutboxEntry::id).collect())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::{DomainEvent, EventMetadata};
    use crate::outbox::{InMemoryOutboxRepository, OutboxStatus};
    use crate::serializer::JsonEventSerializer;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct OrderCreated {
        #[serde(flatten)]
        metadata: EventMetadata,
        total: i64,
    }

    impl DomainEvent for OrderCreated {
        fn metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    fn order_created() -> OrderCreated {
        OrderCreated {
            metadata: EventMetadata::builder()
                .event_type("OrderCreated")
                .aggregate_type("SalesOrder")
                .aggregate_id(Uuid::new_v4())
                .tenant_id(Uuid::new_v4())
                .build(),
            total: 100,
        }
    }

    fn publisher(repo: &InMemoryOutboxRepository) -> OutboxPublisher {
        OutboxPublisher::builder()
            .repository(Arc::new(repo.clone()))
            .serializer(Arc::new(JsonEventSerializer::new()))
            .max_retries(3)
            .build()
    }

    #[tokio::test]
    async fn entries_become_visible_only_after_commit() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = publisher(&repo);
        let event = order_created();

        let mut tx = repo.begin();
        let ids = publisher.publish_with_tx(&mut tx, &[&event]).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(repo.is_empty().unwrap());
        tx.commit().unwrap();

        let stored = repo.find_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.status(), OutboxStatus::Pending);
        assert_eq!(stored.event_id(), event.event_id());
        assert_eq!(stored.event_type(), "OrderCreated");
        assert_eq!(stored.aggregate_type(), "SalesOrder");
        assert_eq!(stored.tenant_id(), event.tenant_id());
        assert_eq!(stored.max_retries(), 3);

        let doc: serde_json::Value = serde_json::from_slice(stored.payload()).unwrap();
        assert_eq!(doc["schema_version"], 1);
        assert_eq!(doc["total"], 100);
    }

    #[tokio::test]
    async fn rollback_discards_entries() {
        let repo = InMemoryOutboxRepository::new();
        let publisher = publisher(&repo);

        let mut tx = repo.begin();
        publisher
            .publish_with_tx(&mut tx, &[&order_created(), &order_created()])
            .await
            .unwrap();
        tx.rollback();
        assert!(repo.is_empty().unwrap());
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let repo = InMemoryOutboxRepository::new();
        let mut tx = repo.begin();
        let ids = publisher(&repo).publish_with_tx(&mut tx, &[]).await.unwrap();
        assert!(ids.is_empty());
        assert!(tx.staged().is_empty());
    }
}
