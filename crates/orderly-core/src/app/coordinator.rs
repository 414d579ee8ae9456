//! OrderCoordinator - 読み取り（cache-aside）と三重書き込み
//!
//! # フロー
//! - get: cache → (miss) store → cache へ書き戻し
//! - create: store insert → cache put → event publish
//! - update: get → shallow merge → store update → cache put → event publish
//! - delete: get → store delete → cache evict → event publish
//!
//! 書き込みの各ステップは前のステップの成否に関係なく実行する。
//! 呼び出し側が失敗を受け取るのは、id 欠落・存在しない id・重複 id の 3 つだけ。

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    LifecycleEvent, Lookup, OrderAck, OrderDocument, OrderError, OrderId, WriteReport,
};
use crate::ports::{BusError, EventSink, OrderCache, OrderStore};

/// Body sent by the bus diagnostic endpoint.
pub const TEST_MESSAGE: &[u8] = b"TEST_MESSAGE";

#[derive(Clone)]
pub struct OrderCoordinator {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
    events: Arc<dyn EventSink>,
}

impl OrderCoordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn OrderCache>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            cache,
            events,
        }
    }

    /// Cache-aside read.
    ///
    /// A store that cannot answer is reported as not-found.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn get(&self, id: &OrderId) -> Result<OrderDocument, OrderError> {
        if let Lookup::Hit(document) = self.cache.fetch(id).await {
            debug!("cache hit");
            return Ok(document);
        }

        match self.store.get(id).await {
            Lookup::Hit(record) => {
                // 書き戻しの失敗は無視（CacheLayer がログを出す）
                self.cache.put(id, &record.document).await;
                Ok(record.document)
            }
            Lookup::Miss => Err(OrderError::NotFound(id.clone())),
            Lookup::Failed(reason) => {
                warn!(%reason, "store read failed; reporting not found");
                Err(OrderError::NotFound(id.clone()))
            }
        }
    }

    /// Insert a new order keyed by the document's own `id` field.
    #[instrument(skip_all)]
    pub async fn create(&self, document: OrderDocument) -> Result<OrderAck, OrderError> {
        let id = document.order_id()?;
        // 重複はここで中断（cache と bus には触らない）
        let store = self.store.insert(&id, &document).await?;
        let cache = self.cache.put(&id, &document).await;
        let bus = self.events.publish(&LifecycleEvent::created(id.clone())).await;

        Ok(acknowledge("Order created", id, WriteReport { store, cache, bus }))
    }

    /// Read-modify-write with a shallow merge of `patch`.
    #[instrument(skip(self, patch), fields(order_id = %id))]
    pub async fn update(&self, id: &OrderId, patch: OrderDocument) -> Result<OrderAck, OrderError> {
        let mut document = self.get(id).await?;
        document.merge(patch);

        let store = self.store.update(id, &document).await;
        let cache = self.cache.put(id, &document).await;
        let bus = self.events.publish(&LifecycleEvent::updated(id.clone())).await;

        Ok(acknowledge("Order updated", id.clone(), WriteReport { store, cache, bus }))
    }

    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn delete(&self, id: &OrderId) -> Result<OrderAck, OrderError> {
        self.get(id).await?;

        let store = self.store.delete(id).await;
        let cache = self.cache.evict(id).await;
        let bus = self.events.publish(&LifecycleEvent::deleted(id.clone())).await;

        Ok(acknowledge("Order deleted", id.clone(), WriteReport { store, cache, bus }))
    }

    /// Publish the fixed test body and report the bus error as is.
    pub async fn publish_test_message(&self) -> Result<(), BusError> {
        self.events.publish_raw(TEST_MESSAGE).await
    }
}

fn acknowledge(status: &'static str, order_id: OrderId, report: WriteReport) -> OrderAck {
    if report.is_fully_applied() {
        info!(%order_id, status, "mutation applied");
    } else {
        warn!(
            %order_id,
            status,
            degraded = ?report.degraded(),
            "mutation acknowledged with degraded backends"
        );
    }
    OrderAck {
        status,
        order_id,
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Backend, StepOutcome};
    use crate::impls::{
        CacheLayer, DurableStore, EventPublisher, MemoryBroker, MemoryBrokerConnector,
        MemoryCache, MemoryStore, MemoryStoreConnector,
    };
    use crate::supervisor::{ConnectionSupervisor, RetryPolicy};
    use rstest::rstest;
    use serde_json::json;
    use std::time::Duration;

    /// Coordinator wired to in-memory backends, with handles for fault injection.
    struct Harness {
        coordinator: OrderCoordinator,
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        broker: Arc<MemoryBroker>,
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1))
    }

    async fn harness() -> Harness {
        harness_with_bus_heal(quick().with_max_attempts(2)).await
    }

    async fn harness_with_bus_heal(bus_heal: RetryPolicy) -> Harness {
        let store = MemoryStore::new();
        let cache = Arc::new(MemoryCache::new());
        let broker = MemoryBroker::new();

        let durable: DurableStore<MemoryStoreConnector> = DurableStore::new(
            ConnectionSupervisor::new(store.connector(), quick()),
            quick().with_max_attempts(2),
        );
        durable.establish().await.unwrap();
        let publisher: EventPublisher<MemoryBrokerConnector> = EventPublisher::new(
            ConnectionSupervisor::new(broker.connector(), quick()),
            bus_heal,
            "orders",
        );
        publisher.establish().await.unwrap();

        let coordinator = OrderCoordinator::new(
            Arc::new(durable),
            Arc::new(CacheLayer::new(cache.clone())),
            Arc::new(publisher),
        );
        Harness {
            coordinator,
            store,
            cache,
            broker,
        }
    }

    fn id(raw: &str) -> OrderId {
        OrderId::parse(raw).unwrap()
    }

    fn doc(value: serde_json::Value) -> OrderDocument {
        OrderDocument::from_value(value).unwrap()
    }

    async fn events(broker: &MemoryBroker) -> Vec<LifecycleEvent> {
        broker
            .ready_messages("orders")
            .await
            .iter()
            .map(|body| LifecycleEvent::from_bytes(body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn read_after_create_is_served_from_cache() {
        let h = harness().await;
        let order = doc(json!({"id": "A-1", "item": "book"}));

        let ack = h.coordinator.create(order.clone()).await.unwrap();
        assert!(ack.report.is_fully_applied());

        let reads_before = h.store.read_count();
        assert_eq!(h.coordinator.get(&id("A-1")).await.unwrap(), order);
        assert_eq!(h.store.read_count(), reads_before);
        assert_eq!(events(&h.broker).await, vec![LifecycleEvent::created(id("A-1"))]);
    }

    #[tokio::test]
    async fn cache_miss_repopulates_and_survives_store_outage() {
        let h = harness().await;
        let order = doc(json!({"id": "A-1", "item": "book"}));
        h.store.seed(id("A-1"), order.clone()).await;

        assert_eq!(h.coordinator.get(&id("A-1")).await.unwrap(), order);
        assert!(h.cache.peek("order:A-1").await.is_some());

        h.store.set_online(false);
        assert_eq!(h.coordinator.get(&id("A-1")).await.unwrap(), order);
    }

    #[tokio::test]
    async fn successive_updates_merge_shallowly() {
        let h = harness().await;
        h.coordinator.create(doc(json!({"id": "A-1"}))).await.unwrap();

        h.coordinator.update(&id("A-1"), doc(json!({"a": 1}))).await.unwrap();
        let ack = h.coordinator.update(&id("A-1"), doc(json!({"b": 2}))).await.unwrap();

        let expected = doc(json!({"id": "A-1", "a": 1, "b": 2}));
        assert_eq!(ack.status, "Order updated");
        assert_eq!(h.store.record(&id("A-1")).await.unwrap().document, expected);
        let cached = h.cache.peek("order:A-1").await.unwrap();
        assert_eq!(OrderDocument::from_text(&cached).unwrap(), expected);
    }

    #[rstest]
    #[case::get("get")]
    #[case::update("update")]
    #[case::delete("delete")]
    #[tokio::test]
    async fn unknown_id_is_not_found(#[case] op: &str) {
        let h = harness().await;
        let ghost = id("ghost");

        let err = match op {
            "get" => h.coordinator.get(&ghost).await.unwrap_err(),
            "update" => h.coordinator.update(&ghost, doc(json!({"a": 1}))).await.unwrap_err(),
            _ => h.coordinator.delete(&ghost).await.unwrap_err(),
        };

        assert!(matches!(err, OrderError::NotFound(_)));
        assert!(events(&h.broker).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_leaves_first_order_alone() {
        let h = harness().await;
        let first = doc(json!({"id": "A-1", "v": 1}));
        h.coordinator.create(first.clone()).await.unwrap();

        let err = h.coordinator.create(doc(json!({"id": "A-1", "v": 2}))).await.unwrap_err();

        assert!(matches!(err, OrderError::Duplicate(_)));
        assert_eq!(h.store.record(&id("A-1")).await.unwrap().document, first);
        assert_eq!(h.coordinator.get(&id("A-1")).await.unwrap(), first);
        assert_eq!(events(&h.broker).await.len(), 1);
    }

    #[tokio::test]
    async fn mutations_succeed_with_cache_and_bus_down() {
        let h = harness().await;
        h.cache.set_online(false);
        h.broker.set_online(false).await;

        let created = h.coordinator.create(doc(json!({"id": "A-1"}))).await.unwrap();
        let updated = h.coordinator.update(&id("A-1"), doc(json!({"a": 1}))).await.unwrap();
        let deleted = h.coordinator.delete(&id("A-1")).await.unwrap();

        for ack in [&created, &updated, &deleted] {
            assert!(ack.report.store.is_applied());
            assert_eq!(ack.report.degraded(), vec![Backend::Cache, Backend::Bus]);
        }
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn bus_outage_does_not_stall_mutations() {
        let h = harness_with_bus_heal(
            RetryPolicy::fixed(Duration::from_secs(5)).with_max_attempts(3),
        )
        .await;
        h.broker.set_online(false).await;

        let creates = (1..=4).map(|n| h.coordinator.create(doc(json!({"id": n}))));
        let acks = tokio::time::timeout(Duration::from_secs(1), futures::future::join_all(creates))
            .await
            .expect("mutations should not wait for the bus to heal");

        for ack in acks {
            let ack = ack.unwrap();
            assert!(ack.report.store.is_applied());
            assert_eq!(ack.report.degraded(), vec![Backend::Bus]);
        }
    }

    #[tokio::test]
    async fn store_write_failure_is_dropped_but_acknowledged() {
        let h = harness().await;
        h.store.drop_connections();

        let ack = h.coordinator.create(doc(json!({"id": "A-1"}))).await.unwrap();

        assert!(matches!(ack.report.store, StepOutcome::Failed { .. }));
        assert!(ack.report.cache.is_applied());
        assert!(ack.report.bus.is_applied());
        assert!(h.store.record(&id("A-1")).await.is_none());
        // heal happened inline
        assert_eq!(h.store.connect_count(), 2);
    }

    #[tokio::test]
    async fn delete_evicts_and_emits() {
        let h = harness().await;
        h.coordinator.create(doc(json!({"id": 7}))).await.unwrap();

        let ack = h.coordinator.delete(&id("7")).await.unwrap();

        assert_eq!(ack.status, "Order deleted");
        assert!(h.cache.peek("order:7").await.is_none());
        assert!(h.coordinator.get(&id("7")).await.is_err());
        assert_eq!(
            events(&h.broker).await,
            vec![LifecycleEvent::created(id("7")), LifecycleEvent::deleted(id("7"))]
        );
    }

    #[tokio::test]
    async fn create_without_id_is_rejected_before_any_write() {
        let h = harness().await;

        let err = h.coordinator.create(doc(json!({"item": "book"}))).await.unwrap_err();

        assert!(matches!(err, OrderError::MissingId));
        assert!(h.store.is_empty().await);
        assert!(events(&h.broker).await.is_empty());
    }

    #[tokio::test]
    async fn test_message_reports_bus_errors() {
        let h = harness().await;
        h.coordinator.publish_test_message().await.unwrap();
        assert_eq!(h.broker.ready_messages("orders").await, vec![TEST_MESSAGE.to_vec()]);

        h.broker.set_online(false).await;
        assert!(h.coordinator.publish_test_message().await.is_err());
    }
}
