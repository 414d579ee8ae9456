//! DurableStore - 正本への adapter
//!
//! # 学習ポイント
//! - StoreSession（素の接続）を Supervised スロットに入れて共有する
//! - 接続エラーはその場で heal してから outcome に落とす
//! - 重複キーだけは呼び出し側に返す
//!
//! 失敗した書き込みはリトライしない。呼び出し側は成功として扱う（既知のギャップ）。

use async_trait::async_trait;
use tracing::{error, warn};

use crate::domain::{Lookup, OrderDocument, OrderError, OrderId, OrderRecord, StepOutcome};
use crate::ports::{Connector, OrderStore, StoreError, StoreSession};
use crate::supervisor::{ConnectionSupervisor, RetryPolicy, Supervised, SupervisorError};

pub struct DurableStore<C: Connector>
where
    C::Connection: StoreSession,
{
    inner: Supervised<C>,
}

impl<C: Connector> DurableStore<C>
where
    C::Connection: StoreSession,
{
    pub fn new(supervisor: ConnectionSupervisor<C>, heal_policy: RetryPolicy) -> Self {
        Self {
            inner: Supervised::new(supervisor, heal_policy),
        }
    }

    /// Block until connected, then make sure the table exists.
    ///
    /// A schema error is logged and the session kept; the first query will surface it.
    pub async fn establish(&self) -> Result<(), SupervisorError> {
        let mut slot = self.inner.lock().await;
        let mut session = self.inner.supervisor().acquire().await?;
        if let Err(err) = session.ensure_schema().await {
            error!(backend = self.inner.target(), error = %err, "schema bootstrap failed");
        }
        *slot = Some(session);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    /// Session to run a query on, healing an empty slot first.
    async fn ready<'s>(
        &self,
        slot: &'s mut Option<C::Connection>,
    ) -> Option<&'s mut C::Connection> {
        if slot.is_none() {
            self.inner.heal(slot).await;
        }
        slot.as_mut()
    }

    /// Log a failed query and heal when the connection itself broke.
    async fn recover(
        &self,
        slot: &mut Option<C::Connection>,
        op: &str,
        id: &OrderId,
        err: &StoreError,
    ) {
        warn!(backend = self.inner.target(), op, order_id = %id, error = %err, "store call failed");
        if matches!(err, StoreError::Connection(_)) {
            self.inner.heal(slot).await;
        }
    }
}

fn not_connected() -> StoreError {
    StoreError::Connection("no connection to the store".to_string())
}

#[async_trait]
impl<C: Connector> OrderStore for DurableStore<C>
where
    C::Connection: StoreSession,
{
    async fn insert(
        &self,
        id: &OrderId,
        document: &OrderDocument,
    ) -> Result<StepOutcome, OrderError> {
        let mut slot = self.inner.lock().await;
        let Some(session) = self.ready(&mut slot).await else {
            return Ok(StepOutcome::failed(not_connected()));
        };
        match session.insert(id, document).await {
            Ok(()) => Ok(StepOutcome::Applied),
            Err(StoreError::DuplicateKey(existing)) => Err(OrderError::Duplicate(existing)),
            Err(err) => {
                self.recover(&mut slot, "insert", id, &err).await;
                Ok(StepOutcome::failed(err))
            }
        }
    }

    async fn get(&self, id: &OrderId) -> Lookup<OrderRecord> {
        let mut slot = self.inner.lock().await;
        let Some(session) = self.ready(&mut slot).await else {
            return Lookup::Failed(not_connected().to_string());
        };
        match session.get(id).await {
            Ok(Some(record)) => Lookup::Hit(record),
            Ok(None) => Lookup::Miss,
            Err(err) => {
                self.recover(&mut slot, "get", id, &err).await;
                Lookup::Failed(err.to_string())
            }
        }
    }

    async fn update(&self, id: &OrderId, document: &OrderDocument) -> StepOutcome {
        let mut slot = self.inner.lock().await;
        let Some(session) = self.ready(&mut slot).await else {
            return StepOutcome::failed(not_connected());
        };
        match session.update(id, document).await {
            Ok(()) => StepOutcome::Applied,
            Err(err) => {
                self.recover(&mut slot, "update", id, &err).await;
                StepOutcome::failed(err)
            }
        }
    }

    async fn delete(&self, id: &OrderId) -> StepOutcome {
        let mut slot = self.inner.lock().await;
        let Some(session) = self.ready(&mut slot).await else {
            return StepOutcome::failed(not_connected());
        };
        match session.delete(id).await {
            Ok(()) => StepOutcome::Applied,
            Err(err) => {
                self.recover(&mut slot, "delete", id, &err).await;
                StepOutcome::failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{MemoryStore, MemoryStoreConnector};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn quick() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1))
    }

    async fn durable(store: &Arc<MemoryStore>) -> DurableStore<MemoryStoreConnector> {
        let durable = DurableStore::new(
            ConnectionSupervisor::new(store.connector(), quick()),
            quick().with_max_attempts(2),
        );
        durable.establish().await.unwrap();
        durable
    }

    fn id(raw: &str) -> OrderId {
        OrderId::parse(raw).unwrap()
    }

    fn doc(value: serde_json::Value) -> OrderDocument {
        OrderDocument::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn insert_stamps_rows_with_the_clock() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let store = MemoryStore::with_clock(Arc::new(FixedClock::new(at)));
        let durable = durable(&store).await;

        let outcome = durable.insert(&id("A-1"), &doc(json!({"id": "A-1"}))).await.unwrap();

        assert!(outcome.is_applied());
        let record = durable.get(&id("A-1")).await.hit().unwrap();
        assert_eq!(record.created_at, at);
        assert_eq!(record.updated_at, at);
    }

    #[tokio::test]
    async fn duplicate_insert_surfaces_as_error() {
        let store = MemoryStore::new();
        let durable = durable(&store).await;
        durable.insert(&id("A-1"), &doc(json!({"v": 1}))).await.unwrap();

        let err = durable.insert(&id("A-1"), &doc(json!({"v": 2}))).await.unwrap_err();

        assert!(matches!(err, OrderError::Duplicate(_)));
    }

    #[tokio::test]
    async fn broken_connection_drops_the_write_and_heals() {
        let store = MemoryStore::new();
        let durable = durable(&store).await;

        store.drop_connections();
        let outcome = durable.insert(&id("A-1"), &doc(json!({"v": 1}))).await.unwrap();

        assert!(!outcome.is_applied());
        assert!(store.record(&id("A-1")).await.is_none());
        assert_eq!(store.connect_count(), 2);

        // the healed session serves the next call
        let retry = durable.insert(&id("A-1"), &doc(json!({"v": 1}))).await.unwrap();
        assert!(retry.is_applied());
    }

    #[tokio::test]
    async fn unreachable_store_reports_failures_without_erroring() {
        let store = MemoryStore::new();
        let durable = durable(&store).await;
        store.set_online(false);

        assert!(matches!(durable.get(&id("A-1")).await, Lookup::Failed(_)));
        assert!(!durable.update(&id("A-1"), &doc(json!({}))).await.is_applied());
        assert!(!durable.delete(&id("A-1")).await.is_applied());
        assert!(!durable.is_connected().await);

        store.set_online(true);
        assert_eq!(durable.get(&id("A-1")).await, Lookup::Miss);
        assert!(durable.is_connected().await);
    }
}
