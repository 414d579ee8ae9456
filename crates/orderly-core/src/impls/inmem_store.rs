//! MemoryStore - 開発用の正本
//!
//! # 学習ポイント
//! - 「サーバー」（MemoryStore）と「接続」（MemoryStoreSession）を分ける
//! - generation で接続の寿命を表す（drop_connections で古い接続を無効化）
//! - テストから障害を注入できる（set_online / drop_connections）

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::domain::{OrderDocument, OrderId, OrderRecord};
use crate::ports::{Clock, ConnectError, Connector, StoreError, StoreSession, SystemClock};

/// In-process keyed document table.
///
/// Shared through `Arc`; every connector/session points at the same rows.
pub struct MemoryStore {
    rows: Mutex<HashMap<OrderId, OrderRecord>>,
    online: AtomicBool,
    /// 接続の世代。これと一致しない session は切断済み扱い
    generation: AtomicU64,
    reads: AtomicU64,
    connects: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            clock,
        })
    }

    pub fn connector(self: &Arc<Self>) -> MemoryStoreConnector {
        MemoryStoreConnector {
            store: Arc::clone(self),
        }
    }

    /// Going offline also closes every live session.
    pub fn set_online(&self, online: bool) {
        if !online {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.online.store(online, Ordering::SeqCst);
    }

    /// Close live sessions but keep accepting new connections.
    pub fn drop_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of point lookups that reached the table.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Peek at a row without going through a session.
    pub async fn record(&self, id: &OrderId) -> Option<OrderRecord> {
        self.rows.lock().await.get(id).cloned()
    }

    /// Put a row directly, bypassing sessions.
    pub async fn seed(&self, id: OrderId, document: OrderDocument) {
        let now = self.clock.now();
        self.rows.lock().await.insert(
            id.clone(),
            OrderRecord {
                id,
                document,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

pub struct MemoryStoreConnector {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl Connector for MemoryStoreConnector {
    type Connection = MemoryStoreSession;

    fn target(&self) -> &str {
        "memory-store"
    }

    async fn connect(&self) -> Result<MemoryStoreSession, ConnectError> {
        if !self.store.online.load(Ordering::SeqCst) {
            return Err(ConnectError::new(self.target(), "connection refused"));
        }
        self.store.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryStoreSession {
            store: Arc::clone(&self.store),
            generation: self.store.generation.load(Ordering::SeqCst),
        })
    }
}

pub struct MemoryStoreSession {
    store: Arc<MemoryStore>,
    generation: u64,
}

impl MemoryStoreSession {
    fn check(&self) -> Result<(), StoreError> {
        let alive = self.store.online.load(Ordering::SeqCst)
            && self.store.generation.load(Ordering::SeqCst) == self.generation;
        if alive {
            Ok(())
        } else {
            Err(StoreError::Connection("server closed the connection".to_string()))
        }
    }
}

#[async_trait]
impl StoreSession for MemoryStoreSession {
    async fn insert(&mut self, id: &OrderId, document: &OrderDocument) -> Result<(), StoreError> {
        self.check()?;
        let mut rows = self.store.rows.lock().await;
        if rows.contains_key(id) {
            return Err(StoreError::DuplicateKey(id.clone()));
        }
        let now = self.store.clock.now();
        rows.insert(
            id.clone(),
            OrderRecord {
                id: id.clone(),
                document: document.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get(&mut self, id: &OrderId) -> Result<Option<OrderRecord>, StoreError> {
        self.store.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.store.rows.lock().await.get(id).cloned())
    }

    async fn update(&mut self, id: &OrderId, document: &OrderDocument) -> Result<(), StoreError> {
        self.check()?;
        if let Some(record) = self.store.rows.lock().await.get_mut(id) {
            record.document = document.clone();
            record.updated_at = self.store.clock.now();
        }
        Ok(())
    }

    async fn delete(&mut self, id: &OrderId) -> Result<(), StoreError> {
        self.check()?;
        self.store.rows.lock().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn id(raw: &str) -> OrderId {
        OrderId::parse(raw).unwrap()
    }

    fn doc(value: serde_json::Value) -> OrderDocument {
        OrderDocument::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        let mut session = store.connector().connect().await.unwrap();

        session.insert(&id("A-1"), &doc(json!({"v": 1}))).await.unwrap();
        let err = session.insert(&id("A-1"), &doc(json!({"v": 2}))).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateKey(_)));
        let kept = store.record(&id("A-1")).await.unwrap();
        assert_eq!(kept.document, doc(json!({"v": 1})));
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_rows_are_no_ops() {
        let store = MemoryStore::new();
        let mut session = store.connector().connect().await.unwrap();

        session.update(&id("ghost"), &doc(json!({}))).await.unwrap();
        session.delete(&id("ghost")).await.unwrap();

        assert!(store.is_empty().await);
    }

    /// Clock the test can move forward.
    struct StepClock(std::sync::Mutex<DateTime<Utc>>);

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn update_refreshes_updated_at_only() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let clock = Arc::new(StepClock(std::sync::Mutex::new(created)));
        let store = MemoryStore::with_clock(clock.clone());
        let mut session = store.connector().connect().await.unwrap();

        session.insert(&id("A-1"), &doc(json!({"v": 1}))).await.unwrap();
        *clock.0.lock().unwrap() = later;
        session.update(&id("A-1"), &doc(json!({"v": 2}))).await.unwrap();

        let record = store.record(&id("A-1")).await.unwrap();
        assert_eq!(record.created_at, created);
        assert_eq!(record.updated_at, later);
        assert_eq!(record.document, doc(json!({"v": 2})));
    }

    #[tokio::test]
    async fn dropped_connections_fail_until_reconnect() {
        let store = MemoryStore::new();
        let connector = store.connector();
        let mut session = connector.connect().await.unwrap();

        store.drop_connections();
        let err = session.get(&id("A-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));

        let mut fresh = connector.connect().await.unwrap();
        assert!(fresh.get(&id("A-1")).await.unwrap().is_none());
        assert_eq!(store.connect_count(), 2);
    }

    #[tokio::test]
    async fn offline_store_refuses_connections() {
        let store = MemoryStore::new();
        store.set_online(false);
        assert!(store.connector().connect().await.is_err());
    }
}
