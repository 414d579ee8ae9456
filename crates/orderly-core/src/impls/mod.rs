//! Impls - ports の実装
//!
//! # adapter（coordinator が使う層）
//! - **DurableStore**: StoreSession + 再接続 → OrderStore
//! - **CacheLayer**: CacheBackend + エラー吸収 → OrderCache
//! - **EventPublisher**: BusSession + 再接続 → EventSink
//!
//! # 本番用 backend
//! - **PostgresConnector** / PgSession（sqlx）
//! - **RedisCache**（redis）
//! - **AmqpConnector** / AmqpSession（lapin）
//!
//! # 開発・テスト用 backend
//! 障害注入（offline / 接続断）ができる：
//! - **MemoryStore**
//! - **MemoryCache**
//! - **MemoryBroker**

pub mod durable_store;
pub mod cache_layer;
pub mod event_publisher;

pub mod postgres_store;
pub mod redis_cache;
pub mod amqp_bus;

pub mod inmem_store;
pub mod inmem_cache;
pub mod inmem_bus;

// 主要な型を再エクスポート
pub use self::durable_store::DurableStore;
pub use self::cache_layer::CacheLayer;
pub use self::event_publisher::EventPublisher;
pub use self::postgres_store::{PgSession, PostgresConnector};
pub use self::redis_cache::RedisCache;
pub use self::amqp_bus::{AmqpConnector, AmqpSession};
pub use self::inmem_store::{MemoryStore, MemoryStoreConnector, MemoryStoreSession};
pub use self::inmem_cache::MemoryCache;
pub use self::inmem_bus::{MemoryBroker, MemoryBrokerConnector, MemoryBusSession};
