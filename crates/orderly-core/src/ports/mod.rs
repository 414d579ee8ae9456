//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（PostgreSQL, Redis, RabbitMQ）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - PostgreSQL が source of truth（正本）
//! - Redis は派生ビュー（古くてもよい、無くてもよい）
//! - RabbitMQ は best-effort の通知チャネル

pub mod connector;
pub mod order_store;
pub mod order_cache;
pub mod event_sink;
pub mod clock;

// 主要な trait を再エクスポート
pub use self::connector::{ConnectError, Connector};
pub use self::order_store::{OrderStore, StoreError, StoreSession};
pub use self::order_cache::{CacheBackend, CacheError, OrderCache};
pub use self::event_sink::{BusError, BusSession, DeliveryLease, EventSink, Subscription};
pub use self::clock::{Clock, FixedClock, SystemClock};
