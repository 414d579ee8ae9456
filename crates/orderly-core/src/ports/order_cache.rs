//! OrderCache port - lookup cache（Redis または InMemory）
//!
//! cache はあくまで最適化。正しさはここに依存しない。
//!
//! # 実装
//! - CacheBackend: RedisCache（本番用）, MemoryCache（開発用）
//! - OrderCache: CacheLayer（エラーを飲み込む adapter）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Lookup, OrderDocument, OrderId, StepOutcome};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache command failed: {0}")]
    Command(String),
}

/// 文字列 key/value の素の操作
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// TTL なし。上書きか削除されるまで残る
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// coordinator が使う cache
///
/// どのメソッドもエラーを返さない。失敗はログに出して outcome で表す。
#[async_trait]
pub trait OrderCache: Send + Sync {
    async fn fetch(&self, id: &OrderId) -> Lookup<OrderDocument>;

    async fn put(&self, id: &OrderId, document: &OrderDocument) -> StepOutcome;

    async fn evict(&self, id: &OrderId) -> StepOutcome;
}
