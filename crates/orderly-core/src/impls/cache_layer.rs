//! CacheLayer - lookup cache の adapter
//!
//! backend のエラーはすべてここで飲み込む。coordinator からは
//! Lookup / StepOutcome しか見えない。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::domain::{Lookup, OrderDocument, OrderId, StepOutcome};
use crate::ports::{CacheBackend, OrderCache};

pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl OrderCache for CacheLayer {
    async fn fetch(&self, id: &OrderId) -> Lookup<OrderDocument> {
        match self.backend.get(&id.cache_key()).await {
            Ok(Some(text)) => match OrderDocument::from_text(&text) {
                Ok(document) => Lookup::Hit(document),
                Err(err) => {
                    // 壊れた値は miss 扱い。次の書き込みで上書きされる
                    warn!(order_id = %id, error = %err, "undecodable cache entry; treating as miss");
                    Lookup::Miss
                }
            },
            Ok(None) => Lookup::Miss,
            Err(err) => {
                warn!(order_id = %id, error = %err, "cache read failed");
                Lookup::Failed(err.to_string())
            }
        }
    }

    async fn put(&self, id: &OrderId, document: &OrderDocument) -> StepOutcome {
        let text = match document.to_text() {
            Ok(text) => text,
            Err(err) => return StepOutcome::failed(err),
        };
        match self.backend.set(&id.cache_key(), &text).await {
            Ok(()) => StepOutcome::Applied,
            Err(err) => {
                warn!(order_id = %id, error = %err, "cache write failed");
                StepOutcome::failed(err)
            }
        }
    }

    async fn evict(&self, id: &OrderId) -> StepOutcome {
        match self.backend.delete(&id.cache_key()).await {
            Ok(()) => StepOutcome::Applied,
            Err(err) => {
                warn!(order_id = %id, error = %err, "cache eviction failed");
                StepOutcome::failed(err)
            }
        }
    }
}
