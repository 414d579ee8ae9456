//! AppBuilder - coordinator の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: backend の指定漏れは build() で分かる
//! - グローバル変数ではなく adapter を注入する

use std::sync::Arc;

use crate::app::OrderCoordinator;
use crate::ports::{EventSink, OrderCache, OrderStore};

/// AppBuilder は OrderCoordinator を構築
///
/// # 使用例
/// ```ignore
/// let coordinator = AppBuilder::new()
///     .store(Arc::new(durable_store))
///     .cache(Arc::new(cache_layer))
///     .events(Arc::new(event_publisher))
///     .build()?;
/// ```
#[derive(Default)]
pub struct AppBuilder {
    store: Option<Arc<dyn OrderStore>>,
    cache: Option<Arc<dyn OrderCache>>,
    events: Option<Arc<dyn EventSink>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing backends: {0:?}. Every backend must be wired before build().")]
    MissingBackends(Vec<&'static str>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn OrderStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn OrderCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// # 検証
    /// - store / cache / events が全て指定されているかチェック
    /// - 不足があれば BuildError::MissingBackends を返す
    pub fn build(self) -> Result<OrderCoordinator, BuildError> {
        match (self.store, self.cache, self.events) {
            (Some(store), Some(cache), Some(events)) => {
                Ok(OrderCoordinator::new(store, cache, events))
            }
            (store, cache, events) => {
                let missing = [
                    ("store", store.is_none()),
                    ("cache", cache.is_none()),
                    ("events", events.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| name)
                .collect();
                Err(BuildError::MissingBackends(missing))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{
        CacheLayer, DurableStore, EventPublisher, MemoryBroker, MemoryCache, MemoryStore,
    };
    use crate::supervisor::{ConnectionSupervisor, RetryPolicy};

    fn store() -> Arc<dyn OrderStore> {
        Arc::new(DurableStore::new(
            ConnectionSupervisor::new(MemoryStore::new().connector(), RetryPolicy::default()),
            RetryPolicy::default().with_max_attempts(1),
        ))
    }

    fn cache() -> Arc<dyn OrderCache> {
        Arc::new(CacheLayer::new(Arc::new(MemoryCache::new())))
    }

    fn events() -> Arc<dyn EventSink> {
        Arc::new(EventPublisher::new(
            ConnectionSupervisor::new(MemoryBroker::new().connector(), RetryPolicy::default()),
            RetryPolicy::default().with_max_attempts(1),
            "orders",
        ))
    }

    #[test]
    fn test_build_success() {
        let app = AppBuilder::new()
            .store(store())
            .cache(cache())
            .events(events())
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_backends() {
        let app = AppBuilder::new().cache(cache()).build();
        assert!(matches!(
            app,
            Err(BuildError::MissingBackends(missing)) if missing == vec!["store", "events"]
        ));
    }

    #[test]
    fn test_build_nothing_wired() {
        let app = AppBuilder::new().build();
        assert!(matches!(
            app,
            Err(BuildError::MissingBackends(missing)) if missing.len() == 3
        ));
    }
}
