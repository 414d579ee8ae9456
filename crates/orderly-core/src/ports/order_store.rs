//! OrderStore port - 正本（source of truth）
//!
//! 二層に分けている：
//! - **StoreSession**: 生きている接続 1 本に対する素の CRUD（エラーはそのまま返す）
//! - **OrderStore**: coordinator から見た store。失敗は飲み込んで outcome にする
//!
//! # 実装
//! - StoreSession: PgSession（PostgreSQL）, MemoryStoreSession（開発用）
//! - OrderStore: DurableStore（再接続つきの adapter）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Lookup, OrderDocument, OrderError, OrderId, OrderRecord, StepOutcome};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} already exists")]
    DuplicateKey(OrderId),

    #[error("store connection lost: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),
}

/// 接続 1 本ぶんの操作
///
/// `&mut self` なのは PgConnection がそれを要求するため。
/// 排他は呼び出し側（DurableStore の Mutex）が保証する。
#[async_trait]
pub trait StoreSession: Send {
    /// テーブルが無ければ作る（起動時に 1 回）
    async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&mut self, id: &OrderId, document: &OrderDocument) -> Result<(), StoreError>;

    async fn get(&mut self, id: &OrderId) -> Result<Option<OrderRecord>, StoreError>;

    /// 上書き + updated_at 更新。存在しない id は何もしない
    async fn update(&mut self, id: &OrderId, document: &OrderDocument) -> Result<(), StoreError>;

    /// 存在しない id は何もしない
    async fn delete(&mut self, id: &OrderId) -> Result<(), StoreError>;
}

/// coordinator が使う store
///
/// # 設計原則
/// - `insert` の重複だけは呼び出し側に返す（`OrderError::Duplicate`）
/// - それ以外の失敗は再接続を試みたうえで `StepOutcome::Failed` / `Lookup::Failed`
/// - 失敗した書き込みはリトライしない（書き込みは落ちる）
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(
        &self,
        id: &OrderId,
        document: &OrderDocument,
    ) -> Result<StepOutcome, OrderError>;

    async fn get(&self, id: &OrderId) -> Lookup<OrderRecord>;

    async fn update(&self, id: &OrderId, document: &OrderDocument) -> StepOutcome;

    async fn delete(&self, id: &OrderId) -> StepOutcome;
}
