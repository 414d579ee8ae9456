//! Errors - 呼び出し側に見えるエラー
//!
//! backend の障害はここには現れない（StepOutcome に記録してログに流す）。
//! 呼び出し側が受け取るのはリクエスト自体の問題だけ。

use thiserror::Error;

use super::order::OrderId;

/// ErrorKind は HTTP などの表層で使う分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 不正なリクエスト（id 欠落など）
    Validation,
    /// 存在しない order
    NotFound,
    /// 既存キーとの衝突
    Conflict,
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order ID is required")]
    MissingId,

    #[error("invalid order document: {0}")]
    InvalidDocument(String),

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Order already exists: {0}")]
    Duplicate(OrderId),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::MissingId | OrderError::InvalidDocument(_) => ErrorKind::Validation,
            OrderError::NotFound(_) => ErrorKind::NotFound,
            OrderError::Duplicate(_) => ErrorKind::Conflict,
        }
    }
}
