//! EventSink port - ライフサイクルイベントの送信（RabbitMQ または InMemory）
//!
//! # 二層構成
//! - **BusSession**: 接続 1 本に対する declare / publish / subscribe
//! - **EventSink**: coordinator から見た publisher。失敗はログだけ（at-most-once）
//!
//! consumer 側は Subscription から DeliveryLease を受け取り、処理後に ack する。

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::domain::{LifecycleEvent, StepOutcome};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no channel to the message bus")]
    NotConnected,

    #[error("message bus channel failed: {0}")]
    Channel(String),

    #[error("queue {0} is not declared")]
    UnknownQueue(String),

    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A delivered message that the consumer owns until it acks.
///
/// Same shape as a task lease: the holder must call `ack` exactly once.
#[async_trait]
pub trait DeliveryLease: Send {
    fn body(&self) -> &[u8];

    /// Manual acknowledgment. Consumes the lease.
    async fn ack(self: Box<Self>) -> Result<(), BusError>;
}

/// Stream of deliveries bounded by the prefetch limit.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery.
    ///
    /// `None` means the broker closed the subscription (connection lost).
    async fn next(&mut self) -> Option<Result<Box<dyn DeliveryLease>, BusError>>;
}

/// 接続 1 本ぶんの操作
#[async_trait]
pub trait BusSession: Send + Sync {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BusError>;

    /// default exchange に routing key = queue で送る
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BusError>;

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BusError>;
}

/// EventSink はライフサイクルイベントを bus に流す
///
/// # 設計原則
/// - `publish` は絶対に失敗を返さない（StepOutcome に落とす）
/// - `publish_raw` は診断用。エラーをそのまま返す
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_raw(&self, body: &[u8]) -> Result<(), BusError>;

    async fn publish(&self, event: &LifecycleEvent) -> StepOutcome {
        let body = match event.to_bytes() {
            Ok(body) => body,
            Err(err) => return StepOutcome::failed(BusError::Encode(err)),
        };
        match self.publish_raw(&body).await {
            Ok(()) => StepOutcome::Applied,
            Err(err) => {
                warn!(
                    order_id = %event.order_id(),
                    event = %event.kind(),
                    error = %err,
                    "event not published"
                );
                StepOutcome::failed(err)
            }
        }
    }
}
