//! EventPublisher - ライフサイクルイベントの送信 adapter
//!
//! 接続（または heal）のたびに queue を durable で宣言し直す。
//! 送信に失敗したメッセージは捨てる（at-most-once）。
//! 再接続は 1 回だけ試し、sleep しない。bus が落ちている間の mutation を待たせない。

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::ports::{BusError, BusSession, Connector, EventSink};
use crate::supervisor::{ConnectionSupervisor, RetryPolicy, Supervised, SupervisorError};

pub struct EventPublisher<C: Connector>
where
    C::Connection: BusSession,
{
    inner: Supervised<C>,
    queue: String,
}

impl<C: Connector> EventPublisher<C>
where
    C::Connection: BusSession,
{
    pub fn new(
        supervisor: ConnectionSupervisor<C>,
        heal_policy: RetryPolicy,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            inner: Supervised::new(supervisor, heal_policy),
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Block until connected and declare the queue.
    ///
    /// If the declaration fails the slot stays empty and the first publish heals it.
    pub async fn establish(&self) -> Result<(), SupervisorError> {
        let mut slot = self.inner.lock().await;
        let session = self.inner.supervisor().acquire().await?;
        match session.declare_queue(&self.queue, true).await {
            Ok(()) => *slot = Some(session),
            Err(err) => {
                warn!(backend = self.inner.target(), queue = %self.queue, error = %err, "queue declaration failed");
            }
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    /// One reconnect attempt, then re-declare the queue on the new channel.
    async fn reconnect(&self, slot: &mut Option<C::Connection>) -> bool {
        if !self.inner.try_heal(slot).await {
            return false;
        }
        if let Some(session) = slot.as_ref()
            && let Err(err) = session.declare_queue(&self.queue, true).await
        {
            warn!(backend = self.inner.target(), queue = %self.queue, error = %err, "queue declaration failed");
            slot.take();
            self.inner.cool_down().await;
            return false;
        }
        true
    }
}

#[async_trait]
impl<C: Connector> EventSink for EventPublisher<C>
where
    C::Connection: BusSession,
{
    async fn publish_raw(&self, body: &[u8]) -> Result<(), BusError> {
        let mut slot = self.inner.lock().await;
        if slot.is_none() && !self.reconnect(&mut slot).await {
            return Err(BusError::NotConnected);
        }
        let Some(session) = slot.as_ref() else {
            return Err(BusError::NotConnected);
        };
        match session.publish(&self.queue, body).await {
            Ok(()) => {
                debug!(queue = %self.queue, bytes = body.len(), "published");
                Ok(())
            }
            Err(err) => {
                // このメッセージは失われる。次の publish のために接続だけ直す
                self.reconnect(&mut slot).await;
                Err(err)
            }
        }
    }
}
