//! OrderListener - ライフサイクルイベントの consumer
//!
//! # フロー
//! 1. 接続（上限なしのリトライ）
//! 2. queue を durable で宣言、prefetch 1 で subscribe
//! 3. 1 件ずつ: deserialize → handler → ack
//! 4. 接続が切れたら supervisor の policy 分だけ待って 1 に戻る（外側のループで再開）
//!
//! 壊れたメッセージも handler の失敗も ack して捨てる（dead-letter はしない）。

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::LifecycleEvent;
use crate::ports::{BusError, BusSession, Connector, DeliveryLease};
use crate::supervisor::{ConnectionSupervisor, SupervisorError, shutdown_requested};

/// Unacknowledged deliveries the broker may hand the listener at once.
pub const PREFETCH: u16 = 1;

#[derive(Debug, Error)]
#[error("event handler failed: {0}")]
pub struct HandlerError(pub String);

/// What the listener does with each well-formed event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &LifecycleEvent) -> Result<(), HandlerError>;
}

/// Default handler: log and move on.
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &LifecycleEvent) -> Result<(), HandlerError> {
        info!(event = %event.kind(), order_id = %event.order_id(), "received");
        Ok(())
    }
}

/// Counters since the listener was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub processed: u64,
    pub malformed: u64,
    pub failed: u64,
    pub restarts: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
    restarts: AtomicU64,
}

/// Why a subscription ended.
enum Exit {
    Shutdown,
    ConnectionLost,
}

pub struct OrderListener<C: Connector>
where
    C::Connection: BusSession,
{
    supervisor: ConnectionSupervisor<C>,
    queue: String,
    handler: Arc<dyn EventHandler>,
    counters: Counters,
}

impl<C: Connector> OrderListener<C>
where
    C::Connection: BusSession,
{
    pub fn new(
        supervisor: ConnectionSupervisor<C>,
        queue: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            supervisor,
            queue: queue.into(),
            handler,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            processed: self.counters.processed.load(Ordering::SeqCst),
            malformed: self.counters.malformed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            restarts: self.counters.restarts.load(Ordering::SeqCst),
        }
    }

    /// Consume until `shutdown` flips to `true`.
    ///
    /// Only a bounded supervisor policy running out ends this with an error.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        let mut shutdown = Some(shutdown);
        // 何も処理できずに終わった subscription の連続回数
        let mut idle_restarts = 0u32;

        loop {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                break;
            }

            let session = tokio::select! {
                acquired = self.supervisor.acquire() => match acquired {
                    Ok(session) => session,
                    Err(SupervisorError::Cancelled { .. }) => break,
                    Err(err) => return Err(err),
                },
                _ = shutdown_requested(&mut shutdown) => break,
            };

            let seen_before = self.seen();
            match self.consume(&session, &mut shutdown).await {
                Ok(Exit::Shutdown) => break,
                Ok(Exit::ConnectionLost) => {
                    warn!(queue = %self.queue, "connection lost; restarting subscription");
                }
                Err(err) => {
                    warn!(queue = %self.queue, error = %err, "subscription failed; restarting");
                }
            }
            drop(session);
            self.counters.restarts.fetch_add(1, Ordering::SeqCst);

            if self.seen() > seen_before {
                idle_restarts = 0;
            }
            idle_restarts = idle_restarts.saturating_add(1);
            let delay = self.supervisor.policy().next_delay(idle_restarts);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!(queue = %self.queue, "listener stopped");
        Ok(())
    }

    /// Deliveries handled so far, whatever their outcome.
    fn seen(&self) -> u64 {
        let stats = self.stats();
        stats.processed + stats.malformed + stats.failed
    }

    async fn consume(
        &self,
        session: &C::Connection,
        shutdown: &mut Option<watch::Receiver<bool>>,
    ) -> Result<Exit, BusError> {
        session.declare_queue(&self.queue, true).await?;
        let mut subscription = session.subscribe(&self.queue, PREFETCH).await?;
        info!(queue = %self.queue, prefetch = PREFETCH, "waiting for messages");

        loop {
            // 受信待ちは shutdown と競合させる（処理中のメッセージは最後まで処理する）
            let next = tokio::select! {
                next = subscription.next() => next,
                _ = shutdown_requested(shutdown) => return Ok(Exit::Shutdown),
            };
            let Some(delivery) = next else {
                return Ok(Exit::ConnectionLost);
            };
            self.process(delivery?).await;
        }
    }

    async fn process(&self, lease: Box<dyn DeliveryLease>) {
        match LifecycleEvent::from_bytes(lease.body()) {
            Ok(event) => match self.handler.handle(&event).await {
                Ok(()) => {
                    self.counters.processed.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    error!(order_id = %event.order_id(), error = %err, "handler failed; dropping message");
                }
            },
            Err(err) => {
                self.counters.malformed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    body = %String::from_utf8_lossy(lease.body()),
                    error = %err,
                    "malformed message; dropping"
                );
            }
        }

        if let Err(err) = lease.ack().await {
            warn!(error = %err, "ack failed; message will be redelivered");
        }
    }
}
