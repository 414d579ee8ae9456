//! Connection Supervisor - 接続の確立と修復
//!
//! # 方針
//! - 起動時: 接続できるまでブロックして待つ（固定 5 秒間隔、上限なし）
//! - リクエスト中の失敗: その場で再接続を試みる（回数に上限あり）
//! - バックグラウンドの health check ループは持たない
//! - どちらも shutdown シグナル（watch）でキャンセルできる
//!
//! `Supervised` は接続 1 本を Mutex で包んだスロット。adapter はこれを所有し、
//! 同じ接続を複数リクエストが同時に触らないようにする。
//!
//! 呼び出し元を待たせてはいけない adapter（event publisher）は `try_heal` を使う:
//! 1 回だけ接続を試し、失敗したら cool-down の間は接続を試さない。

mod retry;

pub use retry::RetryPolicy;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ports::Connector;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("connection to {target} cancelled by shutdown")]
    Cancelled { target: String },

    #[error("gave up connecting to {target} after {attempts} attempts: {last_error}")]
    Exhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },
}

/// Produces live connections, retrying according to a policy.
pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    policy: RetryPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            shutdown: None,
        }
    }

    /// Cancel pending acquisitions once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn target(&self) -> &str {
        self.connector.target()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Block until connected, using the supervisor's own policy.
    pub async fn acquire(&self) -> Result<C::Connection, SupervisorError> {
        self.acquire_with(&self.policy).await
    }

    pub async fn acquire_with(
        &self,
        policy: &RetryPolicy,
    ) -> Result<C::Connection, SupervisorError> {
        let mut shutdown = self.shutdown.clone();
        let mut attempts = 0u32;

        loop {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                return Err(self.cancelled());
            }

            attempts += 1;
            match self.connector.connect().await {
                Ok(conn) => {
                    if attempts > 1 {
                        info!(backend = self.target(), attempts, "connected after retrying");
                    } else {
                        debug!(backend = self.target(), "connected");
                    }
                    return Ok(conn);
                }
                Err(err) => {
                    if policy.is_exhausted(attempts) {
                        warn!(backend = self.target(), attempt = attempts, error = %err, "connection attempt failed; giving up");
                        return Err(SupervisorError::Exhausted {
                            target: self.target().to_string(),
                            attempts,
                            last_error: err.reason,
                        });
                    }

                    let delay = policy.next_delay(attempts);
                    warn!(
                        backend = self.target(),
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "connection attempt failed; retrying"
                    );

                    // sleep と shutdown を競合させる
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(&mut shutdown) => return Err(self.cancelled()),
                    }
                }
            }
        }
    }

    fn cancelled(&self) -> SupervisorError {
        SupervisorError::Cancelled {
            target: self.target().to_string(),
        }
    }
}

/// Resolves once shutdown is requested; never resolves without a receiver.
pub(crate) async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown.as_mut() else {
        return std::future::pending::<()>().await;
    };
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // sender が drop された: もう shutdown は来ない
            return std::future::pending::<()>().await;
        }
    }
}

/// One shared connection slot plus the supervisor that can refill it.
pub struct Supervised<C: Connector> {
    supervisor: ConnectionSupervisor<C>,
    heal_policy: RetryPolicy,
    slot: Mutex<Option<C::Connection>>,
    /// `try_heal` does not connect before this instant.
    retry_after: Mutex<Option<Instant>>,
}

impl<C: Connector> Supervised<C> {
    /// Empty slot; the owning adapter fills it at startup or on the first heal.
    pub fn new(supervisor: ConnectionSupervisor<C>, heal_policy: RetryPolicy) -> Self {
        Self {
            supervisor,
            heal_policy,
            slot: Mutex::new(None),
            retry_after: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &str {
        self.supervisor.target()
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<C> {
        &self.supervisor
    }

    /// Lock the slot. Hold the guard for the whole backend call.
    pub async fn lock(&self) -> MutexGuard<'_, Option<C::Connection>> {
        self.slot.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Drop whatever is in `slot` and reconnect with the bounded heal policy.
    ///
    /// Returns `true` when the slot holds a fresh connection afterwards.
    pub async fn heal(&self, slot: &mut Option<C::Connection>) -> bool {
        slot.take();
        match self.supervisor.acquire_with(&self.heal_policy).await {
            Ok(conn) => {
                info!(backend = self.target(), "reconnected");
                *slot = Some(conn);
                true
            }
            Err(err) => {
                warn!(backend = self.target(), error = %err, "reconnect failed; continuing without a connection");
                false
            }
        }
    }

    /// Drop whatever is in `slot` and make a single connection attempt, without sleeping.
    ///
    /// After a failure, calls within the heal policy's first delay return `false`
    /// immediately.
    pub async fn try_heal(&self, slot: &mut Option<C::Connection>) -> bool {
        slot.take();
        let mut retry_after = self.retry_after.lock().await;
        if retry_after.is_some_and(|at| Instant::now() < at) {
            debug!(backend = self.target(), "reconnect skipped; cooling down");
            return false;
        }

        let once = self.heal_policy.clone().with_max_attempts(1);
        match self.supervisor.acquire_with(&once).await {
            Ok(conn) => {
                info!(backend = self.target(), "reconnected");
                *retry_after = None;
                *slot = Some(conn);
                true
            }
            Err(err) => {
                *retry_after = Some(Instant::now() + self.heal_policy.next_delay(1));
                warn!(backend = self.target(), error = %err, "reconnect failed; continuing without a connection");
                false
            }
        }
    }

    /// Start a cool-down as if `try_heal` had just failed.
    pub async fn cool_down(&self) {
        *self.retry_after.lock().await = Some(Instant::now() + self.heal_policy.next_delay(1));
    }
}
