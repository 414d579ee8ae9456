//! Redis backend
//!
//! multiplexed connection を遅延して作り、接続系のエラーが出たら捨てる。
//! 次の呼び出しで作り直す（supervisor は通さない）。
//! WRONGTYPE などのコマンドエラーでは接続を捨てない。

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::{CacheBackend, CacheError};

pub struct RedisCache {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCache {
    /// Parses the URL only; nothing is dialed until the first command.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        debug!(backend = "redis", "connected");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the connection only when the failure says it is unusable.
    async fn failed(&self, err: RedisError) -> CacheError {
        if is_connection_error(&err) {
            self.conn.lock().await.take();
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.failed(err).await),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        match conn.set::<_, _, ()>(key, value).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.failed(err).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        match conn.del::<_, ()>(key).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.failed(err).await),
        }
    }
}
