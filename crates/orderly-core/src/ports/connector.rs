//! Connector port - backend への接続を 1 本作る
//!
//! 接続の「作り方」だけを知っている。リトライや再接続の判断は
//! supervisor 側（ConnectionSupervisor / Supervised）が持つ。
//!
//! # 実装
//! - **PostgresConnector** / **AmqpConnector**: 本番用
//! - **MemoryStoreConnector** / **MemoryBrokerConnector**: 開発・テスト用

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("could not connect to {target}: {reason}")]
pub struct ConnectError {
    pub target: String,
    pub reason: String,
}

impl ConnectError {
    pub fn new(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Connector は接続を 1 回だけ試みる
///
/// # Thread Safety
/// - `Send + Sync` を要求（supervisor が複数タスクから呼ぶ）
/// - Connection は Mutex に入れて共有するので `Send` が必要
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// ログに出す接続先の名前（"postgres", "rabbitmq" など）
    fn target(&self) -> &str;

    async fn connect(&self) -> Result<Self::Connection, ConnectError>;
}
