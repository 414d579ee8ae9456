//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: adapter の注入と起動時検証
//! - **OrderCoordinator**: cache-aside 読み取りと三重書き込み
//! - **OrderListener**: ライフサイクルイベントの consumer（prefetch + 手動 ack）

pub mod builder;
pub mod coordinator;
pub mod listener;

// 主要な型を再エクスポート
pub use self::builder::{AppBuilder, BuildError};
pub use self::coordinator::{OrderCoordinator, TEST_MESSAGE};
pub use self::listener::{
    EventHandler, HandlerError, ListenerStats, LoggingHandler, OrderListener, PREFETCH,
};
