//! Events - 注文のライフサイクルイベント
//!
//! EventSink（bus）へ送る通知。core は中身を解釈しない（emit と consume のみ）。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::order::OrderId;

/// Which transition happened.
///
/// Wire names keep the `order_` prefix the downstream consumers already expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "order_created")]
    Created,
    #[serde(rename = "order_updated")]
    Updated,
    #[serde(rename = "order_deleted")]
    Deleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "order_created",
            EventKind::Updated => "order_updated",
            EventKind::Deleted => "order_deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{event, order_id}` notification, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    event: EventKind,
    order_id: OrderId,
}

impl LifecycleEvent {
    pub fn new(event: EventKind, order_id: OrderId) -> Self {
        Self { event, order_id }
    }

    pub fn created(order_id: OrderId) -> Self {
        Self::new(EventKind::Created, order_id)
    }

    pub fn updated(order_id: OrderId) -> Self {
        Self::new(EventKind::Updated, order_id)
    }

    pub fn deleted(order_id: OrderId) -> Self {
        Self::new(EventKind::Deleted, order_id)
    }

    pub fn kind(&self) -> EventKind {
        self.event
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
