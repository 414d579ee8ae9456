//! Outcome model: what each backend call actually did.
//!
//! Backend failures are swallowed by design (availability over consistency), but
//! never silently: every call yields one of these values, the coordinator logs the
//! degraded ones, and the acknowledgment carries them back to whoever asks.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::order::OrderId;

/// The three backends a mutation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Store,
    Cache,
    Bus,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Store => "store",
            Backend::Cache => "cache",
            Backend::Bus => "bus",
        })
    }
}

/// Result of a single write-side backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Failed { reason: String },
}

impl StepOutcome {
    pub fn failed(reason: impl fmt::Display) -> Self {
        StepOutcome::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StepOutcome::Applied)
    }
}

/// Result of a read-side backend call.
///
/// `Miss` is a normal answer; `Failed` means the backend could not answer at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    Failed(String),
}

impl<T> Lookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Failed(_) => None,
        }
    }
}

/// Per-backend outcomes of one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub store: StepOutcome,
    pub cache: StepOutcome,
    pub bus: StepOutcome,
}

impl WriteReport {
    pub fn is_fully_applied(&self) -> bool {
        self.store.is_applied() && self.cache.is_applied() && self.bus.is_applied()
    }

    /// Backends whose step did not apply, in write order.
    pub fn degraded(&self) -> Vec<Backend> {
        [
            (Backend::Store, &self.store),
            (Backend::Cache, &self.cache),
            (Backend::Bus, &self.bus),
        ]
        .into_iter()
        .filter(|(_, outcome)| !outcome.is_applied())
        .map(|(backend, _)| backend)
        .collect()
    }
}

/// Success acknowledgment returned for every accepted mutation.
///
/// Only `status` and `order_id` go over the wire; the report is for logs and tests.
#[derive(Debug, Clone, Serialize)]
pub struct OrderAck {
    pub status: &'static str,
    pub order_id: OrderId,
    #[serde(skip)]
    pub report: WriteReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_lists_failed_backends_in_write_order() {
        let report = WriteReport {
            store: StepOutcome::Applied,
            cache: StepOutcome::failed("connection refused"),
            bus: StepOutcome::failed("no channel"),
        };
        assert!(!report.is_fully_applied());
        assert_eq!(report.degraded(), vec![Backend::Cache, Backend::Bus]);
    }

    #[test]
    fn ack_serializes_without_report() {
        let ack = OrderAck {
            status: "Order created",
            order_id: OrderId::parse("A-1").unwrap(),
            report: WriteReport {
                store: StepOutcome::Applied,
                cache: StepOutcome::Applied,
                bus: StepOutcome::Applied,
            },
        };
        assert_eq!(
            serde_json::to_value(&ack).unwrap(),
            serde_json::json!({"status": "Order created", "order_id": "A-1"})
        );
    }
}
