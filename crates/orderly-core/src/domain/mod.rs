//! Domain model (order records, lifecycle events, outcomes, errors).

pub mod order;
pub mod events;
pub mod outcome;
pub mod errors;

pub use self::order::{OrderDocument, OrderId, OrderRecord};
pub use self::events::{EventKind, LifecycleEvent};
pub use self::outcome::{Backend, Lookup, OrderAck, StepOutcome, WriteReport};
pub use self::errors::{ErrorKind, OrderError};
