//! Progress reporting for running workflows
//!
//! ```text
//! ┌──────────────┐  mpsc   ┌────────────┐  bounded queue  ┌────────────┐
//! │  Scheduler   │────────▶│ pump task  │────────────────▶│ Subscriber │
//! │  task        │ publish └─────┬──────┘                 │ (CLI, ...) │
//! └──────────────┘               │ progress field         └────────────┘
//!                                ▼
//!                        ┌──────────────┐
//!                        │   Registry   │
//!                        └──────────────┘
//! ```
//!
//! Publishing never waits on the registry or on subscribers. A slow or
//! dropped subscriber only loses its own intermediate lines.

pub mod bus;
pub mod types;

pub use bus::{
    ProgressReporter, ProgressSubscription, SharedProgressReporter, DEFAULT_SUBSCRIBER_BUFFER,
};
pub use types::{ProgressEvent, ProgressFilter, ProgressKind};
