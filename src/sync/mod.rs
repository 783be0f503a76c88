//! Dashboard Synchronization
//!
//! Keeps the local projection of the campus (cards, chart series, map
//! overlays) in step with the backend.
//!
//! ## Architecture
//!
//! - **UpdateScheduler**: one loop receiving poll ticks, push events,
//!   section changes and manual refreshes; explicit `start()` / `stop()`
//! - **RefreshState**: the pure decision function (what to fetch now, what
//!   to coalesce), tested without a runtime
//! - **Pipeline**: the single fetch → transform → sink path shared by every
//!   domain, writing into a [`Projection`]
//! - **Events**: [`DashboardEvent`]s broadcast to rendering code
//!
//! At most one fetch per domain is in flight. Triggers that arrive during a
//! fetch collapse into a single follow-up fetch.

mod events;
mod pipeline;
mod scheduler;
mod state;

pub use events::DashboardEvent;
pub use pipeline::{fetch, ApplyReport, Projection, RefreshOutcome};
pub use scheduler::{SchedulerError, SchedulerStatus, UpdateScheduler};
pub use state::{Decision, DomainState, RefreshState};
