//! Chart History
//!
//! Rolling per-entity history buffers feeding the dashboard charts:
//!
//! - **TimeSeries**: bounded buffer, sorted by timestamp, oldest evicted first
//! - **TimeSeriesStore**: one TimeSeries per (domain, entity, metric)
//!
//! # Ordering
//!
//! ```text
//! append(1000) append(3000) append(2000) append(3000')
//!    [1000]    [1000,3000]  [1000,2000,3000]  [1000,2000,3000']
//!                                              ^ overwritten, not duplicated
//! ```
//!
//! A fetched history is authoritative: `replace_history` discards whatever
//! the rolling buffer accumulated for that key.

mod series;
mod store;

pub use series::{InsertOutcome, TimeSeries};
pub use store::{SeriesKey, StoreStats, TimeSeriesStore};
