//! Refresh decision state
//!
//! Pure bookkeeping behind the scheduler: which domains are being fetched,
//! which need one more fetch once the current one lands, and which were
//! left stale by a deferred push. Every method returns the domains whose
//! fetch must start now; the caller does the I/O.
//!
//! ```text
//!            tick / push / section change
//!   Fresh ─────────────────────────────────▶ Refreshing
//!     ▲                                        │  push / section change
//!     │ complete (ok or error),                │  while refreshing
//!     │ nothing pending                        ▼
//!     └──────────────────────────────────── pending = true
//!                                   complete: fetch once more
//! ```

use serde::Serialize;
use std::collections::BTreeSet;

use crate::model::{Domain, Section};

/// Refresh state of one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    Fresh,
    Refreshing,
}

/// What the caller should do after feeding an input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    /// Domains whose fetch starts now
    pub start: Vec<Domain>,
    /// Triggers folded into an in-flight fetch
    pub coalesced: usize,
}

impl Decision {
    fn merge(&mut self, other: Decision) {
        self.start.extend(other.start);
        self.coalesced += other.coalesced;
    }
}

#[derive(Debug, Clone)]
pub struct RefreshState {
    active: Section,
    in_flight: BTreeSet<Domain>,
    pending: BTreeSet<Domain>,
    stale: BTreeSet<Domain>,
    defer_inactive_push: bool,
}

impl RefreshState {
    pub fn new(active: Section, defer_inactive_push: bool) -> Self {
        Self {
            active,
            in_flight: BTreeSet::new(),
            pending: BTreeSet::new(),
            stale: BTreeSet::new(),
            defer_inactive_push,
        }
    }

    pub fn active_section(&self) -> Section {
        self.active
    }

    pub fn state(&self, domain: Domain) -> DomainState {
        if self.in_flight.contains(&domain) {
            DomainState::Refreshing
        } else {
            DomainState::Fresh
        }
    }

    pub fn in_flight(&self) -> impl Iterator<Item = Domain> + '_ {
        self.in_flight.iter().copied()
    }

    pub fn pending(&self) -> impl Iterator<Item = Domain> + '_ {
        self.pending.iter().copied()
    }

    pub fn stale(&self) -> impl Iterator<Item = Domain> + '_ {
        self.stale.iter().copied()
    }

    /// Poll tick or manual refresh: start every domain not already in flight
    ///
    /// Domains in flight are skipped, not queued: the tick after next will
    /// find them fresh again.
    pub fn on_tick(&mut self) -> Decision {
        let mut decision = Decision::default();
        for domain in Domain::all() {
            if self.in_flight.insert(*domain) {
                self.stale.remove(domain);
                decision.start.push(*domain);
            }
        }
        decision
    }

    /// Push event for `domain`
    pub fn on_push(&mut self, domain: Domain) -> Decision {
        if self.defer_inactive_push && !self.active.covers(domain) {
            self.stale.insert(domain);
            return Decision::default();
        }
        self.request(domain)
    }

    /// Navigation to `section`: refresh every domain it shows
    pub fn on_section_change(&mut self, section: Section) -> Decision {
        self.active = section;
        let mut decision = Decision::default();
        for domain in section.domains() {
            decision.merge(self.request(*domain));
        }
        decision
    }

    /// A fetch for `domain` finished, successfully or not
    pub fn on_complete(&mut self, domain: Domain) -> Decision {
        self.in_flight.remove(&domain);
        if self.pending.remove(&domain) {
            self.in_flight.insert(domain);
            Decision {
                start: vec![domain],
                coalesced: 0,
            }
        } else {
            Decision::default()
        }
    }

    fn request(&mut self, domain: Domain) -> Decision {
        if self.in_flight.contains(&domain) {
            self.pending.insert(domain);
            Decision {
                start: Vec::new(),
                coalesced: 1,
            }
        } else {
            self.in_flight.insert(domain);
            self.stale.remove(&domain);
            Decision {
                start: vec![domain],
                coalesced: 0,
            }
        }
    }
}
