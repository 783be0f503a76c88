//! Monitored domains and dashboard sections
//!
//! The set of domains is closed: every push event name, backend path and
//! history buffer is keyed by one of these six variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One monitored subsystem of the campus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    /// Parking lots (capacity / available spots)
    Parking,
    /// Buildings and their rooms (occupancy, opening hours)
    Buildings,
    /// Wireless access points (online state, signal, users)
    Wifi,
    /// Weather stations
    Weather,
    /// Buses (position, line, passengers)
    TransportBus,
    /// Taxis (position, zone, availability)
    TransportTaxi,
}

impl Domain {
    /// Get all domains for iteration
    pub fn all() -> &'static [Domain] {
        &[
            Domain::Parking,
            Domain::Buildings,
            Domain::Wifi,
            Domain::Weather,
            Domain::TransportBus,
            Domain::TransportTaxi,
        ]
    }

    /// Stable short name used in logs, config keys and the CLI
    pub fn name(&self) -> &'static str {
        match self {
            Domain::Parking => "parking",
            Domain::Buildings => "buildings",
            Domain::Wifi => "wifi",
            Domain::Weather => "weather",
            Domain::TransportBus => "transport-bus",
            Domain::TransportTaxi => "transport-taxi",
        }
    }

    /// Path segment of this domain on the backend REST API
    pub fn path(&self) -> &'static str {
        match self {
            Domain::Parking => "parking",
            Domain::Buildings => "batiments",
            Domain::Wifi => "wifi",
            Domain::Weather => "meteo",
            Domain::TransportBus => "transport/bus",
            Domain::TransportTaxi => "transport/taxi",
        }
    }

    /// Whether the backend keeps a per-entity history for this domain
    pub fn has_history(&self) -> bool {
        !matches!(self, Domain::TransportBus | Domain::TransportTaxi)
    }

    /// Name of the push event announcing that this domain changed
    pub fn event_name(&self) -> &'static str {
        match self {
            Domain::Parking => "update_parking",
            Domain::Buildings => "update_batiment",
            Domain::Wifi => "update_wifi",
            Domain::Weather => "update_meteo",
            Domain::TransportBus => "update_transport_bus",
            Domain::TransportTaxi => "update_transport_taxi",
        }
    }

    /// Resolve a push event name to its domain
    pub fn from_event_name(name: &str) -> Option<Domain> {
        Domain::all()
            .iter()
            .copied()
            .find(|d| d.event_name() == name)
    }

    /// The dashboard section that displays this domain
    pub fn section(&self) -> Section {
        match self {
            Domain::Parking => Section::Parking,
            Domain::Buildings => Section::Buildings,
            Domain::Wifi => Section::Wifi,
            Domain::Weather => Section::Weather,
            Domain::TransportBus | Domain::TransportTaxi => Section::Transport,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Domain {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let domain = match lowered.as_str() {
            "parking" => Domain::Parking,
            "buildings" | "batiments" | "batiment" => Domain::Buildings,
            "wifi" => Domain::Wifi,
            "weather" | "meteo" => Domain::Weather,
            "transport-bus" | "transport/bus" | "bus" => Domain::TransportBus,
            "transport-taxi" | "transport/taxi" | "taxi" => Domain::TransportTaxi,
            _ => return Err(UnknownName(s.to_string())),
        };
        Ok(domain)
    }
}

/// The view currently shown to the operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Summary cards for every domain
    #[default]
    Overview,
    Parking,
    Buildings,
    Wifi,
    Weather,
    /// Buses and taxis share one map view
    Transport,
}

impl Section {
    /// Get all sections for iteration
    pub fn all() -> &'static [Section] {
        &[
            Section::Overview,
            Section::Parking,
            Section::Buildings,
            Section::Wifi,
            Section::Weather,
            Section::Transport,
        ]
    }

    /// Domains whose data this section displays
    pub fn domains(&self) -> &'static [Domain] {
        match self {
            Section::Overview => Domain::all(),
            Section::Parking => &[Domain::Parking],
            Section::Buildings => &[Domain::Buildings],
            Section::Wifi => &[Domain::Wifi],
            Section::Weather => &[Domain::Weather],
            Section::Transport => &[Domain::TransportBus, Domain::TransportTaxi],
        }
    }

    /// Whether this section displays `domain`
    pub fn covers(&self, domain: Domain) -> bool {
        self.domains().contains(&domain)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Section::Overview => "overview",
            Section::Parking => "parking",
            Section::Buildings => "buildings",
            Section::Wifi => "wifi",
            Section::Weather => "weather",
            Section::Transport => "transport",
        }
    }
}

impl From<Domain> for Section {
    fn from(domain: Domain) -> Self {
        domain.section()
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Section {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let section = match lowered.as_str() {
            "overview" | "dashboard" => Section::Overview,
            "transport" => Section::Transport,
            other => other
                .parse::<Domain>()
                .map(Section::from)
                .map_err(|_| UnknownName(s.to_string()))?,
        };
        Ok(section)
    }
}

/// A domain or section name that does not match any known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown domain or section: {0}")]
pub struct UnknownName(pub String);
