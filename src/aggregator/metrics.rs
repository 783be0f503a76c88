//! Derived display metrics
//!
//! Pure functions from a [`Snapshot`] to the figures the dashboard cards
//! show. Backend data is not second-guessed (a lot reporting more free
//! spots than its capacity yields a negative occupancy); only arithmetic
//! faults are guarded against. An entity lacking a field a figure needs
//! is left out of that summary and counted in `skipped`.

use serde::Serialize;

use crate::model::{Domain, Entity, MalformedEntityError, Snapshot};

/// `(capacity - available) / capacity` as a percentage, 0 for no capacity
pub fn occupancy_rate(capacity: f64, available: f64) -> f64 {
    fill_rate(capacity - available, capacity)
}

/// `occupied / capacity` as a percentage, 0 for no capacity
pub fn fill_rate(occupied: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 || !capacity.is_finite() || !occupied.is_finite() {
        return 0.0;
    }
    occupied / capacity * 100.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Colour band of an occupancy percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyLevel {
    Low,
    Medium,
    High,
}

impl OccupancyLevel {
    pub fn from_rate(rate: f64) -> Self {
        if rate < 50.0 {
            OccupancyLevel::Low
        } else if rate < 80.0 {
            OccupancyLevel::Medium
        } else {
            OccupancyLevel::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LotOccupancy {
    pub id: String,
    pub name: String,
    pub capacity: f64,
    pub available: f64,
    pub occupancy_rate: f64,
    pub level: OccupancyLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParkingSummary {
    pub lots: usize,
    pub total_capacity: f64,
    pub total_available: f64,
    pub occupancy_rate: f64,
    pub per_lot: Vec<LotOccupancy>,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingOccupancy {
    pub id: String,
    pub name: String,
    pub open: bool,
    pub rooms: usize,
    pub occupancy: f64,
    pub capacity: f64,
    pub occupancy_rate: f64,
    pub level: OccupancyLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildingsSummary {
    pub buildings: usize,
    pub open: usize,
    pub total_occupancy: f64,
    pub total_capacity: f64,
    pub occupancy_rate: f64,
    pub per_building: Vec<BuildingOccupancy>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WifiSummary {
    pub access_points: usize,
    pub online: usize,
    /// Users on online access points only
    pub connected_users: f64,
    pub mean_signal: Option<f64>,
    pub mean_congestion: Option<f64>,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationReading {
    pub id: String,
    pub name: String,
    pub temperature: f64,
    pub humidity: f64,
    pub sky: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherSummary {
    pub stations: usize,
    /// First valid station by id
    pub primary: Option<StationReading>,
    pub mean_temperature: Option<f64>,
    pub mean_humidity: Option<f64>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusSummary {
    pub fleet: usize,
    pub in_service: usize,
    /// Passengers on buses in service
    pub passengers: f64,
    /// Capacity of buses in service
    pub capacity: f64,
    pub load_rate: f64,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaxiSummary {
    pub fleet: usize,
    pub available: usize,
    pub in_motion: usize,
    pub skipped: usize,
}

/// Card figures for one domain
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "domain", rename_all = "kebab-case")]
pub enum DomainMetrics {
    Parking(ParkingSummary),
    Buildings(BuildingsSummary),
    Wifi(WifiSummary),
    Weather(WeatherSummary),
    TransportBus(BusSummary),
    TransportTaxi(TaxiSummary),
}

impl DomainMetrics {
    pub fn domain(&self) -> Domain {
        match self {
            DomainMetrics::Parking(_) => Domain::Parking,
            DomainMetrics::Buildings(_) => Domain::Buildings,
            DomainMetrics::Wifi(_) => Domain::Wifi,
            DomainMetrics::Weather(_) => Domain::Weather,
            DomainMetrics::TransportBus(_) => Domain::TransportBus,
            DomainMetrics::TransportTaxi(_) => Domain::TransportTaxi,
        }
    }

    /// Entities left out because of missing or invalid fields
    pub fn skipped(&self) -> usize {
        match self {
            DomainMetrics::Parking(s) => s.skipped,
            DomainMetrics::Buildings(s) => s.skipped,
            DomainMetrics::Wifi(s) => s.skipped,
            DomainMetrics::Weather(s) => s.skipped,
            DomainMetrics::TransportBus(s) => s.skipped,
            DomainMetrics::TransportTaxi(s) => s.skipped,
        }
    }
}

/// Compute the card figures of a snapshot
pub fn summarize(snapshot: &Snapshot) -> DomainMetrics {
    match snapshot.domain {
        Domain::Parking => DomainMetrics::Parking(summarize_parking(snapshot)),
        Domain::Buildings => DomainMetrics::Buildings(summarize_buildings(snapshot)),
        Domain::Wifi => DomainMetrics::Wifi(summarize_wifi(snapshot)),
        Domain::Weather => DomainMetrics::Weather(summarize_weather(snapshot)),
        Domain::TransportBus => DomainMetrics::TransportBus(summarize_buses(snapshot)),
        Domain::TransportTaxi => DomainMetrics::TransportTaxi(summarize_taxis(snapshot)),
    }
}

fn skip(domain: Domain, e: &MalformedEntityError) {
    tracing::debug!(domain = %domain, entity_id = %e.entity_id, error = %e, "Entity left out of summary");
}

pub fn summarize_parking(snapshot: &Snapshot) -> ParkingSummary {
    let mut summary = ParkingSummary::default();

    for lot in snapshot.iter() {
        let figures = lot
            .require_number("capacite_totale")
            .and_then(|c| lot.require_number("places_disponibles").map(|a| (c, a)));
        let (capacity, available) = match figures {
            Ok(f) => f,
            Err(e) => {
                skip(snapshot.domain, &e);
                summary.skipped += 1;
                continue;
            }
        };

        let rate = occupancy_rate(capacity, available);
        summary.lots += 1;
        summary.total_capacity += capacity;
        summary.total_available += available;
        summary.per_lot.push(LotOccupancy {
            id: lot.id.clone(),
            name: lot.name().to_string(),
            capacity,
            available,
            occupancy_rate: rate,
            level: OccupancyLevel::from_rate(rate),
        });
    }

    summary.occupancy_rate = occupancy_rate(summary.total_capacity, summary.total_available);
    summary
}

/// Rooms of a building as (occupancy, capacity) pairs
fn rooms(building: &Entity) -> Result<Vec<(f64, f64)>, MalformedEntityError> {
    let rooms = building
        .get("salles")
        .ok_or_else(|| MalformedEntityError::missing(&building.id, "salles"))?
        .as_array()
        .ok_or_else(|| MalformedEntityError::invalid(&building.id, "salles"))?;

    Ok(rooms
        .iter()
        .map(|room| {
            let occupancy = room["occupation_actuelle"].as_f64().unwrap_or(0.0);
            let capacity = room["capacite"].as_f64().unwrap_or(0.0);
            (occupancy, capacity)
        })
        .collect())
}

/// Sum of room occupancy, the buildings history metric
pub fn building_occupancy(building: &Entity) -> Result<f64, MalformedEntityError> {
    Ok(rooms(building)?.iter().map(|(occupancy, _)| occupancy).sum())
}

pub fn summarize_buildings(snapshot: &Snapshot) -> BuildingsSummary {
    let mut summary = BuildingsSummary::default();

    for building in snapshot.iter() {
        let rooms = match rooms(building) {
            Ok(r) => r,
            Err(e) => {
                skip(snapshot.domain, &e);
                summary.skipped += 1;
                continue;
            }
        };

        let open = building.flag("est_ouvert").unwrap_or(false);
        let occupancy: f64 = rooms.iter().map(|(o, _)| o).sum();
        let capacity: f64 = rooms.iter().map(|(_, c)| c).sum();
        let rate = fill_rate(occupancy, capacity);

        summary.buildings += 1;
        if open {
            summary.open += 1;
        }
        summary.total_occupancy += occupancy;
        summary.total_capacity += capacity;
        summary.per_building.push(BuildingOccupancy {
            id: building.id.clone(),
            name: building.name().to_string(),
            open,
            rooms: rooms.len(),
            occupancy,
            capacity,
            occupancy_rate: rate,
            level: OccupancyLevel::from_rate(rate),
        });
    }

    summary.occupancy_rate = fill_rate(summary.total_occupancy, summary.total_capacity);
    summary
}

pub fn summarize_wifi(snapshot: &Snapshot) -> WifiSummary {
    let mut summary = WifiSummary::default();
    let mut signals = Vec::new();
    let mut congestion = Vec::new();

    for ap in snapshot.iter() {
        let online = match ap.require_flag("est_en_ligne") {
            Ok(o) => o,
            Err(e) => {
                skip(snapshot.domain, &e);
                summary.skipped += 1;
                continue;
            }
        };

        if online {
            let users = match ap.require_number("utilisateurs_connectes") {
                Ok(u) => u,
                Err(e) => {
                    skip(snapshot.domain, &e);
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.online += 1;
            summary.connected_users += users;
            signals.extend(ap.number("puissance_signal"));
            congestion.extend(ap.number("niveau_congestion"));
        }
        summary.access_points += 1;
    }

    summary.mean_signal = mean(&signals);
    summary.mean_congestion = mean(&congestion);
    summary
}

fn station_reading(station: &Entity) -> Result<StationReading, MalformedEntityError> {
    Ok(StationReading {
        id: station.id.clone(),
        name: station.name().to_string(),
        temperature: station.require_number("temperature")?,
        humidity: station.require_number("humidite")?,
        sky: station.text("etat_ciel").map(str::to_string),
    })
}

pub fn summarize_weather(snapshot: &Snapshot) -> WeatherSummary {
    let mut summary = WeatherSummary::default();
    let mut temperatures = Vec::new();
    let mut humidities = Vec::new();

    for station in snapshot.iter() {
        match station_reading(station) {
            Ok(reading) => {
                summary.stations += 1;
                temperatures.push(reading.temperature);
                humidities.push(reading.humidity);
                if summary.primary.is_none() {
                    summary.primary = Some(reading);
                }
            }
            Err(e) => {
                skip(snapshot.domain, &e);
                summary.skipped += 1;
            }
        }
    }

    summary.mean_temperature = mean(&temperatures);
    summary.mean_humidity = mean(&humidities);
    summary
}

pub fn summarize_buses(snapshot: &Snapshot) -> BusSummary {
    let mut summary = BusSummary::default();

    for bus in snapshot.iter() {
        if bus.flag("en_service").unwrap_or(false) {
            let load = bus
                .require_number("passagers")
                .and_then(|p| bus.require_number("capacite").map(|c| (p, c)));
            match load {
                Ok((passengers, capacity)) => {
                    summary.in_service += 1;
                    summary.passengers += passengers;
                    summary.capacity += capacity;
                }
                Err(e) => {
                    skip(snapshot.domain, &e);
                    summary.skipped += 1;
                    continue;
                }
            }
        }
        summary.fleet += 1;
    }

    summary.load_rate = fill_rate(summary.passengers, summary.capacity);
    summary
}

pub fn summarize_taxis(snapshot: &Snapshot) -> TaxiSummary {
    let mut summary = TaxiSummary::default();

    for taxi in snapshot.iter() {
        let state = taxi
            .require_flag("disponible")
            .and_then(|d| taxi.require_flag("en_mouvement").map(|m| (d, m)));
        match state {
            Ok((available, moving)) => {
                summary.fleet += 1;
                summary.available += usize::from(available);
                summary.in_motion += usize::from(moving);
            }
            Err(e) => {
                skip(snapshot.domain, &e);
                summary.skipped += 1;
            }
        }
    }

    summary
}

/// Chart metrics recorded for each entity of `domain`
pub fn tracked_metrics(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::Parking => &["places_disponibles"],
        Domain::Buildings => &["occupation_totale"],
        Domain::Wifi => &["puissance_signal", "utilisateurs_connectes"],
        Domain::Weather => &["temperature", "humidite"],
        Domain::TransportBus => &["passagers"],
        Domain::TransportTaxi => &[],
    }
}

/// Current value of a tracked metric on a snapshot entity
///
/// `occupation_totale` is not sent by the backend in snapshots and is
/// derived from the rooms.
pub fn metric_value(domain: Domain, entity: &Entity, metric: &str) -> Option<f64> {
    let value = match (domain, metric) {
        (Domain::Buildings, "occupation_totale") => entity
            .number(metric)
            .or_else(|| building_occupancy(entity).ok()),
        _ => entity.number(metric),
    };
    value.filter(|v| v.is_finite())
}
