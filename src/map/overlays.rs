//! Transport overlays
//!
//! Buses are shown while in service, taxis while moving.

use super::layer::{Marker, MarkerLayer};
use super::reconcile::{MapLayerSync, Overlay, ReconcilePolicy};
use crate::model::{Domain, Entity, MalformedEntityError};

pub fn bus_in_service(entity: &Entity) -> bool {
    entity.flag("en_service").unwrap_or(false)
}

pub fn taxi_in_motion(entity: &Entity) -> bool {
    entity.flag("en_mouvement").unwrap_or(false)
}

pub fn bus_marker(entity: &Entity) -> Result<Marker, MalformedEntityError> {
    let position = entity.position()?;
    let line = entity.text("ligne").unwrap_or("?");

    let mut details = Vec::new();
    if let (Some(passengers), Some(capacity)) =
        (entity.number("passagers"), entity.number("capacite"))
    {
        details.push(format!("passengers: {}/{}", passengers, capacity));
    }
    if let Some(delay) = entity.number("retard") {
        details.push(format!("delay: {} min", delay));
    }
    if let Some(stop) = entity.text("arret_actuel") {
        details.push(format!("at: {}", stop));
    }
    if let Some(next) = entity.text("arret_suivant") {
        details.push(format!("next: {}", next));
    }

    Ok(Marker {
        id: entity.id.clone(),
        position,
        icon: "bus".to_string(),
        title: match entity.text("nom_ligne") {
            Some(name) => format!("Bus {} - {}", line, name),
            None => format!("Bus {}", line),
        },
        details,
    })
}

pub fn taxi_marker(entity: &Entity) -> Result<Marker, MalformedEntityError> {
    let position = entity.position()?;

    let mut details = Vec::new();
    if let Some(zone) = entity.text("nom_zone").or_else(|| entity.text("zone")) {
        details.push(format!("zone: {}", zone));
    }
    if let Some(available) = entity.flag("disponible") {
        details.push(if available { "available" } else { "busy" }.to_string());
    }
    if let Some(speed) = entity.number("vitesse") {
        details.push(format!("speed: {} km/h", speed));
    }

    Ok(Marker {
        id: entity.id.clone(),
        position,
        icon: "taxi".to_string(),
        title: format!("Taxi {}", entity.id),
        details,
    })
}

impl MapLayerSync {
    /// Bus and taxi overlays drawn on the given layers
    pub fn transport(
        policy: ReconcilePolicy,
        bus_layer: Box<dyn MarkerLayer>,
        taxi_layer: Box<dyn MarkerLayer>,
    ) -> Self {
        MapLayerSync::new(policy)
            .with_overlay(
                Domain::TransportBus,
                Overlay::new(bus_layer, Box::new(bus_in_service), Box::new(bus_marker)),
            )
            .with_overlay(
                Domain::TransportTaxi,
                Overlay::new(taxi_layer, Box::new(taxi_in_motion), Box::new(taxi_marker)),
            )
    }
}
