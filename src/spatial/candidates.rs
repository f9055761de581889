use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::{LifecycleState, VehicleId};

/// Map raw neighbours to addressable partners.
///
/// Neighbours strictly ahead and inside the detection radius qualify. Platoon
/// members stand in for their leader (once), single cars pass through and
/// anything mid-maneuver is skipped. The vehicle's own leader (itself when
/// unplatooned) is always appended so the policies can weigh staying put.
/// Output is sorted by id.
pub fn filter_candidates(
    registry: &VehicleRegistry,
    car: VehicleId,
    neighbors: &[VehicleId],
    detection_radius: f64,
) -> Vec<VehicleId> {
    let Some(vehicle) = registry.get(car) else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for &neighbor in neighbors {
        let Some(distance) = registry.distance(car, neighbor) else {
            continue;
        };
        if !(distance > 0.0 && distance < detection_radius) {
            continue;
        }
        let Some(other) = registry.get(neighbor) else {
            continue;
        };
        let partner = match other.state {
            LifecycleState::Platoon => match registry.resolve_leader(neighbor) {
                Some(leader) => leader,
                None => continue,
            },
            LifecycleState::SingleCar => neighbor,
            _ => continue,
        };
        if !candidates.contains(&partner) {
            candidates.push(partner);
        }
    }

    let own = vehicle.platoon_leader();
    if registry.contains(own) && !candidates.contains(&own) {
        candidates.push(own);
    }
    candidates.sort_unstable();
    candidates
}
