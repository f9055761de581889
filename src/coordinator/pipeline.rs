use super::snapshot::{FleetSnapshot, VehicleSnapshot};
use crate::core::config::PlatoonConfig;
use crate::core::error::Result;
use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::{LifecycleState, Vehicle, VehicleId};
use crate::core::world::{Actuation, Outbox, World};
use crate::learning::policy::PolicyKind;
use crate::learning::selector::PartnerSelector;
use crate::platoon::lifecycle::{Counters, HappinessChange, Lifecycle};
use crate::platoon::topology::Topology;
use crate::spatial::{filter_candidates, SpatialIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Route end closer than this removes the vehicle.
const ROUTE_END_DISTANCE: f64 = 10.0;
/// Below this (but moving) a vehicle counts as stuck and is taken out.
const CRAWL_SPEED: f64 = 0.5;
/// Below this (but moving) a removed vehicle is also deleted from the world.
const STALL_SPEED: f64 = 1.0;

/// What one tick did.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TickReport {
    pub tick: u64,
    /// Events of this tick only.
    pub counters: Counters,
    pub happiness_changes: Vec<HappinessChange>,
    pub removed: Vec<VehicleId>,
    pub commands: usize,
}

/// State restored when a tick cannot be flushed to the world.
struct Checkpoint {
    registry: VehicleRegistry,
    index: SpatialIndex,
    counters: Counters,
    rng: StdRng,
    tick: u64,
}

/// The coordination core: owns every vehicle record and runs the per-tick
/// pipeline against a [`World`].
pub struct Coordinator {
    config: PlatoonConfig,
    registry: VehicleRegistry,
    index: SpatialIndex,
    selector: PartnerSelector,
    outbox: Outbox,
    rng: StdRng,
    counters: Counters,
    tick: u64,
}

impl Coordinator {
    pub fn new(config: PlatoonConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "🚦 [Coordinator] Starting: policy {:?}, radius {} m, platoons up to {}",
            config.decision.policy, config.detection_radius, config.max_platoon_size
        );
        Ok(Coordinator {
            registry: VehicleRegistry::new(config.joining.vehicle_length),
            index: SpatialIndex::new(config.detection_radius),
            selector: PartnerSelector::new(&config),
            outbox: Outbox::default(),
            rng: StdRng::seed_from_u64(config.decision.seed),
            counters: Counters::default(),
            tick: 0,
            config,
        })
    }

    pub fn config(&self) -> &PlatoonConfig {
        &self.config
    }

    pub fn registry(&self) -> &VehicleRegistry {
        &self.registry
    }

    pub fn policy(&self) -> PolicyKind {
        self.selector.kind()
    }

    /// Run totals.
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<VehicleSnapshot> {
        VehicleSnapshot::capture(&self.registry, self.selector.reward(), id)
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot::capture(&self.registry, self.selector.reward(), self.counters, self.tick)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            registry: self.registry.clone(),
            index: self.index.clone(),
            counters: self.counters,
            rng: self.rng.clone(),
            tick: self.tick,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.registry = checkpoint.registry;
        self.index = checkpoint.index;
        self.counters = checkpoint.counters;
        self.rng = checkpoint.rng;
        self.tick = checkpoint.tick;
        self.outbox.clear();
    }

    /// Advance one tick: sync, remove, index, run every state handler, flush.
    ///
    /// If the world refuses a command, all core state is rolled back to where
    /// it was before the tick and the error is returned.
    pub fn tick<W: World>(&mut self, world: &mut W) -> Result<TickReport> {
        let checkpoint = self.checkpoint();
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let present = self.sync(world);
        report.removed = self.remove_departed(&present, &mut report.counters);

        for vehicle in self.registry.iter() {
            self.index.update(vehicle.id, vehicle.telemetry.x);
        }

        let selection_tick = self.tick % self.config.decision.selection_interval == 0;
        for id in self.registry.ids() {
            self.step_vehicle(id, selection_tick, &mut report);
        }

        let commands: Vec<(VehicleId, Actuation)> = self.outbox.drain().collect();
        report.commands = commands.len();
        for (id, command) in commands {
            if let Err(e) = world.actuate(id, command) {
                warn!("⚠️ [Coordinator] Tick {} rolled back: {}", report.tick, e);
                self.restore(checkpoint);
                return Err(e);
            }
        }

        self.counters.add(&report.counters);
        self.tick += 1;
        if report.counters != Counters::default() {
            debug!("[Coordinator] Tick {}: {:?}", report.tick, report.counters);
        }
        Ok(report)
    }

    /// Register new vehicles and refresh telemetry. Returns the ids the world reports.
    fn sync<W: World>(&mut self, world: &W) -> BTreeSet<VehicleId> {
        let mut present = BTreeSet::new();
        for id in world.vehicle_ids() {
            let Some(telemetry) = world.telemetry(id) else {
                continue;
            };
            present.insert(id);
            match self.registry.get_mut(id) {
                Some(vehicle) => vehicle.telemetry = telemetry,
                None => {
                    debug!("[Coordinator] {} spawned on {}", id, telemetry.road);
                    let vehicle = Vehicle::new(id, telemetry, self.config.decision.cache_capacity);
                    self.registry.insert(vehicle);
                }
            }
        }
        present
    }

    fn remove_departed(&mut self, present: &BTreeSet<VehicleId>, counters: &mut Counters) -> Vec<VehicleId> {
        let mut removed = Vec::new();
        for id in self.registry.ids() {
            let Some(vehicle) = self.registry.get(id) else {
                continue;
            };
            let t = &vehicle.telemetry;
            let moving = t.speed > 0.0;
            let gone = !present.contains(&id);
            let stuck = t.crashed || (moving && t.speed < CRAWL_SPEED);
            if !(gone || stuck || t.distance_to_end < ROUTE_END_DISTANCE) {
                continue;
            }
            let delete = !gone && (t.crashed || (moving && t.speed < STALL_SPEED));
            let in_platoon = vehicle.is_in_platoon();
            let join_target = vehicle
                .desired_leader
                .filter(|_| vehicle.state == LifecycleState::PrepareJoining);

            if let Some(target) = join_target {
                self.release_join_target(id, target);
            }
            if in_platoon {
                let mut topology = Topology::new(&mut self.registry, &mut self.outbox, &self.config);
                topology.remove_member(id);
            }
            self.outbox.discard_for(id);
            if delete {
                self.outbox.push(id, Actuation::Remove);
                counters.crashes += 1;
                warn!("💥 [Coordinator] {} removed from the road", id);
            }
            self.index.remove(id);
            self.registry.remove(id);
            removed.push(id);
        }
        removed
    }

    /// Clear `target`'s joiner flag once `joiner` is gone, unless another
    /// vehicle is still joining it.
    fn release_join_target(&mut self, joiner: VehicleId, target: VehicleId) {
        let still_joining = self.registry.iter().any(|v| {
            v.id != joiner
                && ((v.state == LifecycleState::PrepareJoining && v.desired_leader == Some(target))
                    || (v.state == LifecycleState::JoiningProcess && v.leader == Some(target)))
        });
        if still_joining {
            return;
        }
        if let Some(t) = self.registry.get_mut(target) {
            if t.has_joiner {
                t.has_joiner = false;
                debug!("[Coordinator] {} no longer expects joiner {}", target, joiner);
            }
        }
    }

    fn step_vehicle(&mut self, id: VehicleId, selection_tick: bool, report: &mut TickReport) {
        let neighbors = self.index.neighbors(id);
        let Some(vehicle) = self.registry.get_mut(id) else {
            return;
        };
        vehicle.neighbors = neighbors.clone();
        let state = vehicle.state;
        let learning = self.selector.kind().is_learning();

        let evaluate = selection_tick
            && (state == LifecycleState::SingleCar || (state == LifecycleState::Platoon && learning));
        let decision = if evaluate {
            let candidates = filter_candidates(&self.registry, id, &neighbors, self.config.detection_radius);
            if let Some(vehicle) = self.registry.get_mut(id) {
                vehicle.candidates = candidates;
            }
            self.selector.evaluate(&mut self.registry, id, &mut self.rng)
        } else {
            None
        };

        let mut topology = Topology::new(&mut self.registry, &mut self.outbox, &self.config);
        let mut lifecycle = Lifecycle {
            topology: &mut topology,
            reward: self.selector.reward(),
            learning,
            counters: &mut report.counters,
            changes: &mut report.happiness_changes,
            tick: report.tick,
            selection_tick,
        };
        lifecycle.step(id, &neighbors, decision);
    }
}
