//! Per-step detection and resolution of portal crossings.
//!
//! Every tracked point remembers where it was at the end of the previous step. Each step the
//! segment from there to its current origin is tested against every portal surface. A hit
//! teleports the object, and the remainder of the segment is tested again from the exit side,
//! so a fast object can go through several portals in one step. That next segment skips the
//! exit surface, which it starts right behind.

use bevy::{prelude::*, utils::HashMap};
use bevy_rapier3d::prelude::Group;

use super::{
    config::PortalConfig,
    events::{TeleportDispatcher, TeleportPhase},
    registry::PortalRegistry,
    transform::PortalTransform,
};
use crate::plugins::physics::{CastFilter, CastShape, ShapeCaster};

/// Something that can be carried through a portal.
pub trait Portable {
    fn entity(&self) -> Entity;

    /// World space point tested for crossings.
    fn origin(&self) -> Vec3;

    /// Apply the portal's transform to the object: pose, velocity, tags and layers.
    fn teleport(&mut self, portal: &PortalTransform);

    /// Layers whose portal surfaces this object can go through.
    fn portal_layer_mask(&self) -> Group;

    /// Direct children of `node` in the object's hierarchy.
    fn children(&self, _node: Entity) -> Vec<Entity> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub portal: Entity,
    /// Point where the segment meets the portal surface.
    pub point: Vec3,
    /// Direction of travel at the crossing.
    pub direction: Vec3,
}

pub enum CrossingClaim {
    /// Let the default raycast test decide.
    Unclaimed,
    NoCrossing,
    Crossed(Crossing),
}

pub struct CrossingQuery<'a> {
    pub entity: Entity,
    pub start: Vec3,
    pub end: Vec3,
    pub registry: &'a PortalRegistry,
}

/// Application specific crossing test, e.g. based on trigger volumes, consulted before the
/// default raycast test.
pub trait CrossingHandler: Send + Sync {
    fn claim(&mut self, query: &CrossingQuery) -> CrossingClaim;
}

pub struct TrackedTransform {
    pub previous_origin: Vec3,
    handler: Option<Box<dyn CrossingHandler>>,
}

impl TrackedTransform {
    pub fn new(origin: Vec3) -> Self {
        TrackedTransform {
            previous_origin: origin,
            handler: None,
        }
    }

    pub fn set_handler(&mut self, handler: impl CrossingHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub fn clear_handler(&mut self) {
        self.handler = None;
    }
}

/// Every point under portal surveillance, in registration order.
#[derive(Default, Resource)]
pub struct TrackedRegistry {
    points: HashMap<Entity, TrackedTransform>,
    order: Vec<Entity>,
}

impl TrackedRegistry {
    pub fn register(&mut self, entity: Entity, origin: Vec3) {
        if self.points.contains_key(&entity) {
            return;
        }
        debug!("Tracking {:?} for portal crossings", entity);
        self.points.insert(entity, TrackedTransform::new(origin));
        self.order.push(entity);
    }

    pub fn unregister(&mut self, entity: Entity) -> Option<TrackedTransform> {
        let tracked = self.points.remove(&entity)?;
        self.order.retain(|e| *e != entity);
        Some(tracked)
    }

    pub fn get(&self, entity: Entity) -> Option<&TrackedTransform> {
        self.points.get(&entity)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut TrackedTransform> {
        self.points.get_mut(&entity)
    }

    pub fn order(&self) -> &[Entity] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct CrossingDetector<'a, C: ShapeCaster + ?Sized> {
    registry: &'a PortalRegistry,
    caster: &'a C,
    config: &'a PortalConfig,
}

impl<'a, C: ShapeCaster + ?Sized> CrossingDetector<'a, C> {
    pub fn new(registry: &'a PortalRegistry, caster: &'a C, config: &'a PortalConfig) -> Self {
        CrossingDetector {
            registry,
            caster,
            config,
        }
    }

    /// Resolve every crossing `portable` made since the previous step, in order.
    pub fn resolve(
        &self,
        tracked: &mut TrackedTransform,
        portable: &mut dyn Portable,
        dispatcher: &mut TeleportDispatcher,
    ) -> Vec<Crossing> {
        let mut crossings = Vec::new();
        let mut start = tracked.previous_origin;
        // Only the first segment starts in the previous step, later ones start on an exit
        // surface as it is now.
        let mut from_previous_step = true;
        // Exit surface of the last teleport. The next segment starts just behind it, possibly
        // still inside its collider.
        let mut exclude: Vec<Entity> = Vec::new();

        while crossings.len() < self.config.max_crossings_per_step {
            let end = portable.origin();
            let claim = match tracked.handler.as_mut() {
                Some(handler) => handler.claim(&CrossingQuery {
                    entity: portable.entity(),
                    start,
                    end,
                    registry: self.registry,
                }),
                None => CrossingClaim::Unclaimed,
            };
            let crossing = match claim {
                CrossingClaim::Crossed(mut crossing) => {
                    if crossing.direction == Vec3::ZERO {
                        crossing.direction = (end - start).normalize_or_zero();
                    }
                    Some(crossing)
                }
                CrossingClaim::NoCrossing => None,
                CrossingClaim::Unclaimed => self.find_crossing(
                    start,
                    end,
                    portable.portal_layer_mask(),
                    from_previous_step,
                    &exclude,
                ),
            };
            let crossing = match crossing {
                Some(crossing) => crossing,
                None => break,
            };
            match self.teleport(&crossing, portable, dispatcher) {
                Some((next_start, target)) => {
                    start = next_start;
                    from_previous_step = false;
                    exclude.clear();
                    exclude.extend(self.registry.get(target).and_then(|record| record.surface));
                    crossings.push(crossing);
                }
                None => break,
            }
        }

        if crossings.len() >= self.config.max_crossings_per_step && !crossings.is_empty() {
            debug!(
                "{:?} hit the limit of {} portal crossings in one step",
                portable.entity(),
                self.config.max_crossings_per_step
            );
        }
        tracked.previous_origin = portable.origin();
        crossings
    }

    /// Earliest crossing of the segment `start -> end` with any portal surface not in
    /// `exclude`.
    pub fn find_crossing(
        &self,
        start: Vec3,
        end: Vec3,
        mask: Group,
        from_previous_step: bool,
        exclude: &[Entity],
    ) -> Option<Crossing> {
        if start == end {
            return None;
        }
        let mut best: Option<(f32, Crossing)> = None;
        for (portal, record) in self.registry.iter() {
            let surface = match record.surface {
                Some(surface) if !exclude.contains(&surface) => surface,
                _ => continue,
            };
            if !self
                .registry
                .transform(portal)
                .map_or(false, |transform| transform.uses_teleport())
            {
                continue;
            }
            // Measure against where the point was relative to the portal, in case the portal
            // itself moved during the step.
            let from = if from_previous_step {
                record.reconstruct_previous(start)
            } else {
                start
            };
            let delta = end - from;
            let length = delta.length();
            if !length.is_finite() || length <= f32::EPSILON {
                continue;
            }
            let direction = delta / length;
            let filter = CastFilter::new(mask).only(surface);
            let hit = self
                .caster
                .cast(&CastShape::Point, from, Quat::IDENTITY, direction, length, &filter)
                .filter(|hit| hit.is_valid() && hit.distance <= length);
            if let Some(hit) = hit {
                let fraction = hit.distance / length;
                if best.as_ref().map_or(true, |(best, _)| fraction < *best) {
                    best = Some((
                        fraction,
                        Crossing {
                            portal,
                            point: from + direction * hit.distance,
                            direction,
                        },
                    ));
                }
            }
        }
        best.map(|(_, crossing)| crossing)
    }

    /// Teleport `portable` through the crossed portal, notifying listeners before and after.
    /// Returns where the next segment starts and the portal it starts from.
    fn teleport(
        &self,
        crossing: &Crossing,
        portable: &mut dyn Portable,
        dispatcher: &mut TeleportDispatcher,
    ) -> Option<(Vec3, Entity)> {
        let transform = match self.registry.transform(crossing.portal) {
            Some(transform) if transform.uses_teleport() => transform,
            _ => {
                warn!(
                    "Ignoring crossing of {:?} through portal {:?} which cannot teleport",
                    portable.entity(),
                    crossing.portal
                );
                return None;
            }
        };
        let target = transform.connected()?;

        debug!(
            "Teleporting {:?} from portal {:?} to portal {:?}",
            portable.entity(),
            crossing.portal,
            target
        );
        dispatcher.dispatch(TeleportPhase::Pre, crossing.portal, target, &*portable);
        portable.teleport(&transform);
        dispatcher.dispatch(TeleportPhase::Post, crossing.portal, target, &*portable);

        let exit = transform.modify_point(crossing.point);
        let heading = transform.modify_direction(crossing.direction).normalize_or_zero();
        Some((exit + heading * self.config.crossing_epsilon, target))
    }
}
