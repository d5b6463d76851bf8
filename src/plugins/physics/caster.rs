//! Shape casting capability consumed by the portal traversal code.
//!
//! The portal core only needs "cast this shape along a ray and tell me what it
//! hits first", but the trait exposes the usual family of physics queries so
//! callers can use a single abstraction. [`RapierContext`] implements it.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

/// Shape swept along a cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CastShape {
    Point,
    Sphere { radius: f32 },
    /// Capsule aligned with the local Y axis.
    Capsule { half_height: f32, radius: f32 },
    Box { half_extents: Vec3 },
}

impl CastShape {
    /// Rapier collider for this shape, `None` for points which are cast as rays.
    pub fn collider(&self) -> Option<Collider> {
        match *self {
            CastShape::Point => None,
            CastShape::Sphere { radius } => Some(Collider::ball(radius)),
            CastShape::Capsule {
                half_height,
                radius,
            } => Some(Collider::capsule_y(half_height, radius)),
            CastShape::Box { half_extents } => Some(Collider::cuboid(
                half_extents.x,
                half_extents.y,
                half_extents.z,
            )),
        }
    }

    /// Radius of a sphere enclosing the shape.
    pub fn bounding_radius(&self) -> f32 {
        match *self {
            CastShape::Point => 0.,
            CastShape::Sphere { radius } => radius,
            CastShape::Capsule {
                half_height,
                radius,
            } => half_height + radius,
            CastShape::Box { half_extents } => half_extents.length(),
        }
    }
}

/// Whether sensor colliders take part in a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriggerInteraction {
    #[default]
    Include,
    Ignore,
}

/// Per-query filtering: layer mask, sensors, and an explicit set of colliders to skip.
#[derive(Debug, Clone, Copy)]
pub struct CastFilter<'a> {
    pub mask: Group,
    pub triggers: TriggerInteraction,
    pub exclude: &'a [Entity],
    /// Restrict the query to this single collider.
    pub only: Option<Entity>,
}

impl<'a> Default for CastFilter<'a> {
    fn default() -> Self {
        CastFilter {
            mask: Group::ALL,
            triggers: TriggerInteraction::Include,
            exclude: &[],
            only: None,
        }
    }
}

impl<'a> CastFilter<'a> {
    pub fn new(mask: Group) -> Self {
        CastFilter {
            mask,
            ..default()
        }
    }

    pub fn excluding(self, exclude: &'a [Entity]) -> Self {
        CastFilter { exclude, ..self }
    }

    pub fn only(self, collider: Entity) -> Self {
        CastFilter {
            only: Some(collider),
            ..self
        }
    }

    pub fn with_triggers(self, triggers: TriggerInteraction) -> Self {
        CastFilter { triggers, ..self }
    }

    /// Entity-level part of the filter. Layer and sensor tests are up to the caster.
    pub fn accepts(&self, entity: Entity) -> bool {
        if let Some(only) = self.only {
            if only != entity {
                return false;
            }
        }
        !self.exclude.contains(&entity)
    }
}

/// First contact of a cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CastHit {
    pub entity: Entity,
    pub point: Vec3,
    pub normal: Vec3,
    /// Distance travelled along the cast direction, in world units.
    pub distance: f32,
}

impl CastHit {
    /// Malformed results coming back from the physics backend are treated as misses.
    pub fn is_valid(&self) -> bool {
        self.distance.is_finite() && self.distance >= 0. && self.point.is_finite()
    }
}

/// Physics query capability.
///
/// `direction` is expected to be normalized. Implementations report distances
/// along it in world units.
pub trait ShapeCaster {
    /// Nearest hit along the cast, if any within `max_distance`.
    fn cast(
        &self,
        shape: &CastShape,
        origin: Vec3,
        rotation: Quat,
        direction: Vec3,
        max_distance: f32,
        filter: &CastFilter,
    ) -> Option<CastHit>;

    /// Every hit along the cast, sorted by distance.
    fn cast_all(
        &self,
        shape: &CastShape,
        origin: Vec3,
        rotation: Quat,
        direction: Vec3,
        max_distance: f32,
        filter: &CastFilter,
    ) -> Vec<CastHit>;

    /// Colliders overlapping the shape at the given pose.
    fn overlap(
        &self,
        shape: &CastShape,
        position: Vec3,
        rotation: Quat,
        filter: &CastFilter,
    ) -> Vec<Entity>;

    /// Whether anything overlaps the shape at the given pose.
    fn check(
        &self,
        shape: &CastShape,
        position: Vec3,
        rotation: Quat,
        filter: &CastFilter,
    ) -> bool {
        !self.overlap(shape, position, rotation, filter).is_empty()
    }

    /// [`ShapeCaster::cast_all`] into a caller owned buffer. Returns the number of hits written.
    fn cast_buffered(
        &self,
        shape: &CastShape,
        origin: Vec3,
        rotation: Quat,
        direction: Vec3,
        max_distance: f32,
        filter: &CastFilter,
        buffer: &mut Vec<CastHit>,
    ) -> usize {
        buffer.clear();
        buffer.extend(self.cast_all(shape, origin, rotation, direction, max_distance, filter));
        buffer.len()
    }

    /// [`ShapeCaster::overlap`] into a caller owned buffer. Returns the number of entities written.
    fn overlap_buffered(
        &self,
        shape: &CastShape,
        position: Vec3,
        rotation: Quat,
        filter: &CastFilter,
        buffer: &mut Vec<Entity>,
    ) -> usize {
        buffer.clear();
        buffer.extend(self.overlap(shape, position, rotation, filter));
        buffer.len()
    }
}

/// Upper bound on the number of successive casts used to emulate `cast_all` for volumes.
const MAX_SWEEP_HITS: usize = 64;

fn query_filter<'a>(filter: &CastFilter, predicate: &'a dyn Fn(Entity) -> bool) -> QueryFilter<'a> {
    QueryFilter {
        flags: match filter.triggers {
            TriggerInteraction::Include => QueryFilterFlags::empty(),
            TriggerInteraction::Ignore => QueryFilterFlags::EXCLUDE_SENSORS,
        },
        groups: Some(CollisionGroups::new(ALL_QUERY_MEMBERSHIPS, filter.mask).into()),
        predicate: Some(predicate),
        ..default()
    }
}

/// Queries belong to every group so only the target's own filter and the query mask matter.
const ALL_QUERY_MEMBERSHIPS: Group = Group::ALL;

impl ShapeCaster for RapierContext {
    fn cast(
        &self,
        shape: &CastShape,
        origin: Vec3,
        rotation: Quat,
        direction: Vec3,
        max_distance: f32,
        filter: &CastFilter,
    ) -> Option<CastHit> {
        let predicate = |entity: Entity| filter.accepts(entity);
        let query = query_filter(filter, &predicate);
        match shape.collider() {
            None => self
                .cast_ray_and_get_normal(origin, direction, max_distance, true, query)
                .map(|(entity, intersection)| CastHit {
                    entity,
                    point: intersection.point,
                    normal: intersection.normal,
                    distance: intersection.toi,
                }),
            Some(collider) => self
                .cast_shape(origin, rotation, direction, &collider, max_distance, query)
                .map(|(entity, toi)| CastHit {
                    entity,
                    // Position of the swept shape at the time of impact.
                    point: origin + direction * toi.toi,
                    normal: -direction,
                    distance: toi.toi,
                }),
        }
    }

    fn cast_all(
        &self,
        shape: &CastShape,
        origin: Vec3,
        rotation: Quat,
        direction: Vec3,
        max_distance: f32,
        filter: &CastFilter,
    ) -> Vec<CastHit> {
        let mut hits = Vec::new();
        match shape {
            CastShape::Point => {
                let predicate = |entity: Entity| filter.accepts(entity);
                self.intersections_with_ray(
                    origin,
                    direction,
                    max_distance,
                    true,
                    query_filter(filter, &predicate),
                    |entity, intersection| {
                        hits.push(CastHit {
                            entity,
                            point: intersection.point,
                            normal: intersection.normal,
                            distance: intersection.toi,
                        });
                        true
                    },
                );
            }
            _ => {
                // Rapier only reports the first impact of a sweep, so keep sweeping while
                // excluding what was already hit.
                let mut seen = filter.exclude.to_vec();
                while hits.len() < MAX_SWEEP_HITS {
                    let sweep = CastFilter {
                        exclude: &seen,
                        ..*filter
                    };
                    match self.cast(shape, origin, rotation, direction, max_distance, &sweep) {
                        Some(hit) => {
                            seen.push(hit.entity);
                            hits.push(hit);
                        }
                        None => break,
                    }
                }
            }
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn overlap(
        &self,
        shape: &CastShape,
        position: Vec3,
        rotation: Quat,
        filter: &CastFilter,
    ) -> Vec<Entity> {
        let predicate = |entity: Entity| filter.accepts(entity);
        let query = query_filter(filter, &predicate);
        let mut entities = Vec::new();
        match shape.collider() {
            None => self.intersections_with_point(position, query, |entity| {
                entities.push(entity);
                true
            }),
            Some(collider) => {
                self.intersections_with_shape(position, rotation, &collider, query, |entity| {
                    entities.push(entity);
                    true
                })
            }
        }
        entities
    }
}
