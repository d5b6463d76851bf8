//! Scene helpers for the portal tests: an analytic caster and a headless Rapier app.

use bevy::{prelude::*, scene::ScenePlugin, utils::HashMap};
use bevy_rapier3d::prelude::{
    Collider, CollisionGroups, Group, NoUserData, RapierPhysicsPlugin, Sensor,
};

use super::{
    crossing::Portable,
    registry::{PortalRecord, PortalRegistry},
    transform::PortalTransform,
};
use crate::plugins::physics::{CastFilter, CastHit, CastShape, ShapeCaster, TriggerInteraction};

/// Two sided rectangle standing in for a collider, optionally a solid slab.
#[derive(Debug, Clone)]
pub struct Quad {
    pub entity: Entity,
    pub center: Vec3,
    pub normal: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub half_size: Vec2,
    /// Half of the slab's extent along `normal`, zero for an infinitely thin quad.
    pub half_thickness: f32,
    pub groups: Group,
    pub sensor: bool,
}

impl Quad {
    pub fn facing(entity: Entity, center: Vec3, normal: Vec3, half_size: Vec2) -> Self {
        let normal = normal.normalize();
        let up = if normal.y.abs() < 0.99 { Vec3::Y } else { Vec3::Z };
        let right = up.cross(normal).normalize();
        let up = normal.cross(right);
        Quad {
            entity,
            center,
            normal,
            right,
            up,
            half_size,
            half_thickness: 0.,
            groups: Group::ALL,
            sensor: false,
        }
    }

    pub fn with_thickness(mut self, thickness: f32) -> Self {
        self.half_thickness = thickness / 2.;
        self
    }

    fn within(&self, point: Vec3, margin: f32) -> bool {
        let local = point - self.center;
        local.dot(self.right).abs() <= self.half_size.x + margin
            && local.dot(self.up).abs() <= self.half_size.y + margin
    }

    fn cast(
        &self,
        radius: f32,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Option<CastHit> {
        let height = (origin - self.center).dot(self.normal);
        // Solid casts starting inside the slab hit it right away.
        if self.half_thickness > 0.
            && height.abs() <= self.half_thickness + radius
            && self.within(origin, radius)
        {
            return Some(CastHit {
                entity: self.entity,
                point: origin,
                normal: self.normal * height.signum(),
                distance: 0.,
            });
        }
        let denom = direction.dot(self.normal);
        if denom.abs() < 1e-6 {
            return None;
        }
        let t = -height / denom - (radius + self.half_thickness) / denom.abs();
        if t < 0. || t > max_distance {
            return None;
        }
        let point = origin + direction * t;
        if !self.within(point, radius) {
            return None;
        }
        Some(CastHit {
            entity: self.entity,
            point,
            normal: -self.normal * denom.signum(),
            distance: t,
        })
    }
}

#[derive(Debug, Default)]
pub struct QuadCaster {
    pub quads: Vec<Quad>,
    /// Report a NaN hit for every cast.
    pub corrupt: bool,
}

impl QuadCaster {
    pub fn push(&mut self, quad: Quad) {
        self.quads.push(quad);
    }

    pub fn clear(&mut self) {
        self.quads.clear();
    }

    pub fn set_groups(&mut self, groups: Group) {
        for quad in &mut self.quads {
            quad.groups = groups;
        }
    }

    fn candidates<'a>(&'a self, filter: &'a CastFilter<'a>) -> impl Iterator<Item = &'a Quad> {
        self.quads.iter().filter(move |quad| {
            filter.accepts(quad.entity)
                && filter.mask.intersects(quad.groups)
                && !(quad.sensor && filter.triggers == TriggerInteraction::Ignore)
        })
    }
}

impl ShapeCaster for QuadCaster {
    fn cast(
        &self,
        shape: &CastShape,
        origin: Vec3,
        rotation: Quat,
        direction: Vec3,
        max_distance: f32,
        filter: &CastFilter,
    ) -> Option<CastHit> {
        if self.corrupt {
            return self.quads.first().map(|quad| CastHit {
                entity: quad.entity,
                point: Vec3::splat(f32::NAN),
                normal: Vec3::Z,
                distance: f32::NAN,
            });
        }
        self.cast_all(shape, origin, rotation, direction, max_distance, filter)
            .into_iter()
            .next()
    }

    fn cast_all(
        &self,
        shape: &CastShape,
        origin: Vec3,
        _rotation: Quat,
        direction: Vec3,
        max_distance: f32,
        filter: &CastFilter,
    ) -> Vec<CastHit> {
        let radius = shape.bounding_radius();
        let mut hits = self
            .candidates(filter)
            .filter_map(|quad| quad.cast(radius, origin, direction, max_distance))
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn overlap(
        &self,
        shape: &CastShape,
        position: Vec3,
        _rotation: Quat,
        filter: &CastFilter,
    ) -> Vec<Entity> {
        let radius = shape.bounding_radius().max(1e-4);
        self.candidates(filter)
            .filter(|quad| {
                let height = (position - quad.center).dot(quad.normal).abs();
                height <= radius + quad.half_thickness && quad.within(position, radius)
            })
            .map(|quad| quad.entity)
            .collect()
    }
}

/// Portal A (entity 1) at the origin paired with portal B (entity 2) at `(10, 0, 0)`. Both
/// face +Z, are their own surface and anchor, and are two units wide.
pub fn two_portal_scene() -> (PortalRegistry, QuadCaster, Entity, Entity) {
    let mut registry = PortalRegistry::new();
    let mut caster = QuadCaster::default();
    let (a, b) = (Entity::from_raw(1), Entity::from_raw(2));
    for (portal, position) in [(a, Vec3::ZERO), (b, Vec3::X * 10.)] {
        let pose = Mat4::from_translation(position);
        registry.register(
            portal,
            PortalRecord::new(pose)
                .with_surface(portal)
                .with_anchor(portal, pose),
        );
        caster.push(Quad::facing(portal, position, Vec3::Z, Vec2::ONE));
    }
    registry.pair(a, b).unwrap();
    (registry, caster, a, b)
}

/// Headless app stepping Rapier, for tests against real colliders.
pub fn rapier_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugin(AssetPlugin::default())
        .add_asset::<Mesh>()
        .add_plugin(ScenePlugin)
        .add_plugin(TransformPlugin)
        .add_plugin(HierarchyPlugin)
        .add_plugin(RapierPhysicsPlugin::<NoUserData>::default());
    app
}

/// Fixed box collider, already at its global pose so a single step places it.
pub fn spawn_box(
    app: &mut App,
    position: Vec3,
    half_extents: Vec3,
    groups: CollisionGroups,
    sensor: bool,
) -> Entity {
    let transform = Transform::from_translation(position);
    let mut entity = app.world.spawn((
        transform,
        GlobalTransform::from(transform),
        Collider::cuboid(half_extents.x, half_extents.y, half_extents.z),
        groups,
    ));
    if sensor {
        entity.insert(Sensor);
    }
    entity.id()
}

/// Run enough frames for new colliders to reach the query pipeline.
pub fn settle(app: &mut App) {
    app.update();
    app.update();
}

/// Minimal teleportable object.
#[derive(Debug, Clone)]
pub struct TestBody {
    pub entity: Entity,
    pub position: Vec3,
    pub velocity: Vec3,
    pub tag: String,
    pub layers: Group,
    pub mask: Group,
    pub children: HashMap<Entity, Vec<Entity>>,
}

impl TestBody {
    pub fn new(entity: Entity) -> Self {
        TestBody {
            entity,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            tag: String::new(),
            layers: Group::empty(),
            mask: Group::ALL,
            children: HashMap::default(),
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_children(
        mut self,
        parent: Entity,
        children: impl IntoIterator<Item = Entity>,
    ) -> Self {
        self.children.entry(parent).or_default().extend(children);
        self
    }
}

impl Portable for TestBody {
    fn entity(&self) -> Entity {
        self.entity
    }

    fn origin(&self) -> Vec3 {
        self.position
    }

    fn teleport(&mut self, portal: &PortalTransform) {
        portal.modify_point_in_place(&mut self.position);
        portal.modify_vector_in_place(&mut self.velocity);
        portal.modify_tag_in_place(&mut self.tag);
        self.layers = portal.modify_layer_mask(self.layers);
    }

    fn portal_layer_mask(&self) -> Group {
        self.mask
    }

    fn children(&self, node: Entity) -> Vec<Entity> {
        self.children.get(&node).cloned().unwrap_or_default()
    }
}
