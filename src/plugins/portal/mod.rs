use bevy::{prelude::*, utils::HashMap};
use bevy_rapier3d::prelude::*;

pub mod chain;
pub mod config;
pub mod crossing;
pub mod error;
pub mod events;
pub mod portable;
pub mod raytrace;
pub mod registry;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::PortalChain;
pub use config::PortalConfig;
pub use crossing::{
    Crossing, CrossingClaim, CrossingDetector, CrossingHandler, CrossingQuery, Portable,
    TrackedRegistry, TrackedTransform,
};
pub use error::PortalError;
pub use events::{
    EventPool, TeleportCallback, TeleportDispatcher, TeleportListener, TeleportPhase,
    TeleportationEvent,
};
pub use portable::{world_matrix, WorldPortable};
pub use raytrace::{PortalRay, PortalRaycaster, PortalTrace, TraceRequest};
pub use registry::{AnchorFrame, PortalRecord, PortalRegistry};
pub use transform::PortalTransform;

use super::physics::{Layer, ALL_GROUPS};

#[derive(Debug, Default)]
pub struct PortalPlugin {
    pub config: PortalConfig,
}

/// A portal surface. The entity carrying it is expected to carry the portal's collider too.
#[derive(Debug, Default, Component, Clone, Reflect, FromReflect)]
#[reflect(Component)]
pub struct Portal {
    /// Frame the teleport transform is computed from, the portal entity itself when unset.
    pub anchor: Option<Entity>,
    /// Collider identifying the portal in physics queries, the portal entity itself when unset.
    pub surface: Option<Entity>,
    /// Portal to pair with once both are registered.
    pub link: Option<Entity>,
    pub layers: Vec<Layer>,
    pub tags: Vec<String>,
}

/// Marks an object that goes through portals.
#[derive(Debug, Component, Clone, Reflect, FromReflect)]
#[reflect(Component)]
pub struct PortalTeleport {
    /// Point tested for crossings, in the object's local space.
    pub origin_offset: Vec3,
    /// Remap tags and layers on the whole hierarchy instead of the root only.
    pub apply_to_children: bool,
    /// Layers of the portal surfaces the object can go through.
    pub portal_mask: u32,
}

impl Default for PortalTeleport {
    fn default() -> Self {
        PortalTeleport {
            origin_offset: Vec3::ZERO,
            apply_to_children: false,
            portal_mask: ALL_GROUPS.bits(),
        }
    }
}

#[derive(Debug, Default, Component, Clone, PartialEq, Eq, Reflect, FromReflect)]
#[reflect(Component)]
pub struct Tag(pub String);

/// Sent once per portal crossing, after every crossing of the frame has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalCrossed {
    pub entity: Entity,
    pub source: Entity,
    pub target: Entity,
}

#[derive(Debug, StageLabel)]
pub enum PortalStages {
    Sync,
    Resolve,
}

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<Portal>()
            .register_type::<PortalTeleport>()
            .register_type::<Tag>()
            .register_type::<PortalConfig>()
            .insert_resource(self.config.clone())
            .init_resource::<PortalRegistry>()
            .init_resource::<TrackedRegistry>()
            .init_resource::<TeleportDispatcher>()
            .add_event::<PortalCrossed>();

        app.add_stage_after(
            PhysicsStages::Writeback,
            PortalStages::Sync,
            SystemStage::parallel(),
        );
        app.add_system_to_stage(PortalStages::Sync, sync_portals);
        app.add_system_to_stage(PortalStages::Sync, sync_tracked);

        app.add_stage_after(
            PortalStages::Sync,
            PortalStages::Resolve,
            SystemStage::single_threaded(),
        );
        app.add_system_to_stage(PortalStages::Resolve, resolve_crossings);
    }
}

/// Keep the registry in step with the `Portal` components.
fn sync_portals(
    mut registry: ResMut<PortalRegistry>,
    mut dispatcher: ResMut<TeleportDispatcher>,
    portals: Query<(Entity, &Portal, ChangeTrackers<Portal>)>,
    transforms: Query<(&Transform, Option<&Parent>)>,
    removed: RemovedComponents<Portal>,
    mut pending_links: Local<Vec<(Entity, Entity)>>,
    mut declared_links: Local<HashMap<Entity, Entity>>,
) {
    for entity in removed.iter() {
        registry.unregister(entity);
        dispatcher.forget(entity);
        declared_links.remove(&entity);
    }

    for (entity, portal, tracker) in &portals {
        let pose = hierarchy_matrix(entity, &transforms);
        let anchor = portal.anchor.unwrap_or(entity);
        let anchor_pose = if anchor == entity {
            pose
        } else {
            hierarchy_matrix(anchor, &transforms)
        };

        if tracker.is_changed() || !registry.contains(entity) {
            registry.register(
                entity,
                PortalRecord::new(pose)
                    .with_surface(portal.surface.unwrap_or(entity))
                    .with_anchor(anchor, anchor_pose)
                    .with_layers(portal.layers.iter().copied())
                    .with_tags(portal.tags.iter().cloned()),
            );
            pending_links.retain(|(source, _)| *source != entity);
            match portal.link {
                Some(link) => {
                    declared_links.insert(entity, link);
                    pending_links.push((entity, link));
                }
                // Only a link this portal declared itself is withdrawn, pairings made by the
                // other side or through the registry stay.
                None => {
                    if let Some(link) = declared_links.remove(&entity) {
                        if registry.connected(entity) == Some(link) {
                            debug!("Unlinking portal {:?} from {:?}", entity, link);
                            registry.unpair(entity);
                        }
                    }
                }
            }
        } else {
            registry.set_pose(entity, pose, Some(anchor_pose));
        }
    }

    // Links go in after registration so that two portals spawned together can name each other.
    pending_links.retain(|(portal, link)| {
        if !registry.contains(*portal) {
            return false;
        }
        if registry.connected(*portal) == Some(*link) {
            return false;
        }
        match registry.pair(*portal, *link) {
            Ok(()) => false,
            Err(PortalError::UnknownPortal(missing)) if missing == *link => {
                debug!("Portal {:?} waiting for {:?} to link", portal, link);
                true
            }
            Err(err) => {
                warn!("Cannot link portal {:?}: {}", portal, err);
                false
            }
        }
    });
}

/// Start and stop tracking objects as `PortalTeleport` comes and goes.
fn sync_tracked(
    mut tracked: ResMut<TrackedRegistry>,
    mut dispatcher: ResMut<TeleportDispatcher>,
    added: Query<(Entity, &PortalTeleport), Added<PortalTeleport>>,
    transforms: Query<(&Transform, Option<&Parent>)>,
    removed: RemovedComponents<PortalTeleport>,
) {
    for entity in removed.iter() {
        if tracked.unregister(entity).is_some() {
            dispatcher.forget(entity);
        }
    }
    for (entity, settings) in &added {
        let origin = hierarchy_matrix(entity, &transforms).transform_point3(settings.origin_offset);
        tracked.register(entity, origin);
    }
}

fn hierarchy_matrix(entity: Entity, transforms: &Query<(&Transform, Option<&Parent>)>) -> Mat4 {
    let mut matrix = Mat4::IDENTITY;
    let mut current = Some(entity);
    while let Some(node) = current {
        current = match transforms.get(node) {
            Ok((transform, parent)) => {
                matrix = transform.compute_matrix() * matrix;
                parent.map(|parent| parent.get())
            }
            Err(_) => None,
        };
    }
    matrix
}

/// Resolve every tracked object's crossings for this frame.
fn resolve_crossings(world: &mut World) {
    if !world.contains_resource::<RapierContext>() {
        return;
    }
    let config = world
        .get_resource::<PortalConfig>()
        .cloned()
        .unwrap_or_default();

    let crossed = world.resource_scope(|world, mut registry: Mut<PortalRegistry>| {
        let crossed = world.resource_scope(|world, context: Mut<RapierContext>| {
            world.resource_scope(|world, mut tracked: Mut<TrackedRegistry>| {
                world.resource_scope(|world, mut dispatcher: Mut<TeleportDispatcher>| {
                    let detector = CrossingDetector::new(&registry, &*context, &config);
                    let mut crossed = Vec::new();
                    for entity in tracked.order().to_vec() {
                        let settings = match world.get::<PortalTeleport>(entity) {
                            Some(settings) => settings.clone(),
                            None => continue,
                        };
                        let state = match tracked.get_mut(entity) {
                            Some(state) => state,
                            None => continue,
                        };
                        let mut portable =
                            WorldPortable::new(world, entity, settings, config.teleport_velocity);
                        for crossing in detector.resolve(state, &mut portable, &mut dispatcher) {
                            if let Some(target) = registry.connected(crossing.portal) {
                                crossed.push(PortalCrossed {
                                    entity,
                                    source: crossing.portal,
                                    target,
                                });
                            }
                        }
                    }
                    crossed
                })
            })
        });
        registry.snapshot_previous();
        crossed
    });

    if crossed.is_empty() {
        return;
    }
    if let Some(mut events) = world.get_resource_mut::<Events<PortalCrossed>>() {
        for event in crossed {
            events.send(event);
        }
    }
}
