use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use super::{crossing::Portable, events::subtree, transform::PortalTransform, PortalTeleport, Tag};

/// Local-to-world matrix of `entity`, composed from the local transforms up its hierarchy.
///
/// Rapier writes body poses back to `Transform`, and `GlobalTransform` is only propagated
/// later in the frame, so this is the up to date pose between the two.
pub fn world_matrix(world: &World, entity: Entity) -> Mat4 {
    let mut matrix = Mat4::IDENTITY;
    let mut current = Some(entity);
    while let Some(node) = current {
        if let Some(transform) = world.get::<Transform>(node) {
            matrix = transform.compute_matrix() * matrix;
        }
        current = world.get::<Parent>(node).map(|parent| parent.get());
    }
    matrix
}

/// A teleportable entity seen through exclusive world access.
pub struct WorldPortable<'w> {
    world: &'w mut World,
    entity: Entity,
    settings: PortalTeleport,
    teleport_velocity: bool,
}

impl<'w> WorldPortable<'w> {
    pub fn new(
        world: &'w mut World,
        entity: Entity,
        settings: PortalTeleport,
        teleport_velocity: bool,
    ) -> Self {
        WorldPortable {
            world,
            entity,
            settings,
            teleport_velocity,
        }
    }

    fn parent_matrix(&self) -> Mat4 {
        self.world
            .get::<Parent>(self.entity)
            .map_or(Mat4::IDENTITY, |parent| world_matrix(self.world, parent.get()))
    }

    fn teleport_pose(&mut self, portal: &PortalTransform) {
        let teleport = match portal.teleport_matrix() {
            Some(teleport) => teleport,
            None => return,
        };
        let parent = self.parent_matrix();
        let global = teleport * world_matrix(self.world, self.entity);
        if let Some(mut transform) = self.world.get_mut::<Transform>(self.entity) {
            *transform = Transform::from_matrix(parent.inverse() * global);
        }
        if let Some(mut global_transform) = self.world.get_mut::<GlobalTransform>(self.entity) {
            *global_transform = Transform::from_matrix(global).into();
        }
    }

    fn carry_velocity(&mut self, portal: &PortalTransform) {
        if let Some(mut velocity) = self.world.get_mut::<Velocity>(self.entity) {
            velocity.linvel = portal.modify_vector(velocity.linvel);
            velocity.angvel = portal.modify_direction(velocity.angvel);
        }
    }

    fn remap_node(&mut self, node: Entity, portal: &PortalTransform) {
        if portal.uses_tag() {
            if let Some(mut tag) = self.world.get_mut::<Tag>(node) {
                let mapped = portal.modify_tag(&tag.0).into_owned();
                if mapped != tag.0 {
                    tag.0 = mapped;
                }
            }
        }
        if portal.uses_layers() {
            if let Some(mut groups) = self.world.get_mut::<CollisionGroups>(node) {
                let memberships = portal.modify_layer_mask(groups.memberships);
                if memberships != groups.memberships {
                    groups.memberships = memberships;
                }
            }
        }
    }
}

impl<'w> Portable for WorldPortable<'w> {
    fn entity(&self) -> Entity {
        self.entity
    }

    fn origin(&self) -> Vec3 {
        world_matrix(self.world, self.entity).transform_point3(self.settings.origin_offset)
    }

    fn teleport(&mut self, portal: &PortalTransform) {
        self.teleport_pose(portal);
        if self.teleport_velocity {
            self.carry_velocity(portal);
        }
        let nodes = if self.settings.apply_to_children {
            subtree(&*self, self.entity)
        } else {
            vec![self.entity]
        };
        for node in nodes {
            self.remap_node(node, portal);
        }
    }

    fn portal_layer_mask(&self) -> Group {
        Group::from_bits_truncate(self.settings.portal_mask)
    }

    fn children(&self, node: Entity) -> Vec<Entity> {
        self.world
            .get::<Children>(node)
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default()
    }
}
