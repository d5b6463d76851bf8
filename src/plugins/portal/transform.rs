//! Mapping of spatial quantities, layers and tags through a portal.
//!
//! Everything here is derived from the current anchor frames of the two portals, so it must
//! be looked up again whenever the anchors move.

use std::borrow::Cow;

use bevy::prelude::*;
use bevy_rapier3d::prelude::Group;

use super::registry::PortalRecord;
use crate::plugins::physics::{group_layers, layer_group, Layer};

/// Borrowed view over a portal and the portal it is connected to.
#[derive(Debug, Clone, Copy)]
pub struct PortalTransform<'a> {
    portal: Entity,
    local: &'a PortalRecord,
    remote: Option<(Entity, &'a PortalRecord)>,
}

impl<'a> PortalTransform<'a> {
    pub fn new(
        portal: Entity,
        local: &'a PortalRecord,
        remote: Option<(Entity, &'a PortalRecord)>,
    ) -> Self {
        PortalTransform {
            portal,
            local,
            remote,
        }
    }

    pub fn portal(&self) -> Entity {
        self.portal
    }

    pub fn connected(&self) -> Option<Entity> {
        self.remote.map(|(entity, _)| entity)
    }

    /// Both sides have an anchor, and the anchors are different frames.
    pub fn uses_teleport(&self) -> bool {
        self.anchors().is_some()
    }

    pub fn uses_layers(&self) -> bool {
        self.remote.map_or(false, |(_, remote)| {
            !self.local.layers.is_empty() && !remote.layers.is_empty()
        })
    }

    pub fn uses_tag(&self) -> bool {
        self.remote.map_or(false, |(_, remote)| {
            !self.local.tags.is_empty() && !remote.tags.is_empty()
        })
    }

    fn anchors(&self) -> Option<(Mat4, Mat4)> {
        let (_, remote) = self.remote?;
        let (local, remote) = (self.local.anchor?, remote.anchor?);
        if local.entity == remote.entity {
            return None;
        }
        Some((local.local_to_world, remote.local_to_world))
    }

    /// Matrix taking a local-to-world matrix on this side to the equivalent one on the other side.
    pub fn teleport_matrix(&self) -> Option<Mat4> {
        let (local, remote) = self.anchors()?;
        Some(remote * local.inverse())
    }

    pub fn modify_point(&self, point: Vec3) -> Vec3 {
        match self.teleport_matrix() {
            Some(teleport) => teleport.transform_point3(point),
            None => point,
        }
    }

    pub fn modify_point_in_place(&self, point: &mut Vec3) -> bool {
        modify_in_place(point, |p| self.modify_point(p), self.uses_teleport())
    }

    /// Rotate a direction through the portal. The result keeps the length of the input.
    pub fn modify_direction(&self, direction: Vec3) -> Vec3 {
        match self.teleport_matrix() {
            Some(teleport) => {
                teleport.transform_vector3(direction).normalize_or_zero() * direction.length()
            }
            None => direction,
        }
    }

    pub fn modify_direction_in_place(&self, direction: &mut Vec3) -> bool {
        modify_in_place(direction, |d| self.modify_direction(d), self.uses_teleport())
    }

    /// Map a free vector through the portal, including the scale difference between anchors.
    pub fn modify_vector(&self, vector: Vec3) -> Vec3 {
        match self.teleport_matrix() {
            Some(teleport) => teleport.transform_vector3(vector),
            None => vector,
        }
    }

    pub fn modify_vector_in_place(&self, vector: &mut Vec3) -> bool {
        modify_in_place(vector, |v| self.modify_vector(v), self.uses_teleport())
    }

    pub fn modify_rotation(&self, rotation: Quat) -> Quat {
        match self.anchors() {
            Some((local, remote)) => {
                let (_, local_rot, _) = local.to_scale_rotation_translation();
                let (_, remote_rot, _) = remote.to_scale_rotation_translation();
                (remote_rot * local_rot.inverse() * rotation).normalize()
            }
            None => rotation,
        }
    }

    pub fn modify_rotation_in_place(&self, rotation: &mut Quat) -> bool {
        modify_in_place(rotation, |r| self.modify_rotation(r), self.uses_teleport())
    }

    pub fn modify_matrix(&self, matrix: Mat4) -> Mat4 {
        match self.teleport_matrix() {
            Some(teleport) => teleport * matrix,
            None => matrix,
        }
    }

    pub fn modify_matrix_in_place(&self, matrix: &mut Mat4) -> bool {
        modify_in_place(matrix, |m| self.modify_matrix(m), self.uses_teleport())
    }

    pub fn modify_transform(&self, transform: Transform) -> Transform {
        match self.teleport_matrix() {
            Some(teleport) => Transform::from_matrix(teleport * transform.compute_matrix()),
            None => transform,
        }
    }

    pub fn modify_layer(&self, layer: Layer) -> Layer {
        match self.remote {
            Some((_, remote)) if self.uses_layers() => {
                map_paired(&self.local.layers, &remote.layers, &layer).unwrap_or(layer)
            }
            _ => layer,
        }
    }

    pub fn modify_layer_in_place(&self, layer: &mut Layer) -> bool {
        modify_in_place(layer, |l| self.modify_layer(l), self.uses_layers())
    }

    /// Remap every layer of the mask independently and union the results.
    pub fn modify_layer_mask(&self, mask: Group) -> Group {
        if !self.uses_layers() {
            return mask;
        }
        group_layers(mask)
            .map(|layer| layer_group(self.modify_layer(layer)))
            .fold(Group::empty(), |acc, group| acc | group)
    }

    pub fn modify_layer_mask_in_place(&self, mask: &mut Group) -> bool {
        modify_in_place(mask, |m| self.modify_layer_mask(m), self.uses_layers())
    }

    pub fn modify_tag<'t>(&self, tag: &'t str) -> Cow<'t, str> {
        match self.remote {
            Some((_, remote)) if self.uses_tag() => {
                let mut pairs = self.local.tags.iter().zip(remote.tags.iter());
                match pairs.find(|(local, _)| *local == tag) {
                    Some((_, mapped)) => Cow::Owned(mapped.clone()),
                    None => Cow::Borrowed(tag),
                }
            }
            _ => Cow::Borrowed(tag),
        }
    }

    pub fn modify_tag_in_place(&self, tag: &mut String) -> bool {
        if !self.uses_tag() {
            return false;
        }
        let mapped = self.modify_tag(tag).into_owned();
        if mapped == *tag {
            return false;
        }
        *tag = mapped;
        true
    }
}

/// Index-paired lookup over the shorter of the two lists. First match wins.
fn map_paired<T: PartialEq + Copy>(local: &[T], remote: &[T], value: &T) -> Option<T> {
    local
        .iter()
        .zip(remote.iter())
        .find(|(from, _)| *from == value)
        .map(|(_, to)| *to)
}

fn modify_in_place<T: Copy + PartialEq>(
    value: &mut T,
    modify: impl FnOnce(T) -> T,
    applies: bool,
) -> bool {
    if !applies {
        return false;
    }
    let modified = modify(*value);
    if modified == *value {
        return false;
    }
    *value = modified;
    true
}
