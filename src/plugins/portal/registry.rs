//! Registry of every active portal.
//!
//! The registry owns the portal records and the symmetric pairing between them. Pairing is
//! keyed by entity and only ever mutated through [`PortalRegistry::pair`],
//! [`PortalRegistry::unpair`] and [`PortalRegistry::unregister`], which keep both sides of a
//! link consistent.

use bevy::{prelude::*, utils::HashMap};

use super::{error::PortalError, transform::PortalTransform};
use crate::plugins::physics::Layer;

/// Reference frame used as the basis of a portal's teleport transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorFrame {
    pub entity: Entity,
    pub local_to_world: Mat4,
}

impl AnchorFrame {
    pub fn new(entity: Entity, local_to_world: Mat4) -> Self {
        AnchorFrame {
            entity,
            local_to_world,
        }
    }
}

/// Everything the traversal code needs to know about one portal.
#[derive(Debug, Clone)]
pub struct PortalRecord {
    /// Collider identifying this portal in physics queries.
    pub surface: Option<Entity>,
    pub anchor: Option<AnchorFrame>,
    /// Pose of the portal surface this step.
    pub local_to_world: Mat4,
    /// Pose of the portal surface at the end of the previous step.
    pub previous_local_to_world: Mat4,
    pub layers: Vec<Layer>,
    pub tags: Vec<String>,
    connected: Option<Entity>,
}

impl PortalRecord {
    pub fn new(local_to_world: Mat4) -> Self {
        PortalRecord {
            surface: None,
            anchor: None,
            local_to_world,
            previous_local_to_world: local_to_world,
            layers: Vec::new(),
            tags: Vec::new(),
            connected: None,
        }
    }

    pub fn with_surface(mut self, surface: Entity) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_anchor(mut self, entity: Entity, local_to_world: Mat4) -> Self {
        self.anchor = Some(AnchorFrame::new(entity, local_to_world));
        self
    }

    pub fn with_layers(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.layers = layers.into_iter().collect();
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn connected(&self) -> Option<Entity> {
        self.connected
    }

    /// Where `point`, expressed relative to the previous pose of the portal, sits now that
    /// the portal has moved to its current pose.
    pub fn reconstruct_previous(&self, point: Vec3) -> Vec3 {
        if self.local_to_world == self.previous_local_to_world {
            return point;
        }
        let local = self.previous_local_to_world.inverse().transform_point3(point);
        self.local_to_world.transform_point3(local)
    }
}

#[derive(Debug, Default, Resource)]
pub struct PortalRegistry {
    portals: HashMap<Entity, PortalRecord>,
    /// Registration order, used for deterministic iteration.
    order: Vec<Entity>,
    surfaces: HashMap<Entity, Entity>,
}

impl PortalRegistry {
    pub fn new() -> Self {
        PortalRegistry::default()
    }

    /// Register a portal, or refresh the record of an already registered one.
    ///
    /// Refreshing keeps the existing pairing and previous pose.
    pub fn register(&mut self, portal: Entity, mut record: PortalRecord) {
        if let Some(existing) = self.portals.get(&portal) {
            record.connected = existing.connected;
            record.previous_local_to_world = existing.previous_local_to_world;
            if let Some(surface) = existing.surface {
                self.release_surface(surface, portal);
            }
        } else {
            info!("Registering portal {:?}", portal);
            record.connected = None;
            self.order.push(portal);
        }
        if let Some(surface) = record.surface {
            match self.surfaces.get(&surface) {
                Some(owner) if *owner != portal => warn!(
                    "Surface {:?} of portal {:?} already belongs to portal {:?}",
                    surface, portal, owner
                ),
                _ => {
                    self.surfaces.insert(surface, portal);
                }
            }
        }
        self.portals.insert(portal, record);
    }

    /// Drop the lookup entry of `surface` if `portal` owns it.
    fn release_surface(&mut self, surface: Entity, portal: Entity) {
        if self.surfaces.get(&surface) == Some(&portal) {
            self.surfaces.remove(&surface);
        }
    }

    /// Remove a portal, clearing its partner's back-link first.
    pub fn unregister(&mut self, portal: Entity) -> Option<PortalRecord> {
        self.unpair(portal);
        let record = self.portals.remove(&portal)?;
        info!("Unregistering portal {:?}", portal);
        self.order.retain(|p| *p != portal);
        if let Some(surface) = record.surface {
            self.release_surface(surface, portal);
        }
        Some(record)
    }

    /// Connect `a` and `b`. Any previous partner of either side is disconnected first.
    pub fn pair(&mut self, a: Entity, b: Entity) -> Result<(), PortalError> {
        if a == b {
            return Err(PortalError::SelfLink(a));
        }
        for portal in [a, b] {
            if !self.portals.contains_key(&portal) {
                return Err(PortalError::UnknownPortal(portal));
            }
        }
        if self.connected(a) == Some(b) {
            return Ok(());
        }
        self.unpair(a);
        self.unpair(b);
        if let Some(record) = self.portals.get_mut(&a) {
            record.connected = Some(b);
        }
        if let Some(record) = self.portals.get_mut(&b) {
            record.connected = Some(a);
        }
        debug!("Connected portals {:?} <-> {:?}", a, b);
        Ok(())
    }

    /// Disconnect `portal` from its partner, if it has one. Returns the former partner.
    pub fn unpair(&mut self, portal: Entity) -> Option<Entity> {
        let partner = self.portals.get_mut(&portal)?.connected.take()?;
        if let Some(record) = self.portals.get_mut(&partner) {
            if record.connected == Some(portal) {
                record.connected = None;
            }
        }
        debug!("Disconnected portals {:?} <-> {:?}", portal, partner);
        Some(partner)
    }

    pub fn connected(&self, portal: Entity) -> Option<Entity> {
        self.portals.get(&portal)?.connected
    }

    pub fn get(&self, portal: Entity) -> Option<&PortalRecord> {
        self.portals.get(&portal)
    }

    pub fn contains(&self, portal: Entity) -> bool {
        self.portals.contains_key(&portal)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Portals in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &PortalRecord)> {
        self.order
            .iter()
            .filter_map(|portal| self.portals.get(portal).map(|record| (*portal, record)))
    }

    /// Which portal, if any, owns the given collider.
    pub fn portal_for_surface(&self, surface: Entity) -> Option<Entity> {
        self.surfaces.get(&surface).copied()
    }

    /// Transform view from `portal` to its connected portal.
    pub fn transform(&self, portal: Entity) -> Option<PortalTransform<'_>> {
        let local = self.portals.get(&portal)?;
        let remote = local
            .connected
            .and_then(|partner| self.portals.get(&partner).map(|record| (partner, record)));
        Some(PortalTransform::new(portal, local, remote))
    }

    /// Update the current surface and anchor poses of a portal.
    pub fn set_pose(&mut self, portal: Entity, local_to_world: Mat4, anchor: Option<Mat4>) {
        if let Some(record) = self.portals.get_mut(&portal) {
            record.local_to_world = local_to_world;
            if let (Some(frame), Some(anchor)) = (record.anchor.as_mut(), anchor) {
                frame.local_to_world = anchor;
            }
        }
    }

    /// Remember the current pose of every portal as its previous pose.
    pub fn snapshot_previous(&mut self) {
        for record in self.portals.values_mut() {
            record.previous_local_to_world = record.local_to_world;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(count: u32) -> (PortalRegistry, Vec<Entity>) {
        let mut registry = PortalRegistry::new();
        let portals = (1..=count).map(Entity::from_raw).collect::<Vec<_>>();
        for (i, portal) in portals.iter().enumerate() {
            let pose = Mat4::from_translation(Vec3::X * i as f32);
            registry.register(
                *portal,
                PortalRecord::new(pose)
                    .with_surface(*portal)
                    .with_anchor(*portal, pose),
            );
        }
        (registry, portals)
    }

    #[test]
    fn pairing_is_symmetric() {
        let (mut registry, p) = registry_with(2);
        registry.pair(p[0], p[1]).unwrap();
        assert_eq!(registry.connected(p[0]), Some(p[1]));
        assert_eq!(registry.connected(p[1]), Some(p[0]));
    }

    #[test]
    fn repairing_clears_stale_back_links() {
        let (mut registry, p) = registry_with(4);
        registry.pair(p[0], p[1]).unwrap();
        registry.pair(p[2], p[3]).unwrap();
        registry.pair(p[0], p[2]).unwrap();
        assert_eq!(registry.connected(p[0]), Some(p[2]));
        assert_eq!(registry.connected(p[2]), Some(p[0]));
        assert_eq!(registry.connected(p[1]), None);
        assert_eq!(registry.connected(p[3]), None);
    }

    #[test]
    fn self_and_unknown_links_are_rejected() {
        let (mut registry, p) = registry_with(1);
        assert!(matches!(
            registry.pair(p[0], p[0]),
            Err(PortalError::SelfLink(_))
        ));
        let ghost = Entity::from_raw(99);
        assert!(matches!(
            registry.pair(p[0], ghost),
            Err(PortalError::UnknownPortal(e)) if e == ghost
        ));
        assert_eq!(registry.connected(p[0]), None);
    }

    #[test]
    fn unregister_clears_partner() {
        let (mut registry, p) = registry_with(2);
        registry.pair(p[0], p[1]).unwrap();
        assert!(registry.unregister(p[1]).is_some());
        assert_eq!(registry.connected(p[0]), None);
        assert_eq!(registry.portal_for_surface(p[1]), None);
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn shared_surface_stays_with_its_first_portal() {
        let (mut registry, p) = registry_with(2);
        let late = Entity::from_raw(3);
        registry.register(late, PortalRecord::new(Mat4::IDENTITY).with_surface(p[0]));
        assert_eq!(registry.portal_for_surface(p[0]), Some(p[0]));

        // Refreshing the owner keeps its surface.
        registry.register(p[0], PortalRecord::new(Mat4::IDENTITY).with_surface(p[0]));
        assert_eq!(registry.portal_for_surface(p[0]), Some(p[0]));

        // Removing the portal that lost the claim leaves the owner's entry alone.
        registry.unregister(late);
        assert_eq!(registry.portal_for_surface(p[0]), Some(p[0]));

        // Moving to another surface releases the old one.
        registry.register(p[1], PortalRecord::new(Mat4::IDENTITY).with_surface(late));
        assert_eq!(registry.portal_for_surface(p[1]), None);
        assert_eq!(registry.portal_for_surface(late), Some(p[1]));
    }

    #[test]
    fn refreshing_a_record_keeps_pairing_and_previous_pose() {
        let (mut registry, p) = registry_with(2);
        registry.pair(p[0], p[1]).unwrap();
        let moved = Mat4::from_translation(Vec3::Y);
        registry.register(p[0], PortalRecord::new(moved).with_surface(p[0]));
        let record = registry.get(p[0]).unwrap();
        assert_eq!(record.connected(), Some(p[1]));
        assert_eq!(record.previous_local_to_world, Mat4::IDENTITY);
        assert_eq!(record.local_to_world, moved);
    }

    #[test]
    fn previous_pose_reconstruction_follows_portal_motion() {
        let (mut registry, p) = registry_with(1);
        registry.set_pose(p[0], Mat4::from_translation(Vec3::Z * 2.), None);
        let record = registry.get(p[0]).unwrap();
        let point = record.reconstruct_previous(Vec3::new(0., 0., -1.));
        assert!(point.abs_diff_eq(Vec3::new(0., 0., 1.), 1e-6));

        registry.snapshot_previous();
        let record = registry.get(p[0]).unwrap();
        assert_eq!(record.reconstruct_previous(Vec3::ONE), Vec3::ONE);
    }
}
