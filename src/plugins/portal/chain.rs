//! Ordered sequences of portal crossings.

use bevy::prelude::*;
use bevy_rapier3d::prelude::Group;

use super::registry::PortalRegistry;

/// Portals crossed in order, e.g. by a ray trace or by an object over several steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalChain {
    portals: Vec<Entity>,
}

impl PortalChain {
    pub fn new() -> Self {
        PortalChain::default()
    }

    pub fn push(&mut self, portal: Entity) {
        self.portals.push(portal);
    }

    pub fn portals(&self) -> &[Entity] {
        &self.portals
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    /// Net teleport matrix of the whole chain. Portals that cannot teleport contribute nothing.
    pub fn matrix(&self, registry: &PortalRegistry) -> Mat4 {
        fold_matrix(&self.portals, registry)
    }

    pub fn modify_point(&self, registry: &PortalRegistry, point: Vec3) -> Vec3 {
        self.portals.iter().fold(point, |point, portal| {
            registry
                .transform(*portal)
                .map_or(point, |transform| transform.modify_point(point))
        })
    }

    pub fn modify_layer_mask(&self, registry: &PortalRegistry, mask: Group) -> Group {
        self.portals.iter().fold(mask, |mask, portal| {
            registry
                .transform(*portal)
                .map_or(mask, |transform| transform.modify_layer_mask(mask))
        })
    }

    /// Number of leading portals shared with `other`.
    pub fn common_prefix(&self, other: &PortalChain) -> usize {
        self.portals
            .iter()
            .zip(other.portals.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Incremental matrix from the end frame of `old` to the end frame of `self`.
    ///
    /// Only the parts after the shared prefix are evaluated.
    pub fn difference(&self, old: &PortalChain, registry: &PortalRegistry) -> Mat4 {
        let prefix = self.common_prefix(old);
        let added = fold_matrix(&self.portals[prefix..], registry);
        let removed = fold_matrix(&old.portals[prefix..], registry);
        added * removed.inverse()
    }
}

impl FromIterator<Entity> for PortalChain {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        PortalChain {
            portals: iter.into_iter().collect(),
        }
    }
}

fn fold_matrix(portals: &[Entity], registry: &PortalRegistry) -> Mat4 {
    portals.iter().fold(Mat4::IDENTITY, |matrix, portal| {
        registry
            .transform(*portal)
            .map_or(matrix, |transform| transform.modify_matrix(matrix))
    })
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;
    use crate::plugins::portal::registry::PortalRecord;

    fn entity(id: u32) -> Entity {
        Entity::from_raw(id)
    }

    /// Two pairs: 1 <-> 2 translate by +10 X, 3 <-> 4 rotate a quarter turn around Y.
    fn registry() -> PortalRegistry {
        let mut registry = PortalRegistry::new();
        let poses = [
            Mat4::IDENTITY,
            Mat4::from_translation(Vec3::X * 10.),
            Mat4::from_translation(Vec3::Z * 5.),
            Mat4::from_rotation_translation(Quat::from_rotation_y(FRAC_PI_2), Vec3::Z * 5.),
        ];
        for (i, pose) in poses.into_iter().enumerate() {
            let portal = entity(i as u32 + 1);
            registry.register(portal, PortalRecord::new(pose).with_anchor(portal, pose));
        }
        registry.pair(entity(1), entity(2)).unwrap();
        registry.pair(entity(3), entity(4)).unwrap();
        registry
    }

    #[test]
    fn folding_applies_portals_left_to_right() {
        let registry = registry();
        let chain: PortalChain = [entity(1), entity(3)].into_iter().collect();
        let point = Vec3::new(0., 0., 6.);
        let folded = chain.modify_point(&registry, point);
        let stepwise = registry
            .transform(entity(3))
            .unwrap()
            .modify_point(registry.transform(entity(1)).unwrap().modify_point(point));
        assert!(folded.abs_diff_eq(stepwise, 1e-5));
        assert!(chain
            .matrix(&registry)
            .transform_point3(point)
            .abs_diff_eq(stepwise, 1e-5));
    }

    #[test]
    fn difference_is_the_matrix_of_the_new_suffix() {
        let registry = registry();
        let old: PortalChain = [entity(1)].into_iter().collect();
        let new: PortalChain = [entity(1), entity(3)].into_iter().collect();
        assert_eq!(new.common_prefix(&old), 1);
        let diff = new.difference(&old, &registry);
        let expected = registry.transform(entity(3)).unwrap().teleport_matrix().unwrap();
        assert!(diff.abs_diff_eq(expected, 1e-5));
        // Going from the old end frame through the difference lands on the new end frame.
        assert!((diff * old.matrix(&registry)).abs_diff_eq(new.matrix(&registry), 1e-4));
    }

    #[test]
    fn difference_undoes_dropped_crossings() {
        let registry = registry();
        let old: PortalChain = [entity(1), entity(3)].into_iter().collect();
        let new: PortalChain = [entity(1)].into_iter().collect();
        let diff = new.difference(&old, &registry);
        assert!((diff * old.matrix(&registry)).abs_diff_eq(new.matrix(&registry), 1e-4));
        assert!(PortalChain::new()
            .difference(&PortalChain::new(), &registry)
            .abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }
}
