use bevy::prelude::*;
use bevy_rapier3d::prelude::{Group, RapierConfiguration, TimestepMode};

pub mod caster;

pub use caster::{CastFilter, CastHit, CastShape, ShapeCaster, TriggerInteraction};

pub const WALLS_GROUP: Group = Group::GROUP_1;
pub const PROPS_GROUP: Group = Group::GROUP_2;
pub const PORTAL_GROUP: Group = Group::GROUP_3;
pub const PLAYER_GROUP: Group = Group::GROUP_4;
pub const RAYCAST_GROUP: Group = Group::GROUP_5;
pub const GROUND_GROUP: Group = Group::GROUP_6;
pub const ALL_GROUPS: Group = Group::ALL;

/// Index of a collision layer, i.e. the position of its bit in a [`Group`] mask.
pub type Layer = u8;

/// Number of layers a [`Group`] mask can hold.
pub const LAYER_COUNT: Layer = 32;

/// Mask containing only `layer`. Out of range layers give an empty mask.
pub fn layer_group(layer: Layer) -> Group {
    if layer < LAYER_COUNT {
        Group::from_bits_truncate(1 << layer)
    } else {
        Group::empty()
    }
}

/// Iterate over the layers set in `mask`, lowest first.
pub fn group_layers(mask: Group) -> impl Iterator<Item = Layer> {
    let bits = mask.bits();
    (0..LAYER_COUNT).filter(move |layer| bits & (1 << *layer) != 0)
}

pub struct PhysicsPlugin;

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.add_startup_system(configure_rapier);
    }
}

fn configure_rapier(mut config: ResMut<RapierConfiguration>) {
    // Extra CCD substeps because them portals can go fast
    config.timestep_mode = TimestepMode::Variable {
        max_dt: 1. / 20.,
        time_scale: 1.,
        substeps: 4,
    }
}
