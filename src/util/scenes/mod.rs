use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::plugins::{physics::*, portal::Portal};

/// Half extent of the square portal surfaces.
pub const PORTAL_HALF_SIZE: f32 = 1.5;
const PORTAL_THICKNESS: f32 = 0.02;

/// Setup a test room in a square flat arena format of specified size.
/// 5 cubes for the walls and floor, with physics colliders. The room has no ceiling so that
/// props falling through the portals can be watched from above.
pub fn make_test_arena(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
    length: f32,
    height: f32,
) -> Entity {
    const WALL_THICKNESS: f32 = 1.;

    let walls_materials = [
        materials.add(StandardMaterial::from(Color::RED)),
        materials.add(StandardMaterial::from(Color::GREEN)),
        materials.add(StandardMaterial::from(Color::BLUE)),
        materials.add(StandardMaterial::from(Color::ANTIQUE_WHITE)),
    ];
    let ground_material = materials.add(StandardMaterial::from(Color::DARK_GRAY));

    let half_len = length / 2.;
    let wall_mesh = meshes.add(
        shape::Box {
            min_x: -half_len,
            max_x: half_len,
            min_y: -height / 2.,
            max_y: height / 2.,
            min_z: -WALL_THICKNESS / 2.,
            max_z: WALL_THICKNESS / 2.,
        }
        .into(),
    );
    let ground_mesh = meshes.add(
        shape::Box {
            min_x: -half_len * 1.1,
            max_x: half_len * 1.1,
            min_y: -WALL_THICKNESS / 2.,
            max_y: WALL_THICKNESS / 2.,
            min_z: -half_len * 1.1,
            max_z: half_len * 1.1,
        }
        .into(),
    );

    let mut ground = commands.spawn(PbrBundle {
        mesh: ground_mesh,
        material: ground_material,
        transform: Transform::from_xyz(0., -WALL_THICKNESS / 2., 0.),
        ..default()
    });
    ground.insert((
        Name::from("Ground"),
        RigidBody::Fixed,
        Collider::cuboid(half_len * 1.1, WALL_THICKNESS / 2., half_len * 1.1),
        CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
    ));

    ground.with_children(|parent| {
        for (i, mat) in walls_materials.into_iter().enumerate() {
            let mut transform =
                Transform::from_xyz(0., height / 2., -(half_len + WALL_THICKNESS / 2.));
            transform.rotate_around(
                Vec3::new(0., height / 2., 0.),
                Quat::from_axis_angle(Vec3::Y, i as f32 * FRAC_PI_2),
            );
            parent
                .spawn(PbrBundle {
                    mesh: wall_mesh.clone(),
                    material: mat,
                    transform,
                    ..default()
                })
                .insert((
                    Name::from(format!("Wall_{}", i)),
                    RigidBody::Fixed,
                    Collider::cuboid(half_len, height / 2., WALL_THICKNESS / 2.),
                    CollisionGroups::new(WALLS_GROUP, ALL_GROUPS),
                ));
        }
    });
    ground.id()
}

/// Spawn two horizontal portal surfaces facing up, linked to each other.
///
/// Both portals share the same orientation, so going through one keeps the direction of travel
/// and only shifts the object by the offset between them. Returns `(a, b)`.
pub fn spawn_portal_pair(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
    a: Vec3,
    b: Vec3,
) -> (Entity, Entity) {
    let mesh = meshes.add(
        shape::Box {
            min_x: -PORTAL_HALF_SIZE,
            max_x: PORTAL_HALF_SIZE,
            min_y: -PORTAL_THICKNESS / 2.,
            max_y: PORTAL_THICKNESS / 2.,
            min_z: -PORTAL_HALF_SIZE,
            max_z: PORTAL_HALF_SIZE,
        }
        .into(),
    );
    let colors = [Color::rgba(0.1, 0.4, 1., 0.6), Color::rgba(1., 0.5, 0.1, 0.6)];

    let mut spawn = |position: Vec3, color: Color, name: &str| {
        commands
            .spawn(PbrBundle {
                mesh: mesh.clone(),
                material: materials.add(StandardMaterial {
                    base_color: color,
                    alpha_mode: AlphaMode::Blend,
                    unlit: true,
                    ..default()
                }),
                transform: Transform::from_translation(position),
                ..default()
            })
            .insert((
                Name::from(name),
                Collider::cuboid(PORTAL_HALF_SIZE, PORTAL_THICKNESS / 2., PORTAL_HALF_SIZE),
                Sensor,
                CollisionGroups::new(PORTAL_GROUP, PROPS_GROUP | PLAYER_GROUP | RAYCAST_GROUP),
            ))
            .id()
    };
    let portal_a = spawn(a, colors[0], "Portal_A");
    let portal_b = spawn(b, colors[1], "Portal_B");

    commands.entity(portal_a).insert(Portal {
        link: Some(portal_b),
        tags: vec!["blue".into()],
        ..default()
    });
    commands.entity(portal_b).insert(Portal {
        tags: vec!["orange".into()],
        ..default()
    });
    (portal_a, portal_b)
}
