use std::f32::consts::*;

use crate::{
    plugins::{physics::*, portal::*},
    util::scenes::{make_test_arena, spawn_portal_pair},
};

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

const ARENA_SIZE: f32 = 20.;
const ARENA_HEIGHT: f32 = 4.;
/// Hovering portal, props dropped on it come out of the high one and fall again.
const LOW_PORTAL: Vec3 = Vec3::new(0., 1., 0.);
const HIGH_PORTAL: Vec3 = Vec3::new(0., 9., 0.);

#[derive(Debug)]
/// Demo scene: a portal pair, props falling through it, and a scanning ray traced across it.
pub struct SandboxPlugin;

impl Plugin for SandboxPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ScanTrace>()
            .add_startup_system(setup)
            .add_system(trace_scanner)
            .add_system(log_crossings);

        #[cfg(feature = "devel")]
        {
            app.add_plugin(bevy_prototype_debug_lines::DebugLinesPlugin::default());
            app.add_system(draw_scan.after(trace_scanner));
        }
    }
}

/// Pose the scanning ray is traced from every frame.
#[derive(Debug, Component)]
pub struct Scanner {
    pub max_distance: f32,
}

/// Latest scanning trace.
#[derive(Debug, Default, Resource)]
pub struct ScanTrace(pub Option<PortalTrace>);

/// Perform sandbox initialization
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut dispatcher: ResMut<TeleportDispatcher>,
) {
    make_test_arena(&mut commands, &mut meshes, &mut materials, ARENA_SIZE, ARENA_HEIGHT);
    let (portal_a, _portal_b) =
        spawn_portal_pair(&mut commands, &mut meshes, &mut materials, LOW_PORTAL, HIGH_PORTAL);
    dispatcher.on_portal(portal_a, |phase, event| {
        if phase == TeleportPhase::Post {
            debug!("{:?} came out of {:?}", event.root, event.target);
        }
    });

    // Light
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            color: Color::ANTIQUE_WHITE,
            illuminance: 20_000.,
            shadows_enabled: true,
            ..default()
        },
        transform: Transform {
            translation: Vec3::Y * 5.,
            rotation: Quat::from_euler(EulerRot::YXZ, FRAC_PI_4, FRAC_PI_4, 0.),
            scale: Vec3::ONE,
        },
        ..default()
    });

    commands.spawn(Camera3dBundle {
        transform: Transform::from_xyz(-12., 14., 12.).looking_at(Vec3::Y * 4., Vec3::Y),
        ..default()
    });

    // Props dropped over the low portal
    let prop_mesh = meshes.add(shape::Cube { size: 0.5 }.into());
    let prop_material = materials.add(StandardMaterial::from(Color::ALICE_BLUE));
    for i in 0..3 {
        let offset = Vec3::new(i as f32 * 0.8 - 0.8, 3. + i as f32 * 1.5, 0.);
        let prop = commands
            .spawn(PbrBundle {
                mesh: prop_mesh.clone(),
                material: prop_material.clone(),
                transform: Transform::from_translation(LOW_PORTAL + offset),
                ..default()
            })
            .insert((
                Name::from(format!("Prop_{}", i)),
                RigidBody::Dynamic,
                Collider::cuboid(0.25, 0.25, 0.25),
                Velocity::zero(),
                Ccd::enabled(),
                // Terminal velocity, or the endless fall speeds up forever
                Damping {
                    linear_damping: 0.5,
                    angular_damping: 0.,
                },
                CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
                Tag("blue".into()),
                PortalTeleport::default(),
            ))
            .id();
        dispatcher.on_point(prop, move |phase, event| {
            if phase == TeleportPhase::Pre {
                debug!("Prop {} entering {:?}", i, event.source);
            }
        });
    }

    // Scanner looking down at the low portal from the side, so its second leg ends on the floor.
    commands.spawn((
        Name::from("Scanner"),
        TransformBundle::from_transform(
            Transform::from_xyz(-3., 4., 0.).looking_at(LOW_PORTAL, Vec3::Y),
        ),
        Scanner { max_distance: 30. },
    ));
}

fn trace_scanner(
    registry: Res<PortalRegistry>,
    context: Res<RapierContext>,
    config: Res<PortalConfig>,
    scanners: Query<(&GlobalTransform, &Scanner)>,
    mut trace: ResMut<ScanTrace>,
) {
    trace.0 = scanners.iter().next().map(|(transform, scanner)| {
        let request = TraceRequest::new(
            transform.compute_matrix(),
            scanner.max_distance,
            config.max_ray_segments,
        )
        .with_layer_mask(PORTAL_GROUP | WALLS_GROUP | GROUND_GROUP);
        PortalRaycaster::new(&registry, &*context).trace(&request)
    });
}

fn log_crossings(mut crossings: EventReader<PortalCrossed>, names: Query<&Name>) {
    for crossing in crossings.iter() {
        let name = names
            .get(crossing.entity)
            .map(|name| name.as_str().to_owned())
            .unwrap_or_else(|_| format!("{:?}", crossing.entity));
        info!(
            "{} went through portal {:?} to {:?}",
            name, crossing.source, crossing.target
        );
    }
}

#[cfg(feature = "devel")]
fn draw_scan(
    trace: Res<ScanTrace>,
    mut lines: ResMut<bevy_prototype_debug_lines::DebugLines>,
) {
    if let Some(trace) = &trace.0 {
        crate::plugins::debug::draw::draw_portal_trace(trace, &mut lines);
    }
}
