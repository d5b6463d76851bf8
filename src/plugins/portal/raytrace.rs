//! Portal-aware shape casting.
//!
//! A trace casts a shape from a pose along the pose's forward axis. Whenever the nearest hit
//! is a portal surface, the remainder of the cast continues from the connected portal, in the
//! frame obtained by pushing the pose through the portal. Each leg of the trace is reported as
//! a [`PortalRay`].

use bevy::prelude::*;
use bevy_rapier3d::prelude::Group;

use super::{chain::PortalChain, registry::PortalRegistry};
use crate::plugins::physics::{CastFilter, CastHit, CastShape, ShapeCaster, TriggerInteraction};

/// One leg of a portal trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalRay {
    /// Portal entered right before this leg, `None` for the first leg.
    pub origin_portal: Option<Entity>,
    /// Pose of the leg. The cast goes along its forward (-Z) axis.
    pub local_to_world: Mat4,
    /// Length of the leg, in the leg's own scale.
    pub local_distance: f32,
}

impl PortalRay {
    pub fn origin(&self) -> Vec3 {
        self.local_to_world.w_axis.truncate()
    }

    fn forward(&self) -> Vec3 {
        self.local_to_world.transform_vector3(Vec3::NEG_Z)
    }

    pub fn direction(&self) -> Vec3 {
        self.forward().normalize_or_zero()
    }

    /// World units per local unit along the leg.
    pub fn scale(&self) -> f32 {
        self.forward().length()
    }

    pub fn world_distance(&self) -> f32 {
        self.local_distance * self.scale()
    }

    pub fn end(&self) -> Vec3 {
        self.origin() + self.direction() * self.world_distance()
    }
}

#[derive(Debug, Clone)]
pub struct TraceRequest {
    pub shape: CastShape,
    pub pose: Mat4,
    /// Cast length in the local scale of `pose`.
    pub max_distance: f32,
    pub layer_mask: Group,
    pub triggers: TriggerInteraction,
    /// Maximum number of legs. Reaching it ends the trace.
    pub max_segments: usize,
}

impl TraceRequest {
    pub fn new(pose: Mat4, max_distance: f32, max_segments: usize) -> Self {
        TraceRequest {
            shape: CastShape::Point,
            pose,
            max_distance,
            layer_mask: Group::ALL,
            triggers: TriggerInteraction::Include,
            max_segments,
        }
    }

    pub fn with_shape(mut self, shape: CastShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_layer_mask(mut self, layer_mask: Group) -> Self {
        self.layer_mask = layer_mask;
        self
    }

    pub fn with_triggers(mut self, triggers: TriggerInteraction) -> Self {
        self.triggers = triggers;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortalTrace {
    pub rays: Vec<PortalRay>,
    /// Non-portal hit that ended the trace.
    pub hit: Option<CastHit>,
    /// Layer mask in effect for the last leg.
    pub layer_mask: Group,
    /// The segment cap ended the trace on a portal.
    pub truncated: bool,
}

impl PortalTrace {
    /// Portals crossed, in order.
    pub fn chain(&self) -> PortalChain {
        self.rays.iter().filter_map(|ray| ray.origin_portal).collect()
    }

    pub fn local_distance(&self) -> f32 {
        self.rays.iter().map(|ray| ray.local_distance).sum()
    }

    pub fn last(&self) -> Option<&PortalRay> {
        self.rays.last()
    }
}

pub struct PortalRaycaster<'a, C: ShapeCaster + ?Sized> {
    registry: &'a PortalRegistry,
    caster: &'a C,
}

impl<'a, C: ShapeCaster + ?Sized> PortalRaycaster<'a, C> {
    pub fn new(registry: &'a PortalRegistry, caster: &'a C) -> Self {
        PortalRaycaster { registry, caster }
    }

    pub fn trace(&self, request: &TraceRequest) -> PortalTrace {
        let mut trace = PortalTrace {
            rays: Vec::with_capacity(request.max_segments),
            hit: None,
            layer_mask: request.layer_mask,
            truncated: false,
        };
        if request.max_segments == 0 {
            return trace;
        }

        let mut pose = request.pose;
        let mut remaining = request.max_distance.max(0.);
        let mut origin_portal = None;
        loop {
            let mut ray = PortalRay {
                origin_portal,
                local_to_world: pose,
                local_distance: remaining,
            };
            let scale = ray.scale();
            if remaining <= 0. || !scale.is_finite() || scale <= f32::EPSILON {
                trace.rays.push(ray);
                break;
            }
            let direction = ray.direction();
            let (_, rotation, origin) = pose.to_scale_rotation_translation();

            // The exit surface sits where the leg starts, keep it out of this cast only.
            let exclude = origin_portal
                .and_then(|portal| self.registry.connected(portal))
                .and_then(|exit| self.registry.get(exit))
                .and_then(|record| record.surface)
                .into_iter()
                .collect::<Vec<_>>();
            let filter = CastFilter {
                mask: trace.layer_mask,
                triggers: request.triggers,
                exclude: &exclude,
                only: None,
            };
            let budget = remaining * scale;
            let hit = self
                .caster
                .cast(&request.shape, origin, rotation, direction, budget, &filter)
                .filter(|hit| hit.is_valid() && hit.distance <= budget);
            let hit = match hit {
                Some(hit) => hit,
                None => {
                    trace.rays.push(ray);
                    break;
                }
            };

            let hit_distance = hit.distance / scale;
            ray.local_distance = hit_distance;
            trace.rays.push(ray);

            let portal = self
                .registry
                .portal_for_surface(hit.entity)
                .and_then(|portal| self.registry.transform(portal))
                .filter(|transform| transform.uses_teleport());
            match portal {
                Some(_) if trace.rays.len() >= request.max_segments => {
                    debug!(
                        "Portal trace truncated after {} segments",
                        request.max_segments
                    );
                    trace.truncated = true;
                    break;
                }
                Some(transform) => {
                    let advanced = Mat4::from_translation(direction * hit.distance) * pose;
                    pose = transform.modify_matrix(advanced);
                    if transform.uses_layers() {
                        trace.layer_mask = transform.modify_layer_mask(trace.layer_mask);
                    }
                    remaining -= hit_distance;
                    origin_portal = Some(transform.portal());
                }
                None => {
                    trace.hit = Some(hit);
                    break;
                }
            }
        }
        trace
    }
}
