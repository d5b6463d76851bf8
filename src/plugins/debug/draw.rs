use bevy::prelude::*;
use bevy_prototype_debug_lines::DebugLines;

use crate::plugins::portal::PortalTrace;

const SEGMENT_COLORS: [Color; 2] = [Color::YELLOW, Color::CYAN];
const HIT_COLOR: Color = Color::RED;
const TRUNCATED_COLOR: Color = Color::FUCHSIA;

/// Draw every leg of a portal trace, alternating colors at each portal, plus the normal of the
/// surface that stopped it.
pub fn draw_portal_trace(trace: &PortalTrace, lines: &mut DebugLines) {
    for (i, ray) in trace.rays.iter().enumerate() {
        let color = SEGMENT_COLORS[i % SEGMENT_COLORS.len()];
        lines.line_colored(ray.origin(), ray.end(), 0., color);
    }

    if let Some(hit) = trace.hit {
        lines.line_colored(hit.point, hit.point + hit.normal * 0.5, 0., HIT_COLOR);
    } else if trace.truncated {
        if let Some(last) = trace.last() {
            let end = last.end();
            lines.line_colored(end - Vec3::X * 0.2, end + Vec3::X * 0.2, 0., TRUNCATED_COLOR);
            lines.line_colored(end - Vec3::Z * 0.2, end + Vec3::Z * 0.2, 0., TRUNCATED_COLOR);
        }
    }
}
