//! Scene layout: where the plane, the groups and the geometries inside each
//! group are placed.

use glam::{Mat4, Vec3};
use kinetic_core::constants::GEOMETRY_RADIUS;
use kinetic_core::math::{ceil_cbrt, ceil_sqrt, pack_transform, Transform3x4};
use kinetic_core::{GeometryRole, SceneConfig};

/// Side length of the ground plane.
pub const PLANE_WIDTH: f32 = 12.0;

/// Plane transform: unit plane scaled in XZ and centered on the origin.
pub fn plane_transform() -> Mat4 {
    Mat4::from_translation(Vec3::new(-PLANE_WIDTH / 2.0, 0.0, -PLANE_WIDTH / 2.0))
        * Mat4::from_scale(Vec3::new(PLANE_WIDTH, 1.0, PLANE_WIDTH))
}

/// Distance between neighbouring group origins.
pub fn group_step(geometries_per_group: u32, radius: f32) -> f32 {
    let geometry_dim = ceil_cbrt(geometries_per_group) as f32;
    let spacing = radius;
    let group_width = geometry_dim * 2.0 * radius + (geometry_dim - 1.0) * spacing;
    group_width + 3.0 * spacing
}

/// Group transforms on a square grid, X major.
pub fn group_transforms(group_count: u32, geometries_per_group: u32, radius: f32) -> Vec<Mat4> {
    let dim = ceil_sqrt(group_count);
    let step = group_step(geometries_per_group, radius);

    (0..dim)
        .flat_map(|x| (0..dim).map(move |z| (x, z)))
        .take(group_count as usize)
        .map(|(x, z)| Mat4::from_translation(step * Vec3::new(x as f32, 0.0, z as f32)))
        .collect()
}

/// Transforms of the geometries inside one group.
///
/// Geometries sit on a cube centered on the group origin, Y outermost, and are
/// lifted by the radius so they rest on the plane.
pub fn geometry_transforms(geometries_per_group: u32, radius: f32) -> Vec<Mat4> {
    let dim = ceil_cbrt(geometries_per_group) as i32;
    let step = 3.0 * radius;
    let half = dim / 2;
    let lift = Vec3::new(0.0, radius, 0.0);

    (0..dim)
        .flat_map(|y| (0..dim).flat_map(move |x| (0..dim).map(move |z| (x, y, z))))
        .take(geometries_per_group as usize)
        .map(|(x, y, z)| {
            let cell = Vec3::new((x - half) as f32, (y - half) as f32, (z - half) as f32);
            Mat4::from_translation(lift + step * cell)
        })
        .collect()
}

/// Bottom-level transforms for `roles`, in role order.
pub fn bottom_level_transforms(roles: &[GeometryRole], config: &SceneConfig) -> Vec<Mat4> {
    let groups = group_transforms(
        config.group_count,
        config.geometries_per_group,
        GEOMETRY_RADIUS,
    );
    roles
        .iter()
        .map(|role| match role {
            GeometryRole::Plane => plane_transform(),
            GeometryRole::Group(n) => groups
                .get(*n as usize)
                .copied()
                .unwrap_or(Mat4::IDENTITY),
        })
        .collect()
}

/// Packed per-geometry transforms of every group, group after group.
///
/// Group `g`'s geometries start at element `g * geometries_per_group`; the
/// plane reads no per-geometry transform.
pub fn packed_geometry_transforms(config: &SceneConfig) -> Vec<Transform3x4> {
    let local: Vec<Transform3x4> =
        geometry_transforms(config.geometries_per_group, GEOMETRY_RADIUS)
            .into_iter()
            .map(pack_transform)
            .collect();
    (0..config.group_count)
        .flat_map(|_| local.iter().copied())
        .collect()
}

/// Vertical bobbing of bottom-level structures.
///
/// Structures further from the origin move with a larger amplitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneAnimation {
    pub enabled: bool,
    /// Seconds for one full up-and-down cycle.
    pub duration: f32,
    pub base_amplitude: f32,
    /// Extra amplitude per unit of distance from the origin.
    pub distance_gain: f32,
}

impl Default for SceneAnimation {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: 24.0,
            base_amplitude: 16.0,
            distance_gain: 0.35,
        }
    }
}

impl SceneAnimation {
    /// Triangle wave in `[0, 1]` with period `duration`.
    pub fn interpolant(&self, time: f32) -> f32 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        let phase = (time / self.duration).rem_euclid(1.0);
        if phase < 0.5 {
            2.0 * phase
        } else {
            2.0 * (1.0 - phase)
        }
    }

    /// `base` with its translation's Y replaced by the bobbing offset at `time`.
    pub fn apply(&self, base: Mat4, time: f32) -> Mat4 {
        if !self.enabled {
            return base;
        }
        let t = self.interpolant(time) - 0.5;
        let distance = base.w_axis.length();
        let mut animated = base;
        animated.w_axis.y = t * (self.base_amplitude + self.distance_gain * distance);
        animated
    }
}
