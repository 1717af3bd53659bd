use glam::{Quat, Vec3};

/// Lengths below this are treated as degenerate.
pub const EPSILON: f32 = 1.0e-6;

/// Scalar linear interpolation, `t` is not clamped.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Shortest-arc rotation taking direction `from` onto direction `to`.
///
/// Returns identity when either vector is degenerate, so a collapsed bone
/// keeps whatever rotation it is composed with.
pub fn from_to_rotation(from: Vec3, to: Vec3) -> Quat {
    let a = from.normalize_or_zero();
    let b = to.normalize_or_zero();
    if a == Vec3::ZERO || b == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_arc(a, b)
}

/// Map a point from a TRS frame's local space into world space.
#[inline]
pub fn transform_point(position: Vec3, rotation: Quat, scale: Vec3, local: Vec3) -> Vec3 {
    position + rotation * (local * scale)
}

/// Inverse of [`transform_point`]. Zero scale components map to zero.
pub fn inverse_transform_point(position: Vec3, rotation: Quat, scale: Vec3, world: Vec3) -> Vec3 {
    let unrotated = rotation.inverse() * (world - position);
    Vec3::new(
        safe_div(unrotated.x, scale.x),
        safe_div(unrotated.y, scale.y),
        safe_div(unrotated.z, scale.z),
    )
}

#[inline]
fn safe_div(n: f32, d: f32) -> f32 {
    if d.abs() < EPSILON {
        0.0
    } else {
        n / d
    }
}
