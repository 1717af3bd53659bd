use glam::Vec3;

use crate::math::lerp;
use crate::particle::Particle;

/// Rest position of `p` carried by its parent's *simulated* position and
/// its parent's pose rotation.
#[inline]
pub fn rest_position(p: &Particle, parent: &Particle) -> Vec3 {
    parent.sim_position + parent.world_rotation * p.scaled_local_position()
}

/// Stiffness after blending with the chain weight: a chain at weight 0 is
/// fully stiff, at weight 1 it uses the particle's own stiffness.
#[inline]
pub fn effective_stiffness(p: &Particle, weight: f32) -> f32 {
    lerp(1.0, p.stiffness, weight)
}

/// Shape preservation.
///
/// 1. Pull `p` a fraction `elasticity` of the way toward its rest position.
/// 2. With positive effective stiffness, cap the remaining distance to the
///    rest position at `rest_length * (1 - stiffness) * 2`.
pub fn solve_shape(p: &mut Particle, parent: &Particle, rest_length: f32, weight: f32) {
    let stiffness = effective_stiffness(p, weight);
    if stiffness <= 0.0 && p.elasticity <= 0.0 {
        return;
    }

    let rest = rest_position(p, parent);
    p.sim_position += (rest - p.sim_position) * p.elasticity;

    if stiffness > 0.0 {
        let offset = rest - p.sim_position;
        let len = offset.length();
        let max_len = rest_length * (1.0 - stiffness) * 2.0;
        if len > max_len {
            p.sim_position += offset * ((len - max_len) / len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(child_sim: Vec3) -> (Particle, Particle) {
        let parent = Particle::default();
        let child = Particle {
            index: 1,
            parent_index: 0,
            local_position: Vec3::new(0.0, -1.0, 0.0),
            sim_position: child_sim,
            ..Default::default()
        };
        (parent, child)
    }

    #[test]
    fn test_full_elasticity_lands_on_rest_position() {
        let (parent, mut child) = pair(Vec3::new(0.7, -0.2, 0.0));
        child.elasticity = 1.0;
        solve_shape(&mut child, &parent, 1.0, 1.0);
        assert!((child.sim_position - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_stiffness_caps_distance_from_rest() {
        let (parent, mut child) = pair(Vec3::new(1.0, -1.0, 0.0));
        child.stiffness = 0.75;
        solve_shape(&mut child, &parent, 1.0, 1.0);
        let dist = (child.sim_position - Vec3::new(0.0, -1.0, 0.0)).length();
        assert!((dist - 0.5).abs() < 1e-5, "expected capped distance 0.5, got {dist}");
    }

    #[test]
    fn test_zero_weight_makes_chain_rigid() {
        let (parent, mut child) = pair(Vec3::new(1.0, -1.0, 0.0));
        child.stiffness = 0.0;
        solve_shape(&mut child, &parent, 1.0, 0.0);
        assert!((child.sim_position - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-6);
    }
}
