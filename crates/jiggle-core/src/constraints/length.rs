use crate::math::EPSILON;
use crate::particle::Particle;

/// Inextensibility: one relaxation step putting `p` exactly `rest_length`
/// away from its already-solved parent. A collapsed segment is left alone.
pub fn solve_length(p: &mut Particle, parent: &Particle, rest_length: f32) {
    let delta = parent.sim_position - p.sim_position;
    let len = delta.length();
    if len <= EPSILON {
        return;
    }
    p.sim_position += delta * ((len - rest_length) / len);
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_stretched_segment_is_pulled_back() {
        let parent = Particle::default();
        let mut p = Particle {
            sim_position: Vec3::new(3.0, 0.0, 0.0),
            ..Default::default()
        };
        solve_length(&mut p, &parent, 1.0);
        assert!((p.sim_position - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn test_coincident_particles_are_skipped() {
        let parent = Particle::default();
        let mut p = Particle::default();
        solve_length(&mut p, &parent, 1.0);
        assert_eq!(p.sim_position, Vec3::ZERO);
        assert!(p.sim_position.is_finite());
    }
}
