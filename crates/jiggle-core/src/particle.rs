use glam::{Quat, Vec3};

/// Parent index of a chain root.
pub const NO_PARENT: i32 = -1;

/// One simulated point of a chain.
///
/// Particles live by value in a flat array ordered parent-before-child
/// (`parent_index < index` for every non-root), so one forward pass always
/// sees a parent's state before its children's.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub index: i32,
    pub parent_index: i32,
    /// First particle child, or -1. Only consulted when `child_count <= 1`.
    pub child_index: i32,
    /// Children of the source node; more than one leaves orientation alone.
    pub child_count: u32,

    pub damping: f32,
    pub elasticity: f32,
    pub stiffness: f32,
    pub inertia: f32,
    pub friction: f32,
    pub radius: f32,
    /// Rest distance from the chain root, along the bones.
    pub bone_length: f32,
    /// Set by a collision hook, consumed by the next integration.
    pub is_colliding: bool,

    pub end_offset: Vec3,
    pub init_local_position: Vec3,
    pub init_local_rotation: Quat,
    pub parent_scale: Vec3,

    // Pose-driven state, refreshed from the host every frame.
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub world_position: Vec3,
    pub world_rotation: Quat,

    // Verlet state.
    pub sim_position: Vec3,
    pub prev_sim_position: Vec3,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            index: 0,
            parent_index: NO_PARENT,
            child_index: NO_PARENT,
            child_count: 0,
            damping: 0.0,
            elasticity: 0.0,
            stiffness: 0.0,
            inertia: 0.0,
            friction: 0.0,
            radius: 0.0,
            bone_length: 0.0,
            is_colliding: false,
            end_offset: Vec3::ZERO,
            init_local_position: Vec3::ZERO,
            init_local_rotation: Quat::IDENTITY,
            parent_scale: Vec3::ONE,
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            world_position: Vec3::ZERO,
            world_rotation: Quat::IDENTITY,
            sim_position: Vec3::ZERO,
            prev_sim_position: Vec3::ZERO,
        }
    }
}

impl Particle {
    pub fn parent(&self) -> Option<usize> {
        usize::try_from(self.parent_index).ok()
    }

    pub fn child(&self) -> Option<usize> {
        usize::try_from(self.child_index).ok()
    }

    pub fn is_root(&self) -> bool {
        self.parent_index < 0
    }

    /// Where this particle is shown: roots stay on the animated pose.
    #[inline]
    pub fn output_position(&self) -> Vec3 {
        if self.is_root() {
            self.world_position
        } else {
            self.sim_position
        }
    }

    /// Drop all motion history and sit on the animated pose.
    pub fn reset_to_pose(&mut self) {
        self.sim_position = self.world_position;
        self.prev_sim_position = self.world_position;
        self.is_colliding = false;
    }

    /// Local offset from the parent, in the parent's scaled frame.
    #[inline]
    pub fn scaled_local_position(&self) -> Vec3 {
        self.local_position * self.parent_scale
    }
}

/// Convenience for tests and tooling: the distance between a particle's
/// simulated position and its parent's.
pub fn segment_length(particles: &[Particle], index: usize) -> Option<f32> {
    let p = particles.get(index)?;
    let parent = particles.get(p.parent()?)?;
    Some((p.sim_position - parent.sim_position).length())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_particle_is_an_inert_root() {
        let p = Particle::default();
        assert!(p.is_root());
        assert_eq!(p.parent(), None);
        assert_eq!(p.child(), None);
        assert_eq!(p.world_rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_root_output_ignores_sim_position() {
        let mut p = Particle {
            world_position: Vec3::X,
            sim_position: Vec3::Y,
            ..Default::default()
        };
        assert_eq!(p.output_position(), Vec3::X);
        p.parent_index = 0;
        assert_eq!(p.output_position(), Vec3::Y);
    }
}
