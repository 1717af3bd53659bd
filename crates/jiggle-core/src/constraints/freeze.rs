use crate::config::FreezeAxis;
use crate::particle::Particle;

/// Project `p` onto the plane through its parent's simulated position whose
/// normal is the parent's pose axis selected by `axis`.
pub fn solve_freeze(p: &mut Particle, parent: &Particle, axis: FreezeAxis) {
    let Some(local_axis) = axis.axis() else {
        return;
    };
    let normal = (parent.world_rotation * local_axis).normalize_or_zero();
    let distance = normal.dot(p.sim_position - parent.sim_position);
    p.sim_position -= normal * distance;
}
