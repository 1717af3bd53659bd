//! Per-chain simulation kernels.
//!
//! Every stage works on one chain's live particles (`&mut particles[..count]`)
//! plus its read-only [`ChainHead`]. [`step_chain`] strings them together for
//! a chain simulated on its own; the batch manager runs the same kernels as
//! system-wide stages.

use glam::Quat;

use crate::constraints::freeze::solve_freeze;
use crate::constraints::length::solve_length;
use crate::constraints::shape::solve_shape;
use crate::head::ChainHead;
use crate::hierarchy::{Hierarchy, NodeId, PoseWriter};
use crate::math::from_to_rotation;
use crate::particle::Particle;

/// Stage 1: recompute the animated world pose top-down from the anchor.
///
/// Chains that are inactive (weight 0) or waking up are also snapped onto
/// that pose, dropping their verlet history.
pub fn refresh_pose<H>(particles: &mut [Particle], nodes: &[Option<NodeId>], head: &ChainHead, hierarchy: &H)
where
    H: Hierarchy + ?Sized,
{
    let snap = head.resetting || !head.is_active();

    for i in 0..particles.len() {
        let (parent_position, parent_rotation) = match particles[i].parent() {
            Some(pi) => (particles[pi].world_position, particles[pi].world_rotation),
            None => (head.anchor_position, head.anchor_rotation),
        };

        let p = &mut particles[i];
        match nodes.get(i).copied().flatten() {
            Some(node) if head.animated_local_pose => {
                p.local_position = hierarchy.local_position(node);
                p.local_rotation = hierarchy.local_rotation(node);
            }
            _ => {
                p.local_position = p.init_local_position;
                p.local_rotation = p.init_local_rotation;
            }
        }

        p.world_position = parent_position + parent_rotation * p.scaled_local_position();
        p.world_rotation = (parent_rotation * p.local_rotation).normalize();

        if snap {
            p.reset_to_pose();
        }
    }
}

/// Stage 2: verlet integration of a single particle.
///
/// The root is rigidly pose-driven. Everyone else keeps its velocity (minus
/// damping), receives the frame force, and lags behind owner motion in
/// proportion to its inertia. Owner motion only counts on the first sub-step.
pub fn integrate(p: &mut Particle, head: &ChainHead, substep: u32) {
    if !head.is_active() {
        return;
    }
    if p.is_root() {
        p.prev_sim_position = p.sim_position;
        p.sim_position = p.world_position;
        return;
    }

    let velocity = p.sim_position - p.prev_sim_position;
    let inertia_lag = if substep == 0 {
        head.object_move * p.inertia
    } else {
        glam::Vec3::ZERO
    };
    p.prev_sim_position = p.sim_position + inertia_lag;

    let mut damping = p.damping;
    if p.is_colliding {
        damping = (damping + p.friction).min(1.0);
        p.is_colliding = false;
    }

    p.sim_position += velocity * (1.0 - damping) + head.force + inertia_lag;
}

/// Stages 3 and 4: shape, freeze and length constraints, parent before child.
pub fn solve_constraints(particles: &mut [Particle], head: &ChainHead) {
    if !head.is_active() {
        return;
    }
    for i in 1..particles.len() {
        let Some(pi) = particles[i].parent() else {
            continue;
        };
        let parent = particles[pi];
        let p = &mut particles[i];

        let rest_length = (p.world_position - parent.world_position).length();
        solve_shape(p, &parent, rest_length, head.weight);
        solve_freeze(p, &parent, head.freeze_axis);
        solve_length(p, &parent, rest_length);
    }
}

/// Stage 5a: output rotation of particle `index`.
///
/// The rotation carrying the animated bone direction onto the simulated one,
/// composed with the pose rotation. Particles without exactly one
/// resolvable child keep their pose rotation.
pub fn derive_rotation(particles: &[Particle], index: usize, head: &ChainHead) -> Quat {
    let p = &particles[index];
    if !head.is_active() || p.child_count > 1 {
        return p.world_rotation;
    }
    let Some(child) = p.child().and_then(|c| particles.get(c)) else {
        return p.world_rotation;
    };

    let rest_dir = p.world_rotation * child.scaled_local_position();
    let sim_dir = child.output_position() - p.output_position();
    (from_to_rotation(rest_dir, sim_dir) * p.world_rotation).normalize()
}

/// Stage 5b: commit the output transform into the particle.
pub fn finalize(p: &mut Particle, rotation: Quat, head: &ChainHead) {
    if head.is_active() {
        p.world_position = p.output_position();
    }
    p.world_rotation = rotation;
}

/// Stage 6: hand each bound node its output transform.
pub fn write_back<W>(particles: &[Particle], nodes: &[Option<NodeId>], writer: &mut W)
where
    W: PoseWriter + ?Sized,
{
    for (p, node) in particles.iter().zip(nodes) {
        if let Some(node) = node {
            writer.write_pose(*node, p.world_position, p.world_rotation);
        }
    }
}

/// Run the whole pipeline for one chain: pose refresh, `head.substeps`
/// rounds of integrate + constrain, orientation, write-back.
pub fn step_chain<S>(particles: &mut [Particle], nodes: &[Option<NodeId>], head: &mut ChainHead, scene: &mut S)
where
    S: Hierarchy + PoseWriter + ?Sized,
{
    let count = head.count().min(particles.len());
    let particles = &mut particles[..count];
    let nodes = &nodes[..count.min(nodes.len())];

    refresh_pose(particles, nodes, head, &*scene);
    for substep in 0..head.substeps {
        for p in particles.iter_mut() {
            integrate(p, head, substep);
        }
        solve_constraints(particles, head);
    }

    let rotations: Vec<Quat> = (0..particles.len())
        .map(|i| derive_rotation(particles, i, head))
        .collect();
    for (p, rotation) in particles.iter_mut().zip(rotations) {
        finalize(p, rotation, head);
    }

    write_back(particles, nodes, scene);
    head.resetting = false;
}
