use glam::{Quat, Vec3};

use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::head::ChainHead;
use crate::hierarchy::{Hierarchy, NodeId, PoseWriter};
use crate::particle::{Particle, NO_PARENT};
use crate::solver;

/// Builds a [`JiggleChain`] by walking the host hierarchy once.
///
/// Traversal is depth-first with parents before children, so particle
/// indices satisfy `parent_index < index`. Leaves (and excluded children)
/// grow a synthetic end particle when the config asks for one.
pub struct ChainBuilder<'a, H: Hierarchy + ?Sized> {
    hierarchy: &'a H,
    config: ChainConfig,
    root: Option<NodeId>,
    owner: Option<NodeId>,
}

impl<'a, H: Hierarchy + ?Sized> ChainBuilder<'a, H> {
    pub fn new(hierarchy: &'a H, config: ChainConfig) -> Self {
        Self {
            hierarchy,
            config,
            root: None,
            owner: None,
        }
    }

    pub fn root(mut self, root: NodeId) -> Self {
        self.root = Some(root);
        self
    }

    /// Frame of reference whose motion feeds inertia and whose scale scales
    /// forces. Defaults to the root's parent, or the root itself.
    pub fn owner(mut self, owner: NodeId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn build(self) -> Result<JiggleChain> {
        self.config.validate()?;
        let h = self.hierarchy;
        for node in self.root.iter().chain(&self.owner).chain(&self.config.exclusions) {
            if !h.contains(*node) {
                return Err(Error::UnknownNode { node: *node });
            }
        }

        let Some(root) = self.root else {
            log::debug!("chain built without a root; it will stay empty");
            return Ok(JiggleChain::empty(self.config));
        };

        let anchor = h.parent(root);
        let owner = self.owner.or(anchor).unwrap_or(root);

        let mut walk = Walk {
            hierarchy: h,
            config: &self.config,
            owner,
            particles: Vec::new(),
            nodes: Vec::new(),
            total_length: 0.0,
        };
        walk.run(root);
        let Walk {
            mut particles,
            nodes,
            total_length,
            ..
        } = walk;
        apply_parameters(&mut particles, &self.config, total_length);

        let (anchor_position, anchor_rotation) = match anchor {
            Some(a) => (h.world_position(a), h.world_rotation(a)),
            None => (Vec3::ZERO, Quat::IDENTITY),
        };
        let head = ChainHead {
            update_rate: self.config.update_rate,
            weight: self.config.weight.clamp(0.0, 1.0),
            particle_count: particles.len() as u32,
            anchor_position,
            anchor_rotation,
            freeze_axis: self.config.freeze_axis,
            animated_local_pose: self.config.animated_local_pose,
            ..Default::default()
        };
        let rig = ChainRig {
            root: Some(root),
            anchor,
            owner: Some(owner),
            local_gravity: h.inverse_transform_direction(root, self.config.gravity),
            refresh_gravity: false,
            prev_owner_position: h.world_position(owner),
            total_length,
            config: self.config,
        };

        log::debug!(
            "built chain at {root} with {} particles, length {total_length:.3}",
            particles.len()
        );
        Ok(JiggleChain {
            particles,
            nodes,
            head,
            rig,
        })
    }
}

struct Walk<'a, H: Hierarchy + ?Sized> {
    hierarchy: &'a H,
    config: &'a ChainConfig,
    owner: NodeId,
    particles: Vec<Particle>,
    nodes: Vec<Option<NodeId>>,
    total_length: f32,
}

impl<H: Hierarchy + ?Sized> Walk<'_, H> {
    /// Depth-first walk from `root`. Children are pushed in reverse so they
    /// pop in hierarchy order, keeping `parent_index < index`.
    fn run(&mut self, root: NodeId) {
        let mut pending = vec![(Some(root), NO_PARENT, 0.0)];
        while let Some((node, parent_index, bone_length)) = pending.pop() {
            let Some((index, bone_length)) = self.append(node, parent_index, bone_length) else {
                continue;
            };
            let Some(b) = node else {
                continue;
            };
            let h = self.hierarchy;
            let wants_end = self.config.has_end_particle();
            let child_count = h.child_count(b);
            if child_count == 0 && wants_end {
                pending.push((None, index, bone_length));
            }
            for i in (0..child_count).rev() {
                let Some(child) = h.child(b, i) else {
                    continue;
                };
                if !self.config.exclusions.contains(&child) {
                    pending.push((Some(child), index, bone_length));
                } else if wants_end {
                    pending.push((None, index, bone_length));
                }
            }
        }
    }

    /// Push one particle. Returns its index and accumulated bone length.
    fn append(&mut self, node: Option<NodeId>, parent_index: i32, mut bone_length: f32) -> Option<(i32, f32)> {
        let h = self.hierarchy;
        let index = self.particles.len() as i32;
        let mut p = Particle {
            index,
            parent_index,
            ..Default::default()
        };

        match node {
            Some(b) => {
                p.init_local_position = h.local_position(b);
                p.init_local_rotation = h.local_rotation(b);
                p.parent_scale = h.parent(b).map_or(Vec3::ONE, |pb| h.lossy_scale(pb));
                p.child_count = h.child_count(b) as u32;
                p.world_position = h.world_position(b);
                p.world_rotation = h.world_rotation(b);
            }
            None => {
                let pb = self.parent_node(parent_index)?;
                p.end_offset = self.end_offset(pb);
                p.init_local_position = p.end_offset;
                p.parent_scale = h.lossy_scale(pb);
                p.world_position = h.transform_point(pb, p.end_offset);
                p.world_rotation = h.world_rotation(pb);
            }
        }
        p.local_position = p.init_local_position;
        p.local_rotation = p.init_local_rotation;
        p.reset_to_pose();

        if let Ok(pi) = usize::try_from(parent_index) {
            bone_length += (self.particles[pi].world_position - p.world_position).length();
            p.bone_length = bone_length;
            self.total_length = self.total_length.max(bone_length);
            if self.particles[pi].child_index < 0 {
                self.particles[pi].child_index = index;
            }
        }

        self.particles.push(p);
        self.nodes.push(node);
        Some((index, bone_length))
    }

    fn parent_node(&self, parent_index: i32) -> Option<NodeId> {
        let pi = usize::try_from(parent_index).ok()?;
        self.nodes.get(pi).copied().flatten()
    }

    /// Rest offset of an end particle in its parent's local frame.
    fn end_offset(&self, parent: NodeId) -> Vec3 {
        let h = self.hierarchy;
        let parent_position = h.world_position(parent);
        if self.config.end_length > 0.0 {
            match h.parent(parent) {
                Some(grand) => {
                    let mirrored = parent_position * 2.0 - h.world_position(grand);
                    h.inverse_transform_point(parent, mirrored) * self.config.end_length
                }
                None => Vec3::new(self.config.end_length, 0.0, 0.0),
            }
        } else {
            let offset = h.transform_direction(self.owner, self.config.end_offset);
            h.inverse_transform_point(parent, offset + parent_position)
        }
    }
}

/// Derive every particle's physical parameters from `config`, shaping base
/// values by their curves at `bone_length / total_length`, then clamping.
pub fn apply_parameters(particles: &mut [Particle], config: &ChainConfig, total_length: f32) {
    for p in particles.iter_mut() {
        let t = (total_length > 0.0).then(|| p.bone_length / total_length);
        p.damping = config.damping.sample(t).clamp(0.0, 1.0);
        p.elasticity = config.elasticity.sample(t).clamp(0.0, 1.0);
        p.stiffness = config.stiffness.sample(t).clamp(0.0, 1.0);
        p.inertia = config.inertia.sample(t).clamp(0.0, 1.0);
        p.friction = config.friction.sample(t).clamp(0.0, 1.0);
        p.radius = config.radius.sample(t).max(0.0);
    }
}

/// Author-time bindings and per-frame input state of a chain.
#[derive(Clone, Debug)]
pub(crate) struct ChainRig {
    pub(crate) root: Option<NodeId>,
    pub(crate) anchor: Option<NodeId>,
    pub(crate) owner: Option<NodeId>,
    pub(crate) config: ChainConfig,
    /// Rest-pose gravity in the root's frame.
    pub(crate) local_gravity: Vec3,
    /// Re-derive `local_gravity` from the current root pose on the next prepare.
    pub(crate) refresh_gravity: bool,
    pub(crate) prev_owner_position: Vec3,
    pub(crate) total_length: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stepping {
    /// Feed the frame delta through the fixed-rate accumulator.
    Accumulate,
    /// Exactly one unscaled sub-step, for tooling.
    Single,
}

impl ChainRig {
    /// Fill `head` with this frame's inputs: anchor pose, owner motion,
    /// force, and the sub-step schedule.
    pub(crate) fn prepare<H>(&mut self, head: &mut ChainHead, h: &H, dt: f32, stepping: Stepping)
    where
        H: Hierarchy + ?Sized,
    {
        (head.anchor_position, head.anchor_rotation) = match self.anchor {
            Some(a) => (h.world_position(a), h.world_rotation(a)),
            None => (Vec3::ZERO, Quat::IDENTITY),
        };
        let Some(root) = self.root else {
            head.substeps = 0;
            return;
        };

        let mut object_scale = 1.0;
        head.object_move = Vec3::ZERO;
        if let Some(owner) = self.owner {
            let position = h.world_position(owner);
            if !head.resetting {
                head.object_move = position - self.prev_owner_position;
            }
            self.prev_owner_position = position;
            object_scale = h.lossy_scale(owner).x.abs();
        }

        let time_scale = match stepping {
            Stepping::Accumulate => head.advance(dt),
            Stepping::Single => {
                head.substeps = 1;
                1.0
            }
        };

        if self.refresh_gravity {
            self.local_gravity = h.inverse_transform_direction(root, self.config.gravity);
            self.refresh_gravity = false;
        }

        // Gravity already present in the rest pose is cancelled out; only the
        // part introduced by rotating the root away from rest remains.
        let gravity = self.config.gravity;
        let rest_dir = gravity.normalize_or_zero();
        let current = h.transform_direction(root, self.local_gravity);
        let projected = rest_dir * current.dot(rest_dir).max(0.0);
        head.force = (gravity - projected + self.config.force) * object_scale * time_scale;
    }

    /// Adopt a new config. Gravity's rest reference is re-taken from the
    /// root pose at the next prepare.
    pub(crate) fn reconfigure(&mut self, head: &mut ChainHead, config: ChainConfig) {
        head.update_rate = config.update_rate;
        head.freeze_axis = config.freeze_axis;
        head.animated_local_pose = config.animated_local_pose;
        head.set_weight(config.weight);
        self.refresh_gravity = true;
        self.config = config;
    }
}

/// One chain's particles, node bindings and head record.
///
/// While registered with a [`crate::batch::BatchManager`] this copy is inert;
/// the batch owns the live state and hands it back on removal.
#[derive(Clone, Debug)]
pub struct JiggleChain {
    pub(crate) particles: Vec<Particle>,
    pub(crate) nodes: Vec<Option<NodeId>>,
    pub(crate) head: ChainHead,
    pub(crate) rig: ChainRig,
}

impl JiggleChain {
    fn empty(config: ChainConfig) -> Self {
        Self {
            particles: Vec::new(),
            nodes: Vec::new(),
            head: ChainHead {
                update_rate: config.update_rate,
                weight: config.weight.clamp(0.0, 1.0),
                freeze_axis: config.freeze_axis,
                animated_local_pose: config.animated_local_pose,
                ..Default::default()
            },
            rig: ChainRig {
                root: None,
                anchor: None,
                owner: None,
                config,
                local_gravity: Vec3::ZERO,
                refresh_gravity: false,
                prev_owner_position: Vec3::ZERO,
                total_length: 0.0,
            },
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Host node bound to each particle; `None` for synthetic end particles.
    pub fn nodes(&self) -> &[Option<NodeId>] {
        &self.nodes
    }

    pub fn head(&self) -> &ChainHead {
        &self.head
    }

    pub fn config(&self) -> &ChainConfig {
        &self.rig.config
    }

    pub fn root(&self) -> Option<NodeId> {
        self.rig.root
    }

    pub fn anchor(&self) -> Option<NodeId> {
        self.rig.anchor
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.rig.owner
    }

    /// Longest rest distance from the root to any particle.
    pub fn total_length(&self) -> f32 {
        self.rig.total_length
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Batch position while registered. Look it up every frame: swap-back
    /// removal of another chain may move this one.
    pub fn batch_index(&self) -> Option<usize> {
        usize::try_from(self.head.batch_index).ok()
    }

    pub fn weight(&self) -> f32 {
        self.head.weight
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.head.set_weight(weight);
    }

    /// Recompute per-particle parameters and apply the config's weight,
    /// rate and gravity. Structural settings (exclusions, end particle) only
    /// take effect on a rebuild.
    pub fn update_parameters(&mut self, config: ChainConfig) -> Result<()> {
        config.validate()?;
        apply_parameters(&mut self.particles, &config, self.rig.total_length);
        self.rig.reconfigure(&mut self.head, config);
        Ok(())
    }

    /// Collision hook: boost the particle's damping by its friction on the
    /// next integration.
    pub fn mark_colliding(&mut self, index: usize) -> bool {
        match self.particles.get_mut(index) {
            Some(p) => {
                p.is_colliding = true;
                true
            }
            None => false,
        }
    }

    /// Forget motion history and restart from the animated pose next step.
    pub fn reset_to_pose(&mut self) {
        self.head.resetting = true;
    }

    /// Advance by `dt` seconds of frame time on this chain alone.
    pub fn update<S>(&mut self, scene: &mut S, dt: f32)
    where
        S: Hierarchy + PoseWriter + ?Sized,
    {
        self.run(scene, dt, Stepping::Accumulate);
    }

    /// Simulate exactly one sub-step now, bypassing the accumulator.
    pub fn step_once<S>(&mut self, scene: &mut S)
    where
        S: Hierarchy + PoseWriter + ?Sized,
    {
        self.run(scene, 0.0, Stepping::Single);
    }

    fn run<S>(&mut self, scene: &mut S, dt: f32, stepping: Stepping)
    where
        S: Hierarchy + PoseWriter + ?Sized,
    {
        if self.particles.is_empty() {
            return;
        }
        self.rig.prepare(&mut self.head, &*scene, dt, stepping);
        solver::step_chain(&mut self.particles, &self.nodes, &mut self.head, scene);
    }
}
