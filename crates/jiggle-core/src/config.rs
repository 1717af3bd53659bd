use glam::Vec3;

use crate::curve::Curve;
use crate::error::{Error, Result};
use crate::hierarchy::NodeId;

/// Which host update phase drives the chain. The core only stores this;
/// picking the phase and the matching delta time is the host's job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateMode {
    #[default]
    Normal,
    AnimatePhysics,
    UnscaledTime,
}

/// Constrain particles to the plane normal to one of the parent's axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FreezeAxis {
    #[default]
    None,
    X,
    Y,
    Z,
}

impl FreezeAxis {
    /// Local-space unit axis, or `None` when unconstrained.
    pub fn axis(self) -> Option<Vec3> {
        match self {
            FreezeAxis::None => None,
            FreezeAxis::X => Some(Vec3::X),
            FreezeAxis::Y => Some(Vec3::Y),
            FreezeAxis::Z => Some(Vec3::Z),
        }
    }
}

/// A per-particle parameter: base value, optionally shaped along the chain.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Distributed {
    pub value: f32,
    pub curve: Option<Curve>,
}

impl Distributed {
    pub fn new(value: f32) -> Self {
        Self { value, curve: None }
    }

    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = Some(curve);
        self
    }

    /// Value at normalized position `t` along the chain (0 = root, 1 = tip).
    ///
    /// `t` is `None` when the chain has no length, in which case curves
    /// cannot be sampled and the base value is used.
    pub fn sample(&self, t: Option<f32>) -> f32 {
        match (&self.curve, t) {
            (Some(curve), Some(t)) if !curve.is_empty() => self.value * curve.evaluate(t),
            _ => self.value,
        }
    }
}

/// Author-time configuration of one chain.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainConfig {
    /// Fixed simulation rate in Hz. Zero runs one step per frame.
    pub update_rate: f32,
    pub update_mode: UpdateMode,
    /// How much the bones slow down.
    pub damping: Distributed,
    /// Pull back toward the rest shape each step.
    pub elasticity: Distributed,
    /// How much of the rest orientation is preserved.
    pub stiffness: Distributed,
    /// How much of the owner's motion is ignored by the simulation.
    pub inertia: Distributed,
    /// Extra damping applied on the step after a collision.
    pub friction: Distributed,
    pub radius: Distributed,
    /// Non-zero synthesizes a tip particle extending the last bone.
    pub end_length: f32,
    /// Non-zero synthesizes a tip particle at this offset (owner space).
    pub end_offset: Vec3,
    pub gravity: Vec3,
    pub force: Vec3,
    pub exclusions: Vec<NodeId>,
    pub freeze_axis: FreezeAxis,
    pub weight: f32,
    /// Re-read each bone's local pose from the host every frame. When false
    /// the local pose captured at build time is used.
    pub animated_local_pose: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            update_rate: 60.0,
            update_mode: UpdateMode::Normal,
            damping: Distributed::new(0.1),
            elasticity: Distributed::new(0.1),
            stiffness: Distributed::new(0.1),
            inertia: Distributed::new(0.0),
            friction: Distributed::new(0.0),
            radius: Distributed::new(0.0),
            end_length: 0.0,
            end_offset: Vec3::ZERO,
            gravity: Vec3::ZERO,
            force: Vec3::ZERO,
            exclusions: Vec::new(),
            freeze_axis: FreezeAxis::None,
            weight: 1.0,
            animated_local_pose: true,
        }
    }
}

impl ChainConfig {
    pub fn has_end_particle(&self) -> bool {
        self.end_length > 0.0 || self.end_offset != Vec3::ZERO
    }

    pub fn validate(&self) -> Result<()> {
        if !self.update_rate.is_finite() || self.update_rate < 0.0 {
            return Err(Error::invalid(format!(
                "update rate must be finite and non-negative, got {}",
                self.update_rate
            )));
        }
        let scalars = [
            ("damping", self.damping.value),
            ("elasticity", self.elasticity.value),
            ("stiffness", self.stiffness.value),
            ("inertia", self.inertia.value),
            ("friction", self.friction.value),
            ("radius", self.radius.value),
            ("end length", self.end_length),
            ("weight", self.weight),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(Error::invalid(format!("{name} must be finite, got {value}")));
            }
        }
        if !(self.end_offset.is_finite() && self.gravity.is_finite() && self.force.is_finite()) {
            return Err(Error::invalid("end offset, gravity and force must be finite"));
        }
        Ok(())
    }
}

/// Sizing and scheduling of a [`crate::batch::BatchManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchConfig {
    /// Initial slot size. Slots grow when a larger chain enters.
    pub capacity_per_chain: usize,
    /// Hard ceiling; chains above it are rejected rather than truncated.
    pub max_particles_per_chain: usize,
    /// Chains to reserve storage for up front.
    pub reserve_chains: usize,
    /// Dedicated worker threads. Zero uses rayon's global pool.
    pub worker_threads: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity_per_chain: 10,
            max_particles_per_chain: 256,
            reserve_chains: 200,
            worker_threads: 0,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity_per_chain == 0 {
            return Err(Error::invalid("capacity per chain must be at least 1"));
        }
        if self.capacity_per_chain > self.max_particles_per_chain {
            return Err(Error::invalid(format!(
                "capacity per chain {} exceeds the ceiling {}",
                self.capacity_per_chain, self.max_particles_per_chain
            )));
        }
        Ok(())
    }
}
