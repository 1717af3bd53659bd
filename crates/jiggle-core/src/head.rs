use glam::{Quat, Vec3};

use crate::config::FreezeAxis;

/// Most fixed sub-steps a single frame may run. Time debt beyond this is dropped.
pub const MAX_SUBSTEPS: u32 = 2;

/// Frame rate that an uncapped chain's per-step force is normalized to.
pub const REFERENCE_RATE: f32 = 60.0;

/// Per-chain record read by every pipeline stage.
///
/// Holds the frame's external inputs (force, owner motion, anchor pose,
/// weight) and the bookkeeping that locates the chain inside batch storage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChainHead {
    pub update_rate: f32,
    /// Accumulated, not yet simulated time.
    pub time: f32,
    /// Per-step external force, already scaled.
    pub force: Vec3,
    /// Owner displacement since the previous frame.
    pub object_move: Vec3,
    pub weight: f32,
    pub particle_count: u32,
    pub slot_offset: u32,
    /// Position in the batch, -1 while unregistered. Never cache across frames.
    pub batch_index: i32,
    /// Sub-steps scheduled for the current frame.
    pub substeps: u32,
    pub anchor_position: Vec3,
    pub anchor_rotation: Quat,
    pub freeze_axis: FreezeAxis,
    pub animated_local_pose: bool,
    /// Snap the verlet state to the pose on the next integration.
    pub resetting: bool,
}

impl Default for ChainHead {
    fn default() -> Self {
        Self {
            update_rate: 60.0,
            time: 0.0,
            force: Vec3::ZERO,
            object_move: Vec3::ZERO,
            weight: 1.0,
            particle_count: 0,
            slot_offset: 0,
            batch_index: -1,
            substeps: 0,
            anchor_position: Vec3::ZERO,
            anchor_rotation: Quat::IDENTITY,
            freeze_axis: FreezeAxis::None,
            animated_local_pose: true,
            resetting: false,
        }
    }
}

impl ChainHead {
    pub fn count(&self) -> usize {
        self.particle_count as usize
    }

    pub fn is_active(&self) -> bool {
        self.weight > 0.0
    }

    /// Change the blend weight. Waking from zero schedules a reset so the
    /// chain starts from the current pose instead of stale history.
    pub fn set_weight(&mut self, weight: f32) {
        let weight = if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) };
        if weight == self.weight {
            return;
        }
        if self.weight <= 0.0 && weight > 0.0 {
            self.resetting = true;
        }
        self.weight = weight;
    }

    /// Feed `dt` seconds into the accumulator and schedule this frame's
    /// sub-steps. Returns the factor the per-step force must be scaled by.
    pub fn advance(&mut self, dt: f32) -> f32 {
        let dt = dt.max(0.0);
        if self.update_rate <= 0.0 {
            self.substeps = 1;
            return dt * REFERENCE_RATE;
        }

        let step = 1.0 / self.update_rate;
        self.time += dt;
        let mut substeps = 0;
        while self.time >= step {
            self.time -= step;
            substeps += 1;
            if substeps == MAX_SUBSTEPS && self.time >= step {
                log::trace!("dropping {:.4}s of simulation time", self.time);
                self.time = 0.0;
                break;
            }
        }
        self.substeps = substeps;
        1.0
    }
}
