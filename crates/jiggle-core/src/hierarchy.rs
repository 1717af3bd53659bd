use std::fmt;

use glam::{Quat, Vec3};

use crate::math;

/// Opaque handle to a node in the host hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read access to the host's animated pose.
///
/// World-space queries must describe the *animated* pose, never a pose the
/// simulation wrote back through [`PoseWriter`]. Lookups of unknown nodes
/// may return identity values; builders check [`Hierarchy::contains`] first.
pub trait Hierarchy {
    fn contains(&self, node: NodeId) -> bool;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn child_count(&self, node: NodeId) -> usize;
    fn child(&self, node: NodeId, index: usize) -> Option<NodeId>;

    fn local_position(&self, node: NodeId) -> Vec3;
    fn local_rotation(&self, node: NodeId) -> Quat;
    fn world_position(&self, node: NodeId) -> Vec3;
    fn world_rotation(&self, node: NodeId) -> Quat;
    fn lossy_scale(&self, node: NodeId) -> Vec3;

    fn transform_point(&self, node: NodeId, local: Vec3) -> Vec3 {
        math::transform_point(
            self.world_position(node),
            self.world_rotation(node),
            self.lossy_scale(node),
            local,
        )
    }

    fn inverse_transform_point(&self, node: NodeId, world: Vec3) -> Vec3 {
        math::inverse_transform_point(
            self.world_position(node),
            self.world_rotation(node),
            self.lossy_scale(node),
            world,
        )
    }

    fn transform_direction(&self, node: NodeId, direction: Vec3) -> Vec3 {
        self.world_rotation(node) * direction
    }

    fn inverse_transform_direction(&self, node: NodeId, direction: Vec3) -> Vec3 {
        self.world_rotation(node).inverse() * direction
    }
}

/// Exclusive write access to each bound node's output transform.
pub trait PoseWriter {
    fn write_pose(&mut self, node: NodeId, position: Vec3, rotation: Quat);
}
