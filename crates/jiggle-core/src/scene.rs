use glam::{Quat, Vec3};

use crate::hierarchy::{Hierarchy, NodeId, PoseWriter};

#[derive(Clone, Debug)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local_position: Vec3,
    local_rotation: Quat,
    local_scale: Vec3,
    /// Last pose written by the simulation, kept apart from the animated pose.
    output: Option<(Vec3, Quat)>,
}

/// Minimal in-memory transform tree.
///
/// Serves as the reference host for tests, benches and the wasm binding.
/// Animated poses are authored through the local setters; simulation output
/// lands in a separate per-node slot readable with [`SceneGraph::output_pose`].
#[derive(Clone, Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. An unknown `parent` makes the node a root.
    pub fn add_node(
        &mut self,
        parent: Option<NodeId>,
        name: impl Into<String>,
        local_position: Vec3,
        local_rotation: Quat,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = parent.filter(|p| self.contains(*p));
        self.nodes.push(Node {
            name: name.into(),
            parent,
            children: Vec::new(),
            local_position,
            local_rotation,
            local_scale: Vec3::ONE,
            output: None,
        });
        if let Some(p) = parent {
            self.nodes[p.0 as usize].children.push(id);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.node(node).map(|n| n.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| NodeId(i as u32))
    }

    pub fn set_local_position(&mut self, node: NodeId, position: Vec3) {
        if let Some(n) = self.node_mut(node) {
            n.local_position = position;
        }
    }

    pub fn set_local_rotation(&mut self, node: NodeId, rotation: Quat) {
        if let Some(n) = self.node_mut(node) {
            n.local_rotation = rotation;
        }
    }

    pub fn set_local_scale(&mut self, node: NodeId, scale: Vec3) {
        if let Some(n) = self.node_mut(node) {
            n.local_scale = scale;
        }
    }

    /// Pose most recently written by the simulation, if any.
    pub fn output_pose(&self, node: NodeId) -> Option<(Vec3, Quat)> {
        self.node(node).and_then(|n| n.output)
    }

    pub fn clear_outputs(&mut self) {
        for n in &mut self.nodes {
            n.output = None;
        }
    }

    fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node.0 as usize)
    }

    fn node_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node.0 as usize)
    }

    /// Animated world (position, rotation, lossy scale) of `node`.
    fn world(&self, node: NodeId) -> (Vec3, Quat, Vec3) {
        let mut lineage = Vec::new();
        let mut cursor = self.node(node);
        while let Some(n) = cursor {
            lineage.push(n);
            cursor = n.parent.and_then(|p| self.node(p));
        }
        let Some(top) = lineage.pop() else {
            return (Vec3::ZERO, Quat::IDENTITY, Vec3::ONE);
        };
        // Compose root first.
        lineage
            .iter()
            .rev()
            .fold((top.local_position, top.local_rotation, top.local_scale), |(pos, rot, scale), n| {
                (
                    pos + rot * (n.local_position * scale),
                    (rot * n.local_rotation).normalize(),
                    scale * n.local_scale,
                )
            })
    }
}

impl Hierarchy for SceneGraph {
    fn contains(&self, node: NodeId) -> bool {
        (node.0 as usize) < self.nodes.len()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|n| n.parent)
    }

    fn child_count(&self, node: NodeId) -> usize {
        self.node(node).map_or(0, |n| n.children.len())
    }

    fn child(&self, node: NodeId, index: usize) -> Option<NodeId> {
        self.node(node).and_then(|n| n.children.get(index).copied())
    }

    fn local_position(&self, node: NodeId) -> Vec3 {
        self.node(node).map_or(Vec3::ZERO, |n| n.local_position)
    }

    fn local_rotation(&self, node: NodeId) -> Quat {
        self.node(node).map_or(Quat::IDENTITY, |n| n.local_rotation)
    }

    fn world_position(&self, node: NodeId) -> Vec3 {
        self.world(node).0
    }

    fn world_rotation(&self, node: NodeId) -> Quat {
        self.world(node).1
    }

    fn lossy_scale(&self, node: NodeId) -> Vec3 {
        self.world(node).2
    }
}

impl PoseWriter for SceneGraph {
    fn write_pose(&mut self, node: NodeId, position: Vec3, rotation: Quat) {
        if let Some(n) = self.node_mut(node) {
            n.output = Some((position, rotation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_pose_composes_parent_rotation_and_scale() {
        let mut scene = SceneGraph::new();
        let root = scene.add_node(None, "root", Vec3::new(1.0, 0.0, 0.0), Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        scene.set_local_scale(root, Vec3::splat(2.0));
        let child = scene.add_node(Some(root), "child", Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);

        let pos = scene.world_position(child);
        assert!((pos - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5, "got {pos}");
        assert_eq!(scene.lossy_scale(child), Vec3::splat(2.0));
        assert_eq!(scene.child_count(root), 1);
        assert_eq!(scene.parent(child), Some(root));
    }

    #[test]
    fn test_written_pose_does_not_feed_back_into_animated_pose() {
        let mut scene = SceneGraph::new();
        let root = scene.add_node(None, "root", Vec3::ZERO, Quat::IDENTITY);
        let child = scene.add_node(Some(root), "child", Vec3::Y, Quat::IDENTITY);

        scene.write_pose(child, Vec3::new(5.0, 5.0, 5.0), Quat::IDENTITY);

        assert_eq!(scene.world_position(child), Vec3::Y);
        assert_eq!(scene.output_pose(child).map(|(p, _)| p), Some(Vec3::splat(5.0)));
        assert_eq!(scene.find("child"), Some(child));
    }
}
