use glam::{Quat, Vec3};
use jiggle_core::{
    BatchConfig, BatchManager, ChainBuilder, ChainConfig, ChainId, Distributed, FrameStatus, Hierarchy, NodeId,
    SceneGraph,
};
use wasm_bindgen::prelude::*;

/// Output pose of one bone: 32 bytes, read directly from linear memory.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuBonePose {
    position: [f32; 3], // 12 bytes
    node: u32,          //  4 bytes
    rotation: [f32; 4], // 16 bytes
}

fn js_error(err: jiggle_core::Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen]
pub struct JiggleWorld {
    scene: SceneGraph,
    batch: BatchManager,
    pose_buffer: Vec<GpuBonePose>,
}

#[wasm_bindgen]
impl JiggleWorld {
    #[wasm_bindgen(constructor)]
    pub fn new(capacity_per_chain: usize) -> Result<JiggleWorld, JsValue> {
        let config = BatchConfig {
            capacity_per_chain,
            ..Default::default()
        };
        let batch = BatchManager::new(config).map_err(js_error)?;
        web_sys::console::log_1(
            &format!("WASM JiggleWorld created: {} particles per chain slot", capacity_per_chain).into(),
        );
        Ok(JiggleWorld {
            scene: SceneGraph::new(),
            batch,
            pose_buffer: Vec::new(),
        })
    }

    /// Add a node under `parent` (negative for a scene root). Returns its id.
    #[wasm_bindgen]
    pub fn add_node(
        &mut self,
        parent: i32,
        name: &str,
        x: f32, y: f32, z: f32,
        qx: f32, qy: f32, qz: f32, qw: f32,
    ) -> u32 {
        let parent = u32::try_from(parent).ok().map(NodeId);
        let rotation = Quat::from_xyzw(qx, qy, qz, qw).normalize();
        self.scene.add_node(parent, name, Vec3::new(x, y, z), rotation).0
    }

    /// Set the animated local pose of a node.
    #[wasm_bindgen]
    pub fn set_local_pose(
        &mut self,
        node: u32,
        x: f32, y: f32, z: f32,
        qx: f32, qy: f32, qz: f32, qw: f32,
    ) {
        let node = NodeId(node);
        self.scene.set_local_position(node, Vec3::new(x, y, z));
        self.scene.set_local_rotation(node, Quat::from_xyzw(qx, qy, qz, qw).normalize());
    }

    /// Build a chain rooted at `root` and queue it for the next step.
    #[wasm_bindgen]
    pub fn add_chain(
        &mut self,
        root: u32,
        damping: f32,
        elasticity: f32,
        stiffness: f32,
        inertia: f32,
        end_length: f32,
        gravity_x: f32, gravity_y: f32, gravity_z: f32,
    ) -> Result<u32, JsValue> {
        let config = ChainConfig {
            damping: Distributed::new(damping),
            elasticity: Distributed::new(elasticity),
            stiffness: Distributed::new(stiffness),
            inertia: Distributed::new(inertia),
            end_length,
            gravity: Vec3::new(gravity_x, gravity_y, gravity_z),
            ..Default::default()
        };
        let chain = ChainBuilder::new(&self.scene, config)
            .root(NodeId(root))
            .build()
            .map_err(js_error)?;
        let particles = chain.len();
        let id = self.batch.enter(chain).map_err(js_error)?;
        web_sys::console::log_1(&format!("chain {} queued: {} particles", id.raw(), particles).into());
        Ok(id.raw() as u32)
    }

    #[wasm_bindgen]
    pub fn remove_chain(&mut self, chain: u32) -> bool {
        self.batch.exit(ChainId::from_raw(chain.into()))
    }

    #[wasm_bindgen]
    pub fn set_weight(&mut self, chain: u32, weight: f32) -> bool {
        self.batch.set_weight(ChainId::from_raw(chain.into()), weight)
    }

    #[wasm_bindgen]
    pub fn get_weight(&self, chain: u32) -> Option<f32> {
        self.batch.weight(ChainId::from_raw(chain.into()))
    }

    /// Advance every chain by `dt` seconds. Returns elapsed milliseconds.
    #[wasm_bindgen]
    pub fn step(&mut self, dt: f32) -> f32 {
        let start = js_sys::Date::now();
        self.scene.clear_outputs();
        if self.batch.update(&mut self.scene, dt) == FrameStatus::Dropped {
            web_sys::console::warn_1(&"jiggle frame dropped".into());
        }
        self.batch.take_retired();
        self.write_pose_output();
        let elapsed = js_sys::Date::now() - start;
        elapsed as f32
    }

    #[wasm_bindgen]
    pub fn get_pose_buffer_ptr(&self) -> *const f32 {
        self.pose_buffer.as_ptr() as *const f32
    }

    #[wasm_bindgen]
    pub fn get_pose_buffer_byte_length(&self) -> usize {
        self.pose_buffer.len() * std::mem::size_of::<GpuBonePose>()
    }

    /// Copy of the pose buffer, for hosts that cannot view linear memory.
    #[wasm_bindgen]
    pub fn pose_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.pose_buffer).to_vec()
    }

    #[wasm_bindgen]
    pub fn pose_count(&self) -> usize {
        self.pose_buffer.len()
    }

    #[wasm_bindgen]
    pub fn chain_count(&self) -> usize {
        self.batch.chain_count()
    }

    #[wasm_bindgen]
    pub fn particle_count(&self) -> usize {
        self.batch.live_particle_count()
    }

    /// Animated world position of a node as `[x, y, z]`.
    #[wasm_bindgen]
    pub fn node_world_position(&self, node: u32) -> Vec<f32> {
        self.scene.world_position(NodeId(node)).to_array().to_vec()
    }
}

impl JiggleWorld {
    fn write_pose_output(&mut self) {
        self.pose_buffer.clear();
        for i in 0..self.scene.len() as u32 {
            if let Some((position, rotation)) = self.scene.output_pose(NodeId(i)) {
                self.pose_buffer.push(GpuBonePose {
                    position: position.to_array(),
                    node: i,
                    rotation: rotation.to_array(),
                });
            }
        }
    }
}
