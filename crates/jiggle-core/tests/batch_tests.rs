use glam::{Quat, Vec3};
use jiggle_core::{
    BatchConfig, BatchManager, ChainBuilder, ChainConfig, ChainId, Distributed, Error, FrameStatus, Hierarchy,
    JiggleChain, NodeId, SceneGraph,
};

const DT: f32 = 1.0 / 60.0;

/// Hang a strand of `len` nodes under `parent`, offset along X.
fn add_strand(scene: &mut SceneGraph, parent: NodeId, x: f32, len: usize) -> NodeId {
    let root = scene.add_node(Some(parent), "strand", Vec3::new(x, 2.0, 0.0), Quat::IDENTITY);
    let mut node = root;
    for _ in 1..len {
        node = scene.add_node(Some(node), "link", Vec3::new(0.0, -0.5, 0.0), Quat::IDENTITY);
    }
    root
}

fn swaying() -> ChainConfig {
    ChainConfig {
        force: Vec3::new(0.01, 0.0, 0.005),
        ..Default::default()
    }
}

fn build(scene: &SceneGraph, root: NodeId, config: ChainConfig) -> JiggleChain {
    ChainBuilder::new(scene, config).root(root).build().unwrap()
}

fn manager() -> BatchManager {
    BatchManager::new(BatchConfig::default()).unwrap()
}

#[test]
fn test_swap_back_moves_last_chain_into_the_hole() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let roots = [3, 4, 5].map(|len| add_strand(&mut scene, body, len as f32, len));
    let mut batch = manager();
    let [a, b, c] = roots.map(|root| batch.enter(build(&scene, root, swaying())).unwrap());

    for _ in 0..5 {
        batch.update(&mut scene, DT);
    }
    assert_eq!(batch.batch_index(c), Some(2));
    let c_before = batch.slot(c).unwrap().to_vec();
    let b_before = batch.slot(b).unwrap().to_vec();

    assert!(batch.exit(b));
    assert!(batch.flush_pending());

    assert_eq!(batch.chain_count(), 2);
    assert_eq!(batch.batch_index(a), Some(0));
    assert_eq!(batch.batch_index(c), Some(1));
    assert_eq!(batch.batch_index(b), None);
    assert_eq!(batch.slot(c).unwrap(), &c_before[..], "moved slot must be unchanged");
    let head = batch.head(c).unwrap();
    assert_eq!(head.batch_index, 1);
    assert_eq!(head.slot_offset as usize, batch.capacity_per_chain());
    assert_eq!(batch.chain_ids().collect::<Vec<_>>(), vec![a, c]);

    let retired = batch.take_retired();
    assert_eq!(retired.len(), 1);
    let (id, chain) = &retired[0];
    assert_eq!(*id, b);
    assert_eq!(chain.particles(), &b_before[..], "retired chain carries its final state");
    assert_eq!(chain.batch_index(), None);
}

#[test]
fn test_removing_the_last_chain_needs_no_swap() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let first = add_strand(&mut scene, body, 0.0, 3);
    let second = add_strand(&mut scene, body, 1.0, 3);
    let mut batch = manager();
    let a = batch.enter(build(&scene, first, swaying())).unwrap();
    let b = batch.enter(build(&scene, second, swaying())).unwrap();
    batch.update(&mut scene, DT);
    let a_before = batch.slot(a).unwrap().to_vec();

    batch.exit(b);
    batch.flush_pending();

    assert_eq!(batch.chain_count(), 1);
    assert_eq!(batch.batch_index(a), Some(0));
    assert_eq!(batch.slot(a).unwrap(), &a_before[..]);
}

#[test]
fn test_busy_frame_is_dropped_without_touching_storage() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let root = add_strand(&mut scene, body, 0.0, 4);
    let mut batch = manager();
    let id = batch.enter(build(&scene, root, swaying())).unwrap();
    batch.update(&mut scene, DT);

    let gate = batch.gate().clone();
    let in_flight = gate.try_begin().expect("gate should be free between frames");
    let before = batch.slot(id).unwrap().to_vec();
    let head_before = *batch.head(id).unwrap();

    assert!(batch.exit(id));
    assert!(!batch.exit(id), "a chain is queued for removal only once");
    scene.set_local_position(body, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(batch.update(&mut scene, DT), FrameStatus::Dropped);
    assert!(!batch.flush_pending());

    assert_eq!(batch.chain_count(), 1);
    assert_eq!(batch.pending_count(), 1);
    assert_eq!(batch.slot(id).unwrap(), &before[..]);
    assert_eq!(*batch.head(id).unwrap(), head_before);

    drop(in_flight);
    assert_eq!(batch.update(&mut scene, DT), FrameStatus::Idle);
    assert_eq!(batch.chain_count(), 0);
    assert_eq!(batch.take_retired().len(), 1);
}

#[test]
fn test_five_chains_remove_two() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let mut batch = manager();
    let ids: Vec<ChainId> = (0..5)
        .map(|i| {
            let root = add_strand(&mut scene, body, i as f32, 4);
            batch.enter(build(&scene, root, swaying())).unwrap()
        })
        .collect();
    batch.flush_pending();
    assert_eq!(batch.live_particle_count(), 20);

    for index in [0, 2] {
        let victim = batch.chain_ids().nth(index).unwrap();
        assert!(batch.exit(victim));
        batch.flush_pending();
    }

    assert_eq!(batch.chain_count(), 3);
    assert_eq!(batch.live_particle_count(), 12);
    let mut seen: Vec<usize> = batch.chain_ids().map(|id| batch.batch_index(id).unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(
        batch.update(&mut scene, DT),
        FrameStatus::Simulated {
            chains: 3,
            particles: 12
        }
    );
    let survivors = ids.iter().filter(|id| batch.batch_index(**id).is_some()).count();
    assert_eq!(survivors, 3);
    for id in batch.chain_ids() {
        for p in batch.slot(id).unwrap() {
            assert!(p.sim_position.is_finite());
        }
    }
}

#[test]
fn test_oversized_chain_is_rejected() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let root = add_strand(&mut scene, body, 0.0, 5);
    let mut batch = BatchManager::new(BatchConfig {
        capacity_per_chain: 2,
        max_particles_per_chain: 4,
        ..Default::default()
    })
    .unwrap();

    let err = batch.enter(build(&scene, root, swaying())).unwrap_err();
    assert!(matches!(err, Error::ChainTooLarge { count: 5, limit: 4 }), "got {err:?}");
    assert_eq!(batch.pending_count(), 0);
}

#[test]
fn test_invalid_batch_config_is_rejected() {
    let zero = BatchManager::new(BatchConfig {
        capacity_per_chain: 0,
        ..Default::default()
    });
    assert!(matches!(zero, Err(Error::InvalidValue { .. })));

    let inverted = BatchManager::new(BatchConfig {
        capacity_per_chain: 64,
        max_particles_per_chain: 8,
        ..Default::default()
    });
    assert!(matches!(inverted, Err(Error::InvalidValue { .. })));
}

#[test]
fn test_larger_chain_grows_slots() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let short = add_strand(&mut scene, body, 0.0, 3);
    let long = add_strand(&mut scene, body, 1.0, 12);
    let mut batch = manager();
    let a = batch.enter(build(&scene, short, swaying())).unwrap();
    let b = batch.enter(build(&scene, long, swaying())).unwrap();

    batch.update(&mut scene, DT);

    assert_eq!(batch.capacity_per_chain(), 20);
    assert_eq!(batch.slot(a).unwrap().len(), 3);
    assert_eq!(batch.slot(b).unwrap().len(), 12);
    assert_eq!(batch.head(b).unwrap().slot_offset, 20);
    assert_eq!(batch.live_particle_count(), 15);
}

#[test]
fn test_batched_output_matches_standalone_chain() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let root = add_strand(&mut scene, body, 0.0, 5);
    let config = ChainConfig {
        inertia: Distributed::new(0.3),
        gravity: Vec3::new(0.0, -0.002, 0.0),
        end_length: 0.3,
        ..swaying()
    };
    let mut standalone = build(&scene, root, config);
    let mut batch = manager();
    let id = batch.enter(standalone.clone()).unwrap();
    let mut solo_scene = scene.clone();

    for frame in 0..45 {
        let t = frame as f32 * DT;
        let pose = Quat::from_rotation_z((t * 4.0).sin() * 0.6);
        scene.set_local_rotation(body, pose);
        solo_scene.set_local_rotation(body, pose);

        standalone.update(&mut solo_scene, DT);
        batch.update(&mut scene, DT);
    }

    let batched = batch.slot(id).unwrap();
    for (solo, shared) in standalone.particles().iter().zip(batched) {
        assert!(
            (solo.sim_position - shared.sim_position).length() < 1e-6,
            "particle {}: {} vs {}",
            solo.index,
            solo.sim_position,
            shared.sim_position
        );
    }
    for node in standalone.nodes().iter().flatten() {
        let (a, _) = solo_scene.output_pose(*node).unwrap();
        let (b, _) = scene.output_pose(*node).unwrap();
        assert!((a - b).length() < 1e-6);
    }
}

#[test]
fn test_chains_step_at_their_own_rates() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let fast_root = add_strand(&mut scene, body, 0.0, 3);
    let slow_root = add_strand(&mut scene, body, 1.0, 3);
    let mut batch = manager();
    let fast = batch.enter(build(&scene, fast_root, swaying())).unwrap();
    let slow = batch
        .enter(build(
            &scene,
            slow_root,
            ChainConfig {
                update_rate: 30.0,
                ..swaying()
            },
        ))
        .unwrap();

    batch.update(&mut scene, DT);

    assert_eq!(batch.head(fast).unwrap().substeps, 1);
    assert_eq!(batch.head(slow).unwrap().substeps, 0);
    let tip = batch.slot(slow).unwrap()[2];
    assert_eq!(tip.sim_position, tip.world_position, "no step ran yet");
    assert!(batch.slot(fast).unwrap()[2].sim_position.x > scene.world_position(NodeId(3)).x);
}

#[test]
fn test_runtime_controls_reach_registered_and_pending_chains() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let root = add_strand(&mut scene, body, 0.0, 3);
    let mut batch = manager();
    let id = batch.enter(build(&scene, root, swaying())).unwrap();

    assert!(batch.set_weight(id, 0.25));
    assert_eq!(batch.weight(id), Some(0.25));
    batch.flush_pending();
    assert_eq!(batch.weight(id), Some(0.25));

    assert!(batch.set_weight(id, 2.0));
    assert_eq!(batch.weight(id), Some(1.0), "weight is clamped");

    let config = ChainConfig {
        damping: Distributed::new(0.6),
        ..swaying()
    };
    assert!(batch.update_parameters(id, config).unwrap());
    assert!(batch.slot(id).unwrap().iter().all(|p| p.damping == 0.6));

    assert!(batch.mark_colliding(id, 1));
    assert!(!batch.mark_colliding(id, 3));
    assert!(batch.slot(id).unwrap()[1].is_colliding);
    batch.update(&mut scene, DT);
    assert!(!batch.slot(id).unwrap()[1].is_colliding);

    let unknown = ChainId::from_raw(999);
    assert!(!batch.set_weight(unknown, 1.0));
    assert_eq!(batch.weight(unknown), None);
    assert!(!batch.update_parameters(unknown, ChainConfig::default()).unwrap());
    assert!(!batch.exit(unknown));
}

#[test]
fn test_teardown_returns_every_chain() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let mut batch = manager();
    for i in 0..3 {
        let root = add_strand(&mut scene, body, i as f32, 3);
        batch.enter(build(&scene, root, swaying())).unwrap();
    }
    batch.flush_pending();
    let root = add_strand(&mut scene, body, 9.0, 2);
    batch.enter(build(&scene, root, swaying())).unwrap();

    let chains = batch.teardown();

    assert_eq!(chains.len(), 4);
    assert_eq!(batch.chain_count(), 0);
    assert_eq!(batch.pending_count(), 0);
    assert_eq!(batch.live_particle_count(), 0);
    assert_eq!(batch.update(&mut scene, DT), FrameStatus::Idle);
}

#[cfg(feature = "parallel")]
#[test]
fn test_dedicated_pool_matches_global_pool() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let roots: Vec<NodeId> = (0..8).map(|i| add_strand(&mut scene, body, i as f32, 6)).collect();
    let mut other_scene = scene.clone();

    let mut global = manager();
    let mut pooled = BatchManager::new(BatchConfig {
        worker_threads: 2,
        ..Default::default()
    })
    .unwrap();
    for root in &roots {
        global.enter(build(&scene, *root, swaying())).unwrap();
        pooled.enter(build(&scene, *root, swaying())).unwrap();
    }

    for frame in 0..20 {
        let offset = Vec3::new((frame as f32 * 0.3).sin(), 0.0, 0.0);
        scene.set_local_position(body, offset);
        other_scene.set_local_position(body, offset);
        global.update(&mut scene, DT);
        pooled.update(&mut other_scene, DT);
    }

    for (a, b) in global.chain_ids().zip(pooled.chain_ids()) {
        assert_eq!(global.slot(a).unwrap(), pooled.slot(b).unwrap());
    }
}

#[test]
fn test_gravity_refresh_is_cancelled_at_rest_in_batch() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let root = add_strand(&mut scene, body, 0.0, 3);
    let mut batch = manager();
    let id = batch.enter(build(&scene, root, ChainConfig::default())).unwrap();
    batch.update(&mut scene, DT);

    let config = ChainConfig {
        gravity: Vec3::new(0.0, -0.01, 0.0),
        ..Default::default()
    };
    assert!(batch.update_parameters(id, config).unwrap());
    batch.update(&mut scene, DT);
    let force = batch.head(id).unwrap().force;
    assert!(force.length() < 1e-7, "rest gravity leaks: {}", force);
}

#[test]
fn test_runtime_controls_wait_for_the_frame_in_flight() {
    let mut scene = SceneGraph::new();
    let body = scene.add_node(None, "body", Vec3::ZERO, Quat::IDENTITY);
    let root = add_strand(&mut scene, body, 0.0, 3);
    let mut batch = manager();
    let id = batch.enter(build(&scene, root, swaying())).unwrap();
    batch.update(&mut scene, DT);
    let before = batch.slot(id).unwrap().to_vec();
    let head_before = *batch.head(id).unwrap();

    let gate = batch.gate().clone();
    let in_flight = gate.try_begin().unwrap();
    assert!(!batch.set_weight(id, 0.5));
    assert!(!batch.mark_colliding(id, 1));
    let config = ChainConfig {
        damping: Distributed::new(0.9),
        weight: 0.2,
        ..swaying()
    };
    assert!(matches!(batch.update_parameters(id, config.clone()), Err(Error::FrameInFlight)));
    assert_eq!(batch.slot(id).unwrap(), &before[..]);
    assert_eq!(*batch.head(id).unwrap(), head_before);

    drop(in_flight);
    assert!(batch.update_parameters(id, config).unwrap());
    assert_eq!(batch.weight(id), Some(0.2), "config weight is applied");
    assert!(batch.slot(id).unwrap().iter().all(|p| p.damping == 0.9));
    assert!(batch.set_weight(id, 0.5));
    assert!(batch.mark_colliding(id, 1));
}
