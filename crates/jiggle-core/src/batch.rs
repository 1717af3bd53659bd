//! Batched simulation of many chains in shared slot storage.
//!
//! Every registered chain owns one fixed-size slot of `capacity_per_chain`
//! particles inside flat arrays; particle `local` of chain `c` lives at
//! `c * capacity + local`. A frame runs the pipeline as system-wide stages,
//! each a single data-parallel pass whose implicit join is the barrier
//! before the next stage.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use glam::Quat;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::chain::{apply_parameters, JiggleChain, Stepping};
use crate::config::{BatchConfig, ChainConfig};
use crate::error::{Error, Result};
use crate::gate::FrameGate;
use crate::head::ChainHead;
use crate::hierarchy::{Hierarchy, NodeId, PoseWriter};
use crate::particle::Particle;
use crate::solver;

/// Stable handle to a chain handed to a [`BatchManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

impl ChainId {
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain {}", self.0)
    }
}

/// Outcome of one [`BatchManager::update`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The previous frame had not completed; nothing was touched.
    Dropped,
    /// No chains are registered.
    Idle,
    Simulated { chains: usize, particles: usize },
}

#[derive(Debug)]
struct Entry {
    id: ChainId,
    /// Inert while registered, except for its rig (frame inputs).
    chain: JiggleChain,
}

/// Packed per-chain storage. `particles`, `nodes` and `rotations` always
/// hold exactly `heads.len() * capacity` slots.
#[derive(Debug)]
struct SlotArena {
    capacity: usize,
    ceiling: usize,
    particles: Vec<Particle>,
    nodes: Vec<Option<NodeId>>,
    rotations: Vec<Quat>,
    heads: Vec<ChainHead>,
    entries: Vec<Entry>,
    index: HashMap<ChainId, usize>,
}

impl SlotArena {
    fn new(config: &BatchConfig) -> Self {
        let slots = config.reserve_chains * config.capacity_per_chain;
        Self {
            capacity: config.capacity_per_chain,
            ceiling: config.max_particles_per_chain,
            particles: Vec::with_capacity(slots),
            nodes: Vec::with_capacity(slots),
            rotations: Vec::with_capacity(slots),
            heads: Vec::with_capacity(config.reserve_chains),
            entries: Vec::with_capacity(config.reserve_chains),
            index: HashMap::with_capacity(config.reserve_chains),
        }
    }

    fn live_particles(&self) -> usize {
        self.heads.iter().map(ChainHead::count).sum()
    }

    fn slot_range(&self, index: usize) -> std::ops::Range<usize> {
        let base = index * self.capacity;
        base..base + self.heads[index].count()
    }

    fn push(&mut self, id: ChainId, mut chain: JiggleChain) {
        if chain.len() > self.capacity {
            self.grow(chain.len());
        }

        let index = self.heads.len();
        let offset = index * self.capacity;
        let end = offset + self.capacity;

        self.particles.extend_from_slice(&chain.particles);
        self.particles.resize(end, Particle::default());
        self.nodes.extend_from_slice(&chain.nodes);
        self.nodes.resize(end, None);
        self.rotations.resize(end, Quat::IDENTITY);

        chain.head.batch_index = index as i32;
        chain.head.slot_offset = offset as u32;
        chain.head.particle_count = chain.len() as u32;
        self.heads.push(chain.head);
        self.index.insert(id, index);
        log::debug!("{id} registered at batch index {index} with {} particles", chain.len());
        self.entries.push(Entry { id, chain });
    }

    /// Re-lay every slot at a larger stride.
    fn grow(&mut self, needed: usize) {
        let capacity = needed.max(self.capacity * 2).min(self.ceiling);
        log::info!("growing slot capacity from {} to {capacity}", self.capacity);

        let chains = self.heads.len();
        let mut particles = vec![Particle::default(); chains * capacity];
        let mut nodes = vec![None; chains * capacity];
        for (c, head) in self.heads.iter_mut().enumerate() {
            let old = c * self.capacity;
            let new = c * capacity;
            particles[new..new + self.capacity].copy_from_slice(&self.particles[old..old + self.capacity]);
            nodes[new..new + self.capacity].copy_from_slice(&self.nodes[old..old + self.capacity]);
            head.slot_offset = new as u32;
        }
        self.particles = particles;
        self.nodes = nodes;
        self.rotations = vec![Quat::IDENTITY; chains * capacity];
        self.capacity = capacity;
    }

    /// Swap-back removal: the last chain's slot and head move into the hole.
    fn swap_remove(&mut self, id: ChainId) -> Option<JiggleChain> {
        let index = self.index.remove(&id)?;
        let last = self.heads.len() - 1;
        let cap = self.capacity;

        let mut head = self.heads[index];
        let live = self.slot_range(index);
        let mut entry = self.entries.swap_remove(index);
        entry.chain.particles.clear();
        entry.chain.particles.extend_from_slice(&self.particles[live]);
        head.batch_index = -1;
        head.slot_offset = 0;
        entry.chain.head = head;

        if index != last {
            let (from, to) = (last * cap, index * cap);
            self.particles.copy_within(from..from + cap, to);
            self.nodes.copy_within(from..from + cap, to);
            self.rotations.copy_within(from..from + cap, to);

            let moved = &mut self.entries[index];
            self.index.insert(moved.id, index);
            moved.chain.head.batch_index = index as i32;
            moved.chain.head.slot_offset = to as u32;
            log::debug!("{} moved from batch index {last} to {index}", moved.id);
        }
        self.heads.swap_remove(index);
        if let Some(head) = self.heads.get_mut(index) {
            head.batch_index = index as i32;
            head.slot_offset = (index * cap) as u32;
        }

        let len = last * cap;
        self.particles.truncate(len);
        self.nodes.truncate(len);
        self.rotations.truncate(len);
        log::debug!("{id} removed from batch index {index}");
        Some(entry.chain)
    }

    /// Stages 1 to 5: everything that only reads the host.
    fn simulate<H>(&mut self, hierarchy: &H, dt: f32)
    where
        H: Hierarchy + Sync + ?Sized,
    {
        self.prepare(hierarchy, dt);
        self.refresh(hierarchy);
        let rounds = self.heads.iter().map(|h| h.substeps).max().unwrap_or(0);
        for substep in 0..rounds {
            self.integrate(substep);
            self.constrain(substep);
        }
        self.orient();
        self.finalize();
    }

    /// Stage 1, per chain: anchor pose, owner motion, force and sub-steps.
    fn prepare<H>(&mut self, hierarchy: &H, dt: f32)
    where
        H: Hierarchy + Sync + ?Sized,
    {
        let run = |(head, entry): (&mut ChainHead, &mut Entry)| {
            entry.chain.rig.prepare(head, hierarchy, dt, Stepping::Accumulate);
        };

        #[cfg(feature = "parallel")]
        {
            self.heads.par_iter_mut().zip(self.entries.par_iter_mut()).for_each(run);
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.heads.iter_mut().zip(self.entries.iter_mut()).for_each(run);
        }
    }

    /// Stage 2, per chain: top-down pose refresh.
    fn refresh<H>(&mut self, hierarchy: &H)
    where
        H: Hierarchy + Sync + ?Sized,
    {
        let run = |((slot, nodes), head): ((&mut [Particle], &[Option<NodeId>]), &ChainHead)| {
            let n = head.count();
            solver::refresh_pose(&mut slot[..n], &nodes[..n], head, hierarchy);
        };

        #[cfg(feature = "parallel")]
        {
            self.particles
                .par_chunks_mut(self.capacity)
                .zip(self.nodes.par_chunks(self.capacity))
                .zip(self.heads.par_iter())
                .for_each(run);
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.particles
                .chunks_mut(self.capacity)
                .zip(self.nodes.chunks(self.capacity))
                .zip(self.heads.iter())
                .for_each(run);
        }
    }

    /// Stage 3, per slot. Unused slots and chains without this sub-step
    /// are skipped.
    fn integrate(&mut self, substep: u32) {
        let cap = self.capacity;
        let heads = &self.heads;
        let run = |(slot, p): (usize, &mut Particle)| {
            let head = &heads[slot / cap];
            if slot % cap < head.count() && substep < head.substeps {
                solver::integrate(p, head, substep);
            }
        };

        #[cfg(feature = "parallel")]
        {
            self.particles.par_iter_mut().enumerate().for_each(run);
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.particles.iter_mut().enumerate().for_each(run);
        }
    }

    /// Stage 4, per chain: a child's constraints read its parent's result
    /// from the same pass, so each chain is walked in index order.
    fn constrain(&mut self, substep: u32) {
        let run = |(slot, head): (&mut [Particle], &ChainHead)| {
            if substep < head.substeps {
                solver::solve_constraints(&mut slot[..head.count()], head);
            }
        };

        #[cfg(feature = "parallel")]
        {
            self.particles
                .par_chunks_mut(self.capacity)
                .zip(self.heads.par_iter())
                .for_each(run);
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.particles
                .chunks_mut(self.capacity)
                .zip(self.heads.iter())
                .for_each(run);
        }
    }

    /// Stage 5a, per slot: derive output rotations into the scratch buffer.
    fn orient(&mut self) {
        let cap = self.capacity;
        let heads = &self.heads;
        let particles = &self.particles;
        let run = |(slot, rotation): (usize, &mut Quat)| {
            let head = &heads[slot / cap];
            let local = slot % cap;
            if local < head.count() {
                let base = slot - local;
                *rotation = solver::derive_rotation(&particles[base..base + head.count()], local, head);
            }
        };

        #[cfg(feature = "parallel")]
        {
            self.rotations.par_iter_mut().enumerate().for_each(run);
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.rotations.iter_mut().enumerate().for_each(run);
        }
    }

    /// Stage 5b, per slot: commit output transforms.
    fn finalize(&mut self) {
        let cap = self.capacity;
        let heads = &self.heads;
        let run = |(slot, (p, rotation)): (usize, (&mut Particle, &Quat))| {
            let head = &heads[slot / cap];
            if slot % cap < head.count() {
                solver::finalize(p, *rotation, head);
            }
        };

        #[cfg(feature = "parallel")]
        {
            self.particles
                .par_iter_mut()
                .zip(self.rotations.par_iter())
                .enumerate()
                .for_each(run);
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.particles
                .iter_mut()
                .zip(self.rotations.iter())
                .enumerate()
                .for_each(run);
        }
    }

    /// Stage 6: the host writer is exclusive, so this pass is sequential.
    fn write_back<W>(&mut self, writer: &mut W)
    where
        W: PoseWriter + ?Sized,
    {
        for index in 0..self.heads.len() {
            let live = self.slot_range(index);
            solver::write_back(&self.particles[live.clone()], &self.nodes[live], writer);
            self.heads[index].resetting = false;
        }
    }
}

/// Owns the shared storage of every registered chain and drives the
/// per-frame pipeline over all of them at once.
///
/// `enter` and `exit` only enqueue. Queues drain at the start of the next
/// frame that can begin, so registration never races an in-flight frame.
pub struct BatchManager {
    arena: SlotArena,
    pending_add: VecDeque<(ChainId, JiggleChain)>,
    pending_remove: Vec<ChainId>,
    retired: Vec<(ChainId, JiggleChain)>,
    gate: FrameGate,
    next_id: u64,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl BatchManager {
    pub fn new(config: BatchConfig) -> Result<Self> {
        config.validate()?;

        #[cfg(feature = "parallel")]
        let pool = match config.worker_threads {
            0 => None,
            n => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("jiggle-worker-{i}"))
                    .build()?;
                log::info!("started {n} jiggle worker threads");
                Some(pool)
            }
        };

        Ok(Self {
            arena: SlotArena::new(&config),
            pending_add: VecDeque::new(),
            pending_remove: Vec::new(),
            retired: Vec::new(),
            gate: FrameGate::new(),
            next_id: 0,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    /// Queue a chain for registration on the next frame.
    pub fn enter(&mut self, chain: JiggleChain) -> Result<ChainId> {
        if chain.len() > self.arena.ceiling {
            return Err(Error::ChainTooLarge {
                count: chain.len(),
                limit: self.arena.ceiling,
            });
        }
        let id = ChainId(self.next_id);
        self.next_id += 1;
        self.pending_add.push_back((id, chain));
        Ok(id)
    }

    /// Queue a chain for removal. Returns false for unknown ids and for
    /// chains already queued.
    pub fn exit(&mut self, id: ChainId) -> bool {
        if let Some(pos) = self.pending_add.iter().position(|(pending, _)| *pending == id) {
            if let Some(entry) = self.pending_add.remove(pos) {
                self.retired.push(entry);
            }
            return true;
        }
        if !self.arena.index.contains_key(&id) || self.pending_remove.contains(&id) {
            return false;
        }
        self.pending_remove.push(id);
        true
    }

    /// Apply queued registrations now. Refused (false) while a frame is
    /// in flight.
    pub fn flush_pending(&mut self) -> bool {
        let Some(_ticket) = self.gate.try_begin() else {
            return false;
        };
        self.drain_queues();
        true
    }

    fn drain_queues(&mut self) {
        while let Some((id, chain)) = self.pending_add.pop_front() {
            self.arena.push(id, chain);
        }
        for id in std::mem::take(&mut self.pending_remove) {
            if let Some(chain) = self.arena.swap_remove(id) {
                self.retired.push((id, chain));
            }
        }
    }

    /// Run one frame over every registered chain.
    pub fn update<S>(&mut self, scene: &mut S, dt: f32) -> FrameStatus
    where
        S: Hierarchy + PoseWriter + Sync + ?Sized,
    {
        let Some(ticket) = self.gate.try_begin() else {
            log::trace!("previous frame still in flight, dropping this one");
            return FrameStatus::Dropped;
        };
        self.drain_queues();
        if self.arena.heads.is_empty() {
            return FrameStatus::Idle;
        }

        let arena = &mut self.arena;
        let hierarchy: &S = scene;

        #[cfg(feature = "parallel")]
        {
            match &self.pool {
                Some(pool) => pool.install(|| arena.simulate(hierarchy, dt)),
                None => arena.simulate(hierarchy, dt),
            }
        }

        #[cfg(not(feature = "parallel"))]
        {
            arena.simulate(hierarchy, dt);
        }

        arena.write_back(scene);
        drop(ticket);

        FrameStatus::Simulated {
            chains: self.arena.heads.len(),
            particles: self.arena.live_particles(),
        }
    }

    fn pending_mut(&mut self, id: ChainId) -> Option<&mut JiggleChain> {
        self.pending_add
            .iter_mut()
            .find(|(pending, _)| *pending == id)
            .map(|(_, chain)| chain)
    }

    /// Change a chain's blend weight. False for unknown ids and while a
    /// frame is in flight.
    pub fn set_weight(&mut self, id: ChainId, weight: f32) -> bool {
        let Some(_ticket) = self.gate.try_begin() else {
            return false;
        };
        if let Some(&index) = self.arena.index.get(&id) {
            self.arena.heads[index].set_weight(weight);
            return true;
        }
        match self.pending_mut(id) {
            Some(chain) => {
                chain.set_weight(weight);
                true
            }
            None => false,
        }
    }

    pub fn weight(&self, id: ChainId) -> Option<f32> {
        if let Some(head) = self.head(id) {
            return Some(head.weight);
        }
        self.pending_add
            .iter()
            .find(|(pending, _)| *pending == id)
            .map(|(_, chain)| chain.weight())
    }

    /// Recompute a chain's per-particle parameters in place. `Ok(false)`
    /// when the id is unknown, [`Error::FrameInFlight`] while a frame runs.
    pub fn update_parameters(&mut self, id: ChainId, config: ChainConfig) -> Result<bool> {
        let Some(_ticket) = self.gate.try_begin() else {
            return Err(Error::FrameInFlight);
        };
        if let Some(&index) = self.arena.index.get(&id) {
            config.validate()?;
            let live = self.arena.slot_range(index);
            let entry = &mut self.arena.entries[index];
            apply_parameters(&mut self.arena.particles[live], &config, entry.chain.rig.total_length);
            entry.chain.rig.reconfigure(&mut self.arena.heads[index], config);
            return Ok(true);
        }
        match self.pending_mut(id) {
            Some(chain) => chain.update_parameters(config).map(|()| true),
            None => Ok(false),
        }
    }

    /// Collision hook for one particle. False for unknown ids or indices
    /// and while a frame is in flight.
    pub fn mark_colliding(&mut self, id: ChainId, particle: usize) -> bool {
        let Some(_ticket) = self.gate.try_begin() else {
            return false;
        };
        if let Some(&index) = self.arena.index.get(&id) {
            let live = self.arena.slot_range(index);
            return match self.arena.particles[live].get_mut(particle) {
                Some(p) => {
                    p.is_colliding = true;
                    true
                }
                None => false,
            };
        }
        self.pending_mut(id).is_some_and(|chain| chain.mark_colliding(particle))
    }

    /// Current batch position. Swap-back removal moves chains, so never
    /// cache this across frames.
    pub fn batch_index(&self, id: ChainId) -> Option<usize> {
        self.arena.index.get(&id).copied()
    }

    /// Live particles of a registered chain.
    pub fn slot(&self, id: ChainId) -> Option<&[Particle]> {
        let index = self.batch_index(id)?;
        Some(&self.arena.particles[self.arena.slot_range(index)])
    }

    pub fn head(&self, id: ChainId) -> Option<&ChainHead> {
        self.batch_index(id).map(|index| &self.arena.heads[index])
    }

    /// Registered chain ids in batch order.
    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.arena.entries.iter().map(|e| e.id)
    }

    pub fn chain_count(&self) -> usize {
        self.arena.heads.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_add.len() + self.pending_remove.len()
    }

    pub fn live_particle_count(&self) -> usize {
        self.arena.live_particles()
    }

    pub fn capacity_per_chain(&self) -> usize {
        self.arena.capacity
    }

    pub fn gate(&self) -> &FrameGate {
        &self.gate
    }

    /// Chains removed since the last call, with their final particle state.
    pub fn take_retired(&mut self) -> Vec<(ChainId, JiggleChain)> {
        std::mem::take(&mut self.retired)
    }

    /// Unregister everything at once and hand all chains back.
    pub fn teardown(&mut self) -> Vec<(ChainId, JiggleChain)> {
        self.retired.extend(self.pending_add.drain(..));
        self.pending_remove.clear();
        while let Some(id) = self.arena.entries.last().map(|e| e.id) {
            if let Some(chain) = self.arena.swap_remove(id) {
                self.retired.push((id, chain));
            }
        }
        log::debug!("batch torn down, {} chains returned", self.retired.len());
        self.take_retired()
    }
}
