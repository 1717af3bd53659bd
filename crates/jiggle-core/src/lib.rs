//! Secondary-motion ("jiggle") physics for chains of bones.
//!
//! A chain is built once from a host hierarchy ([`chain::ChainBuilder`]),
//! then simulated either on its own ([`chain::JiggleChain::update`]) or
//! packed with many other chains into shared slot storage and advanced as a
//! sequence of data-parallel stages ([`batch::BatchManager`]).

pub mod batch;
pub mod chain;
pub mod config;
pub mod constraints;
pub mod curve;
pub mod error;
pub mod gate;
pub mod head;
pub mod hierarchy;
pub mod math;
pub mod particle;
pub mod scene;
pub mod solver;

pub use batch::{BatchManager, ChainId, FrameStatus};
pub use chain::{ChainBuilder, JiggleChain};
pub use config::{BatchConfig, ChainConfig, Distributed, FreezeAxis, UpdateMode};
pub use curve::Curve;
pub use error::{Error, Result};
pub use hierarchy::{Hierarchy, NodeId, PoseWriter};
pub use scene::SceneGraph;
