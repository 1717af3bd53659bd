use thiserror::Error;

use crate::hierarchy::NodeId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown node {node}")]
    UnknownNode { node: NodeId },

    #[error("chain has {count} particles, exceeding the per-chain limit of {limit}")]
    ChainTooLarge { count: usize, limit: usize },

    #[error("a frame is in flight; batch storage is locked")]
    FrameInFlight,

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[cfg(feature = "parallel")]
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }
}
