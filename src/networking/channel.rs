use thiserror::Error;

use crate::types::{block::Block, data_types::Height, seal::Seal};

/// A connection to one remote node.
pub trait Channel: Send + Sync {
    /// Send `seal` to the remote node without blocking. Delivery is best-effort.
    fn send_seal(&self, seal: &Seal) -> Result<(), NetworkError>;

    /// Ask the remote node for its committed blocks at `heights`. The remote node may return fewer
    /// blocks than requested, but returns them in the requested order.
    fn request_blocks(&self, heights: &[Height]) -> Result<Vec<Block>, NetworkError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("channel to {0} is closed")]
    Closed(String),
    #[error("request timed out")]
    Timeout,
    #[error("remote node failed: {0}")]
    Remote(String),
}
