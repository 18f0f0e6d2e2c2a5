use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("order {0} is too small, it must be at least 2")]
    OrderTooSmall(usize),
    #[error("block {block} does not exist or has been freed")]
    UnknownBlock { block: u64 },
    #[error("existing block {block} is too small to hold the updated content")]
    ExistingBlockTooSmall { block: u64 },
    #[error("node {node} is corrupted: {reason}")]
    CorruptedNode { node: u64, reason: String },
    #[error("the set does not contain any elements")]
    EmptySet,
    #[error("the cursor is exhausted and cannot produce more keys")]
    ExhaustedCursor,
    #[error(transparent)]
    Serialization(#[from] bincode::Error),
    #[error(transparent)]
    IntConversion(#[from] std::num::TryFromIntError),
}
