//! Error types for the tree and the event counter built on top of it.

use crate::{EventId, NodeRef};

/// A specialized Result type for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors reported by [`EventTree`](crate::EventTree).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// No event with this id is stored in the tree.
    #[error("event {0} not found")]
    NotFound(EventId),

    /// The handle does not point at a live node (it was deleted, or the tree
    /// was cleared or rebuilt since it was obtained).
    #[error("node handle {0:?} does not refer to a live node")]
    DanglingNode(NodeRef),

    /// A red-black or structural invariant does not hold.
    #[error("red-black invariant violated: {0}")]
    InvariantViolation(String),

    /// Bulk construction requires an empty tree.
    #[error("bulk construction requires an empty tree, found {len} nodes")]
    NotEmpty {
        /// Number of nodes already stored.
        len: usize,
    },

    /// Bulk construction input was rejected before anything was modified.
    #[error("invalid construction input at index {index}: {reason}")]
    InvalidConstruction {
        /// Position of the offending pair in the input.
        index: usize,
        /// What is wrong with it.
        reason: ConstructionFault,
    },
}

/// Why a pair was refused by [`EventTree::bulk_build`](crate::EventTree::bulk_build).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionFault {
    /// The id is not greater than the preceding one.
    #[error("id {id} does not follow {previous} in increasing order")]
    Unsorted {
        /// Id of the preceding pair.
        previous: EventId,
        /// Id of the offending pair.
        id: EventId,
    },

    /// The id repeats the preceding one.
    #[error("duplicate id {0}")]
    Duplicate(EventId),

    /// Counts in a dataset are never negative.
    #[error("negative count {count} for id {id}")]
    NegativeCount {
        /// Id of the offending pair.
        id: EventId,
        /// The negative count.
        count: i64,
    },
}

/// Errors surfaced by the [`counter`](crate::counter) layer.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// Reading the dataset or commands, or writing replies, failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The dataset is malformed.
    #[error("malformed dataset: {0}")]
    Dataset(String),

    /// A command line could not be parsed.
    #[error("malformed command {line:?}: {reason}")]
    Command {
        /// The offending input line.
        line: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The tree rejected an operation.
    #[error(transparent)]
    Tree(#[from] TreeError),
}
