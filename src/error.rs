use thiserror::Error;

/// Errors surfaced by trie operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The cell index space cannot grow any further. The failed call left
    /// the stored key set unchanged.
    #[error("allocation failure: cannot grow to {requested} cells")]
    AllocationFailure {
        /// The cell count that could not be provided.
        requested: usize,
    },

    /// An index computation addressed storage outside its allocated
    /// bounds. Not reachable through the public operations.
    #[error("out of range: offset {index}, length {len}")]
    OutOfRange {
        /// The offending offset.
        index: usize,
        /// The valid length.
        len: usize,
    },
}
