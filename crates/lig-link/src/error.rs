use std::path::PathBuf;

use lig_graph::GraphError;
use lig_stream::StreamError;

/// Errors that can occur while linking documents.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// A library path could not be turned into a document location.
    #[error("cannot resolve library path '{path}': {reason}")]
    Unresolvable { path: String, reason: String },

    /// A resolved document could not be opened or indexed.
    #[error("cannot read {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl LinkError {
    /// Whether the error ends the whole load rather than one library.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Graph(_) | Self::Stream(StreamError::Interrupted)
        )
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
