use crate::{DocId, TermId};
use std::path::PathBuf;

/// Errors raised while building caches, scoring or writing runs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid weights, unknown transform names, inconsistent cache parameters.
    #[error("configuration error: {0}")]
    Config(String),
    /// Token has no vector in the embedding vocabulary.
    #[error("token `{0}` is not in the embedding vocabulary")]
    OutOfVocabulary(String),
    #[error("cosine similarity is undefined for a zero-norm vector")]
    ZeroNorm,
    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("unknown document id {0}")]
    UnknownDocument(DocId),
    #[error("unknown term id {0}")]
    UnknownTerm(TermId),
    #[error("unknown query `{0}`")]
    UnknownQuery(String),
    /// Document was scored but never entered the cohesion cache.
    #[error("document {0} has no cached cohesion sum")]
    UncachedDocument(DocId),
    /// Query term was scored but never entered the neighbour cache.
    #[error("query term `{0}` has no cached neighbours")]
    UncachedTerm(String),
    /// The mixture reached the logarithm with a non-positive value.
    #[error("non-positive probability {probability} for term `{term}` in document {document}")]
    NonPositiveProbability {
        term: String,
        document: DocId,
        probability: f64,
    },
    #[error("malformed embeddings at line {line}: {reason}")]
    EmbeddingFormat { line: usize, reason: String },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error(transparent)]
    Encode(#[from] bincode::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    /// True for failures confined to a single (query, document) pair.
    pub fn is_numeric_domain(&self) -> bool {
        matches!(self, Error::NonPositiveProbability { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
