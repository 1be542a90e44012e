//! Generalized language model retrieval.
//!
//! Ranks documents against queries with a four-way mixture: direct term sampling,
//! a document-level noisy-channel transform, a collection-level noisy-channel
//! transform (both driven by word embeddings) and the background collection model.

pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod model;
pub mod persist;
pub mod retrieval;
pub mod similarity;
pub mod stats;
pub mod tfidf;
pub mod tokenizer;

pub use error::{Error, Result};
pub use index::{Corpus, CorpusAccessor, CorpusBuilder};

pub type TermId = u32;
pub type DocId = u32;

/// Reserved term id for positions the indexer did not keep (stopwords).
pub const PADDING_TERM: TermId = 0;

/// Query id → ordered query term ids.
pub type Queries = std::collections::BTreeMap<String, Vec<TermId>>;

/// Query id → internal ids of the documents to re-rank for that query.
pub type CandidatePool = std::collections::BTreeMap<String, Vec<DocId>>;
