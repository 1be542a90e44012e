//! Word embedding access.
//!
//! The scorer only needs two capabilities from an embedding backend: the vector of
//! a token and the tokens nearest to it. [`EmbeddingProvider`] captures exactly
//! that, so any model can be plugged in. [`InMemoryEmbeddings`] is a plain
//! token → vector table loaded from the word2vec text format.

use crate::similarity::{dot, norm};
use crate::{Error, Result};
use std::collections::HashMap;
use std::io::BufRead;

/// A trait for word embedding backends.
///
/// The `Send` and `Sync` bounds allow a provider to be shared across the
/// per-query workers of a retrieval run.
pub trait EmbeddingProvider: Send + Sync {
    /// Dimensionality shared by every vector.
    fn dimension(&self) -> usize;

    /// Vector for `token`, or [`Error::OutOfVocabulary`].
    fn vector(&self, token: &str) -> Result<&[f32]>;

    /// The `n` tokens most similar to `token` by cosine similarity, best first,
    /// excluding `token` itself.
    fn nearest(&self, token: &str, n: usize) -> Result<Vec<(String, f64)>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEmbeddings {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl InMemoryEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, vectors: HashMap::new() }
    }

    pub fn insert(&mut self, token: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch { left: self.dimension, right: vector.len() });
        }
        self.vectors.insert(token.into(), vector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Parses the word2vec text format: an optional `<count> <dimension>` header,
    /// then one `token v1 ... vd` line per word.
    ///
    /// A first line of two integers is only a header if the rows after it agree
    /// with its dimension; otherwise it is read back as a one-dimensional row.
    pub fn from_word2vec_text<R: BufRead>(reader: R) -> Result<Self> {
        let mut embeddings: Option<Self> = None;
        let mut header: Option<(String, f32)> = None;
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| Error::EmbeddingFormat { line: line_no, reason: e.to_string() })?;
            let mut fields = line.split_whitespace();
            let Some(token) = fields.next() else { continue };
            let values: Vec<&str> = fields.collect();

            if idx == 0 && values.len() == 1 && token.parse::<usize>().is_ok() {
                if let (Ok(dim), Ok(value)) = (values[0].parse::<usize>(), values[0].parse::<f32>()) {
                    embeddings = Some(Self::new(dim));
                    header = Some((token.to_string(), value));
                    continue;
                }
            }

            let vector = values
                .iter()
                .map(|v| v.parse::<f32>())
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| Error::EmbeddingFormat { line: line_no, reason: e.to_string() })?;
            if let Some((first_token, first_value)) = header.take() {
                if vector.len() == 1 && embeddings.as_ref().is_some_and(|t| t.dimension != 1) {
                    let mut table = Self::new(1);
                    table.vectors.insert(first_token, vec![first_value]);
                    embeddings = Some(table);
                }
            }
            let table = embeddings.get_or_insert_with(|| Self::new(vector.len()));
            if vector.len() != table.dimension {
                return Err(Error::EmbeddingFormat {
                    line: line_no,
                    reason: format!("expected {} values, found {}", table.dimension, vector.len()),
                });
            }
            table.vectors.insert(token.to_string(), vector);
        }
        let embeddings = embeddings.unwrap_or_default();
        tracing::info!(tokens = embeddings.len(), dimension = embeddings.dimension, "loaded embeddings");
        Ok(embeddings)
    }
}

impl EmbeddingProvider for InMemoryEmbeddings {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn vector(&self, token: &str) -> Result<&[f32]> {
        self.vectors
            .get(token)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::OutOfVocabulary(token.to_string()))
    }

    /// Exhaustive scan. Ties are broken by token so the ordering is reproducible.
    fn nearest(&self, token: &str, n: usize) -> Result<Vec<(String, f64)>> {
        let query = self.vector(token)?;
        let query_norm = norm(query);
        if query_norm == 0.0 {
            return Err(Error::ZeroNorm);
        }
        let mut scored: Vec<(&str, f64)> = self
            .vectors
            .iter()
            .filter(|(other, _)| other.as_str() != token)
            .filter_map(|(other, v)| {
                let other_norm = norm(v);
                (other_norm > 0.0).then(|| (other.as_str(), dot(query, v) / (query_norm * other_norm)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(scored.into_iter().take(n).map(|(t, s)| (t.to_string(), s)).collect())
    }
}
