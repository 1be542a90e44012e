//! Generalized language model scorer.
//!
//! A query term is observed through one of four events: sampled directly from the
//! document, transformed from a semantically close document term, transformed from
//! a close term of the collection, or sampled from the background collection
//! model. The document score is the query log-likelihood under that mixture.

use crate::cache::{CacheInputs, SimilarityCache};
use crate::config::{MixtureWeights, ModelConfig};
use crate::embedding::EmbeddingProvider;
use crate::index::CorpusAccessor;
use crate::persist::CachePaths;
use crate::similarity::cosine_similarity;
use crate::stats::CollectionStats;
use crate::{DocId, Error, Result, TermId, PADDING_TERM};
use std::collections::BTreeMap;

/// The four per-term probabilities before mixing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Components {
    pub term: f64,
    pub doc_transform: f64,
    pub col_transform: f64,
    pub background: f64,
}

impl Components {
    pub fn mix(&self, w: &MixtureWeights) -> f64 {
        w.lambda * self.term + w.alpha * self.doc_transform + w.beta * self.col_transform + w.background() * self.background
    }
}

pub struct MixtureModel<'a, C: ?Sized, E: ?Sized> {
    corpus: &'a C,
    stats: &'a CollectionStats,
    embeddings: &'a E,
    cache: SimilarityCache,
    config: ModelConfig,
}

impl<'a, C, E> MixtureModel<'a, C, E>
where
    C: CorpusAccessor + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    /// Validates `config` and loads (or builds and persists) the similarity caches.
    pub fn new(inputs: CacheInputs<'a, C, E>, config: &ModelConfig, cache_paths: &CachePaths) -> Result<Self> {
        config.validate()?;
        let (corpus, stats, embeddings) = (inputs.corpus, inputs.stats, inputs.embeddings);
        let cache = SimilarityCache::load_or_build(cache_paths, inputs, config)?;
        Ok(Self { corpus, stats, embeddings, cache, config: config.clone() })
    }

    /// Uses caches that were prepared elsewhere.
    pub fn with_cache(
        corpus: &'a C,
        stats: &'a CollectionStats,
        embeddings: &'a E,
        cache: SimilarityCache,
        config: ModelConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { corpus, stats, embeddings, cache, config })
    }

    pub fn corpus(&self) -> &'a C {
        self.corpus
    }

    pub fn stats(&self) -> &'a CollectionStats {
        self.stats
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Query log-likelihood `Σ ln p(t|d)` of `query` given document `doc_id`.
    pub fn score(&self, doc_id: DocId, query: &[TermId]) -> Result<f64> {
        let mut score = 0.0;
        for (term_id, components) in self.explain(doc_id, query)? {
            let p = components.mix(&self.config.weights);
            if !(p > 0.0) {
                return Err(Error::NonPositiveProbability {
                    term: self.token(term_id)?.to_string(),
                    document: doc_id,
                    probability: p,
                });
            }
            score += p.ln();
        }
        Ok(score)
    }

    /// Component probabilities of every query term, in query order.
    pub fn explain(&self, doc_id: DocId, query: &[TermId]) -> Result<Vec<(TermId, Components)>> {
        let (_, terms) = self.corpus.document(doc_id).ok_or(Error::UnknownDocument(doc_id))?;
        let mut doc_counts: BTreeMap<TermId, u32> = BTreeMap::new();
        for &t in terms.iter().filter(|&&t| t != PADDING_TERM) {
            *doc_counts.entry(t).or_insert(0) += 1;
        }

        query
            .iter()
            .map(|&term_id| {
                let components = Components {
                    term: self.term_likelihood(term_id, doc_id),
                    doc_transform: self.doc_transform(term_id, doc_id, &doc_counts)?,
                    col_transform: self.col_transform(term_id)?,
                    background: self.background_likelihood(term_id),
                };
                Ok((term_id, components))
            })
            .collect()
    }

    /// Raw frequency of the term in the document over the document length.
    pub fn term_likelihood(&self, term_id: TermId, doc_id: DocId) -> f64 {
        let doc_len = self.stats.document_length(doc_id);
        if doc_len == 0 {
            return 0.0;
        }
        f64::from(self.stats.term_frequency(term_id, doc_id)) / f64::from(doc_len)
    }

    /// Collection frequency of the term over the collection size.
    pub fn background_likelihood(&self, term_id: TermId) -> f64 {
        self.collection_probability(term_id)
    }

    fn collection_probability(&self, term_id: TermId) -> f64 {
        let col_size = self.stats.collection_size();
        if col_size == 0 {
            return 0.0;
        }
        self.stats.collection_frequency(term_id) as f64 / col_size as f64
    }

    /// Frequency-weighted similarity of the query term to each distinct document
    /// term, normalized by the document's cohesion sum and length.
    ///
    /// Zero when the normalizer is zero (e.g. single-term documents).
    pub fn doc_transform(&self, term_id: TermId, doc_id: DocId, doc_counts: &BTreeMap<TermId, u32>) -> Result<f64> {
        let sim_sum = self.cache.doc_sims.get(doc_id).ok_or(Error::UncachedDocument(doc_id))?;
        let normalizer = sim_sum * f64::from(self.stats.document_length(doc_id));
        if normalizer == 0.0 {
            return Ok(0.0);
        }
        let query_vec = self.embeddings.vector(self.token(term_id)?)?;
        let mut weighted = 0.0;
        for (&doc_term, &tf) in doc_counts {
            let similarity = cosine_similarity(self.embeddings.vector(self.token(doc_term)?)?, query_vec)?;
            weighted += similarity * f64::from(tf);
        }
        Ok(weighted / normalizer)
    }

    /// Similarity-weighted collection probability of the query term's cached
    /// neighbours.
    pub fn col_transform(&self, term_id: TermId) -> Result<f64> {
        let token = self.token(term_id)?;
        let (neighbours, sim_sum) = self
            .cache
            .neighbours
            .get(token)
            .ok_or_else(|| Error::UncachedTerm(token.to_string()))?;
        if sim_sum == 0.0 {
            return Ok(0.0);
        }
        let query_vec = self.embeddings.vector(token)?;
        let mut transform = 0.0;
        for neighbour in neighbours {
            let similarity = cosine_similarity(query_vec, self.embeddings.vector(neighbour)?)?;
            // neighbours outside the corpus vocabulary have no collection mass
            let p_col = self.corpus.term_id(neighbour).map_or(0.0, |t| self.collection_probability(t));
            transform += similarity / sim_sum * p_col;
        }
        Ok(transform)
    }

    fn token(&self, term_id: TermId) -> Result<&'a str> {
        self.corpus.token(term_id).ok_or(Error::UnknownTerm(term_id))
    }
}
