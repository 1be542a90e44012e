//! Precomputed similarity sums used to normalize the two noisy-channel transforms.
//!
//! Both caches are computed once, persisted with bincode and reloaded on later
//! runs. A missing file is the only signal that a cache still has to be built.

use crate::config::{CohesionRegion, ModelConfig};
use crate::embedding::EmbeddingProvider;
use crate::index::CorpusAccessor;
use crate::persist::{self, CachePaths};
use crate::similarity::{cosine_similarity, norm};
use crate::stats::CollectionStats;
use crate::{CandidatePool, DocId, Error, Queries, Result, TermId, PADDING_TERM};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

lazy_static! {
    /// One build lock per cache directory, shared by every scorer in the process.
    static ref BUILD_LOCKS: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

/// Lock for the cache directory, keyed on its canonical path so that `cache` and
/// `./cache` share one lock.
fn build_lock(paths: &CachePaths) -> Result<Arc<Mutex<()>>> {
    create_dir_all(&paths.root).map_err(|e| Error::io(&paths.root, e))?;
    let root = paths.root.canonicalize().map_err(|e| Error::io(&paths.root, e))?;
    Ok(BUILD_LOCKS.lock().entry(root).or_default().clone())
}

/// Per-document cohesion: summed pairwise cosine similarity of its term occurrences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocSimSums {
    pub region: CohesionRegion,
    pub sums: HashMap<DocId, f64>,
}

impl DocSimSums {
    pub fn get(&self, doc_id: DocId) -> Option<f64> {
        self.sums.get(&doc_id).copied()
    }
}

/// Nearest neighbours of every query token and their summed similarities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermNeighbours {
    pub n_terms: usize,
    pub neighbours: HashMap<String, Vec<String>>,
    pub similarity_sums: HashMap<String, f64>,
}

impl TermNeighbours {
    pub fn get(&self, token: &str) -> Option<(&[String], f64)> {
        let neighbours = self.neighbours.get(token)?;
        let sum = self.similarity_sums.get(token).copied()?;
        Some((neighbours.as_slice(), sum))
    }
}

fn token_of<C: CorpusAccessor + ?Sized>(corpus: &C, term_id: TermId) -> Result<&str> {
    corpus.token(term_id).ok_or(Error::UnknownTerm(term_id))
}

fn unit_vector(v: &[f32]) -> Result<Vec<f64>> {
    let n = norm(v);
    if n == 0.0 {
        return Err(Error::ZeroNorm);
    }
    Ok(v.iter().map(|&x| f64::from(x) / n).collect())
}

/// Cohesion sum of one document.
///
/// Documents with too few retained occurrences to form a pair in `region` sum to 0.
pub fn document_cohesion<C, E>(corpus: &C, embeddings: &E, doc_id: DocId, region: CohesionRegion) -> Result<f64>
where
    C: CorpusAccessor + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    let (_, terms) = corpus.document(doc_id).ok_or(Error::UnknownDocument(doc_id))?;
    let units = terms
        .iter()
        .filter(|&&t| t != PADDING_TERM)
        .map(|&t| unit_vector(embeddings.vector(token_of(corpus, t)?)?))
        .collect::<Result<Vec<_>>>()?;

    let first = region.first_index();
    let mut sum = 0.0;
    for i in first..units.len() {
        for j in (i + 1)..units.len() {
            sum += units[i].iter().zip(&units[j]).map(|(a, b)| a * b).sum::<f64>();
        }
    }
    Ok(sum)
}

/// Cohesion sums for the given documents, computed in parallel.
pub fn compute_doc_sim_sum<C, E>(
    corpus: &C,
    embeddings: &E,
    documents: impl IntoIterator<Item = DocId>,
    region: CohesionRegion,
) -> Result<DocSimSums>
where
    C: CorpusAccessor + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    let start = Instant::now();
    let unique: Vec<DocId> = documents.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    let sums = unique
        .par_iter()
        .map(|&doc_id| Ok((doc_id, document_cohesion(corpus, embeddings, doc_id, region)?)))
        .collect::<Result<HashMap<DocId, f64>>>()?;
    tracing::info!(num_docs = sums.len(), elapsed_s = start.elapsed().as_secs_f64(), "computed document similarity sums");
    Ok(DocSimSums { region, sums })
}

/// Top-`n_terms` neighbours of each query token and the sum of their cosine
/// similarities to it.
pub fn compute_col_nt<'q, C, E>(
    corpus: &C,
    embeddings: &E,
    queries: impl IntoIterator<Item = &'q [TermId]>,
    n_terms: usize,
) -> Result<TermNeighbours>
where
    C: CorpusAccessor + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    let mut out = TermNeighbours { n_terms, ..TermNeighbours::default() };
    for query in queries {
        for &term_id in query {
            let token = token_of(corpus, term_id)?;
            if out.neighbours.contains_key(token) {
                continue;
            }
            let query_vec = embeddings.vector(token)?;
            let neighbours: Vec<String> = embeddings.nearest(token, n_terms)?.into_iter().map(|(t, _)| t).collect();
            let mut sum = 0.0;
            for neighbour in &neighbours {
                sum += cosine_similarity(query_vec, embeddings.vector(neighbour)?)?;
            }
            out.similarity_sums.insert(token.to_string(), sum);
            out.neighbours.insert(token.to_string(), neighbours);
        }
    }
    tracing::info!(num_terms = out.neighbours.len(), n_terms, "computed query term neighbours");
    Ok(out)
}

/// Both caches, owned by the scorer and never modified after construction.
#[derive(Debug, Clone, Default)]
pub struct SimilarityCache {
    pub doc_sims: DocSimSums,
    pub neighbours: TermNeighbours,
}

/// Everything the cache builder needs to know about a run.
pub struct CacheInputs<'a, C: ?Sized, E: ?Sized> {
    pub corpus: &'a C,
    pub stats: &'a CollectionStats,
    pub embeddings: &'a E,
    pub queries: &'a Queries,
    pub candidates: Option<&'a CandidatePool>,
}

impl<C, E> CacheInputs<'_, C, E>
where
    C: CorpusAccessor + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    /// Documents that will be scored: the candidate pools when given, otherwise
    /// every document containing at least one query term.
    fn documents(&self) -> BTreeSet<DocId> {
        match self.candidates {
            Some(pool) => pool.values().flatten().copied().collect(),
            None => self
                .queries
                .values()
                .flatten()
                .filter_map(|t| self.stats.postings(*t))
                .flat_map(|docs| docs.keys().copied())
                .filter(|d| (self.corpus.document_base()..self.corpus.maximum_document()).contains(d))
                .collect(),
        }
    }

    fn query_terms(&self) -> Result<Vec<&[TermId]>> {
        match self.candidates {
            Some(pool) => pool
                .keys()
                .map(|qid| {
                    self.queries
                        .get(qid)
                        .map(Vec::as_slice)
                        .ok_or_else(|| Error::UnknownQuery(qid.clone()))
                })
                .collect(),
            None => Ok(self.queries.values().map(Vec::as_slice).collect()),
        }
    }
}

impl SimilarityCache {
    /// Loads both caches from `paths`, building and persisting whichever is missing.
    ///
    /// Builds are serialized per cache directory within the process; a cache built
    /// with different parameters than `config` is rejected.
    ///
    /// The lock is held while the cohesion sums are computed on the rayon pool, so
    /// this must not be called from inside a rayon task: a worker waiting on the
    /// lock can steal a job that tries to take it again.
    pub fn load_or_build<C, E>(paths: &CachePaths, inputs: CacheInputs<'_, C, E>, config: &ModelConfig) -> Result<Self>
    where
        C: CorpusAccessor + ?Sized,
        E: EmbeddingProvider + ?Sized,
    {
        let lock = build_lock(paths)?;
        let _guard = lock.lock();

        let doc_sims = match persist::load_doc_sim_sums(paths)? {
            Some(sums) => {
                if sums.region != config.cohesion {
                    return Err(Error::Config(format!(
                        "cached similarity sums use {:?}, configuration asks for {:?}",
                        sums.region, config.cohesion
                    )));
                }
                tracing::info!(path = %paths.doc_sim_sums().display(), num_docs = sums.sums.len(), "loaded document similarity sums");
                sums
            }
            None => {
                let sums = compute_doc_sim_sum(inputs.corpus, inputs.embeddings, inputs.documents(), config.cohesion)?;
                persist::save_doc_sim_sums(paths, &sums)?;
                sums
            }
        };

        let neighbours = match persist::load_term_neighbours(paths)? {
            Some(nt) => {
                if nt.n_terms != config.neighbours {
                    return Err(Error::Config(format!(
                        "cached neighbours were built with n={}, configuration asks for n={}",
                        nt.n_terms, config.neighbours
                    )));
                }
                tracing::info!(path = %paths.term_neighbours().display(), num_terms = nt.neighbours.len(), "loaded query term neighbours");
                nt
            }
            None => {
                let nt = compute_col_nt(inputs.corpus, inputs.embeddings, inputs.query_terms()?, config.neighbours)?;
                persist::save_term_neighbours(paths, &nt)?;
                nt
            }
        };

        Ok(Self { doc_sims, neighbours })
    }
}
