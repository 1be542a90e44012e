//! Retrieval driver: scores (query, document) pairs and writes a ranked run file.

use crate::embedding::EmbeddingProvider;
use crate::index::CorpusAccessor;
use crate::model::MixtureModel;
use crate::{CandidatePool, DocId, Error, Queries, Result, TermId};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{create_dir_all, hard_link, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;

/// Where run files go. How many documents each query keeps is the model's
/// `top_k`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
}

impl RunConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    pub fn run_path(&self, model_name: &str) -> PathBuf {
        self.output_dir.join(format!("{model_name}.run"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub external_id: String,
    pub score: f64,
}

/// A (query, document) pair whose mixture probability left the log's domain.
#[derive(Debug, Clone)]
pub struct ScoreFailure {
    pub query_id: String,
    pub doc_id: DocId,
    pub reason: String,
}

#[derive(Debug)]
pub struct RunSummary {
    pub path: PathBuf,
    /// Full ranked list per query, before top-k truncation.
    pub rankings: BTreeMap<String, Vec<Ranked>>,
    pub scored_pairs: usize,
    pub failures: Vec<ScoreFailure>,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// A run file for this model name already existed; nothing was written.
    AlreadyExists(PathBuf),
    Written(RunSummary),
}

struct QueryResult {
    query_id: String,
    ranked: Vec<Ranked>,
    scored: usize,
    failures: Vec<ScoreFailure>,
}

/// Best score first; equal scores ordered by external id.
pub fn rank(results: &mut [Ranked]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.external_id.cmp(&b.external_id)));
}

/// Writes rankings in TREC run format, `qid Q0 docid rank score model`, keeping
/// at most `max_per_query` lines per query. Lists must already be ranked.
pub fn write_run<W: Write>(
    out: &mut W,
    model_name: &str,
    rankings: &BTreeMap<String, Vec<Ranked>>,
    max_per_query: usize,
) -> std::io::Result<()> {
    for (query_id, ranked) in rankings {
        for (rank, hit) in ranked.iter().take(max_per_query).enumerate() {
            writeln!(out, "{} Q0 {} {} {} {}", query_id, hit.external_id, rank + 1, hit.score, model_name)?;
        }
    }
    Ok(())
}

/// Writes `path` through a temp file in `dir` and publishes it with a hard link.
///
/// Returns `Ok(false)` when `path` already exists, leaving it untouched. On any
/// failure, including a failing `fill`, neither `path` nor the temp file remains.
pub fn publish_new<F>(dir: &Path, path: &Path, fill: F) -> Result<bool>
where
    F: FnOnce(&mut BufWriter<&File>) -> io::Result<()>,
{
    create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        fill(&mut out).map_err(|e| Error::io(tmp.path(), e))?;
        out.flush().map_err(|e| Error::io(tmp.path(), e))?;
    }
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    match hard_link(tmp.path(), path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

pub struct Retriever<'m, 'a, C: ?Sized, E: ?Sized> {
    model: &'m MixtureModel<'a, C, E>,
    queries: &'m Queries,
    config: RunConfig,
}

impl<'m, 'a, C, E> Retriever<'m, 'a, C, E>
where
    C: CorpusAccessor + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    pub fn new(model: &'m MixtureModel<'a, C, E>, queries: &'m Queries, config: RunConfig) -> Self {
        Self { model, queries, config }
    }

    /// Scores every query against its candidates and writes `<model_name>.run`.
    ///
    /// Without `candidates`, every document holding at least one query term is a
    /// candidate. An existing run file makes this a no-op. Pairs whose probability
    /// is non-positive are logged and left out; any other error aborts the run
    /// before the file is created. At most the model's `top_k` documents are
    /// written per query, and the file only appears once it is complete.
    pub fn run(&self, model_name: &str, candidates: Option<&CandidatePool>) -> Result<RunOutcome> {
        let path = self.config.run_path(model_name);
        if path.exists() {
            tracing::info!(path = %path.display(), "run file already exists, skipping");
            return Ok(RunOutcome::AlreadyExists(path));
        }

        tracing::info!(model_name, "retrieving");
        let start = Instant::now();
        let work = self.work_list(candidates)?;
        let results = work
            .par_iter()
            .map(|(query_id, query, docs)| self.score_query(query_id, query, docs))
            .collect::<Result<Vec<QueryResult>>>()?;

        let mut summary = RunSummary {
            path: path.clone(),
            rankings: BTreeMap::new(),
            scored_pairs: 0,
            failures: Vec::new(),
        };
        for result in results {
            summary.scored_pairs += result.scored;
            summary.failures.extend(result.failures);
            summary.rankings.insert(result.query_id, result.ranked);
        }

        let top_k = self.model.config().top_k;
        let written = publish_new(&self.config.output_dir, &path, |out| {
            write_run(out, model_name, &summary.rankings, top_k)
        })?;
        if !written {
            tracing::info!(path = %path.display(), "run file appeared concurrently, skipping");
            return Ok(RunOutcome::AlreadyExists(path));
        }

        tracing::info!(
            path = %path.display(),
            queries = summary.rankings.len(),
            scored_pairs = summary.scored_pairs,
            failures = summary.failures.len(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "retrieval run complete"
        );
        Ok(RunOutcome::Written(summary))
    }

    /// Per query: id, terms and the documents to score, deduplicated.
    fn work_list<'q>(&'q self, candidates: Option<&'q CandidatePool>) -> Result<Vec<(&'q str, &'q [TermId], Vec<DocId>)>> {
        let corpus = self.model.corpus();
        let stats = self.model.stats();
        let in_range = |d: &DocId| (corpus.document_base()..corpus.maximum_document()).contains(d);

        match candidates {
            None => Ok(self
                .queries
                .iter()
                .map(|(qid, query)| {
                    let docs: BTreeSet<DocId> = query
                        .iter()
                        .filter_map(|t| stats.postings(*t))
                        .flat_map(|postings| postings.keys().copied())
                        .filter(in_range)
                        .collect();
                    (qid.as_str(), query.as_slice(), docs.into_iter().collect())
                })
                .collect()),
            Some(pool) => pool
                .iter()
                .map(|(qid, docs)| {
                    let query = self.queries.get(qid).ok_or_else(|| Error::UnknownQuery(qid.clone()))?;
                    let docs: BTreeSet<DocId> =
                        docs.iter().copied().filter(|d| stats.contains_any(*d, query)).collect();
                    Ok((qid.as_str(), query.as_slice(), docs.into_iter().collect()))
                })
                .collect(),
        }
    }

    fn score_query(&self, query_id: &str, query: &[TermId], docs: &[DocId]) -> Result<QueryResult> {
        let start = Instant::now();
        let corpus = self.model.corpus();
        let mut result = QueryResult {
            query_id: query_id.to_string(),
            ranked: Vec::with_capacity(docs.len()),
            scored: 0,
            failures: Vec::new(),
        };

        for &doc_id in docs {
            let (external_id, _) = corpus.document(doc_id).ok_or(Error::UnknownDocument(doc_id))?;
            match self.model.score(doc_id, query) {
                Ok(score) => {
                    result.scored += 1;
                    if score != 0.0 {
                        result.ranked.push(Ranked { external_id: external_id.to_string(), score });
                    }
                }
                Err(e) if e.is_numeric_domain() => {
                    tracing::warn!(query = query_id, doc_id, error = %e, "scoring failed, pair skipped");
                    result.failures.push(ScoreFailure { query_id: query_id.to_string(), doc_id, reason: e.to_string() });
                }
                Err(e) => return Err(e),
            }
        }

        rank(&mut result.ranked);
        tracing::debug!(query = query_id, docs = docs.len(), elapsed_s = start.elapsed().as_secs_f64(), "query scored");
        Ok(result)
    }
}
