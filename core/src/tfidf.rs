//! TF-IDF baseline used to pre-select candidate documents for re-ranking.

use crate::index::CorpusAccessor;
use crate::stats::CollectionStats;
use crate::{CandidatePool, DocId, Error, Queries, Result, TermId};
use std::collections::HashMap;

/// Sublinear transformation applied to raw term frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TfTransform {
    /// `1 + ln(tf)`
    Log,
}

impl std::str::FromStr for TfTransform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(TfTransform::Log),
            other => Err(Error::Config(format!("unsupported term frequency transformation: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TfIdf {
    pub transform: TfTransform,
}

impl TfIdf {
    pub fn new(transform: TfTransform) -> Self {
        Self { transform }
    }

    pub fn weighted_tf(&self, tf: u32) -> f64 {
        if tf == 0 {
            return 0.0;
        }
        match self.transform {
            TfTransform::Log => 1.0 + f64::from(tf).ln(),
        }
    }

    /// `ln(N / df)`, with `df` floored at 1.
    pub fn idf<C: CorpusAccessor + ?Sized>(&self, corpus: &C, term_id: TermId) -> f64 {
        let n = f64::from(corpus.num_docs().max(1));
        let df = f64::from(corpus.document_frequency(term_id).max(1));
        (n / df).ln()
    }

    pub fn score(&self, tf: u32, idf: f64) -> f64 {
        self.weighted_tf(tf) * idf
    }

    /// Documents matching any query term, best first (ties by internal id).
    pub fn rank<C: CorpusAccessor + ?Sized>(&self, corpus: &C, stats: &CollectionStats, query: &[TermId]) -> Vec<(DocId, f64)> {
        let mut scores: HashMap<DocId, f64> = HashMap::new();
        for &term_id in query {
            let Some(postings) = stats.postings(term_id) else { continue };
            let idf = self.idf(corpus, term_id);
            for (&doc_id, &tf) in postings {
                *scores.entry(doc_id).or_insert(0.0) += self.score(tf, idf);
            }
        }
        let mut scored: Vec<(DocId, f64)> = scores.into_iter().collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
    }

    /// The `n` best documents per query.
    pub fn top_candidates<C: CorpusAccessor + ?Sized>(
        &self,
        corpus: &C,
        stats: &CollectionStats,
        queries: &Queries,
        n: usize,
    ) -> CandidatePool {
        let pool: CandidatePool = queries
            .iter()
            .map(|(qid, query)| {
                let docs = self.rank(corpus, stats, query).into_iter().take(n).map(|(d, _)| d).collect();
                (qid.clone(), docs)
            })
            .collect();
        tracing::info!(num_queries = pool.len(), per_query = n, "built tf-idf candidate pools");
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;
    use crate::Corpus;

    fn corpus() -> Corpus {
        let mut b = Corpus::builder(Tokenizer { stem: false, remove_stopwords: false });
        b.add_document("a", "rust rust rust cargo");
        b.add_document("b", "rust python");
        b.add_document("c", "python java");
        b.build()
    }

    #[test]
    fn unsupported_transform_is_a_config_error() {
        assert_eq!("log".parse::<TfTransform>().unwrap(), TfTransform::Log);
        assert!(matches!("sqrt".parse::<TfTransform>(), Err(Error::Config(_))));
    }

    #[test]
    fn log_tf_weighting() {
        let t = TfIdf::new(TfTransform::Log);
        assert_eq!(t.weighted_tf(0), 0.0);
        assert_eq!(t.weighted_tf(1), 1.0);
        assert!((t.weighted_tf(3) - (1.0 + 3f64.ln())).abs() < 1e-15);
    }

    #[test]
    fn candidates_follow_tfidf_order() {
        let c = corpus();
        let stats = CollectionStats::from_corpus(&c);
        let mut queries = Queries::new();
        queries.insert("q".into(), c.query_terms("rust"));
        queries.insert("none".into(), c.query_terms("haskell"));
        let pool = TfIdf::new(TfTransform::Log).top_candidates(&c, &stats, &queries, 1);
        assert_eq!(pool["q"], vec![0]);
        assert!(pool["none"].is_empty());
    }

    #[test]
    fn ties_break_by_document_id() {
        let c = corpus();
        let stats = CollectionStats::from_corpus(&c);
        let ranked = TfIdf::new(TfTransform::Log).rank(&c, &stats, &c.query_terms("java cargo"));
        // both terms have df = 1 and tf = 1
        assert_eq!(ranked.iter().map(|(d, _)| *d).collect::<Vec<_>>(), vec![0, 2]);
    }
}
