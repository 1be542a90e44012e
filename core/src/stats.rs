use crate::index::CorpusAccessor;
use crate::{DocId, TermId, PADDING_TERM};
use std::collections::HashMap;

/// Frequency tables derived from a corpus, read-only once built.
///
/// Every lookup has an explicit default: absent entries read as zero.
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    inverted_index: HashMap<TermId, HashMap<DocId, u32>>,
    doc_len: HashMap<DocId, u32>,
    col_freq: HashMap<TermId, u64>,
    col_size: u64,
}

impl CollectionStats {
    /// Assembles stats from externally built tables.
    ///
    /// The collection size is the total number of term occurrences, i.e. the sum
    /// of the frequency values.
    pub fn new(
        inverted_index: HashMap<TermId, HashMap<DocId, u32>>,
        doc_len: HashMap<DocId, u32>,
        col_freq: HashMap<TermId, u64>,
    ) -> Self {
        let col_size = col_freq.values().sum();
        Self { inverted_index, doc_len, col_freq, col_size }
    }

    pub fn from_corpus<C: CorpusAccessor + ?Sized>(corpus: &C) -> Self {
        let mut inverted_index: HashMap<TermId, HashMap<DocId, u32>> = HashMap::new();
        let mut doc_len = HashMap::new();
        let mut col_freq: HashMap<TermId, u64> = HashMap::new();

        for doc_id in corpus.document_base()..corpus.maximum_document() {
            let Some((_, terms)) = corpus.document(doc_id) else { continue };
            let mut len = 0u32;
            for &tid in terms.iter().filter(|&&t| t != PADDING_TERM) {
                *inverted_index.entry(tid).or_default().entry(doc_id).or_insert(0) += 1;
                *col_freq.entry(tid).or_insert(0) += 1;
                len += 1;
            }
            doc_len.insert(doc_id, len);
        }

        let stats = Self::new(inverted_index, doc_len, col_freq);
        tracing::debug!(
            num_terms = stats.col_freq.len(),
            col_size = stats.col_size,
            "collection statistics computed"
        );
        stats
    }

    /// Raw frequency of `term_id` in `doc_id`; `0` when the term never occurs there.
    pub fn term_frequency(&self, term_id: TermId, doc_id: DocId) -> u32 {
        self.inverted_index
            .get(&term_id)
            .and_then(|docs| docs.get(&doc_id))
            .copied()
            .unwrap_or(0)
    }

    /// Documents containing the term with their raw frequencies.
    pub fn postings(&self, term_id: TermId) -> Option<&HashMap<DocId, u32>> {
        self.inverted_index.get(&term_id)
    }

    /// True if the inverted index lists the document under any of the terms.
    pub fn contains_any(&self, doc_id: DocId, terms: &[TermId]) -> bool {
        terms
            .iter()
            .any(|t| self.postings(*t).is_some_and(|docs| docs.contains_key(&doc_id)))
    }

    /// Number of non-padding term occurrences; `0` for unknown documents.
    pub fn document_length(&self, doc_id: DocId) -> u32 {
        self.doc_len.get(&doc_id).copied().unwrap_or(0)
    }

    /// Occurrences of the term across the collection; `0` for unknown terms.
    pub fn collection_frequency(&self, term_id: TermId) -> u64 {
        self.col_freq.get(&term_id).copied().unwrap_or(0)
    }

    pub fn collection_size(&self) -> u64 {
        self.col_size
    }

    pub fn vocabulary(&self) -> impl Iterator<Item = TermId> + '_ {
        self.col_freq.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;
    use crate::Corpus;

    fn corpus() -> Corpus {
        let mut b = Corpus::builder(Tokenizer { stem: false, remove_stopwords: false });
        b.add_tokens("d0", [Some("a"), None, Some("b"), Some("a")]);
        b.add_tokens("d1", [Some("c"), Some("a")]);
        b.build()
    }

    #[test]
    fn lengths_skip_padding() {
        let stats = CollectionStats::from_corpus(&corpus());
        assert_eq!(stats.document_length(0), 3);
        assert_eq!(stats.document_length(1), 2);
        assert_eq!(stats.document_length(7), 0);
    }

    #[test]
    fn collection_size_sums_frequencies() {
        let c = corpus();
        let stats = CollectionStats::from_corpus(&c);
        let a = c.term_id("a").unwrap();
        assert_eq!(stats.collection_frequency(a), 3);
        // term ids are 1..=3, so a key sum would give 6 instead of 5
        assert_eq!(stats.collection_size(), 5);
    }

    #[test]
    fn missing_entries_read_as_zero() {
        let c = corpus();
        let stats = CollectionStats::from_corpus(&c);
        let b = c.term_id("b").unwrap();
        assert_eq!(stats.term_frequency(b, 1), 0);
        assert_eq!(stats.term_frequency(b, 0), 1);
        assert_eq!(stats.collection_frequency(42), 0);
        assert!(stats.contains_any(1, &[b, c.term_id("c").unwrap()]));
        assert!(!stats.contains_any(1, &[b]));
    }
}
