use crate::tokenizer::Tokenizer;
use crate::{DocId, TermId, PADDING_TERM};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Read access to an indexed collection.
///
/// Term streams may contain [`PADDING_TERM`] entries for positions the indexer
/// did not keep; consumers filter them out.
pub trait CorpusAccessor: Send + Sync {
    /// External id and ordered term stream of a document.
    fn document(&self, doc_id: DocId) -> Option<(&str, &[TermId])>;
    fn token(&self, term_id: TermId) -> Option<&str>;
    fn term_id(&self, token: &str) -> Option<TermId>;
    /// Number of documents containing the term, `0` for unknown terms.
    fn document_frequency(&self, term_id: TermId) -> u32;
    /// First internal document id.
    fn document_base(&self) -> DocId;
    /// One past the last internal document id.
    fn maximum_document(&self) -> DocId;

    fn num_docs(&self) -> u32 {
        self.maximum_document().saturating_sub(self.document_base())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocEntry {
    pub external_id: String,
    pub terms: Vec<TermId>,
}

/// In-memory collection: vocabulary, document frequencies and term streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    pub dictionary: HashMap<String, TermId>,
    /// Indexed by term id; slot 0 belongs to the padding term.
    pub tokens: Vec<String>,
    pub df: Vec<u32>,
    pub docs: Vec<DocEntry>,
    pub tokenizer: Tokenizer,
}

impl Corpus {
    pub fn builder(tokenizer: Tokenizer) -> CorpusBuilder {
        CorpusBuilder::new(tokenizer)
    }

    pub fn num_terms(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }

    /// Maps free text onto known term ids; unknown tokens are dropped.
    pub fn query_terms(&self, text: &str) -> Vec<TermId> {
        self.tokenizer
            .tokenize(text)
            .into_iter()
            .filter_map(|tok| self.dictionary.get(&tok.term).copied())
            .collect()
    }
}

impl CorpusAccessor for Corpus {
    fn document(&self, doc_id: DocId) -> Option<(&str, &[TermId])> {
        self.docs.get(doc_id as usize).map(|d| (d.external_id.as_str(), d.terms.as_slice()))
    }

    fn token(&self, term_id: TermId) -> Option<&str> {
        if term_id == PADDING_TERM {
            return None;
        }
        self.tokens.get(term_id as usize).map(String::as_str)
    }

    fn term_id(&self, token: &str) -> Option<TermId> {
        self.dictionary.get(token).copied()
    }

    fn document_frequency(&self, term_id: TermId) -> u32 {
        self.df.get(term_id as usize).copied().unwrap_or(0)
    }

    fn document_base(&self) -> DocId {
        0
    }

    fn maximum_document(&self) -> DocId {
        self.docs.len() as DocId
    }
}

/// Accumulates documents into a [`Corpus`], assigning term ids on first sight.
pub struct CorpusBuilder {
    corpus: Corpus,
}

impl CorpusBuilder {
    pub fn new(tokenizer: Tokenizer) -> Self {
        let corpus = Corpus {
            tokens: vec![String::new()],
            df: vec![0],
            tokenizer,
            ..Corpus::default()
        };
        Self { corpus }
    }

    /// Tokenizes `text`; stopword positions become padding entries.
    pub fn add_document(&mut self, external_id: impl Into<String>, text: &str) -> DocId {
        let stream = self.corpus.tokenizer.term_stream(text);
        self.add_tokens(external_id, stream)
    }

    /// Ingests an already tokenized stream; `None` marks a stop position.
    pub fn add_tokens<I, S>(&mut self, external_id: impl Into<String>, tokens: I) -> DocId
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let doc_id = self.corpus.docs.len() as DocId;
        let mut seen_in_doc: HashSet<TermId> = HashSet::new();
        let mut terms = Vec::new();
        for token in tokens {
            let Some(token) = token else {
                terms.push(PADDING_TERM);
                continue;
            };
            let tid = self.intern(token.into());
            if seen_in_doc.insert(tid) {
                self.corpus.df[tid as usize] += 1;
            }
            terms.push(tid);
        }
        self.corpus.docs.push(DocEntry { external_id: external_id.into(), terms });
        doc_id
    }

    fn intern(&mut self, token: String) -> TermId {
        if let Some(&tid) = self.corpus.dictionary.get(&token) {
            return tid;
        }
        let tid = self.corpus.tokens.len() as TermId;
        self.corpus.tokens.push(token.clone());
        self.corpus.df.push(0);
        self.corpus.dictionary.insert(token, tid);
        tid
    }

    pub fn build(self) -> Corpus {
        tracing::debug!(
            num_docs = self.corpus.docs.len(),
            num_terms = self.corpus.num_terms(),
            "corpus built"
        );
        self.corpus
    }
}
