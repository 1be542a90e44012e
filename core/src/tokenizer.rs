use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// A surviving token and its position among all word matches of the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub position: usize,
}

/// Text analysis shared by documents and queries.
///
/// Pipeline: NFKC normalization, lowercasing, Unicode word matching, optional
/// stopword removal, optional English stemming. Removed words keep their slot in
/// the position numbering so callers can reconstruct stop positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokenizer {
    pub stem: bool,
    pub remove_stopwords: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self { stem: true, remove_stopwords: true }
    }
}

impl Tokenizer {
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        WORD.find_iter(&normalized)
            .enumerate()
            .filter(|(_, m)| !(self.remove_stopwords && is_stopword(m.as_str())))
            .map(|(position, m)| {
                let term = if self.stem { STEMMER.stem(m.as_str()).into_owned() } else { m.as_str().to_string() };
                Token { term, position }
            })
            .collect()
    }

    /// Term stream with `None` in every position a stopword occupied.
    pub fn term_stream(&self, text: &str) -> Vec<Option<String>> {
        let mut stream = Vec::new();
        for token in self.tokenize(text) {
            stream.resize(token.position, None);
            stream.push(Some(token.term));
        }
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_by_default() {
        let t = Tokenizer::default().tokenize("Running, runner's run!");
        assert!(t.iter().any(|tok| tok.term == "run"));
    }

    #[test]
    fn stop_positions_become_gaps() {
        let stream = Tokenizer::default().term_stream("the cat and the hat");
        assert_eq!(stream, vec![None, Some("cat".into()), None, None, Some("hat".into())]);
    }

    #[test]
    fn raw_mode_keeps_everything() {
        let tok = Tokenizer { stem: false, remove_stopwords: false };
        let terms: Vec<_> = tok.tokenize("The Runners").into_iter().map(|t| t.term).collect();
        assert_eq!(terms, vec!["the", "runners"]);
    }
}
