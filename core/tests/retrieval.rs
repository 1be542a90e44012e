use glm_core::cache::CacheInputs;
use glm_core::config::{MixtureWeights, ModelConfig};
use glm_core::embedding::InMemoryEmbeddings;
use glm_core::model::MixtureModel;
use glm_core::persist::CachePaths;
use glm_core::retrieval::{RunConfig, RunOutcome, Retriever};
use glm_core::stats::CollectionStats;
use glm_core::tokenizer::Tokenizer;
use glm_core::{CandidatePool, Corpus, CorpusAccessor, Error, Queries};
use std::f64::consts::SQRT_2;
use std::fs;
use tempfile::tempdir;

fn raw_builder() -> glm_core::CorpusBuilder {
    Corpus::builder(Tokenizer { stem: false, remove_stopwords: false })
}

fn embeddings(rows: &[(&str, [f32; 3])]) -> InMemoryEmbeddings {
    let mut e = InMemoryEmbeddings::new(3);
    for (token, v) in rows {
        e.insert(*token, v.to_vec()).unwrap();
    }
    e
}

fn abcd() -> InMemoryEmbeddings {
    embeddings(&[
        ("a", [1.0, 0.0, 0.0]),
        ("b", [0.0, 1.0, 0.0]),
        ("c", [1.0, 1.0, 0.0]),
        ("d", [0.0, 0.0, 1.0]),
    ])
}

fn summary(outcome: RunOutcome) -> glm_core::retrieval::RunSummary {
    match outcome {
        RunOutcome::Written(s) => s,
        RunOutcome::AlreadyExists(p) => panic!("unexpected existing run at {}", p.display()),
    }
}

#[test]
fn two_document_scores_match_hand_computation() {
    let mut b = raw_builder();
    b.add_tokens("D1", [Some("a"), Some("a"), Some("c")]);
    b.add_tokens("D2", [Some("c"), None, Some("d"), Some("b")]);
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let mut queries = Queries::new();
    queries.insert("q1".into(), vec![corpus.term_id("a").unwrap(), corpus.term_id("c").unwrap()]);

    let third = 1.0 / 3.0;
    let config = ModelConfig { weights: MixtureWeights::new(third, third, third).unwrap(), ..ModelConfig::default() };
    let dir = tempdir().unwrap();
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: None };
    let model = MixtureModel::new(inputs, &config, &CachePaths::new(dir.path().join("cache"))).unwrap();

    // collection: a=2, c=2, b=1, d=1 over 6 occurrences
    // cohesion (first occurrence skipped): D1 -> cos(a, c) = 1/sqrt2, D2 -> cos(d, b) = 0
    // collection transform: a -> (c, b, d) gives 2/6; c -> (a, b, d) gives 0.5*2/6 + 0.5*1/6
    let w0 = config.weights.background();
    let mix = |term: f64, doc_t: f64, col_t: f64, bg: f64| third * (term + doc_t + col_t) + w0 * bg;
    let col_a = 1.0 / 3.0;
    let col_c = 0.25;
    let d1 = mix(2.0 / 3.0, (2.0 * SQRT_2 + 1.0) / 3.0, col_a, 1.0 / 3.0).ln()
        + mix(1.0 / 3.0, (2.0 + SQRT_2) / 3.0, col_c, 1.0 / 3.0).ln();
    let d2 = mix(0.0, 0.0, col_a, 1.0 / 3.0).ln() + mix(1.0 / 3.0, 0.0, col_c, 1.0 / 3.0).ln();

    let query = &queries["q1"];
    assert!((model.score(0, query).unwrap() - d1).abs() < 1e-9);
    assert!((model.score(1, query).unwrap() - d2).abs() < 1e-9);

    let run = summary(Retriever::new(&model, &queries, RunConfig::new(dir.path())).run("glm", None).unwrap());
    let ids: Vec<&str> = run.rankings["q1"].iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["D1", "D2"]);
    let text = fs::read_to_string(dir.path().join("glm.run")).unwrap();
    assert!(text.starts_with("q1 Q0 D1 1 "));
    assert_eq!(text.lines().count(), 2);
}

#[test]
fn top_k_keeps_the_best_documents_in_order() {
    let mut b = raw_builder();
    for i in 1..=5usize {
        let tokens: Vec<Option<&str>> = std::iter::repeat(Some("a")).take(i).chain(std::iter::repeat(Some("b")).take(6 - i)).collect();
        b.add_tokens(format!("doc{i}"), tokens);
    }
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let mut queries = Queries::new();
    queries.insert("q".into(), vec![corpus.term_id("a").unwrap()]);

    let config = ModelConfig { weights: MixtureWeights::new(1.0, 0.0, 0.0).unwrap(), top_k: 2, ..ModelConfig::default() };
    let dir = tempdir().unwrap();
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: None };
    let model = MixtureModel::new(inputs, &config, &CachePaths::new(dir.path().join("cache"))).unwrap();
    let run_config = RunConfig::new(dir.path().join("runs"));

    let run = summary(Retriever::new(&model, &queries, run_config).run("pure-tf", None).unwrap());
    assert_eq!(run.rankings["q"].len(), 5);

    let text = fs::read_to_string(dir.path().join("runs/pure-tf.run")).unwrap();
    let lines: Vec<Vec<&str>> = text.lines().map(|l| l.split(' ').collect()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!((lines[0][2], lines[0][3]), ("doc5", "1"));
    assert_eq!((lines[1][2], lines[1][3]), ("doc4", "2"));
    let s1: f64 = lines[0][4].parse().unwrap();
    let s2: f64 = lines[1][4].parse().unwrap();
    assert_eq!(s1, (5.0f64 / 6.0).ln());
    assert!(s1 > s2);
}

#[test]
fn second_run_leaves_output_untouched() {
    let mut b = raw_builder();
    b.add_tokens("x", [Some("a"), Some("b")]);
    b.add_tokens("y", [Some("c"), Some("a"), Some("d")]);
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let mut queries = Queries::new();
    queries.insert("q".into(), vec![corpus.term_id("a").unwrap()]);

    let dir = tempdir().unwrap();
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: None };
    let model = MixtureModel::new(inputs, &ModelConfig::default(), &CachePaths::new(dir.path().join("cache"))).unwrap();
    let retriever = Retriever::new(&model, &queries, RunConfig::new(dir.path()));

    assert!(matches!(retriever.run("glm", None).unwrap(), RunOutcome::Written(_)));
    let first = fs::read(dir.path().join("glm.run")).unwrap();
    assert!(matches!(retriever.run("glm", None).unwrap(), RunOutcome::AlreadyExists(_)));
    assert_eq!(fs::read(dir.path().join("glm.run")).unwrap(), first);

    // a differently named run over the same inputs is byte-identical
    retriever.run("glm-again", None).unwrap();
    let again = fs::read_to_string(dir.path().join("glm-again.run")).unwrap();
    assert_eq!(again.replace("glm-again", "glm").into_bytes(), first);
}

#[test]
fn numeric_failures_are_skipped_not_fatal() {
    let mut b = raw_builder();
    b.add_tokens("full", [Some("a"), Some("b")]);
    b.add_tokens("partial", [Some("a"), Some("d")]);
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let mut queries = Queries::new();
    queries.insert("q".into(), vec![corpus.term_id("a").unwrap(), corpus.term_id("b").unwrap()]);

    let config = ModelConfig { weights: MixtureWeights::new(1.0, 0.0, 0.0).unwrap(), ..ModelConfig::default() };
    let dir = tempdir().unwrap();
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: None };
    let model = MixtureModel::new(inputs, &config, &CachePaths::new(dir.path().join("cache"))).unwrap();

    let run = summary(Retriever::new(&model, &queries, RunConfig::new(dir.path())).run("glm", None).unwrap());
    assert_eq!(run.failures.len(), 1);
    assert_eq!(corpus.document(run.failures[0].doc_id).unwrap().0, "partial");
    let ids: Vec<&str> = run.rankings["q"].iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["full"]);
}

#[test]
fn zero_scores_are_neither_ranked_nor_failures() {
    let mut b = raw_builder();
    b.add_tokens("only_a", [Some("a")]);
    b.add_tokens("ab", [Some("a"), Some("b")]);
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let mut queries = Queries::new();
    queries.insert("q".into(), vec![corpus.term_id("a").unwrap()]);

    let config = ModelConfig { weights: MixtureWeights::new(1.0, 0.0, 0.0).unwrap(), ..ModelConfig::default() };
    let dir = tempdir().unwrap();
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: None };
    let model = MixtureModel::new(inputs, &config, &CachePaths::new(dir.path().join("cache"))).unwrap();
    assert_eq!(model.score(0, &queries["q"]).unwrap(), 0.0);

    let run = summary(Retriever::new(&model, &queries, RunConfig::new(dir.path())).run("glm", None).unwrap());
    assert_eq!(run.scored_pairs, 2);
    assert!(run.failures.is_empty());
    let ids: Vec<&str> = run.rankings["q"].iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["ab"]);
    let text = fs::read_to_string(dir.path().join("glm.run")).unwrap();
    assert_eq!(text.lines().count(), 1);
}

#[test]
fn out_of_vocabulary_query_term_aborts_before_output() {
    let mut b = raw_builder();
    b.add_tokens("x", [Some("a"), Some("zeta")]);
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let mut queries = Queries::new();
    queries.insert("q".into(), vec![corpus.term_id("zeta").unwrap()]);

    let dir = tempdir().unwrap();
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: None };
    let err = MixtureModel::new(inputs, &ModelConfig::default(), &CachePaths::new(dir.path())).err().unwrap();
    assert!(matches!(err, Error::OutOfVocabulary(ref t) if t == "zeta"));
    assert!(!dir.path().join("glm.run").exists());
}

#[test]
fn candidate_pool_restricts_scored_documents() {
    let mut b = raw_builder();
    b.add_tokens("one", [Some("a"), Some("b")]);
    b.add_tokens("two", [Some("a"), Some("c")]);
    b.add_tokens("three", [Some("d"), Some("b")]);
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let mut queries = Queries::new();
    queries.insert("q".into(), vec![corpus.term_id("a").unwrap()]);
    queries.insert("unused".into(), vec![corpus.term_id("d").unwrap()]);
    let mut pool = CandidatePool::new();
    // "three" lacks the query term and is dropped
    pool.insert("q".into(), vec![1, 2]);

    let dir = tempdir().unwrap();
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: Some(&pool) };
    let model = MixtureModel::new(inputs, &ModelConfig::default(), &CachePaths::new(dir.path().join("cache"))).unwrap();
    let retriever = Retriever::new(&model, &queries, RunConfig::new(dir.path()));

    let run = summary(retriever.run("pool", Some(&pool)).unwrap());
    assert_eq!(run.rankings.len(), 1);
    let ids: Vec<&str> = run.rankings["q"].iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["two"]);

    let mut bad = CandidatePool::new();
    bad.insert("missing".into(), vec![0]);
    assert!(matches!(retriever.run("bad", Some(&bad)), Err(Error::UnknownQuery(_))));
    assert!(!dir.path().join("bad.run").exists());
}

#[test]
fn invalid_weights_fail_before_any_cache_is_written() {
    let mut b = raw_builder();
    b.add_tokens("x", [Some("a")]);
    let corpus = b.build();
    let stats = CollectionStats::from_corpus(&corpus);
    let e = abcd();
    let queries = Queries::new();
    let dir = tempdir().unwrap();
    let config = ModelConfig { weights: MixtureWeights { lambda: 0.6, alpha: 0.6, beta: 0.0 }, ..ModelConfig::default() };
    let inputs = CacheInputs { corpus: &corpus, stats: &stats, embeddings: &e, queries: &queries, candidates: None };
    let paths = CachePaths::new(dir.path());
    assert!(matches!(MixtureModel::new(inputs, &config, &paths), Err(Error::Config(_))));
    assert!(!paths.doc_sim_sums().exists());
}
