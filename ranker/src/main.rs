use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glm_core::cache::CacheInputs;
use glm_core::config::{CohesionRegion, MixtureWeights, ModelConfig};
use glm_core::embedding::InMemoryEmbeddings;
use glm_core::model::MixtureModel;
use glm_core::persist::{load_candidates, load_corpus, save_candidates, save_corpus, CachePaths, IndexPaths};
use glm_core::retrieval::{RunConfig, RunOutcome, Retriever};
use glm_core::stats::CollectionStats;
use glm_core::tfidf::{TfIdf, TfTransform};
use glm_core::tokenizer::Tokenizer;
use glm_core::{Corpus, Queries};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: String,
    #[serde(default)]
    title: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct InputQuery {
    id: String,
    text: String,
}

#[derive(Parser)]
#[command(name = "ranker")]
#[command(about = "Rank documents with a generalized (embedding-smoothed) language model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the corpus from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
        /// Keep stopwords and skip stemming
        #[arg(long, default_value_t = false)]
        raw_tokens: bool,
    },
    /// Pre-select candidate documents per query with tf-idf
    Candidates {
        #[arg(long)]
        index: String,
        /// JSONL file of {"id", "text"} queries
        #[arg(long)]
        queries: String,
        /// Documents kept per query
        #[arg(long, default_value_t = 1000)]
        top: usize,
        /// Term frequency transformation
        #[arg(long, default_value = "log")]
        tf_transform: String,
        #[arg(long)]
        output: String,
    },
    /// Score queries with the mixture model and write a TREC run file
    Run {
        #[arg(long)]
        index: String,
        #[arg(long)]
        queries: String,
        /// Embeddings in word2vec text format
        #[arg(long)]
        embeddings: String,
        #[arg(long)]
        model_name: String,
        /// Candidate pool written by `candidates`; defaults to every matching document
        #[arg(long)]
        candidates: Option<String>,
        /// JSON model configuration; flags below override it
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        lambda: Option<f64>,
        #[arg(long)]
        alpha: Option<f64>,
        #[arg(long)]
        beta: Option<f64>,
        /// Neighbours per query term for the collection transform
        #[arg(long)]
        neighbours: Option<usize>,
        #[arg(long)]
        top_k: Option<usize>,
        /// skip_first_term or all_pairs
        #[arg(long)]
        cohesion: Option<CohesionRegion>,
        #[arg(long, default_value = "./cache")]
        cache_dir: String,
        #[arg(long, default_value = "./runs")]
        output_dir: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, raw_tokens } => build_corpus(&input, &output, raw_tokens),
        Commands::Candidates { index, queries, top, tf_transform, output } => {
            let corpus = load_corpus(&IndexPaths::new(&index)).context("loading corpus")?;
            let stats = CollectionStats::from_corpus(&corpus);
            let queries = read_queries(Path::new(&queries), &corpus)?;
            let tfidf = TfIdf::new(tf_transform.parse::<TfTransform>()?);
            let pool = tfidf.top_candidates(&corpus, &stats, &queries, top);
            save_candidates(Path::new(&output), &pool)?;
            tracing::info!(output = %output, "candidate pools written");
            Ok(())
        }
        Commands::Run {
            index,
            queries,
            embeddings,
            model_name,
            candidates,
            config,
            lambda,
            alpha,
            beta,
            neighbours,
            top_k,
            cohesion,
            cache_dir,
            output_dir,
        } => {
            let mut model_config = match config {
                Some(path) => ModelConfig::from_json_file(Path::new(&path)).with_context(|| format!("reading {path}"))?,
                None => ModelConfig::default(),
            };
            let w = model_config.weights;
            model_config.weights = MixtureWeights {
                lambda: lambda.unwrap_or(w.lambda),
                alpha: alpha.unwrap_or(w.alpha),
                beta: beta.unwrap_or(w.beta),
            };
            model_config.neighbours = neighbours.unwrap_or(model_config.neighbours);
            model_config.top_k = top_k.unwrap_or(model_config.top_k);
            model_config.cohesion = cohesion.unwrap_or(model_config.cohesion);
            model_config.validate()?;

            let run_config = RunConfig::new(&output_dir);
            if run_config.run_path(&model_name).exists() {
                tracing::info!(model_name = %model_name, "run file already exists, nothing to do");
                return Ok(());
            }

            let corpus = load_corpus(&IndexPaths::new(&index)).context("loading corpus")?;
            let stats = CollectionStats::from_corpus(&corpus);
            let queries = read_queries(Path::new(&queries), &corpus)?;
            let pool = candidates.map(|p| load_candidates(Path::new(&p))).transpose()?;
            let file = File::open(&embeddings).with_context(|| format!("opening {embeddings}"))?;
            let vectors = InMemoryEmbeddings::from_word2vec_text(BufReader::new(file))?;

            let inputs = CacheInputs {
                corpus: &corpus,
                stats: &stats,
                embeddings: &vectors,
                queries: &queries,
                candidates: pool.as_ref(),
            };
            let model = MixtureModel::new(inputs, &model_config, &CachePaths::new(&cache_dir))?;
            match Retriever::new(&model, &queries, run_config).run(&model_name, pool.as_ref())? {
                RunOutcome::AlreadyExists(path) => tracing::info!(path = %path.display(), "run skipped"),
                RunOutcome::Written(summary) => {
                    if !summary.failures.is_empty() {
                        tracing::warn!(failures = summary.failures.len(), "some pairs could not be scored");
                    }
                }
            }
            Ok(())
        }
    }
}

fn build_corpus(input: &str, output: &str, raw_tokens: bool) -> Result<()> {
    let input_path = Path::new(input);
    let tokenizer = if raw_tokens { Tokenizer { stem: false, remove_stopwords: false } } else { Tokenizer::default() };
    let mut builder = Corpus::builder(tokenizer);

    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    } else {
        bail!("input path {input} does not exist");
    }

    for file in files {
        for doc in read_docs(&file)? {
            let text = if doc.title.is_empty() { doc.body } else { format!("{}\n{}", doc.title, doc.body) };
            builder.add_document(doc.id, &text);
        }
    }

    let corpus = builder.build();
    tracing::info!(num_docs = corpus.docs.len(), num_terms = corpus.num_terms(), "ingested documents");
    save_corpus(&IndexPaths::new(output), &corpus)?;
    tracing::info!(output, "corpus build complete");
    Ok(())
}

fn read_docs(file: &Path) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        return read_jsonl(reader);
    }
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    Ok(match json {
        serde_json::Value::Array(arr) => arr.into_iter().map(serde_json::from_value).collect::<Result<Vec<InputDoc>, _>>()?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(json)?],
        _ => Vec::new(),
    })
}

fn read_jsonl<T: serde::de::DeserializeOwned, R: BufRead>(reader: R) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line).with_context(|| format!("line {}", idx + 1))?);
    }
    Ok(out)
}

fn read_queries(path: &Path, corpus: &Corpus) -> Result<Queries> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?);
    let raw: Vec<InputQuery> = read_jsonl(reader)?;
    let mut queries = Queries::new();
    for q in raw {
        let terms = corpus.query_terms(&q.text);
        if terms.is_empty() {
            tracing::warn!(query = %q.id, "no query term is in the corpus vocabulary, dropping query");
            continue;
        }
        queries.insert(q.id, terms);
    }
    Ok(queries)
}
